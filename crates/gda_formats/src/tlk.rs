//! TLK V3.0 localized string tables.
//!
//! ```text
//! 0x00  "TLK " "V3.0"
//! 0x08  language id          u32
//! 0x0C  string count         u32
//! 0x10  string data offset   u32
//! 0x14  entries, 40 bytes each:
//!       flags u32, sound resref [u8; 16], volume variance u32, pitch variance u32,
//!       offset u32 (relative to string data), size u32, sound length f32
//! ```

use crate::error::{FormatError, Result};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

const TLK_MAGIC: &[u8; 4] = b"TLK ";
const TLK_VERSION: &[u8; 4] = b"V3.0";
const TLK_HEADER_SIZE: u32 = 20;
const TLK_ENTRY_SIZE: u32 = 40;
const FLAG_TEXT_PRESENT: u32 = 0x1;

/// A decoded string table. Entry `n` is string reference `n`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StringTable {
    pub language: u32,
    entries: Vec<String>,
}

impl StringTable {
    pub fn new(language: u32, entries: Vec<String>) -> Self {
        Self { language, entries }
    }

    /// String for a reference, `None` when out of range or empty.
    pub fn get(&self, strref: u32) -> Option<&str> {
        self.entries
            .get(strref as usize)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let count = self.entries.len() as u32;
        writer.write_all(TLK_MAGIC)?;
        writer.write_all(TLK_VERSION)?;
        writer.write_u32::<LE>(self.language)?;
        writer.write_u32::<LE>(count)?;
        writer.write_u32::<LE>(TLK_HEADER_SIZE + count * TLK_ENTRY_SIZE)?;

        let mut offset = 0u32;
        for entry in &self.entries {
            let flags = if entry.is_empty() { 0 } else { FLAG_TEXT_PRESENT };
            writer.write_u32::<LE>(flags)?;
            writer.write_all(&[0u8; 16])?;
            writer.write_u32::<LE>(0)?;
            writer.write_u32::<LE>(0)?;
            writer.write_u32::<LE>(offset)?;
            writer.write_u32::<LE>(entry.len() as u32)?;
            writer.write_f32::<LE>(0.0)?;
            offset += entry.len() as u32;
        }
        for entry in &self.entries {
            writer.write_all(entry.as_bytes())?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }
}

/// Parse a TLK V3.0 string table.
pub fn parse_tlk(bytes: &[u8]) -> Result<StringTable> {
    let mut reader = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    let mut version = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .and_then(|_| reader.read_exact(&mut version))
        .map_err(|_| FormatError::Truncated("TLK header".into()))?;

    if &magic != TLK_MAGIC {
        return Err(FormatError::InvalidMagic {
            expected: "TLK ",
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    if &version != TLK_VERSION {
        return Err(FormatError::UnsupportedVersion(
            String::from_utf8_lossy(&version).into_owned(),
        ));
    }

    let language = reader.read_u32::<LE>()?;
    let count = reader.read_u32::<LE>()?;
    let data_offset = reader.read_u32::<LE>()? as u64;

    let table_end = TLK_HEADER_SIZE as u64 + count as u64 * TLK_ENTRY_SIZE as u64;
    if table_end > bytes.len() as u64 {
        return Err(FormatError::Truncated(format!(
            "TLK declares {count} entries but holds {} bytes",
            bytes.len()
        )));
    }

    let mut entries = Vec::with_capacity(count as usize);
    for strref in 0..count {
        reader.seek(SeekFrom::Start(
            TLK_HEADER_SIZE as u64 + strref as u64 * TLK_ENTRY_SIZE as u64,
        ))?;
        let flags = reader.read_u32::<LE>()?;
        reader.seek(SeekFrom::Current(24))?;
        let offset = reader.read_u32::<LE>()? as u64;
        let size = reader.read_u32::<LE>()? as u64;

        if flags & FLAG_TEXT_PRESENT == 0 || size == 0 {
            entries.push(String::new());
            continue;
        }

        let start = data_offset + offset;
        let end = start + size;
        let Some(text) = bytes.get(start as usize..end as usize) else {
            return Err(FormatError::Truncated(format!(
                "TLK string {strref} spans {start}..{end} past end of data"
            )));
        };
        entries.push(String::from_utf8_lossy(text).into_owned());
    }

    Ok(StringTable { language, entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_parse() {
        let table = StringTable::new(
            0,
            vec!["Barbarian".into(), String::new(), "Bard".into()],
        );
        let parsed = parse_tlk(&table.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, table);
        assert_eq!(parsed.get(0), Some("Barbarian"));
        assert_eq!(parsed.get(1), None);
        assert_eq!(parsed.get(2), Some("Bard"));
        assert_eq!(parsed.get(99), None);
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(
            parse_tlk(b"GFF V3.2\0\0\0\0\0\0\0\0\0\0\0\0"),
            Err(FormatError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_truncated_entry_table() {
        let mut bytes = StringTable::new(0, vec!["x".into()]).to_bytes().unwrap();
        bytes.truncate(30);
        assert!(matches!(parse_tlk(&bytes), Err(FormatError::Truncated(_))));
    }
}
