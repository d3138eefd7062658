//! ERF archives (HAK packs, module archives, generic ERFs).
//!
//! Layout (little endian):
//!
//! ```text
//! 0x00  file type      [u8; 4]  "HAK " | "MOD " | "ERF " | "SAV "
//! 0x04  version        [u8; 4]  "V1.0" (16-byte resrefs) | "V1.1" (32-byte resrefs)
//! 0x08  language count u32
//! 0x0C  loc. str size  u32
//! 0x10  entry count    u32
//! 0x14  loc. str off   u32
//! 0x18  key list off   u32
//! 0x1C  res. list off  u32
//! 0x20  build year, build day, description strref, 116 reserved bytes
//! ```
//!
//! Each key is `resref, res id (u32), res type (u16), unused (u16)`; each resource
//! list element is `offset (u32), size (u32)`, addressed by key position.

use crate::archive::{ArchiveEntry, ArchiveIndex, ArchiveKind};
use crate::error::{FormatError, Result};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Read, Seek, SeekFrom, Write};

pub const ERF_HEADER_SIZE: u32 = 160;

/// Resource type ids and their file extensions.
const RESOURCE_TYPES: &[(u16, &str)] = &[
    (1, "bmp"),
    (3, "tga"),
    (4, "wav"),
    (10, "txt"),
    (2009, "nss"),
    (2010, "ncs"),
    (2012, "are"),
    (2014, "ifo"),
    (2017, "2da"),
    (2018, "tlk"),
    (2023, "git"),
    (2025, "uti"),
    (2027, "utc"),
    (2029, "dlg"),
    (2033, "dds"),
    (2037, "gff"),
    (4000, "mdb"),
];

/// Extension for an ERF resource type id.
pub fn extension_for_type(res_type: u16) -> Option<&'static str> {
    RESOURCE_TYPES
        .iter()
        .find(|(id, _)| *id == res_type)
        .map(|(_, ext)| *ext)
}

/// ERF resource type id for an extension (case-insensitive).
pub fn type_for_extension(ext: &str) -> Option<u16> {
    RESOURCE_TYPES
        .iter()
        .find(|(_, e)| e.eq_ignore_ascii_case(ext))
        .map(|(id, _)| *id)
}

/// File type tag of an ERF container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErfType {
    Erf,
    Hak,
    Mod,
    Sav,
}

impl ErfType {
    pub fn magic(self) -> &'static [u8; 4] {
        match self {
            ErfType::Erf => b"ERF ",
            ErfType::Hak => b"HAK ",
            ErfType::Mod => b"MOD ",
            ErfType::Sav => b"SAV ",
        }
    }

    pub fn from_magic(magic: &[u8; 4]) -> Option<Self> {
        [ErfType::Erf, ErfType::Hak, ErfType::Mod, ErfType::Sav]
            .into_iter()
            .find(|t| t.magic() == magic)
    }
}

/// Key list layout version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErfVersion {
    V1_0,
    V1_1,
}

impl ErfVersion {
    fn tag(self) -> &'static [u8; 4] {
        match self {
            ErfVersion::V1_0 => b"V1.0",
            ErfVersion::V1_1 => b"V1.1",
        }
    }

    fn resref_len(self) -> usize {
        match self {
            ErfVersion::V1_0 => 16,
            ErfVersion::V1_1 => 32,
        }
    }

    fn from_tag(tag: &[u8; 4]) -> Option<Self> {
        match tag {
            b"V1.0" => Some(ErfVersion::V1_0),
            b"V1.1" => Some(ErfVersion::V1_1),
            _ => None,
        }
    }
}

/// Read the key and resource lists of an ERF container.
///
/// Keys with unknown resource types are skipped.
pub fn read_erf_index<R: Read + Seek>(reader: &mut R) -> Result<ArchiveIndex> {
    reader.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 4];
    let mut tag = [0u8; 4];
    reader.read_exact(&mut magic).map_err(truncated("ERF header"))?;
    reader.read_exact(&mut tag).map_err(truncated("ERF header"))?;

    if ErfType::from_magic(&magic).is_none() {
        return Err(FormatError::InvalidMagic {
            expected: "HAK/MOD/ERF/SAV",
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    let version = ErfVersion::from_tag(&tag).ok_or_else(|| {
        FormatError::UnsupportedVersion(String::from_utf8_lossy(&tag).into_owned())
    })?;

    let _language_count = reader.read_u32::<LE>().map_err(truncated("ERF header"))?;
    let _localized_size = reader.read_u32::<LE>().map_err(truncated("ERF header"))?;
    let entry_count = reader.read_u32::<LE>().map_err(truncated("ERF header"))?;
    let _localized_offset = reader.read_u32::<LE>().map_err(truncated("ERF header"))?;
    let key_list_offset = reader.read_u32::<LE>().map_err(truncated("ERF header"))?;
    let resource_list_offset = reader.read_u32::<LE>().map_err(truncated("ERF header"))?;

    let resref_len = version.resref_len();
    let stream_len = reader.seek(SeekFrom::End(0))?;
    let keys_end = key_list_offset as u64 + entry_count as u64 * (resref_len as u64 + 8);
    let resources_end = resource_list_offset as u64 + entry_count as u64 * 8;
    if keys_end > stream_len || resources_end > stream_len {
        return Err(FormatError::Truncated(format!(
            "ERF declares {entry_count} entries but holds {stream_len} bytes"
        )));
    }

    let mut keys = Vec::with_capacity(entry_count as usize);
    reader.seek(SeekFrom::Start(key_list_offset as u64))?;
    for _ in 0..entry_count {
        let mut resref = vec![0u8; resref_len];
        reader.read_exact(&mut resref).map_err(truncated("ERF key list"))?;
        let _res_id = reader.read_u32::<LE>().map_err(truncated("ERF key list"))?;
        let res_type = reader.read_u16::<LE>().map_err(truncated("ERF key list"))?;
        let _unused = reader.read_u16::<LE>().map_err(truncated("ERF key list"))?;
        keys.push((resref, res_type));
    }

    reader.seek(SeekFrom::Start(resource_list_offset as u64))?;
    let mut entries = Vec::with_capacity(keys.len());
    for (slot, (resref, res_type)) in keys.into_iter().enumerate() {
        let offset = reader.read_u32::<LE>().map_err(truncated("ERF resource list"))?;
        let size = reader.read_u32::<LE>().map_err(truncated("ERF resource list"))?;

        let Some(ext) = extension_for_type(res_type) else {
            tracing::trace!("Skipping ERF key with unknown resource type {}", res_type);
            continue;
        };
        let end = resref.iter().position(|&b| b == 0).unwrap_or(resref.len());
        let stem = String::from_utf8_lossy(&resref[..end]).to_ascii_lowercase();
        if stem.is_empty() {
            continue;
        }

        entries.push(ArchiveEntry {
            name: format!("{stem}.{ext}"),
            slot,
            offset: offset as u64,
            size: size as u64,
        });
    }

    Ok(ArchiveIndex {
        kind: ArchiveKind::Erf,
        entries,
    })
}

fn truncated(what: &'static str) -> impl Fn(std::io::Error) -> FormatError {
    move |e| FormatError::Truncated(format!("{what}: {e}"))
}

/// Builds an ERF container in memory.
///
/// Entries keep insertion order, which is also their key order in the output.
pub struct ErfWriter {
    erf_type: ErfType,
    version: ErfVersion,
    entries: Vec<(String, u16, Vec<u8>)>,
}

impl ErfWriter {
    pub fn new(erf_type: ErfType, version: ErfVersion) -> Self {
        Self {
            erf_type,
            version,
            entries: Vec::new(),
        }
    }

    /// Add a resource by file name (`"classes.2da"`).
    pub fn add(&mut self, name: &str, data: Vec<u8>) -> Result<&mut Self> {
        let (stem, ext) = name
            .rsplit_once('.')
            .ok_or_else(|| FormatError::Malformed(format!("resource '{name}' has no extension")))?;
        let res_type = type_for_extension(ext)
            .ok_or_else(|| FormatError::Malformed(format!("unknown resource extension '{ext}'")))?;
        if stem.is_empty() || stem.len() > self.version.resref_len() {
            return Err(FormatError::Malformed(format!(
                "resref '{stem}' must be 1..={} bytes",
                self.version.resref_len()
            )));
        }
        self.entries.push((stem.to_ascii_lowercase(), res_type, data));
        Ok(self)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let resref_len = self.version.resref_len();
        let count = self.entries.len() as u32;
        let key_size = resref_len as u32 + 8;
        let key_list_offset = ERF_HEADER_SIZE;
        let resource_list_offset = key_list_offset + count * key_size;
        let data_offset = resource_list_offset + count * 8;

        writer.write_all(self.erf_type.magic())?;
        writer.write_all(self.version.tag())?;
        writer.write_u32::<LE>(0)?; // language count
        writer.write_u32::<LE>(0)?; // localized string size
        writer.write_u32::<LE>(count)?;
        writer.write_u32::<LE>(ERF_HEADER_SIZE)?;
        writer.write_u32::<LE>(key_list_offset)?;
        writer.write_u32::<LE>(resource_list_offset)?;
        writer.write_u32::<LE>(0)?; // build year
        writer.write_u32::<LE>(0)?; // build day
        writer.write_u32::<LE>(u32::MAX)?; // description strref
        writer.write_all(&[0u8; 116])?;

        for (id, (stem, res_type, _)) in self.entries.iter().enumerate() {
            let mut resref = vec![0u8; resref_len];
            resref[..stem.len()].copy_from_slice(stem.as_bytes());
            writer.write_all(&resref)?;
            writer.write_u32::<LE>(id as u32)?;
            writer.write_u16::<LE>(*res_type)?;
            writer.write_u16::<LE>(0)?;
        }

        let mut offset = data_offset;
        for (_, _, data) in &self.entries {
            writer.write_u32::<LE>(offset)?;
            writer.write_u32::<LE>(data.len() as u32)?;
            offset += data.len() as u32;
        }

        for (_, _, data) in &self.entries {
            writer.write_all(data)?;
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }
}
