//! Archive container indexes.
//!
//! Two container families carry game resources:
//!
//! - **ERF** (`HAK `, `MOD `, `ERF `): HAK packs and module archives, read by
//!   [`crate::erf`].
//! - **Zip**: the base installation's data archives (`2da.zip`, `2da_x1.zip`, ...).
//!
//! [`read_archive_index`] sniffs the container signature and returns a uniform
//! [`ArchiveIndex`]; [`read_archive_entry`] fetches one entry's bytes.

use crate::erf;
use crate::error::{FormatError, Result};
use std::io::{Read, Seek, SeekFrom};

/// Container family of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Erf,
    Zip,
}

/// One named entry inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Lowercase `resref.ext` name.
    pub name: String,
    /// Position of the entry in the container's own directory.
    pub slot: usize,
    /// Absolute byte offset of the entry data (ERF only; zero for zip).
    pub offset: u64,
    /// Uncompressed size in bytes.
    pub size: u64,
}

/// Directory of an archive, in the container's own entry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveIndex {
    pub kind: ArchiveKind,
    pub entries: Vec<ArchiveEntry>,
}

const ZIP_LOCAL_MAGIC: [u8; 4] = *b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: [u8; 4] = *b"PK\x05\x06";

/// Detect the container family from its leading bytes.
pub fn sniff_archive_kind(magic: &[u8]) -> Option<ArchiveKind> {
    let magic: [u8; 4] = magic.get(..4)?.try_into().ok()?;
    if magic == ZIP_LOCAL_MAGIC || magic == ZIP_EMPTY_MAGIC {
        Some(ArchiveKind::Zip)
    } else if erf::ErfType::from_magic(&magic).is_some() {
        Some(ArchiveKind::Erf)
    } else {
        None
    }
}

/// Read an archive's entry directory.
pub fn read_archive_index<R: Read + Seek>(reader: &mut R) -> Result<ArchiveIndex> {
    let mut magic = [0u8; 4];
    reader.seek(SeekFrom::Start(0))?;
    reader
        .read_exact(&mut magic)
        .map_err(|_| FormatError::Truncated("archive shorter than its signature".into()))?;
    reader.seek(SeekFrom::Start(0))?;

    match sniff_archive_kind(&magic) {
        Some(ArchiveKind::Erf) => erf::read_erf_index(reader),
        Some(ArchiveKind::Zip) => read_zip_index(reader),
        None => Err(FormatError::InvalidMagic {
            expected: "ERF or zip archive",
            found: String::from_utf8_lossy(&magic).into_owned(),
        }),
    }
}

/// Read the bytes of a single entry previously listed by [`read_archive_index`].
pub fn read_archive_entry<R: Read + Seek>(
    reader: &mut R,
    kind: ArchiveKind,
    entry: &ArchiveEntry,
) -> Result<Vec<u8>> {
    match kind {
        ArchiveKind::Erf => {
            let stream_len = reader.seek(SeekFrom::End(0))?;
            if entry.offset.saturating_add(entry.size) > stream_len {
                return Err(FormatError::Truncated(format!(
                    "ERF entry '{}' extends past end",
                    entry.name
                )));
            }
            reader.seek(SeekFrom::Start(entry.offset))?;
            let mut data = vec![0u8; entry.size as usize];
            reader.read_exact(&mut data).map_err(|_| {
                FormatError::Truncated(format!("ERF entry '{}' extends past end", entry.name))
            })?;
            Ok(data)
        }
        ArchiveKind::Zip => {
            let mut archive = zip::ZipArchive::new(reader)?;
            let mut file = archive.by_index(entry.slot)?;
            let mut data = Vec::with_capacity(entry.size as usize);
            file.read_to_end(&mut data)?;
            Ok(data)
        }
    }
}

fn read_zip_index<R: Read + Seek>(reader: &mut R) -> Result<ArchiveIndex> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut entries = Vec::with_capacity(archive.len());

    for slot in 0..archive.len() {
        let file = archive.by_index_raw(slot)?;
        if file.is_dir() {
            continue;
        }
        // Entries may sit in folders inside the zip; only the file name is addressable.
        let name = file
            .name()
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        entries.push(ArchiveEntry {
            name,
            slot,
            offset: 0,
            size: file.size(),
        });
    }

    Ok(ArchiveIndex {
        kind: ArchiveKind::Zip,
        entries,
    })
}
