//! The parsing service boundary.
//!
//! The resource manager locates bytes; a [`ParsingService`] decodes them. Calls are
//! stateless and return owned, immutable values, so parsed results can be cached
//! and shared across threads freely.

use gda_formats::{ArchiveEntry, ArchiveIndex, ArchiveKind, FormatError, StringTable, Table};
use std::io::{Read, Seek};

/// A seekable byte source (an open container file).
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Decoder for the formats the resource manager serves.
pub trait ParsingService: Send + Sync {
    fn parse_table(&self, bytes: &[u8]) -> Result<Table, FormatError>;

    fn parse_archive_index(&self, source: &mut dyn ReadSeek) -> Result<ArchiveIndex, FormatError>;

    fn read_archive_entry(
        &self,
        source: &mut dyn ReadSeek,
        kind: ArchiveKind,
        entry: &ArchiveEntry,
    ) -> Result<Vec<u8>, FormatError>;

    fn parse_string_table(&self, bytes: &[u8]) -> Result<StringTable, FormatError>;
}

/// [`ParsingService`] backed by `gda_formats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardParsers;

impl ParsingService for StandardParsers {
    fn parse_table(&self, bytes: &[u8]) -> Result<Table, FormatError> {
        gda_formats::parse_2da(bytes)
    }

    fn parse_archive_index(&self, mut source: &mut dyn ReadSeek) -> Result<ArchiveIndex, FormatError> {
        gda_formats::read_archive_index(&mut source)
    }

    fn read_archive_entry(
        &self,
        mut source: &mut dyn ReadSeek,
        kind: ArchiveKind,
        entry: &ArchiveEntry,
    ) -> Result<Vec<u8>, FormatError> {
        gda_formats::read_archive_entry(&mut source, kind, entry)
    }

    fn parse_string_table(&self, bytes: &[u8]) -> Result<StringTable, FormatError> {
        gda_formats::parse_tlk(bytes)
    }
}
