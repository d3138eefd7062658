//! Readers and writers for the data formats served by the resource manager.
//!
//! - [`twoda`]: text 2DA rule tables with a row view and fallback field lookup
//! - [`schema`]: canonical column names and aliases for well-known tables
//! - [`tlk`]: TLK V3.0 localized string tables
//! - [`erf`]: HAK/MOD/ERF archive indexes and an in-memory writer
//! - [`archive`]: container sniffing and a uniform index over ERF and zip
//!
//! Every parse entry point takes bytes (or a seekable reader) and returns an owned,
//! immutable value. Nothing is cached or reused between calls.

pub mod archive;
pub mod erf;
pub mod error;
pub mod schema;
pub mod tlk;
pub mod twoda;

pub use archive::{read_archive_entry, read_archive_index, ArchiveEntry, ArchiveIndex, ArchiveKind};
pub use erf::{ErfType, ErfVersion, ErfWriter};
pub use error::{FormatError, Result};
pub use schema::{schema_for, SchemaField, TableSchema};
pub use tlk::{parse_tlk, StringTable};
pub use twoda::{parse_2da, RowView, Table};
