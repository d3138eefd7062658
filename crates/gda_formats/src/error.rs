//! Error types for format readers and writers.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FormatError>;

/// Errors produced while decoding or encoding game data formats.
#[derive(Error, Debug)]
pub enum FormatError {
    /// Reading from or writing to the underlying source failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The zip container could not be read.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The leading signature did not match any supported format.
    #[error("Invalid magic: expected {expected}, found {found:?}")]
    InvalidMagic {
        expected: &'static str,
        found: String,
    },

    /// The signature matched but the version tag is not supported.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    /// The data ended before a structure was complete.
    #[error("Truncated data: {0}")]
    Truncated(String),

    /// The data is structurally invalid.
    #[error("Malformed data: {0}")]
    Malformed(String),
}
