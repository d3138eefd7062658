//! Error types for resource management.
//!
//! All fallible functions in this crate return [`Result<T>`]. Most failures never
//! reach callers: unreadable containers and undecodable resources are logged and
//! treated as absent, and snapshot problems turn into rebuilds. The variants that do
//! surface are configuration problems at start-up and [`Error::ContextSwitch`].

use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing game resources.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or serialize JSON (module and save descriptors).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to parse a TOML configuration file.
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Failed to serialize a TOML configuration file.
    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// MessagePack encoding failed (snapshot metadata, cached tables).
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed (snapshot metadata, cached tables).
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A located resource or container could not be decoded.
    #[error("Format error: {0}")]
    Format(#[from] gda_formats::FormatError),

    /// The install root is missing or not a directory.
    #[error("Invalid install directory: {0}")]
    InvalidInstallDir(String),

    /// A custom override directory is missing or not a directory.
    #[error("Invalid override directory: {0}")]
    InvalidOverrideDir(Utf8PathBuf),

    /// A resource name could not be normalized.
    #[error("Invalid resource name: {0:?}")]
    InvalidResourceName(String),

    /// No module with this identity exists in any module directory.
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// The save location has no readable save descriptor.
    #[error("Save not found: {0}")]
    SaveNotFound(Utf8PathBuf),

    /// Switching the active module or campaign failed; the previous context is
    /// still active.
    #[error("Context switch to '{identity}' failed: {reason}")]
    ContextSwitch { identity: String, reason: String },

    /// Persisted cache state disagrees with itself or with the filesystem.
    #[error("Cache inconsistency: {0}")]
    CacheInconsistency(String),

    /// Zstd compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Catch-all for other failures.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap any error as a context switch failure for `identity`.
    pub(crate) fn context_switch(identity: impl Into<String>, reason: impl ToString) -> Self {
        Error::ContextSwitch {
            identity: identity.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(e: tempfile::PersistError) -> Self {
        Error::Io(e.error)
    }
}
