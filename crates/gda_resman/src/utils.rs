//! Filesystem helpers: file stamps, bounded-retry reads, case-insensitive lookup.

use crate::config::ResmanConfig;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};

/// Size and modification time of a file or directory, as seen in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileStamp {
    /// File length; for directories taken with [`FileStamp::of`], the number of
    /// direct entries.
    pub size: u64,
    /// Nanoseconds since the Unix epoch; zero when the platform can't report it.
    pub mtime: u64,
}

impl FileStamp {
    /// Stamp `path`. Directory mtimes are too coarse on some filesystems to catch
    /// two changes in quick succession, so directories also count their entries.
    pub fn of(path: &Utf8Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(path.as_std_path())?;
        let mut stamp = Self::from_metadata(&metadata);
        if metadata.is_dir() {
            stamp.size = std::fs::read_dir(path.as_std_path())?.count() as u64;
        }
        Ok(stamp)
    }

    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos() as u64);
        Self {
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            mtime,
        }
    }
}

/// Bounded retry policy for reads.
///
/// Transient failures (interrupted, would-block, timed out, or permission denied
/// while another process holds a lock) are retried with exponential backoff.
/// Everything else fails immediately.
#[derive(Debug, Clone, Copy)]
pub struct ReadPolicy {
    retries: u32,
    backoff: Duration,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self::from_config(&ResmanConfig::default())
    }
}

impl ReadPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    pub fn from_config(config: &ResmanConfig) -> Self {
        Self::new(
            config.read_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    /// Run `op`, retrying transient failures up to the configured limit.
    pub fn run<T>(&self, what: &Utf8Path, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries && is_transient(&e) => {
                    attempt += 1;
                    tracing::debug!(
                        "Transient read failure on {} (attempt {}/{}): {}",
                        what,
                        attempt,
                        self.retries,
                        e
                    );
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        self.run(path, || std::fs::read(path.as_std_path()))
    }

    pub fn open(&self, path: &Utf8Path) -> io::Result<std::fs::File> {
        self.run(path, || std::fs::File::open(path.as_std_path()))
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::PermissionDenied
    )
}

/// Convert to a UTF-8 path, logging and dropping paths that aren't.
pub fn utf8_path(path: PathBuf) -> Option<Utf8PathBuf> {
    match Utf8PathBuf::from_path_buf(path) {
        Ok(p) => Some(p),
        Err(p) => {
            tracing::warn!("Skipping non-UTF-8 path: {}", p.display());
            None
        }
    }
}

/// Find a direct child of `parent` by name, ignoring ASCII case.
///
/// Game installs are authored on case-insensitive filesystems, so `Data`, `DATA`
/// and `data` must all resolve.
pub fn find_child_ci(parent: &Utf8Path, name: &str) -> Option<Utf8PathBuf> {
    let exact = parent.join(name);
    if exact.as_std_path().exists() {
        return Some(exact);
    }

    let entries = std::fs::read_dir(parent.as_std_path()).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| utf8_path(e.path()))
        .find(|p| p.file_name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
}
