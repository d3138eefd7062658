//! Resource manager configuration.
//!
//! Stored as TOML. Every key is optional; missing keys take the defaults below.
//!
//! ```toml
//! cache_byte_ceiling = 67108864
//! compression_threshold = 32768
//! eviction_fraction = 0.2
//! module_cache_capacity = 5
//! snapshot_enabled = true
//! tier_cache_enabled = true
//! parallel_scan = true
//! read_retries = 3
//! retry_backoff_ms = 10
//! snapshot_dir = "/home/me/.cache/resman"
//! ```

use crate::error::Result;
use crate::module_cache::DEFAULT_MODULE_CACHE_CAPACITY;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResmanConfig {
    /// Approximate upper bound on bytes held by the tier cache.
    pub cache_byte_ceiling: usize,
    /// Tables whose estimated size exceeds this are stored zstd-compressed.
    pub compression_threshold: usize,
    /// Share of resident entries evicted per sweep when the ceiling is exceeded.
    pub eviction_fraction: f64,
    /// Number of fully built module contexts kept for fast switching.
    pub module_cache_capacity: usize,
    /// Use the on-disk precompiled snapshot of global tables.
    pub snapshot_enabled: bool,
    /// Use the in-process tier cache.
    pub tier_cache_enabled: bool,
    /// Index archive containers on the rayon pool.
    pub parallel_scan: bool,
    /// Extra attempts for reads failing with a transient error.
    pub read_retries: u32,
    /// Delay before the first retry; doubled on each further attempt.
    pub retry_backoff_ms: u64,
    /// Where snapshot artifacts live. Defaults to `<user_root>/cache/resman`.
    pub snapshot_dir: Option<Utf8PathBuf>,
}

impl Default for ResmanConfig {
    fn default() -> Self {
        Self {
            cache_byte_ceiling: 64 * 1024 * 1024,
            compression_threshold: 32 * 1024,
            eviction_fraction: 0.2,
            module_cache_capacity: DEFAULT_MODULE_CACHE_CAPACITY,
            snapshot_enabled: true,
            tier_cache_enabled: true,
            parallel_scan: true,
            read_retries: 3,
            retry_backoff_ms: 10,
            snapshot_dir: None,
        }
    }
}

impl ResmanConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns defaults if the file doesn't exist; errors if it exists but is invalid.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        if !path.as_std_path().exists() {
            tracing::debug!("Config file {} not found, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path.as_std_path())?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories if needed.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path.as_std_path(), contents)?;
        Ok(())
    }
}
