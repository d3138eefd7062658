//! On-disk snapshot of pre-parsed global tables.
//!
//! A snapshot holds, for every table name visible in the global tiers, the winning
//! parsed table and the tier it came from, tagged with the [`CacheFingerprint`] of
//! the source set it was built from. It is stored as two artifacts:
//!
//! ```text
//! <dir>/snapshot.meta                       MessagePack: version, fingerprint,
//!                                           data file name, length, hash, and
//!                                           per-table (name, tier, offset, len)
//! <dir>/snapshot-<fp>-<hash>.bin            concatenated MessagePack tables
//! ```
//!
//! Writes are atomic from a reader's point of view: the data blob is written to a
//! temporary file, synced and renamed into place first; the metadata is written the
//! same way last. A crash at any point leaves either the old snapshot or the new
//! one fully visible. Loading verifies the blob's length and hash against the
//! metadata, so a snapshot can never report success with tables missing.

use crate::error::{Error, Result};
use crate::fingerprint::CacheFingerprint;
use crate::name::ResourceName;
use crate::tier::SourceTier;
use camino::{Utf8Path, Utf8PathBuf};
use gda_formats::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use tempfile::NamedTempFile;
use xxhash_rust::xxh3::xxh3_64;

const SNAPSHOT_VERSION: u32 = 1;
const META_FILE: &str = "snapshot.meta";
const DATA_PREFIX: &str = "snapshot-";
const DATA_SUFFIX: &str = ".bin";

/// Location of one table inside the data blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: ResourceName,
    pub tier: SourceTier,
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    version: u32,
    fingerprint: CacheFingerprint,
    data_file: String,
    data_len: u64,
    data_hash: u64,
    records: Vec<SnapshotRecord>,
}

/// Why a snapshot was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    Missing,
    VersionMismatch(u32),
    FingerprintMismatch {
        stored: CacheFingerprint,
        expected: CacheFingerprint,
    },
    Corrupt(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Missing => f.write_str("no snapshot"),
            InvalidReason::VersionMismatch(found) => {
                write!(f, "version {found}, expected {SNAPSHOT_VERSION}")
            }
            InvalidReason::FingerprintMismatch { stored, expected } => {
                write!(f, "fingerprint {stored}, expected {expected}")
            }
            InvalidReason::Corrupt(reason) => write!(f, "corrupt: {reason}"),
        }
    }
}

/// Outcome of [`SnapshotStore::load`].
#[derive(Debug)]
pub enum SnapshotLoad {
    Valid(SnapshotBundle),
    Invalid(InvalidReason),
}

/// A loaded, verified snapshot. Tables are decoded on demand.
pub struct SnapshotBundle {
    fingerprint: CacheFingerprint,
    data: Vec<u8>,
    records: HashMap<ResourceName, SnapshotRecord>,
}

impl SnapshotBundle {
    pub fn fingerprint(&self) -> CacheFingerprint {
        self.fingerprint
    }

    /// Tier that supplied `name`, if the snapshot has it.
    pub fn tier_of(&self, name: &ResourceName) -> Option<SourceTier> {
        self.records.get(name).map(|r| r.tier)
    }

    /// Decode the table for `name`.
    pub fn table(&self, name: &ResourceName) -> Result<Option<Table>> {
        let Some(record) = self.records.get(name) else {
            return Ok(None);
        };
        let start = record.offset as usize;
        let bytes = &self.data[start..start + record.len as usize];
        rmp_serde::from_slice(bytes).map(Some).map_err(|e| {
            Error::CacheInconsistency(format!("snapshot table '{name}' failed to decode: {e}"))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &ResourceName> {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl fmt::Debug for SnapshotBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotBundle")
            .field("fingerprint", &self.fingerprint)
            .field("tables", &self.records.len())
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Snapshot artifacts in one directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: Utf8PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn meta_path(&self) -> Utf8PathBuf {
        self.dir.join(META_FILE)
    }

    /// Load the snapshot if it was built for `expected`.
    ///
    /// Every problem, from a missing file to a hash mismatch, is reported as
    /// [`SnapshotLoad::Invalid`]; a snapshot is never partially reused.
    pub fn load(&self, expected: CacheFingerprint) -> SnapshotLoad {
        match self.try_load(expected) {
            Ok(bundle) => {
                tracing::info!(
                    "Loaded snapshot {} with {} tables",
                    bundle.fingerprint,
                    bundle.len()
                );
                SnapshotLoad::Valid(bundle)
            }
            Err(reason) => {
                tracing::info!("Snapshot in {} rejected: {}", self.dir, reason);
                SnapshotLoad::Invalid(reason)
            }
        }
    }

    fn try_load(&self, expected: CacheFingerprint) -> std::result::Result<SnapshotBundle, InvalidReason> {
        let meta_bytes = match std::fs::read(self.meta_path().as_std_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(InvalidReason::Missing),
            Err(e) => return Err(InvalidReason::Corrupt(format!("metadata unreadable: {e}"))),
        };
        let meta: SnapshotMeta = rmp_serde::from_slice(&meta_bytes)
            .map_err(|e| InvalidReason::Corrupt(format!("metadata undecodable: {e}")))?;

        if meta.version != SNAPSHOT_VERSION {
            return Err(InvalidReason::VersionMismatch(meta.version));
        }
        if meta.fingerprint != expected {
            return Err(InvalidReason::FingerprintMismatch {
                stored: meta.fingerprint,
                expected,
            });
        }

        let data_path = self.dir.join(&meta.data_file);
        let data = std::fs::read(data_path.as_std_path())
            .map_err(|e| InvalidReason::Corrupt(format!("data blob {}: {e}", meta.data_file)))?;
        if data.len() as u64 != meta.data_len || xxh3_64(&data) != meta.data_hash {
            return Err(InvalidReason::Corrupt(format!(
                "data blob {} does not match its metadata",
                meta.data_file
            )));
        }

        let mut records = HashMap::with_capacity(meta.records.len());
        for record in meta.records {
            let in_bounds = record
                .offset
                .checked_add(record.len)
                .is_some_and(|end| end <= meta.data_len);
            if !in_bounds {
                return Err(InvalidReason::Corrupt(format!(
                    "record '{}' lies outside the data blob",
                    record.name
                )));
            }
            records.insert(record.name.clone(), record);
        }

        Ok(SnapshotBundle {
            fingerprint: meta.fingerprint,
            data,
            records,
        })
    }

    /// Replace the snapshot with `tables`, tagged with `fingerprint`.
    ///
    /// Either the whole new snapshot becomes visible or the previous one remains.
    pub fn build<'a>(
        &self,
        tables: impl IntoIterator<Item = (&'a ResourceName, SourceTier, &'a Table)>,
        fingerprint: CacheFingerprint,
    ) -> Result<()> {
        std::fs::create_dir_all(self.dir.as_std_path())?;

        let mut data = Vec::new();
        let mut records = Vec::new();
        for (name, tier, table) in tables {
            let encoded = rmp_serde::to_vec(table)?;
            records.push(SnapshotRecord {
                name: name.clone(),
                tier,
                offset: data.len() as u64,
                len: encoded.len() as u64,
            });
            data.extend_from_slice(&encoded);
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));

        let data_hash = xxh3_64(&data);
        let data_file = format!("{DATA_PREFIX}{fingerprint}-{data_hash:016x}{DATA_SUFFIX}");
        self.write_atomic(&data_file, &data)?;

        let meta = SnapshotMeta {
            version: SNAPSHOT_VERSION,
            fingerprint,
            data_file: data_file.clone(),
            data_len: data.len() as u64,
            data_hash,
            records,
        };
        let table_count = meta.records.len();
        self.write_atomic(META_FILE, &rmp_serde::to_vec_named(&meta)?)?;

        tracing::info!(
            "Wrote snapshot {} with {} tables ({} bytes)",
            fingerprint,
            table_count,
            data.len()
        );
        self.remove_blobs_except(Some(&data_file));
        Ok(())
    }

    /// Remove the snapshot so the next load reports it missing.
    pub fn invalidate(&self) -> Result<()> {
        match std::fs::remove_file(self.meta_path().as_std_path()) {
            Ok(()) => tracing::info!("Invalidated snapshot in {}", self.dir),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.remove_blobs_except(None);
        Ok(())
    }

    fn write_atomic(&self, file_name: &str, bytes: &[u8]) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(self.dir.as_std_path())?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(file_name).as_std_path())?;
        Ok(())
    }

    fn remove_blobs_except(&self, keep: Option<&str>) {
        let Ok(entries) = std::fs::read_dir(self.dir.as_std_path()) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let is_blob = file_name.starts_with(DATA_PREFIX) && file_name.ends_with(DATA_SUFFIX);
            if !is_blob || Some(file_name) == keep {
                continue;
            }
            if let Err(e) = std::fs::remove_file(entry.path()) {
                tracing::warn!("Failed to remove old snapshot blob {}: {}", file_name, e);
            }
        }
    }
}
