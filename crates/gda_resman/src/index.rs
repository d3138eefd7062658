//! Per-tier source indexes.
//!
//! A [`SourceIndex`] maps every resource name visible in one tier to the single
//! physical location that wins inside that tier. Collisions are settled while the
//! index is built (see [`crate::scanner`]), so the resolver only ever asks "does this
//! tier have it?".

use crate::error::Result;
use crate::name::ResourceName;
use crate::parsing::ParsingService;
use crate::tier::SourceTier;
use crate::utils::{FileStamp, ReadPolicy};
use camino::{Utf8Path, Utf8PathBuf};
use gda_formats::{ArchiveEntry, ArchiveKind};
use std::collections::HashMap;
use std::io::BufReader;

/// Where a resource's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container {
    /// An entry inside an archive container.
    Archive {
        path: Utf8PathBuf,
        kind: ArchiveKind,
        entry: ArchiveEntry,
    },
    /// A loose file.
    File(Utf8PathBuf),
}

impl Container {
    pub fn path(&self) -> &Utf8Path {
        match self {
            Container::Archive { path, .. } | Container::File(path) => path,
        }
    }
}

/// A resolved physical location. Immutable; a changed backing file produces a new
/// index rather than an updated location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocation {
    pub tier: SourceTier,
    pub container: Container,
    /// Stamp of the loose file, or of the archive holding the entry.
    pub stamp: FileStamp,
}

impl ResourceLocation {
    /// Read the located bytes.
    pub fn read(&self, parsers: &dyn ParsingService, policy: &ReadPolicy) -> Result<Vec<u8>> {
        match &self.container {
            Container::File(path) => Ok(policy.read(path)?),
            Container::Archive { path, kind, entry } => {
                let file = policy.open(path)?;
                let mut reader = BufReader::new(file);
                Ok(parsers.read_archive_entry(&mut reader, *kind, entry)?)
            }
        }
    }

    /// Human-readable origin, for diagnostics.
    pub fn describe(&self) -> String {
        match &self.container {
            Container::File(path) => format!("{} ({})", path, self.tier),
            Container::Archive { path, entry, .. } => {
                format!("{}:{} ({})", path, entry.name, self.tier)
            }
        }
    }
}

/// A container or directory the index was built from, with its stamp at scan time.
/// `stamp` is `None` when the path did not exist or could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStamp {
    pub path: Utf8PathBuf,
    pub stamp: Option<FileStamp>,
}

impl ContainerStamp {
    pub fn capture(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let stamp = FileStamp::of(&path).ok();
        Self { path, stamp }
    }

    pub fn is_current(&self) -> bool {
        FileStamp::of(&self.path).ok() == self.stamp
    }
}

/// A container that was skipped during the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFailure {
    pub path: Utf8PathBuf,
    pub reason: String,
}

/// Resource name → winning location, for one tier.
#[derive(Debug, Clone)]
pub struct SourceIndex {
    tier: SourceTier,
    entries: HashMap<ResourceName, ResourceLocation>,
    containers: Vec<ContainerStamp>,
    failures: Vec<ContainerFailure>,
}

impl SourceIndex {
    pub fn empty(tier: SourceTier) -> Self {
        Self {
            tier,
            entries: HashMap::new(),
            containers: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        tier: SourceTier,
        entries: HashMap<ResourceName, ResourceLocation>,
        containers: Vec<ContainerStamp>,
        failures: Vec<ContainerFailure>,
    ) -> Self {
        Self {
            tier,
            entries,
            containers,
            failures,
        }
    }

    pub fn tier(&self) -> SourceTier {
        self.tier
    }

    pub fn get(&self, name: &ResourceName) -> Option<&ResourceLocation> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &ResourceName) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &ResourceName> {
        self.entries.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&ResourceName, &ResourceLocation)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Containers and directories this index was built from.
    pub fn containers(&self) -> &[ContainerStamp] {
        &self.containers
    }

    /// Containers skipped because they could not be read or decoded.
    pub fn failures(&self) -> &[ContainerFailure] {
        &self.failures
    }

    /// True when any backing container, directory or loose file changed since the scan.
    ///
    /// Directory stamps catch files added or removed; loose-file stamps catch edits
    /// in place.
    pub fn is_stale(&self) -> bool {
        if let Some(changed) = self.containers.iter().find(|c| !c.is_current()) {
            tracing::debug!("{} index stale: {} changed", self.tier, changed.path);
            return true;
        }
        self.entries.values().any(|location| match &location.container {
            Container::File(path) => {
                let changed = FileStamp::of(path).ok() != Some(location.stamp);
                if changed {
                    tracing::debug!("{} index stale: {} changed", self.tier, path);
                }
                changed
            }
            Container::Archive { .. } => false,
        })
    }
}
