//! Building [`SourceIndex`]es from containers and directories.
//!
//! Collision rules inside one tier:
//!
//! - **Archives** are merged in the order given; a later archive overrides an
//!   earlier one, and inside one archive a later entry overrides an earlier one.
//!   Archives may be indexed in parallel, but the merge always runs sequentially in
//!   the given order, so the outcome never depends on scheduling.
//! - **Loose directories** are walked recursively. Within one root the deeper file
//!   wins; at equal depth the lexicographically greater path wins. Across roots a
//!   later root overrides an earlier one.
//!
//! Unreadable or corrupt containers are logged, recorded as failures and skipped.

use crate::config::ResmanConfig;
use crate::index::{Container, ContainerFailure, ContainerStamp, ResourceLocation, SourceIndex};
use crate::layout::ModuleLocation;
use crate::name::ResourceName;
use crate::parsing::ParsingService;
use crate::tier::SourceTier;
use crate::utils::{utf8_path, FileStamp, ReadPolicy};
use camino::{Utf8Path, Utf8PathBuf};
use gda_formats::ArchiveIndex;
use rayon::prelude::*;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::io::BufReader;
use std::sync::Arc;
use walkdir::WalkDir;

/// Shared inputs of every scan.
#[derive(Clone)]
pub struct ScanEnv {
    pub parsers: Arc<dyn ParsingService>,
    pub policy: ReadPolicy,
    pub parallel: bool,
}

impl ScanEnv {
    pub fn new(parsers: Arc<dyn ParsingService>, config: &ResmanConfig) -> Self {
        Self {
            parsers,
            policy: ReadPolicy::from_config(config),
            parallel: config.parallel_scan,
        }
    }

    pub(crate) fn map_ordered<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if self.parallel && items.len() > 1 {
            items.par_iter().map(f).collect()
        } else {
            items.iter().map(f).collect()
        }
    }
}

impl std::fmt::Debug for ScanEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEnv")
            .field("policy", &self.policy)
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

struct ArchiveScan {
    container: ContainerStamp,
    outcome: Result<ArchiveIndex, String>,
}

fn index_archive(path: &Utf8Path, env: &ScanEnv) -> ArchiveScan {
    let container = ContainerStamp::capture(path);
    let outcome = env
        .policy
        .open(path)
        .map_err(|e| e.to_string())
        .and_then(|file| {
            let mut reader = BufReader::new(file);
            env.parsers
                .parse_archive_index(&mut reader)
                .map_err(|e| e.to_string())
        });
    ArchiveScan { container, outcome }
}

/// Index archive containers for `tier`; later paths override earlier ones.
pub fn scan_archives(tier: SourceTier, paths: &[Utf8PathBuf], env: &ScanEnv) -> SourceIndex {
    let scans = env.map_ordered(paths, |path| index_archive(path, env));

    let mut entries = HashMap::new();
    let mut containers = Vec::with_capacity(scans.len());
    let mut failures = Vec::new();

    for scan in scans {
        match scan.outcome {
            Ok(index) => {
                let stamp = scan.container.stamp.unwrap_or_default();
                for entry in index.entries {
                    let Ok(name) = ResourceName::parse(&entry.name) else {
                        tracing::trace!("Ignoring entry {:?} in {}", entry.name, scan.container.path);
                        continue;
                    };
                    let location = ResourceLocation {
                        tier,
                        container: Container::Archive {
                            path: scan.container.path.clone(),
                            kind: index.kind,
                            entry,
                        },
                        stamp,
                    };
                    entries.insert(name, location);
                }
            }
            Err(reason) => {
                tracing::warn!(
                    "Skipping unreadable container {} in {} tier: {}",
                    scan.container.path,
                    tier,
                    reason
                );
                failures.push(ContainerFailure {
                    path: scan.container.path.clone(),
                    reason,
                });
            }
        }
        containers.push(scan.container);
    }

    tracing::debug!(
        "Indexed {} tier: {} resources from {} containers ({} skipped)",
        tier,
        entries.len(),
        containers.len(),
        failures.len()
    );
    SourceIndex::from_parts(tier, entries, containers, failures)
}

/// A loose file that won inside its root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LooseFile {
    pub path: Utf8PathBuf,
    pub stamp: FileStamp,
    depth: usize,
}

impl LooseFile {
    fn outranks(&self, other: &LooseFile) -> bool {
        (self.depth, self.path.as_str()) > (other.depth, other.path.as_str())
    }
}

/// Recursive listing of one loose-file root. Listing only; nothing is read.
#[derive(Debug, Clone)]
pub struct LooseListing {
    pub root: Utf8PathBuf,
    pub files: BTreeMap<ResourceName, LooseFile>,
    /// Stamps of the root and every directory below it.
    pub directories: Vec<ContainerStamp>,
    pub failures: Vec<ContainerFailure>,
}

/// List the resources under `root`, settling same-name collisions inside it.
///
/// A missing root yields an empty listing whose root stamp records the absence, so
/// creating the directory later marks indexes built from it as stale.
pub fn list_loose_files(root: &Utf8Path) -> LooseListing {
    let mut listing = LooseListing {
        root: root.to_path_buf(),
        files: BTreeMap::new(),
        directories: vec![ContainerStamp::capture(root)],
        failures: Vec::new(),
    };
    if !root.is_dir() {
        return listing;
    }

    for entry in WalkDir::new(root.as_std_path()).min_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .and_then(|p| utf8_path(p.to_path_buf()))
                    .unwrap_or_else(|| root.to_path_buf());
                tracing::warn!("Skipping unreadable path {}: {}", path, e);
                listing.failures.push(ContainerFailure {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let Some(path) = utf8_path(entry.path().to_path_buf()) else {
            continue;
        };

        if entry.file_type().is_dir() {
            listing.directories.push(ContainerStamp::capture(&path));
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(ResourceName::from_file_name) else {
            continue;
        };
        let stamp = match entry.metadata() {
            Ok(metadata) => FileStamp::from_metadata(&metadata),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path, e);
                continue;
            }
        };

        let candidate = LooseFile {
            path,
            stamp,
            depth: entry.depth(),
        };
        match listing.files.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
            Entry::Occupied(mut slot) => {
                if candidate.outranks(slot.get()) {
                    tracing::trace!("{} shadows {}", candidate.path, slot.get().path);
                    slot.insert(candidate);
                }
            }
        }
    }

    listing
}

/// List several roots, in order.
pub fn list_roots(roots: &[Utf8PathBuf], env: &ScanEnv) -> Vec<LooseListing> {
    env.map_ordered(roots, |root| list_loose_files(root))
}

/// Resources visible across `listings`; a later root overrides an earlier one.
pub fn visible_files(listings: &[LooseListing]) -> BTreeMap<&ResourceName, &LooseFile> {
    let mut visible = BTreeMap::new();
    for listing in listings {
        for (name, file) in &listing.files {
            visible.insert(name, file);
        }
    }
    visible
}

/// Build a loose-file index from listings taken earlier.
pub fn index_listings(tier: SourceTier, listings: &[LooseListing]) -> SourceIndex {
    let entries: HashMap<ResourceName, ResourceLocation> = visible_files(listings)
        .into_iter()
        .map(|(name, file)| {
            let location = ResourceLocation {
                tier,
                container: Container::File(file.path.clone()),
                stamp: file.stamp,
            };
            (name.clone(), location)
        })
        .collect();
    let containers = listings
        .iter()
        .flat_map(|l| l.directories.iter().cloned())
        .collect();
    let failures = listings
        .iter()
        .flat_map(|l| l.failures.iter().cloned())
        .collect();

    tracing::debug!(
        "Indexed {} tier: {} loose resources from {} roots",
        tier,
        entries.len(),
        listings.len()
    );
    SourceIndex::from_parts(tier, entries, containers, failures)
}

/// Index loose-file roots for `tier`; later roots override earlier ones.
pub fn scan_directories(tier: SourceTier, roots: &[Utf8PathBuf], env: &ScanEnv) -> SourceIndex {
    index_listings(tier, &list_roots(roots, env))
}

/// Index a module's own resources, packed or unpacked.
pub fn scan_module(location: &ModuleLocation, env: &ScanEnv) -> SourceIndex {
    match location {
        ModuleLocation::Archive(path) => {
            scan_archives(SourceTier::ModuleArchive, std::slice::from_ref(path), env)
        }
        ModuleLocation::Directory(path) => {
            scan_directories(SourceTier::ModuleArchive, std::slice::from_ref(path), env)
        }
    }
}
