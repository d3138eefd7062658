//! Mounted tiers and the active context.
//!
//! An [`ActiveContext`] is the ordered list of tiers visible "right now". It is
//! immutable once built: switching module or campaign builds a new context and
//! swaps it in, so lookups never observe a half-switched view.
//!
//! Global tiers (custom override dirs, workshop, user override, base install) are
//! shared by every context through [`GlobalTiers`] and scanned lazily: while the
//! snapshot is valid most lookups never need their indexes. Module-scoped tiers
//! (HAKs, campaign, module archive) are scanned when the context is built.

use crate::catalog::ModuleDescriptor;
use crate::error::{Error, Result};
use crate::fingerprint::{CacheFingerprint, FingerprintInputs};
use crate::index::{Container, SourceIndex};
use crate::layout::GameLayout;
use crate::parsing::ParsingService;
use crate::scanner::{scan_archives, scan_directories, scan_module, ScanEnv};
use crate::tier::SourceTier;
use camino::{Utf8Path, Utf8PathBuf};
use gda_formats::StringTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use xxhash_rust::xxh3::xxh3_64;

/// Identity of a context's full source set. Tier cache keys carry it, so entries
/// from one context are never served in another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// What a tier is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierSpec {
    /// Archive containers, later overriding earlier.
    Archives(Vec<Utf8PathBuf>),
    /// Loose-file roots, later overriding earlier.
    Directories(Vec<Utf8PathBuf>),
    /// A module's own archive or directory.
    Module(crate::layout::ModuleLocation),
}

/// A tier and its (possibly not yet built) index.
pub struct MountedTier {
    tier: SourceTier,
    spec: TierSpec,
    index: OnceLock<Arc<SourceIndex>>,
    env: ScanEnv,
}

impl MountedTier {
    /// Mount without scanning; the index is built on first use.
    pub fn deferred(tier: SourceTier, spec: TierSpec, env: ScanEnv) -> Self {
        Self {
            tier,
            spec,
            index: OnceLock::new(),
            env,
        }
    }

    /// Mount and scan now.
    pub fn scanned(tier: SourceTier, spec: TierSpec, env: ScanEnv) -> Self {
        let mounted = Self::deferred(tier, spec, env);
        mounted.index();
        mounted
    }

    pub fn tier(&self) -> SourceTier {
        self.tier
    }

    pub fn spec(&self) -> &TierSpec {
        &self.spec
    }

    pub fn is_scanned(&self) -> bool {
        self.index.get().is_some()
    }

    /// The tier's index, scanning on first call.
    pub fn index(&self) -> &Arc<SourceIndex> {
        self.index.get_or_init(|| {
            let index = match &self.spec {
                TierSpec::Archives(paths) => scan_archives(self.tier, paths, &self.env),
                TierSpec::Directories(roots) => scan_directories(self.tier, roots, &self.env),
                TierSpec::Module(location) => scan_module(location, &self.env),
            };
            Arc::new(index)
        })
    }

    /// True if the tier was scanned and its backing files changed since.
    pub fn is_stale(&self) -> bool {
        self.index.get().is_some_and(|index| index.is_stale())
    }
}

impl fmt::Debug for MountedTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountedTier")
            .field("tier", &self.tier)
            .field("spec", &self.spec)
            .field("scanned", &self.is_scanned())
            .finish()
    }
}

/// Paths making up the global tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSources {
    pub install_root: Utf8PathBuf,
    /// Base data archives in mount order.
    pub base_archives: Vec<Utf8PathBuf>,
    /// Registered custom override directories; later registrations win.
    pub custom_dirs: Vec<Utf8PathBuf>,
    pub workshop_items: Vec<Utf8PathBuf>,
    pub user_override: Utf8PathBuf,
}

impl GlobalSources {
    pub fn from_layout(layout: &GameLayout, custom_dirs: &[Utf8PathBuf]) -> Self {
        Self {
            install_root: layout.install_root.clone(),
            base_archives: layout.base_archives(),
            custom_dirs: custom_dirs.to_vec(),
            workshop_items: layout.workshop_items(),
            user_override: layout.user_override_dir(),
        }
    }

    /// Loose-file tiers and their roots, in precedence order.
    pub fn loose_tiers(&self) -> [(SourceTier, &[Utf8PathBuf]); 3] {
        [
            (SourceTier::CustomOverrideDir, self.custom_dirs.as_slice()),
            (SourceTier::WorkshopOverride, self.workshop_items.as_slice()),
            (
                SourceTier::UserOverrideDir,
                std::slice::from_ref(&self.user_override),
            ),
        ]
    }
}

/// The global tiers plus the listing fingerprint taken when they were mounted.
pub struct GlobalTiers {
    sources: GlobalSources,
    fingerprint: CacheFingerprint,
    tiers: Vec<Arc<MountedTier>>,
    dialog_tlk: Option<Utf8PathBuf>,
    dialog_strings: OnceLock<Option<Arc<StringTable>>>,
    layout: GameLayout,
    env: ScanEnv,
}

impl GlobalTiers {
    /// Mount the global tiers without scanning, computing the fast fingerprint.
    pub fn open(layout: &GameLayout, custom_dirs: &[Utf8PathBuf], env: &ScanEnv) -> Self {
        let sources = GlobalSources::from_layout(layout, custom_dirs);
        let inputs = FingerprintInputs::from_listing(&sources, env);
        let fingerprint = inputs.fingerprint();
        tracing::info!(
            "Global sources: {} base archives, {} workshop items, {} custom dirs, {} loose resources, fingerprint: {}",
            sources.base_archives.len(),
            sources.workshop_items.len(),
            sources.custom_dirs.len(),
            inputs.loose_count(),
            fingerprint
        );

        let mut tiers: Vec<Arc<MountedTier>> = sources
            .loose_tiers()
            .into_iter()
            .map(|(tier, roots)| {
                Arc::new(MountedTier::deferred(
                    tier,
                    TierSpec::Directories(roots.to_vec()),
                    env.clone(),
                ))
            })
            .collect();
        tiers.push(Arc::new(MountedTier::deferred(
            SourceTier::BaseInstall,
            TierSpec::Archives(sources.base_archives.clone()),
            env.clone(),
        )));

        Self {
            sources,
            fingerprint,
            tiers,
            dialog_tlk: layout.dialog_tlk(),
            dialog_strings: OnceLock::new(),
            layout: layout.clone(),
            env: env.clone(),
        }
    }

    pub fn sources(&self) -> &GlobalSources {
        &self.sources
    }

    /// Fast (listing-only) fingerprint taken at mount time.
    pub fn fingerprint(&self) -> CacheFingerprint {
        self.fingerprint
    }

    /// Global tiers in precedence order.
    pub fn tiers(&self) -> &[Arc<MountedTier>] {
        &self.tiers
    }

    pub fn tier(&self, tier: SourceTier) -> Option<&Arc<MountedTier>> {
        self.tiers.iter().find(|t| t.tier() == tier)
    }

    /// Full fingerprint, scanning every global tier.
    pub fn full_fingerprint(&self) -> CacheFingerprint {
        let Some(base) = self.tier(SourceTier::BaseInstall) else {
            return FingerprintInputs::new(&self.sources.install_root).fingerprint();
        };
        let loose = self
            .tiers
            .iter()
            .filter(|t| t.tier() != SourceTier::BaseInstall)
            .map(|t| t.index().as_ref());
        FingerprintInputs::from_indexes(&self.sources.install_root, base.index(), loose)
            .fingerprint()
    }

    /// Re-list the layout and compare the fast fingerprint with the mounted one.
    /// Catches added and removed archives and workshop items as well as edits.
    pub fn has_changed(&self) -> bool {
        let sources = GlobalSources::from_layout(&self.layout, &self.sources.custom_dirs);
        let current = FingerprintInputs::from_listing(&sources, &self.env).fingerprint();
        current != self.fingerprint
    }

    /// The base string table, loaded on first use.
    pub fn dialog_strings(&self) -> Option<&Arc<StringTable>> {
        self.dialog_strings
            .get_or_init(|| {
                let path = self.dialog_tlk.as_ref()?;
                load_string_table(path, &self.env)
            })
            .as_ref()
    }
}

impl fmt::Debug for GlobalTiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalTiers")
            .field("fingerprint", &self.fingerprint)
            .field("tiers", &self.tiers)
            .finish_non_exhaustive()
    }
}

fn load_string_table(path: &Utf8Path, env: &ScanEnv) -> Option<Arc<StringTable>> {
    let bytes = match env.policy.read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to read string table {}: {}", path, e);
            return None;
        }
    };
    match env.parsers.parse_string_table(&bytes) {
        Ok(table) => {
            tracing::debug!("Loaded {} strings from {}", table.len(), path);
            Some(Arc::new(table))
        }
        Err(e) => {
            tracing::warn!("Failed to parse string table {}: {}", path, e);
            None
        }
    }
}

/// Which tiers a context exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextScope {
    InstallOnly,
    Global,
    Module,
}

/// Everything visible at one point in time, in precedence order.
pub struct ActiveContext {
    id: ContextId,
    scope: ContextScope,
    module: Option<ModuleDescriptor>,
    tiers: Vec<Arc<MountedTier>>,
    global: Arc<GlobalTiers>,
    custom_tlk: Option<Utf8PathBuf>,
    custom_strings: OnceLock<Option<Arc<StringTable>>>,
}

impl ActiveContext {
    /// The base install alone, ignoring every override.
    pub fn install_only(global: Arc<GlobalTiers>) -> Self {
        let tiers = global
            .tier(SourceTier::BaseInstall)
            .cloned()
            .into_iter()
            .collect();
        let id = context_id(global.fingerprint(), "install", &[]);
        Self::assemble(id, ContextScope::InstallOnly, None, tiers, global, None)
    }

    /// All global tiers, no module mounted.
    pub fn global_only(global: Arc<GlobalTiers>) -> Self {
        let tiers = global.tiers().to_vec();
        let id = context_id(global.fingerprint(), "global", &[]);
        Self::assemble(id, ContextScope::Global, None, tiers, global, None)
    }

    /// Mount `descriptor`'s HAKs, campaign and module archive over the global tiers.
    ///
    /// Fails with [`Error::ContextSwitch`] when the campaign can't be located.
    /// Missing HAKs and custom string tables are logged and mounted empty.
    pub fn for_module(
        descriptor: ModuleDescriptor,
        layout: &GameLayout,
        global: Arc<GlobalTiers>,
        env: &ScanEnv,
    ) -> Result<Self> {
        let identity = descriptor.identity.clone();

        let campaign = match &descriptor.campaign {
            Some(name) => Some(layout.find_campaign(name).ok_or_else(|| {
                Error::context_switch(&identity, format!("campaign '{name}' not found"))
            })?),
            None => None,
        };

        // A missing HAK is mounted over every place it could appear, so the context
        // goes stale once it is installed in any of them.
        let hak_paths: Vec<Vec<Utf8PathBuf>> = descriptor
            .haks
            .iter()
            .map(|hak| match layout.find_hak(hak) {
                Some(path) => vec![path],
                None => {
                    tracing::warn!("Module '{}' declares missing HAK '{}'", identity, hak);
                    layout.hak_candidates(hak)
                }
            })
            .collect();

        let positions: Vec<usize> = (0..hak_paths.len()).collect();
        let mut tiers: Vec<Arc<MountedTier>> = env.map_ordered(&positions, |&position| {
            Arc::new(MountedTier::scanned(
                SourceTier::HakOverride(position),
                TierSpec::Archives(hak_paths[position].clone()),
                env.clone(),
            ))
        });
        if let Some(path) = campaign {
            tiers.push(Arc::new(MountedTier::scanned(
                SourceTier::CampaignFolder,
                TierSpec::Directories(vec![path]),
                env.clone(),
            )));
        }
        tiers.push(Arc::new(MountedTier::scanned(
            SourceTier::ModuleArchive,
            TierSpec::Module(descriptor.location.clone()),
            env.clone(),
        )));

        let module_tiers: Vec<&SourceIndex> = tiers.iter().map(|t| t.index().as_ref()).collect();
        let id = context_id(global.fingerprint(), &descriptor.cache_key(), &module_tiers);

        let custom_tlk = descriptor.custom_tlk.as_deref().and_then(|name| {
            let found = layout.find_tlk(name);
            if found.is_none() {
                tracing::warn!("Module '{}' custom TLK '{}' not found", identity, name);
            }
            found
        });

        tiers.extend(global.tiers().iter().cloned());
        tiers.sort_by_key(|t| t.tier());

        tracing::info!(
            "Built context {} for module '{}': {} HAKs, campaign: {}",
            id,
            identity,
            descriptor.haks.len(),
            descriptor.campaign.as_deref().unwrap_or("none")
        );
        Ok(Self::assemble(
            id,
            ContextScope::Module,
            Some(descriptor),
            tiers,
            global,
            custom_tlk,
        ))
    }

    fn assemble(
        id: ContextId,
        scope: ContextScope,
        module: Option<ModuleDescriptor>,
        tiers: Vec<Arc<MountedTier>>,
        global: Arc<GlobalTiers>,
        custom_tlk: Option<Utf8PathBuf>,
    ) -> Self {
        Self {
            id,
            scope,
            module,
            tiers,
            global,
            custom_tlk,
            custom_strings: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn module(&self) -> Option<&ModuleDescriptor> {
        self.module.as_ref()
    }

    /// True for the context that ignores every override.
    pub fn is_install_only(&self) -> bool {
        self.scope == ContextScope::InstallOnly
    }

    /// Mounted tiers, highest precedence first.
    pub fn tiers(&self) -> &[Arc<MountedTier>] {
        &self.tiers
    }

    pub fn global(&self) -> &Arc<GlobalTiers> {
        &self.global
    }

    pub fn parsers(&self) -> &dyn ParsingService {
        self.global.env.parsers.as_ref()
    }

    pub fn env(&self) -> &ScanEnv {
        &self.global.env
    }

    /// The module's custom string table, loaded on first use.
    pub fn custom_strings(&self) -> Option<&Arc<StringTable>> {
        self.custom_strings
            .get_or_init(|| {
                let path = self.custom_tlk.as_ref()?;
                load_string_table(path, &self.global.env)
            })
            .as_ref()
    }

    /// True when any module-scoped tier changed on disk since the context was built.
    pub fn is_stale(&self) -> bool {
        self.tiers
            .iter()
            .filter(|t| t.tier().is_module_scoped())
            .any(|t| t.is_stale())
    }
}

impl fmt::Debug for ActiveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveContext")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("module", &self.module.as_ref().map(|m| &m.identity))
            .field("tiers", &self.tiers.iter().map(|t| t.tier()).collect::<Vec<_>>())
            .finish()
    }
}

/// Hash the global fingerprint, a scope label and the module tiers' backing files.
/// Editing a HAK or campaign file therefore yields a new identity.
fn context_id(global: CacheFingerprint, label: &str, module_tiers: &[&SourceIndex]) -> ContextId {
    let mut buf = Vec::new();
    buf.extend_from_slice(&global.0.to_le_bytes());
    buf.extend_from_slice(&(label.len() as u64).to_le_bytes());
    buf.extend_from_slice(label.as_bytes());

    for index in module_tiers {
        buf.extend_from_slice(index.tier().to_string().as_bytes());
        buf.push(0);
        for container in index.containers() {
            buf.extend_from_slice(container.path.as_str().as_bytes());
            buf.push(0);
            if let Some(stamp) = container.stamp {
                buf.extend_from_slice(&stamp.size.to_le_bytes());
                buf.extend_from_slice(&stamp.mtime.to_le_bytes());
            }
        }
        let mut files: Vec<_> = index
            .entries()
            .filter_map(|(name, l)| match &l.container {
                Container::File(path) => Some((name.as_str(), path.as_str(), l.stamp.size, l.stamp.mtime)),
                Container::Archive { .. } => None,
            })
            .collect();
        files.sort_unstable();
        for (name, path, size, mtime) in files {
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(path.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&size.to_le_bytes());
            buf.extend_from_slice(&mtime.to_le_bytes());
        }
    }

    ContextId(xxh3_64(&buf))
}
