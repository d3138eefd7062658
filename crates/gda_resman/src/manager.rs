//! The consumer-facing resource manager.
//!
//! [`ResourceManager`] owns every piece of mutable state: the current context, the
//! tier cache, the module context cache and the loaded snapshot. Independent
//! instances never share anything.
//!
//! # Concurrency
//!
//! The current state is an immutable [`ManagerState`] behind an `Arc`, swapped
//! under a read-write lock. Lookups clone the `Arc` and run without holding any
//! lock, so they always see one complete context. Context switches are serialized
//! by a dedicated switch lock; a switch builds the new state completely before
//! swapping it in, so a failed switch leaves the previous context active. Tier
//! cache eviction and compression never run while the switch lock is held.
//!
//! # Lookup order
//!
//! A table request checks the tier cache, then walks the context's tiers. Global
//! tiers are answered from the snapshot when one is loaded; module-scoped tiers
//! are read and parsed from their indexes. The parsed winner is put in the tier
//! cache under the context's identity.

use crate::catalog::{FsModuleCatalog, ModuleCatalog, ModuleDescriptor};
use crate::config::ResmanConfig;
use crate::context::{ActiveContext, GlobalTiers, MountedTier};
use crate::error::{Error, Result};
use crate::fingerprint::CacheFingerprint;
use crate::index::ResourceLocation;
use crate::layout::GameLayout;
use crate::module_cache::ModuleContextCache;
use crate::name::{ResourceKind, ResourceName};
use crate::parsing::{ParsingService, StandardParsers};
use crate::resolver::{self, Resolution, TierLookup, TierOutcome};
use crate::scanner::ScanEnv;
use crate::snapshot::{SnapshotBundle, SnapshotLoad, SnapshotStore};
use crate::tier::SourceTier;
use crate::tier_cache::{CacheStats, TierCache};
use camino::{Utf8Path, Utf8PathBuf};
use gda_formats::Table;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;

/// String references with this bit set index the module's custom TLK.
pub const CUSTOM_TLK_FLAG: u32 = 0x0100_0000;

/// One consistent view: global tiers, snapshot and current context.
#[derive(Debug, Clone)]
pub struct ManagerState {
    pub global: Arc<GlobalTiers>,
    pub current: Arc<ActiveContext>,
    pub install_only: Arc<ActiveContext>,
    pub snapshot: Option<Arc<SnapshotBundle>>,
    pub custom_dirs: Vec<Utf8PathBuf>,
}

pub struct ResourceManager {
    core: Core,
    switch_lock: Mutex<()>,
    state: RwLock<Arc<ManagerState>>,
}

/// Everything except the current state.
struct Core {
    layout: GameLayout,
    config: ResmanConfig,
    env: ScanEnv,
    catalog: Arc<dyn ModuleCatalog>,
    snapshots: SnapshotStore,
    tier_cache: TierCache,
    module_cache: Mutex<ModuleContextCache>,
}

impl ResourceManager {
    /// Open a manager with the standard parsers and the sidecar module catalog.
    pub fn open(layout: GameLayout, config: ResmanConfig) -> Result<Self> {
        let catalog = Arc::new(FsModuleCatalog::new(layout.clone()));
        Self::init(layout, config, Arc::new(StandardParsers), catalog)
    }

    /// Mount the global tiers and load (or rebuild) the snapshot.
    ///
    /// No module is active afterwards; lookups see the global tiers only.
    pub fn init(
        layout: GameLayout,
        config: ResmanConfig,
        parsers: Arc<dyn ParsingService>,
        catalog: Arc<dyn ModuleCatalog>,
    ) -> Result<Self> {
        layout.validate()?;
        tracing::info!("Initializing resource manager for {}", layout.install_root);

        let env = ScanEnv::new(parsers, &config);
        let snapshot_dir = config
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| layout.default_snapshot_dir());

        let core = Core {
            snapshots: SnapshotStore::new(snapshot_dir),
            tier_cache: TierCache::new(&config),
            module_cache: Mutex::new(ModuleContextCache::new(config.module_cache_capacity)),
            layout,
            config,
            env,
            catalog,
        };
        let state = core.mount_global(Vec::new(), None)?;
        Ok(Self {
            core,
            switch_lock: Mutex::new(()),
            state: RwLock::new(Arc::new(state)),
        })
    }

    pub fn layout(&self) -> &GameLayout {
        &self.core.layout
    }

    pub fn config(&self) -> &ResmanConfig {
        &self.core.config
    }

    /// The current state. Cheap; holds no lock after returning.
    pub fn state(&self) -> Arc<ManagerState> {
        Arc::clone(&self.state.read())
    }

    pub fn current_context(&self) -> Arc<ActiveContext> {
        Arc::clone(&self.state().current)
    }

    /// Fast fingerprint of the mounted global source set.
    pub fn fingerprint(&self) -> CacheFingerprint {
        self.state().global.fingerprint()
    }

    pub fn snapshot_loaded(&self) -> bool {
        self.state().snapshot.is_some()
    }

    pub fn tier_cache_stats(&self) -> CacheStats {
        self.core.tier_cache.stats()
    }

    // ---- lookups ----

    /// A rule table from the base install alone, ignoring every override.
    pub fn get_table(&self, name: &str) -> Option<Arc<Table>> {
        let name = table_name(name)?;
        let state = self.state();
        self.core.table_in(&state, &state.install_only, &name).found()
    }

    /// A rule table as the current context sees it, overrides included.
    pub fn get_table_with_overrides(&self, name: &str) -> Option<Arc<Table>> {
        let name = table_name(name)?;
        self.resolve_table(&name).found()
    }

    /// Like [`get_table_with_overrides`](Self::get_table_with_overrides), keeping
    /// the per-tier trace when the table is not found.
    pub fn resolve_table(&self, name: &ResourceName) -> Resolution<Arc<Table>> {
        let state = self.state();
        self.core.table_in(&state, &state.current, name)
    }

    /// A localized string. References with [`CUSTOM_TLK_FLAG`] set are read from
    /// the active module's custom TLK. Missing strings are empty.
    pub fn get_string(&self, strref: u32) -> String {
        let state = self.state();
        let (table, index) = if strref & CUSTOM_TLK_FLAG != 0 {
            (state.current.custom_strings(), strref & !CUSTOM_TLK_FLAG)
        } else {
            (state.global.dialog_strings(), strref)
        };
        table
            .and_then(|t| t.get(index))
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// Raw bytes of any resource, resolved through the current context.
    pub fn get_resource(&self, name: &str) -> Option<Vec<u8>> {
        let name = match ResourceName::parse(name) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!("{}", e);
                return None;
            }
        };
        let ctx = self.current_context();
        let resolution = resolver::resolve_with(&name, &ctx, |mounted| {
            let Some(location) = mounted.index().get(&name) else {
                return TierLookup::Miss(TierOutcome::Absent);
            };
            match location.read(self.core.env.parsers.as_ref(), &self.core.env.policy) {
                Ok(bytes) => TierLookup::Hit(bytes),
                Err(e) => TierLookup::Miss(TierOutcome::Unreadable(format!(
                    "{}: {}",
                    location.describe(),
                    e
                ))),
            }
        });
        match resolution {
            Resolution::Found(bytes) => Some(bytes),
            Resolution::NotFound(trace) => {
                trace.log();
                None
            }
        }
    }

    /// The winning location of `name` in the current context.
    pub fn resolve(&self, name: &ResourceName) -> Resolution {
        resolver::resolve(name, &self.current_context())
    }

    /// Every location defining `name` in the current context, winner first.
    pub fn resolve_all(&self, name: &ResourceName) -> Vec<ResourceLocation> {
        resolver::resolve_all(name, &self.current_context())
    }

    // ---- context switches ----

    /// Make `identity` the active module.
    ///
    /// On failure the previous context stays active and the error is
    /// [`Error::ContextSwitch`].
    pub fn set_active_module(&self, identity: &str) -> Result<()> {
        let replaced = {
            let _switch = self.switch_lock.lock();
            let descriptor = self
                .core
                .catalog
                .describe_module(identity)
                .map_err(|e| Error::context_switch(identity, e))?;
            self.switch_to(descriptor)?
        };
        self.release(replaced);
        Ok(())
    }

    /// Make the module referenced by the save at `location` active, with the save's
    /// campaign.
    pub fn load_context_for_save(&self, location: &Utf8Path) -> Result<()> {
        let replaced = {
            let _switch = self.switch_lock.lock();
            let descriptor = self
                .core
                .catalog
                .describe_save(location)
                .map_err(|e| Error::context_switch(location.as_str(), e))?;
            self.switch_to(descriptor)?
        };
        self.release(replaced);
        Ok(())
    }

    /// Build and commit a module context. Caller holds the switch lock.
    fn switch_to(&self, descriptor: ModuleDescriptor) -> Result<Arc<ManagerState>> {
        let state = self.state();
        let identity = descriptor.identity.clone();
        let ctx = self.core.module_context(&state.global, descriptor)?;
        tracing::info!("Active module is now '{}' (context {})", identity, ctx.id());

        let next = ManagerState {
            current: ctx,
            ..(*state).clone()
        };
        Ok(self.commit(next))
    }

    /// Add a directory to the custom override tier. Later registrations override
    /// earlier ones. Remounts the global tiers and revalidates the snapshot.
    pub fn register_override_dir(&self, path: impl Into<Utf8PathBuf>) -> Result<()> {
        let path = path.into();
        if !path.is_dir() {
            return Err(Error::InvalidOverrideDir(path));
        }
        let replaced = {
            let _switch = self.switch_lock.lock();
            let state = self.state();
            if state.custom_dirs.contains(&path) {
                tracing::debug!("Override directory {} already registered", path);
                return Ok(());
            }
            tracing::info!("Registering override directory {}", path);
            let mut custom_dirs = state.custom_dirs.clone();
            custom_dirs.push(path);
            self.remount(&state, custom_dirs)?
        };
        self.release(replaced);
        Ok(())
    }

    /// Discard the on-disk snapshot and rebuild it from a full scan.
    pub fn invalidate_snapshot(&self) -> Result<()> {
        let replaced = {
            let _switch = self.switch_lock.lock();
            self.core.snapshots.invalidate()?;
            let state = self.state();
            self.remount(&state, state.custom_dirs.clone())?
        };
        self.release(replaced);
        Ok(())
    }

    /// Re-list the global sources and remount them if anything changed.
    ///
    /// Returns whether a remount happened.
    pub fn refresh(&self) -> Result<bool> {
        let replaced = {
            let _switch = self.switch_lock.lock();
            let state = self.state();
            if !state.global.has_changed() {
                return Ok(false);
            }
            tracing::info!("Global sources changed on disk, remounting");
            self.remount(&state, state.custom_dirs.clone())?
        };
        self.release(replaced);
        Ok(true)
    }

    /// Remount the global tiers and rebuild the current context over them.
    /// Caller holds the switch lock.
    fn remount(&self, state: &ManagerState, custom_dirs: Vec<Utf8PathBuf>) -> Result<Arc<ManagerState>> {
        let module = state.current.module().cloned();
        // Cached contexts are built over the old global tiers.
        self.core.module_cache.lock().clear();
        let next = self.core.mount_global(custom_dirs, module)?;
        Ok(self.commit(next))
    }

    fn commit(&self, next: ManagerState) -> Arc<ManagerState> {
        std::mem::replace(&mut *self.state.write(), Arc::new(next))
    }

    /// Drop tier cache entries of contexts that are no longer reachable. Runs
    /// after the switch lock is released.
    fn release(&self, replaced: Arc<ManagerState>) {
        let state = self.state();
        for old in [&replaced.current, &replaced.install_only] {
            let still_used = old.id() == state.current.id() || old.id() == state.install_only.id();
            if !still_used && !self.core.module_cache.lock().contains_context(old.id()) {
                self.core.tier_cache.invalidate_context(old.id());
            }
        }
    }

    // ---- lifecycle ----

    /// Drop every cached table and module context. The current context stays.
    pub fn clear(&self) {
        self.core.tier_cache.clear();
        self.core.module_cache.lock().clear();
        tracing::debug!("Cleared resource caches");
    }

    /// Release all caches and the current context.
    pub fn shutdown(self) {
        self.clear();
        tracing::info!("Resource manager shut down");
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("layout", &self.core.layout)
            .field("config", &self.core.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Core {
    fn table_in(
        &self,
        state: &ManagerState,
        ctx: &ActiveContext,
        name: &ResourceName,
    ) -> Resolution<Arc<Table>> {
        let cache_enabled = self.config.tier_cache_enabled;
        if cache_enabled {
            if let Some(table) = self.tier_cache.get(ctx.id(), name) {
                return Resolution::Found(table);
            }
        }

        let snapshot = state.snapshot.as_deref();
        let resolution = resolver::resolve_with(name, ctx, |mounted| {
            lookup_table(name, mounted, snapshot, &self.env)
        });
        match &resolution {
            Resolution::Found(table) if cache_enabled => {
                self.tier_cache.put(ctx.id(), name, Arc::clone(table));
            }
            Resolution::Found(_) => {}
            Resolution::NotFound(trace) => trace.log(),
        }
        resolution
    }

    fn mount_global(
        &self,
        custom_dirs: Vec<Utf8PathBuf>,
        module: Option<ModuleDescriptor>,
    ) -> Result<ManagerState> {
        let global = Arc::new(GlobalTiers::open(&self.layout, &custom_dirs, &self.env));
        let snapshot = self.prepare_snapshot(&global);
        let current = match module {
            Some(descriptor) => self.module_context(&global, descriptor)?,
            None => Arc::new(ActiveContext::global_only(Arc::clone(&global))),
        };
        Ok(ManagerState {
            install_only: Arc::new(ActiveContext::install_only(Arc::clone(&global))),
            current,
            snapshot,
            custom_dirs,
            global,
        })
    }

    fn module_context(
        &self,
        global: &Arc<GlobalTiers>,
        descriptor: ModuleDescriptor,
    ) -> Result<Arc<ActiveContext>> {
        let identity = descriptor.identity.clone();
        let key = descriptor.cache_key();
        self.module_cache
            .lock()
            .get_or_build(&key, || {
                ActiveContext::for_module(descriptor, &self.layout, Arc::clone(global), &self.env)
            })
            .map_err(|e| match e {
                Error::ContextSwitch { .. } => e,
                other => Error::context_switch(identity, other),
            })
    }

    fn prepare_snapshot(&self, global: &Arc<GlobalTiers>) -> Option<Arc<SnapshotBundle>> {
        if !self.config.snapshot_enabled {
            return None;
        }
        match self.snapshots.load(global.fingerprint()) {
            SnapshotLoad::Valid(bundle) => Some(Arc::new(bundle)),
            SnapshotLoad::Invalid(_) => match self.rebuild_snapshot(global) {
                Ok(bundle) => bundle.map(Arc::new),
                Err(e) => {
                    tracing::warn!("Snapshot rebuild failed, serving from indexes: {}", e);
                    None
                }
            },
        }
    }

    /// Scan the global tiers, parse every winning table and write a new snapshot.
    ///
    /// Nothing is committed if the full-scan fingerprint disagrees with the listing
    /// fingerprint the tiers were mounted with, since the files changed mid-scan.
    fn rebuild_snapshot(&self, global: &Arc<GlobalTiers>) -> Result<Option<SnapshotBundle>> {
        let expected = global.fingerprint();
        let full = global.full_fingerprint();
        if full != expected {
            tracing::warn!(
                "Source set changed during scan (listing {}, scan {}); snapshot not written",
                expected,
                full
            );
            return Ok(None);
        }

        let ctx = ActiveContext::global_only(Arc::clone(global));
        let names: Vec<ResourceName> = global
            .tiers()
            .iter()
            .flat_map(|t| t.index().names().cloned().collect::<Vec<_>>())
            .filter(|n| n.kind() == ResourceKind::Table)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let env = &self.env;
        let parsed = env.map_ordered(&names, |name| {
            resolver::resolve_with(name, &ctx, |mounted| {
                read_table(name, mounted, env).map_hit(|table| (mounted.tier(), table))
            })
            .found()
        });
        let tables: Vec<(&ResourceName, SourceTier, Arc<Table>)> = names
            .iter()
            .zip(parsed)
            .filter_map(|(name, found)| found.map(|(tier, table)| (name, tier, table)))
            .collect();

        tracing::info!("Rebuilding snapshot {} from {} tables", expected, tables.len());
        self.snapshots.build(
            tables.iter().map(|(name, tier, table)| (*name, *tier, table.as_ref())),
            expected,
        )?;

        match self.snapshots.load(expected) {
            SnapshotLoad::Valid(bundle) => Ok(Some(bundle)),
            SnapshotLoad::Invalid(reason) => Err(Error::CacheInconsistency(format!(
                "freshly written snapshot rejected: {reason}"
            ))),
        }
    }
}

fn table_name(name: &str) -> Option<ResourceName> {
    match ResourceName::table(name) {
        Ok(name) => Some(name),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    }
}

/// Read and parse `name` from one tier's index.
fn read_table(name: &ResourceName, mounted: &MountedTier, env: &ScanEnv) -> TierLookup<Arc<Table>> {
    let Some(location) = mounted.index().get(name) else {
        return TierLookup::Miss(TierOutcome::Absent);
    };
    let bytes = match location.read(env.parsers.as_ref(), &env.policy) {
        Ok(bytes) => bytes,
        Err(e) => {
            return TierLookup::Miss(TierOutcome::Unreadable(format!(
                "{}: {}",
                location.describe(),
                e
            )))
        }
    };
    match env.parsers.parse_table(&bytes) {
        Ok(table) => TierLookup::Hit(Arc::new(table)),
        Err(e) => TierLookup::Miss(TierOutcome::ParseFailed(format!(
            "{}: {}",
            location.describe(),
            e
        ))),
    }
}

/// Look `name` up in one tier, answering global tiers from the snapshot when it
/// can.
///
/// The snapshot records only the global winner `w` of each name. Tiers above `w`
/// are known not to provide it; tiers below `w` are unknown to the snapshot and
/// fall back to the index (reached only by walks that skip `w`, such as the
/// install-only view).
fn lookup_table(
    name: &ResourceName,
    mounted: &MountedTier,
    snapshot: Option<&SnapshotBundle>,
    env: &ScanEnv,
) -> TierLookup<Arc<Table>> {
    let tier = mounted.tier();
    let Some(bundle) = snapshot.filter(|_| !tier.is_module_scoped()) else {
        return read_table(name, mounted, env);
    };

    match bundle.tier_of(name) {
        Some(winner) if winner == tier => match bundle.table(name) {
            Ok(Some(table)) => TierLookup::Hit(Arc::new(table)),
            Ok(None) => TierLookup::Miss(TierOutcome::Absent),
            Err(e) => {
                tracing::warn!("{}; reading from index", e);
                read_table(name, mounted, env)
            }
        },
        Some(winner) if tier < winner => TierLookup::Miss(TierOutcome::Absent),
        Some(_) => read_table(name, mounted, env),
        None => TierLookup::Miss(TierOutcome::Absent),
    }
}
