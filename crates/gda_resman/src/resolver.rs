//! Override-chain resolution.
//!
//! [`resolve_with`] is the one precedence walk: it visits the context's tiers from
//! highest to lowest precedence and stops at the first hit. Everything else
//! ([`resolve`], [`resolve_all`] and the manager's table lookups) is built on it.
//! A walk depends only on the name and the context, so any number can run
//! concurrently over the same context.

use crate::context::{ActiveContext, MountedTier};
use crate::index::ResourceLocation;
use crate::name::ResourceName;
use crate::tier::SourceTier;
use std::fmt;

/// Why a tier produced no result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    /// The tier does not define the name.
    Absent,
    /// The tier defines the name but its bytes could not be read.
    Unreadable(String),
    /// The tier defines the name but its bytes failed to decode.
    ParseFailed(String),
}

impl fmt::Display for TierOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierOutcome::Absent => f.write_str("absent"),
            TierOutcome::Unreadable(reason) => write!(f, "unreadable: {reason}"),
            TierOutcome::ParseFailed(reason) => write!(f, "parse error: {reason}"),
        }
    }
}

/// Result of asking one tier.
#[derive(Debug)]
pub enum TierLookup<T> {
    Hit(T),
    Miss(TierOutcome),
}

impl<T> TierLookup<T> {
    pub(crate) fn map_hit<U>(self, f: impl FnOnce(T) -> U) -> TierLookup<U> {
        match self {
            TierLookup::Hit(value) => TierLookup::Hit(f(value)),
            TierLookup::Miss(outcome) => TierLookup::Miss(outcome),
        }
    }
}

/// One tier's answer during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierCheck {
    pub tier: SourceTier,
    pub outcome: TierOutcome,
    /// Containers in this tier skipped during the scan; the name may have been in one.
    pub skipped_containers: usize,
}

/// Every tier checked by an unsuccessful walk, and why each came up empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveTrace {
    pub name: ResourceName,
    pub checks: Vec<TierCheck>,
}

impl ResolveTrace {
    /// Log the trace at debug level, one line per tier.
    pub fn log(&self) {
        tracing::debug!("'{}' not found in {} tiers", self.name, self.checks.len());
        for check in &self.checks {
            if check.skipped_containers > 0 {
                tracing::debug!(
                    "  {}: {} ({} containers skipped at scan)",
                    check.tier,
                    check.outcome,
                    check.skipped_containers
                );
            } else {
                tracing::debug!("  {}: {}", check.tier, check.outcome);
            }
        }
    }

    /// True if some tier defined the name but failed to produce it.
    pub fn has_failures(&self) -> bool {
        self.checks
            .iter()
            .any(|c| c.outcome != TierOutcome::Absent)
    }
}

/// Outcome of a walk. Not finding a name is a normal result.
#[derive(Debug)]
pub enum Resolution<T = ResourceLocation> {
    Found(T),
    NotFound(ResolveTrace),
}

impl<T> Resolution<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Resolution::Found(value) => Some(value),
            Resolution::NotFound(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Walk `ctx`'s tiers in precedence order, returning the first hit of `visit`.
pub fn resolve_with<T>(
    name: &ResourceName,
    ctx: &ActiveContext,
    mut visit: impl FnMut(&MountedTier) -> TierLookup<T>,
) -> Resolution<T> {
    let mut checks = Vec::new();
    for mounted in ctx.tiers() {
        match visit(mounted) {
            TierLookup::Hit(value) => {
                tracing::trace!("'{}' resolved from {}", name, mounted.tier());
                return Resolution::Found(value);
            }
            TierLookup::Miss(outcome) => {
                if !matches!(outcome, TierOutcome::Absent) {
                    tracing::warn!("'{}' in {} tier: {}", name, mounted.tier(), outcome);
                }
                checks.push(TierCheck {
                    tier: mounted.tier(),
                    outcome,
                    skipped_containers: if mounted.is_scanned() {
                        mounted.index().failures().len()
                    } else {
                        0
                    },
                });
            }
        }
    }
    Resolution::NotFound(ResolveTrace {
        name: name.clone(),
        checks,
    })
}

/// Index-only lookup in one tier.
pub fn lookup_location(name: &ResourceName, mounted: &MountedTier) -> TierLookup<ResourceLocation> {
    match mounted.index().get(name) {
        Some(location) => TierLookup::Hit(location.clone()),
        None => TierLookup::Miss(TierOutcome::Absent),
    }
}

/// The winning location of `name` in `ctx`.
pub fn resolve(name: &ResourceName, ctx: &ActiveContext) -> Resolution {
    resolve_with(name, ctx, |mounted| lookup_location(name, mounted))
}

/// Every location defining `name`, winner first. Used to diagnose mod conflicts.
pub fn resolve_all(name: &ResourceName, ctx: &ActiveContext) -> Vec<ResourceLocation> {
    ctx.tiers()
        .iter()
        .filter_map(|mounted| mounted.index().get(name).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModuleDescriptor;
    use crate::context::GlobalTiers;
    use crate::layout::{GameLayout, ModuleLocation};
    use crate::parsing::StandardParsers;
    use crate::scanner::ScanEnv;
    use crate::utils::ReadPolicy;
    use camino::{Utf8Path, Utf8PathBuf};
    use gda_formats::{ErfType, ErfVersion, ErfWriter};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write(path: &Utf8Path, data: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    fn write_erf(path: &Utf8Path, erf_type: ErfType, files: &[(&str, &[u8])]) {
        let mut writer = ErfWriter::new(erf_type, ErfVersion::V1_0);
        for (name, data) in files {
            writer.add(name, data.to_vec()).unwrap();
        }
        write(path, &writer.to_bytes().unwrap());
    }

    fn name(s: &str) -> ResourceName {
        ResourceName::parse(s).unwrap()
    }

    fn context(root: &Utf8Path, haks: &[&str]) -> ActiveContext {
        let layout = GameLayout::new(root.join("install"), root.join("user"));
        let env = ScanEnv {
            parsers: Arc::new(StandardParsers),
            policy: ReadPolicy::default(),
            parallel: false,
        };
        let global = Arc::new(GlobalTiers::open(&layout, &[], &env));
        let descriptor = ModuleDescriptor {
            identity: "m".into(),
            location: ModuleLocation::Archive(root.join("user/modules/m.mod")),
            haks: haks.iter().map(|s| s.to_string()).collect(),
            campaign: None,
            custom_tlk: None,
        };
        ActiveContext::for_module(descriptor, &layout, global, &env).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("install/Data")).unwrap();
        write_erf(
            &root.join("user/modules/m.mod"),
            ErfType::Mod,
            &[("feat.2da", b"module"), ("spells.2da", b"module")],
        );
        write(&root.join("user/override/feat.2da"), b"override");
        write_erf(&root.join("user/hak/one.hak"), ErfType::Hak, &[("classes.2da", b"one")]);
        write_erf(
            &root.join("user/hak/two.hak"),
            ErfType::Hak,
            &[("classes.2da", b"two"), ("spells.2da", b"two")],
        );
        (dir, root)
    }

    #[test]
    fn test_first_declared_hak_wins() {
        let (_dir, root) = setup();
        let ctx = context(&root, &["one", "two"]);
        let found = resolve(&name("classes.2da"), &ctx).found().unwrap();
        assert_eq!(found.tier, SourceTier::HakOverride(0));

        let ctx = context(&root, &["two", "one"]);
        let found = resolve(&name("classes.2da"), &ctx).found().unwrap();
        assert_eq!(found.tier, SourceTier::HakOverride(0));
        assert!(found.container.path().ends_with("two.hak"));
    }

    #[test]
    fn test_override_beats_module_and_hak_beats_module() {
        let (_dir, root) = setup();
        let ctx = context(&root, &["one", "two"]);
        assert_eq!(
            resolve(&name("feat.2da"), &ctx).found().unwrap().tier,
            SourceTier::UserOverrideDir
        );
        assert_eq!(
            resolve(&name("spells.2da"), &ctx).found().unwrap().tier,
            SourceTier::HakOverride(1)
        );
    }

    #[test]
    fn test_not_found_traces_every_tier() {
        let (_dir, root) = setup();
        let ctx = context(&root, &["one"]);
        match resolve(&name("missing.2da"), &ctx) {
            Resolution::NotFound(trace) => {
                assert_eq!(trace.checks.len(), ctx.tiers().len());
                assert!(trace.checks.iter().all(|c| c.outcome == TierOutcome::Absent));
                assert!(!trace.has_failures());
            }
            Resolution::Found(_) => panic!("unexpected hit"),
        }
    }

    #[test]
    fn test_resolve_all_lists_conflicts_in_order() {
        let (_dir, root) = setup();
        let ctx = context(&root, &["one", "two"]);
        let tiers: Vec<_> = resolve_all(&name("spells.2da"), &ctx)
            .into_iter()
            .map(|l| l.tier)
            .collect();
        assert_eq!(tiers, [SourceTier::HakOverride(1), SourceTier::ModuleArchive]);
    }

    #[test]
    fn test_visitor_miss_falls_through() {
        let (_dir, root) = setup();
        let ctx = context(&root, &["one", "two"]);
        let resolution = resolve_with(&name("classes.2da"), &ctx, |mounted| {
            if mounted.tier() == SourceTier::HakOverride(0) {
                TierLookup::Miss(TierOutcome::ParseFailed("bad".into()))
            } else {
                lookup_location(&name("classes.2da"), mounted)
            }
        });
        assert_eq!(resolution.found().unwrap().tier, SourceTier::HakOverride(1));
    }
}
