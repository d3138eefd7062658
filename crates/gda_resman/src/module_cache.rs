//! Small LRU of fully built module contexts.
//!
//! Building a module context scans its HAKs, campaign and module archive. Keeping
//! the last few contexts around makes toggling between recently used modules a
//! lookup. Contexts hold no open file handles, so eviction just drops them.

use crate::context::{ActiveContext, ContextId};
use crate::error::Result;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default number of module contexts kept.
pub const DEFAULT_MODULE_CACHE_CAPACITY: usize = 5;

pub struct ModuleContextCache {
    entries: LruCache<String, Arc<ActiveContext>>,
}

impl ModuleContextCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Return the cached context for `key`, or build and cache one.
    ///
    /// A cached context whose module-scoped files changed on disk is rebuilt. A
    /// failed build leaves the cache untouched.
    pub fn get_or_build(
        &mut self,
        key: &str,
        build: impl FnOnce() -> Result<ActiveContext>,
    ) -> Result<Arc<ActiveContext>> {
        if let Some(ctx) = self.entries.get(key) {
            if !ctx.is_stale() {
                tracing::debug!("Module context cache hit for {}", key);
                return Ok(Arc::clone(ctx));
            }
            tracing::info!("Cached module context for {} is stale, rebuilding", key);
            self.entries.pop(key);
        }

        let ctx = Arc::new(build()?);
        if let Some((evicted, _)) = self.entries.push(key.to_string(), Arc::clone(&ctx)) {
            if evicted != key {
                tracing::debug!("Evicted module context {}", evicted);
            }
        }
        Ok(ctx)
    }

    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.pop(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// True if some cached context has identity `id`.
    pub fn contains_context(&self, id: ContextId) -> bool {
        self.entries.iter().any(|(_, ctx)| ctx.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GlobalTiers;
    use crate::error::Error;
    use crate::layout::GameLayout;
    use crate::parsing::StandardParsers;
    use crate::scanner::ScanEnv;
    use crate::utils::ReadPolicy;
    use camino::Utf8PathBuf;
    use std::cell::Cell;
    use tempfile::tempdir;

    fn global() -> (tempfile::TempDir, Arc<GlobalTiers>) {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let layout = GameLayout::new(root.join("install"), root.join("user"));
        let env = ScanEnv {
            parsers: Arc::new(StandardParsers),
            policy: ReadPolicy::default(),
            parallel: false,
        };
        let global = Arc::new(GlobalTiers::open(&layout, &[], &env));
        (dir, global)
    }

    #[test]
    fn test_hit_skips_builder() {
        let (_dir, global) = global();
        let mut cache = ModuleContextCache::new(DEFAULT_MODULE_CACHE_CAPACITY);
        let builds = Cell::new(0);
        let build = || {
            builds.set(builds.get() + 1);
            Ok(ActiveContext::global_only(global.clone()))
        };

        let first = cache.get_or_build("alpha", build).unwrap();
        let second = cache.get_or_build("alpha", build).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.get(), 1);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let (_dir, global) = global();
        let mut cache = ModuleContextCache::new(2);
        let build = || Ok(ActiveContext::global_only(global.clone()));

        cache.get_or_build("a", build).unwrap();
        cache.get_or_build("b", build).unwrap();
        cache.get_or_build("a", build).unwrap();
        cache.get_or_build("c", build).unwrap();

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let mut cache = ModuleContextCache::new(2);
        let result = cache.get_or_build("broken", || Err(Error::ModuleNotFound("broken".into())));
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        assert_eq!(ModuleContextCache::new(0).capacity(), 1);
    }
}
