//! In-process LRU cache of parsed tables.
//!
//! Keys pair a [`ContextId`] with a [`ResourceName`], so a module switch can never
//! serve a table resolved under another module's tiers. Tables whose estimated
//! size exceeds the compression threshold are kept as zstd-compressed MessagePack
//! and decoded on access; smaller tables are kept as shared `Arc<Table>`s.
//!
//! Resident bytes are tracked approximately. When a `put` pushes them over the
//! ceiling, least recently used entries are evicted in batches (a fixed fraction of
//! the entries per round) until the cache fits again.

use crate::config::ResmanConfig;
use crate::context::ContextId;
use crate::error::{Error, Result};
use crate::name::ResourceName;
use gda_formats::Table;
use lru::LruCache;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const ZSTD_LEVEL: i32 = 3;

type CacheKey = (ContextId, ResourceName);

#[derive(Clone)]
enum Stored {
    Raw(Arc<Table>),
    Compressed(Arc<[u8]>),
}

struct CacheEntry {
    value: Stored,
    size: usize,
}

struct Inner {
    lru: LruCache<CacheKey, CacheEntry>,
    resident: usize,
}

/// Counters reported by [`TierCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub resident_bytes: usize,
    pub compressed_entries: usize,
}

pub struct TierCache {
    inner: Mutex<Inner>,
    ceiling: usize,
    compression_threshold: usize,
    eviction_fraction: f64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TierCache {
    pub fn new(config: &ResmanConfig) -> Self {
        Self::with_limits(
            config.cache_byte_ceiling,
            config.compression_threshold,
            config.eviction_fraction,
        )
    }

    pub fn with_limits(ceiling: usize, compression_threshold: usize, eviction_fraction: f64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                resident: 0,
            }),
            ceiling,
            compression_threshold,
            eviction_fraction: eviction_fraction.clamp(0.0, 1.0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fetch a table, marking it most recently used.
    pub fn get(&self, ctx: ContextId, name: &ResourceName) -> Option<Arc<Table>> {
        let key = (ctx, name.clone());
        let stored = self.inner.lock().lru.get(&key).map(|e| e.value.clone());

        let table = match stored {
            None => None,
            Some(Stored::Raw(table)) => Some(table),
            Some(Stored::Compressed(bytes)) => match decompress(&bytes) {
                Ok(table) => Some(Arc::new(table)),
                Err(e) => {
                    tracing::warn!("Dropping undecodable cache entry '{}': {}", name, e);
                    self.remove(&key);
                    None
                }
            },
        };

        match table {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        table
    }

    /// Store a table. Tables larger than the whole ceiling are not cached.
    pub fn put(&self, ctx: ContextId, name: &ResourceName, table: Arc<Table>) {
        let estimated = table.estimated_size();
        let (value, size) = if estimated > self.compression_threshold {
            match compress(&table) {
                Ok(bytes) => {
                    tracing::trace!("Compressed '{}': {} -> {} bytes", name, estimated, bytes.len());
                    let size = bytes.len();
                    (Stored::Compressed(bytes.into()), size)
                }
                Err(e) => {
                    tracing::warn!("Caching '{}' uncompressed: {}", name, e);
                    (Stored::Raw(table), estimated)
                }
            }
        } else {
            (Stored::Raw(table), estimated)
        };

        if size > self.ceiling {
            tracing::debug!(
                "Not caching '{}': {} bytes exceeds ceiling of {}",
                name,
                size,
                self.ceiling
            );
            // A smaller table cached earlier under this key is now out of date.
            self.remove(&(ctx, name.clone()));
            return;
        }

        let evicted = {
            let mut inner = self.inner.lock();
            if let Some(old) = inner.lru.put((ctx, name.clone()), CacheEntry { value, size }) {
                inner.resident -= old.size;
            }
            inner.resident += size;
            self.evict_over_budget(&mut inner)
        };
        // Evicted tables are freed here, outside the lock.
        drop(evicted);
    }

    fn evict_over_budget(&self, inner: &mut Inner) -> Vec<CacheEntry> {
        let mut evicted = Vec::new();
        while inner.resident > self.ceiling && !inner.lru.is_empty() {
            let batch = ((inner.lru.len() as f64 * self.eviction_fraction).ceil() as usize).max(1);
            for _ in 0..batch {
                let Some((_, entry)) = inner.lru.pop_lru() else {
                    break;
                };
                inner.resident -= entry.size;
                evicted.push(entry);
            }
        }
        if !evicted.is_empty() {
            self.evictions
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            tracing::debug!(
                "Evicted {} cache entries, {} bytes resident",
                evicted.len(),
                inner.resident
            );
        }
        evicted
    }

    fn remove(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.lru.pop(key) {
            inner.resident -= entry.size;
        }
    }

    /// Drop every entry belonging to `ctx`.
    pub fn invalidate_context(&self, ctx: ContextId) {
        let dropped: Vec<CacheEntry> = {
            let mut inner = self.inner.lock();
            let keys: Vec<CacheKey> = inner
                .lru
                .iter()
                .filter(|((id, _), _)| *id == ctx)
                .map(|(key, _)| key.clone())
                .collect();
            let mut dropped = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(entry) = inner.lru.pop(&key) {
                    inner.resident -= entry.size;
                    dropped.push(entry);
                }
            }
            dropped
        };
        if !dropped.is_empty() {
            tracing::debug!("Invalidated {} cache entries for context {}", dropped.len(), ctx);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.resident = 0;
    }

    pub fn contains(&self, ctx: ContextId, name: &ResourceName) -> bool {
        self.inner.lock().lru.contains(&(ctx, name.clone()))
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: inner.lru.len(),
            resident_bytes: inner.resident,
            compressed_entries: inner
                .lru
                .iter()
                .filter(|(_, e)| matches!(e.value, Stored::Compressed(_)))
                .count(),
        }
    }
}

fn compress(table: &Table) -> Result<Vec<u8>> {
    let encoded = rmp_serde::to_vec(table)?;
    let mut out = Vec::new();
    let mut encoder =
        zstd::Encoder::new(&mut out, ZSTD_LEVEL).map_err(|e| Error::Compression(e.to_string()))?;
    encoder
        .write_all(&encoded)
        .map_err(|e| Error::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(e.to_string()))?;
    Ok(out)
}

fn decompress(bytes: &[u8]) -> Result<Table> {
    let decoder = zstd::Decoder::new(bytes).map_err(|e| Error::Compression(e.to_string()))?;
    Ok(rmp_serde::from_read(decoder)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> ResourceName {
        ResourceName::parse(s).unwrap()
    }

    fn table(rows: usize, text: &str) -> Arc<Table> {
        Arc::new(Table::new(
            vec!["Label".into(), "Value".into()],
            (0..rows)
                .map(|i| vec![Some(format!("{text}{i}")), Some(i.to_string())])
                .collect(),
        ))
    }

    #[test]
    fn test_get_after_put() {
        let cache = TierCache::with_limits(1 << 20, 1 << 16, 0.2);
        let ctx = ContextId(1);
        let t = table(5, "row");
        cache.put(ctx, &name("classes.2da"), t.clone());

        for _ in 0..3 {
            assert_eq!(cache.get(ctx, &name("classes.2da")).as_deref(), Some(t.as_ref()));
        }
        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_contexts_are_isolated() {
        let cache = TierCache::with_limits(1 << 20, 1 << 16, 0.2);
        cache.put(ContextId(1), &name("classes.2da"), table(5, "a"));
        assert!(cache.get(ContextId(2), &name("classes.2da")).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_large_tables_are_compressed() {
        let cache = TierCache::with_limits(1 << 24, 1024, 0.2);
        let big = table(2_000, "repetitive-label-");
        assert!(big.estimated_size() > 1024);
        cache.put(ContextId(1), &name("spells.2da"), big.clone());

        let stats = cache.stats();
        assert_eq!(stats.compressed_entries, 1);
        assert!(stats.resident_bytes < big.estimated_size());
        assert_eq!(cache.get(ContextId(1), &name("spells.2da")).as_deref(), Some(big.as_ref()));
    }

    #[test]
    fn test_eviction_respects_ceiling_and_keeps_recent() {
        let one = table(4, "x").estimated_size();
        let ceiling = one * 10;
        let cache = TierCache::with_limits(ceiling, usize::MAX, 0.2);
        let ctx = ContextId(7);

        for i in 0..50 {
            cache.put(ctx, &name(&format!("t{i:02}.2da")), table(4, "x"));
            assert!(cache.stats().resident_bytes <= ceiling);
        }
        assert!(cache.contains(ctx, &name("t49.2da")));
        assert!(!cache.contains(ctx, &name("t00.2da")));
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn test_recently_read_entry_survives() {
        let one = table(4, "x").estimated_size();
        let cache = TierCache::with_limits(one * 5, usize::MAX, 0.2);
        let ctx = ContextId(7);
        for i in 0..5 {
            cache.put(ctx, &name(&format!("t{i}.2da")), table(4, "x"));
        }
        assert!(cache.get(ctx, &name("t0.2da")).is_some());
        cache.put(ctx, &name("t5.2da"), table(4, "x"));
        assert!(cache.contains(ctx, &name("t0.2da")));
        assert!(!cache.contains(ctx, &name("t1.2da")));
    }

    #[test]
    fn test_oversized_table_is_not_cached() {
        let cache = TierCache::with_limits(64, usize::MAX, 0.2);
        cache.put(ContextId(1), &name("big.2da"), table(100, "x"));
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_oversized_replacement_drops_cached_table() {
        let small = table(1, "x");
        let cache = TierCache::with_limits(small.estimated_size() * 2, usize::MAX, 0.2);
        let ctx = ContextId(3);
        cache.put(ctx, &name("classes.2da"), small);
        assert!(cache.contains(ctx, &name("classes.2da")));

        cache.put(ctx, &name("classes.2da"), table(200, "x"));
        assert!(cache.get(ctx, &name("classes.2da")).is_none());
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.resident_bytes, 0);
    }

    #[test]
    fn test_invalidate_context() {
        let cache = TierCache::with_limits(1 << 20, 1 << 16, 0.2);
        cache.put(ContextId(1), &name("a.2da"), table(2, "a"));
        cache.put(ContextId(1), &name("b.2da"), table(2, "b"));
        cache.put(ContextId(2), &name("a.2da"), table(2, "c"));

        cache.invalidate_context(ContextId(1));
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.resident_bytes, table(2, "c").estimated_size());
        assert!(cache.contains(ContextId(2), &name("a.2da")));

        cache.clear();
        assert_eq!(cache.stats().resident_bytes, 0);
    }
}
