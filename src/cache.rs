use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::data::loader::DatasetId;
use crate::data::model::Dataset;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Cache entries
// ---------------------------------------------------------------------------

/// A successfully loaded dataset and when it was loaded.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub dataset: Arc<Dataset>,
    pub loaded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Process-wide memoisation of datasets keyed by [`DatasetId`].
///
/// An identifier is either absent or present; entries never expire on their
/// own and leave only through [`CacheStore::invalidate`] or
/// [`CacheStore::invalidate_all`]. Failed loads are not remembered.
///
/// The loader runs without any lock held, so two callers missing on the same
/// id at the same time may both load; the last successful insert is kept.
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: RwLock<HashMap<DatasetId, CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached dataset for `id`, loading it with `load` on a miss.
    pub fn get_or_load<F>(&self, id: &DatasetId, load: F) -> Result<Arc<Dataset>>
    where
        F: FnOnce(&DatasetId) -> Result<Dataset>,
    {
        if let Some(entry) = self.read_entry(id) {
            log::debug!("cache hit for {id}");
            return Ok(entry.dataset);
        }

        log::debug!("cache miss for {id}");
        let dataset = Arc::new(load(id)?);
        let entry = CacheEntry {
            dataset: Arc::clone(&dataset),
            loaded_at: Utc::now(),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), entry);
        Ok(dataset)
    }

    /// Drop the entry for `id`; returns whether one was present.
    pub fn invalidate(&self, id: &DatasetId) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            log::debug!("invalidated {id}");
        }
        removed
    }

    /// Drop every entry; returns how many were present.
    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let n = entries.len();
        entries.clear();
        log::debug!("invalidated all {n} cached datasets");
        n
    }

    pub fn contains(&self, id: &DatasetId) -> bool {
        self.read_entry(id).is_some()
    }

    pub fn loaded_at(&self, id: &DatasetId) -> Option<DateTime<Utc>> {
        self.read_entry(id).map(|e| e.loaded_at)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_entry(&self, id: &DatasetId) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{ColumnType, Schema};
    use crate::error::PipelineError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tiny(name: &str) -> Dataset {
        let schema = Schema::new([("n", ColumnType::Numeric)]).unwrap();
        Dataset::try_new(name, schema, vec![vec![1i64.into()]]).unwrap()
    }

    fn counting_loader(counter: &AtomicUsize) -> impl Fn(&DatasetId) -> Result<Dataset> + '_ {
        move |id| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(tiny(&id.to_string()))
        }
    }

    #[test]
    fn repeated_gets_reuse_the_same_dataset() {
        let cache = CacheStore::new();
        let loads = AtomicUsize::new(0);
        let id = DatasetId::csv("bucket", "a.csv");

        let first = cache.get_or_load(&id, counting_loader(&loads)).unwrap();
        let second = cache.get_or_load(&id, counting_loader(&loads)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(cache.loaded_at(&id).is_some());
    }

    #[test]
    fn invalidate_forces_reload() {
        let cache = CacheStore::new();
        let loads = AtomicUsize::new(0);
        let id = DatasetId::csv("bucket", "a.csv");
        let other = DatasetId::csv("bucket", "b.csv");

        cache.get_or_load(&id, counting_loader(&loads)).unwrap();
        cache.get_or_load(&other, counting_loader(&loads)).unwrap();
        assert!(cache.invalidate(&id));
        assert!(!cache.invalidate(&id));
        assert!(cache.contains(&other));

        cache.get_or_load(&id, counting_loader(&loads)).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 3);

        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.is_empty());
        cache.get_or_load(&other, counting_loader(&loads)).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn failures_are_not_cached_and_propagate_unchanged() {
        let cache = CacheStore::new();
        let id = DatasetId::csv("bucket", "a.csv");

        let err = cache
            .get_or_load(&id, |id| Err(PipelineError::decode(id.to_string(), "bad header")))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode { ref detail, .. } if detail == "bad header"));
        assert!(!cache.contains(&id));

        let loads = AtomicUsize::new(0);
        cache.get_or_load(&id, counting_loader(&loads)).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_formats_are_different_entries() {
        let cache = CacheStore::new();
        let loads = AtomicUsize::new(0);
        let plain = DatasetId::csv("bucket", "a.csv");
        let stamped = DatasetId::csv("bucket", "a.csv").with_timestamp("ts");

        cache.get_or_load(&plain, counting_loader(&loads)).unwrap();
        cache.get_or_load(&stamped, counting_loader(&loads)).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_readers_share_one_entry() {
        let cache = CacheStore::new();
        let loads = AtomicUsize::new(0);
        let id = DatasetId::csv("bucket", "a.csv");

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let ds = cache.get_or_load(&id, counting_loader(&loads)).unwrap();
                    assert_eq!(ds.len(), 1);
                });
            }
        });

        // Concurrent misses may each load, but never more than once per caller.
        let n = loads.load(Ordering::SeqCst);
        assert!((1..=8).contains(&n));
        assert_eq!(cache.len(), 1);

        cache.get_or_load(&id, counting_loader(&loads)).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), n);
    }
}
