use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::data::CachedRecord;

/// Per-service last-value cache. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct FeedCache {
    records: Arc<Mutex<HashMap<String, CachedRecord>>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, symbol: &str) -> Option<CachedRecord> {
        self.lock().get(symbol).cloned()
    }

    /// Snapshot of every record, sorted by symbol.
    pub fn get_all(&self) -> Vec<CachedRecord> {
        let mut records: Vec<CachedRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        records
    }

    #[cfg(test)]
    pub fn set(&self, record: CachedRecord) {
        self.lock().insert(record.symbol.clone(), record);
    }

    /// Writes the record unless `token` has been cancelled, running `then`
    /// before the lock is released. The check happens under the cache lock,
    /// so neither the write nor `then` can interleave with [`FeedCache::fence`].
    pub fn set_unless_cancelled<F>(&self, token: &CancellationToken, record: CachedRecord, then: F) -> bool
    where
        F: FnOnce(&CachedRecord),
    {
        let mut records = self.lock();
        if token.is_cancelled() {
            return false;
        }
        then(&record);
        records.insert(record.symbol.clone(), record);
        true
    }

    /// Waits out any in-flight guarded write. After a token is cancelled and
    /// the cache fenced, no write made under that token can land.
    pub fn fence(&self) {
        drop(self.lock());
    }

    /// Empties the cache, returning how many records were dropped.
    pub fn clear(&self) -> usize {
        let mut records = self.lock();
        let count = records.len();
        records.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let cache = FeedCache::new();
        cache.set(CachedRecord::new("AAPL", 100.0));
        cache.set(CachedRecord::new("AAPL", 101.5));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("AAPL").unwrap().price, 101.5);
        assert!(cache.get("MSFT").is_none());
    }

    #[test]
    fn test_get_all_is_a_snapshot() {
        let cache = FeedCache::new();
        cache.set(CachedRecord::new("MSFT", 300.0));
        cache.set(CachedRecord::new("AAPL", 100.0));

        let snapshot = cache.get_all();
        cache.set(CachedRecord::new("AAPL", 999.0));
        cache.clear();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].symbol, "AAPL");
        assert_eq!(snapshot[0].price, 100.0);
        assert_eq!(snapshot[1].symbol, "MSFT");
    }

    #[test]
    fn test_cancelled_token_blocks_writes() {
        let cache = FeedCache::new();
        let token = CancellationToken::new();

        assert!(cache.set_unless_cancelled(&token, CachedRecord::new("EUA", 85.0), |_| {}));
        token.cancel();
        cache.fence();
        let mut announced = false;
        assert!(!cache.set_unless_cancelled(&token, CachedRecord::new("EUA", 90.0), |_| announced = true));

        assert!(!announced);
        assert_eq!(cache.get("EUA").unwrap().price, 85.0);
    }

    #[test]
    fn test_announcement_runs_under_the_lock() {
        let cache = FeedCache::new();
        let token = CancellationToken::new();

        let mut held = false;
        cache.set_unless_cancelled(&token, CachedRecord::new("EUA", 85.0), |_| {
            held = cache.records.try_lock().is_err();
        });
        assert!(held);
    }

    #[test]
    fn test_clear_reports_count() {
        let cache = FeedCache::new();
        cache.set(CachedRecord::new("A", 1.0));
        cache.set(CachedRecord::new("B", 2.0));
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.len(), 0);
    }
}
