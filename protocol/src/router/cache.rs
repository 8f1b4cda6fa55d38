//! Bounded LRU cache of shard values.
//!
//! Entries remember which shard they came from. Absent slots are cached too
//! (`value: None`), so repeated reads of empty accounts stay off the wire.
//!
//! Every write-through or invalidation bumps an epoch. A fetch records the
//! epoch before reading the shard and only caches its result if nothing was
//! committed in between, so a slow read can never overwrite fresher state.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::address::Address;
use crate::shard::ShardId;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: Option<Value>,
    pub shard: ShardId,
}

struct CacheInner {
    lru: LruCache<Address, CacheEntry>,
    epoch: u64,
}

pub struct StateCache {
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StateCache {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::new(capacity),
                epoch: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up and promote an entry.
    pub fn get(&self, address: &Address) -> Option<CacheEntry> {
        let found = self.inner.lock().lru.get(address).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Membership test that neither promotes nor counts.
    pub fn contains(&self, address: &Address) -> bool {
        self.inner.lock().lru.contains(address)
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Insert a fetched entry unless the cache changed since `epoch`.
    pub fn insert_if_current(&self, address: Address, entry: CacheEntry, epoch: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return false;
        }
        inner.lru.put(address, entry);
        true
    }

    /// Overwrite entries with freshly committed values.
    pub fn write_through(&self, entries: impl IntoIterator<Item = (Address, CacheEntry)>) {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        for (address, entry) in entries {
            inner.lru.put(address, entry);
        }
    }

    pub fn invalidate<'a>(&self, addresses: impl IntoIterator<Item = &'a Address>) {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        for address in addresses {
            inner.lru.pop(address);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().lru.cap().get()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::new([n; 20])
    }

    fn entry(n: u64) -> CacheEntry {
        CacheEntry {
            value: Some(Value::from(n)),
            shard: ShardId(0),
        }
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = StateCache::new(2);
        let epoch = cache.epoch();
        cache.insert_if_current(addr(1), entry(1), epoch);
        cache.insert_if_current(addr(2), entry(2), epoch);
        // Touch 1 so 2 becomes the eviction candidate.
        assert!(cache.get(&addr(1)).is_some());
        cache.insert_if_current(addr(3), entry(3), epoch);

        assert!(cache.contains(&addr(1)));
        assert!(!cache.contains(&addr(2)));
        assert!(cache.contains(&addr(3)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn stale_fetch_does_not_overwrite_committed_value() {
        let cache = StateCache::new(4);
        let before = cache.epoch();
        cache.write_through([(addr(1), entry(10))]);

        assert!(!cache.insert_if_current(addr(1), entry(9), before));
        assert_eq!(cache.get(&addr(1)), Some(entry(10)));
    }

    #[test]
    fn counts_hits_and_misses() {
        let cache = StateCache::new(4);
        assert!(cache.get(&addr(1)).is_none());
        cache.write_through([(addr(1), entry(1))]);
        assert!(cache.get(&addr(1)).is_some());
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn invalidate_removes_entries() {
        let cache = StateCache::new(4);
        cache.write_through([(addr(1), entry(1)), (addr(2), entry(2))]);
        cache.invalidate([&addr(1)]);
        assert!(!cache.contains(&addr(1)));
        assert!(cache.contains(&addr(2)));
    }

    #[test]
    fn zero_capacity_still_holds_one_entry() {
        let cache = StateCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }
}
