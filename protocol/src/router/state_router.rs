//! The state router proper.
//!
//! ## Reads
//!
//! `get` answers from the cache when it can. On a miss it resolves the
//! owning shard through the range table and reads it under the retry
//! policy. Concurrent misses on one address share a single in-flight fetch.
//!
//! ## Commits
//!
//! A block's writes are committed in two phases across every shard they
//! touch: all shards `prepare`, then all shards `commit`. If any prepare
//! fails, every shard is told to abort and nothing changes. Commits for the
//! same parent tip are serialized, and each commit runs in its own task so a
//! caller dropping the future cannot stop it between the two phases.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::{CacheEntry, StateCache};
use super::retry::{Attempts, RetryPolicy};
use super::{RouterError, StagedWrites};
use crate::action::StateReader;
use crate::address::Address;
use crate::config::EXPORT_PAGE_SIZE;
use crate::shard::{
    bulk_export, CommitId, DownloadSource, Keyspace, LocalShardStore, MemoryShardStore, RangeTable,
    RemoteShardStore, ShardDescriptor, ShardEndpoint, ShardError, ShardId, ShardStore,
};
use crate::value::Value;

type FetchResult = Result<Option<Value>, RouterError>;
type InFlight = Shared<BoxFuture<'static, FetchResult>>;

/// Counters exposed to the node's metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_len: usize,
    pub fetches: u64,
    pub coalesced: u64,
    pub retries: u64,
    pub commits: u64,
    pub failed_commits: u64,
}

/// Outcome of a successful block commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReport {
    pub shards: usize,
    pub writes: usize,
}

#[derive(Default)]
struct Counters {
    fetches: AtomicU64,
    coalesced: AtomicU64,
    retries: AtomicU64,
    commits: AtomicU64,
    failed_commits: AtomicU64,
}

struct RouterInner {
    table: Arc<RangeTable>,
    stores: HashMap<ShardId, Arc<dyn ShardStore>>,
    cache: StateCache,
    retry: RetryPolicy,
    in_flight: DashMap<Address, InFlight>,
    commit_locks: DashMap<[u8; 32], Arc<tokio::sync::Mutex<()>>>,
    counters: Counters,
}

/// Routes reads and commits to the shard owning each address. Cheap to
/// clone; clones share the cache and connections.
#[derive(Clone)]
pub struct StateRouter {
    inner: Arc<RouterInner>,
}

impl StateRouter {
    /// Build a router over already-opened stores. Every shard in `table`
    /// needs a store.
    pub fn new(
        table: RangeTable,
        stores: HashMap<ShardId, Arc<dyn ShardStore>>,
        cache_capacity: usize,
        retry: RetryPolicy,
    ) -> Result<Self, RouterError> {
        if let Some(missing) = table.shards().iter().find(|d| !stores.contains_key(&d.id)) {
            return Err(RouterError::MissingStore(missing.id));
        }
        Ok(Self {
            inner: Arc::new(RouterInner {
                table: Arc::new(table),
                stores,
                cache: StateCache::new(cache_capacity),
                retry,
                in_flight: DashMap::new(),
                commit_locks: DashMap::new(),
                counters: Counters::default(),
            }),
        })
    }

    /// Build the range table from `descriptors` and open a store for each:
    /// sled for local shards with a path, memory for local shards without
    /// one, a TCP client for remote shards.
    pub fn from_descriptors(
        descriptors: Vec<ShardDescriptor>,
        keyspace: Keyspace,
        cache_capacity: usize,
        retry: RetryPolicy,
    ) -> Result<Self, RouterError> {
        let table = RangeTable::new(descriptors, keyspace)?;
        let mut stores: HashMap<ShardId, Arc<dyn ShardStore>> = HashMap::new();
        for descriptor in table.shards() {
            let store: Arc<dyn ShardStore> = match (&descriptor.endpoint, &descriptor.store_path) {
                (ShardEndpoint::Local, Some(path)) => {
                    Arc::new(LocalShardStore::open(path).map_err(|source| RouterError::Shard {
                        shard: descriptor.id,
                        source,
                    })?)
                }
                (ShardEndpoint::Local, None) => Arc::new(MemoryShardStore::new()),
                (ShardEndpoint::Remote { host, port }, _) => {
                    Arc::new(RemoteShardStore::new(host.clone(), *port))
                }
            };
            info!(
                shard = %descriptor.id,
                range = %descriptor.range,
                endpoint = %descriptor.endpoint,
                "shard attached"
            );
            stores.insert(descriptor.id, store);
        }
        Self::new(table, stores, cache_capacity, retry)
    }

    pub fn table(&self) -> &RangeTable {
        &self.inner.table
    }

    pub fn cache(&self) -> &StateCache {
        &self.inner.cache
    }

    pub fn store(&self, shard: ShardId) -> Option<Arc<dyn ShardStore>> {
        self.inner.stores.get(&shard).cloned()
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.inner.counters;
        RouterStats {
            cache_hits: self.inner.cache.hits(),
            cache_misses: self.inner.cache.misses(),
            cache_len: self.inner.cache.len(),
            fetches: c.fetches.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
            failed_commits: c.failed_commits.load(Ordering::Relaxed),
        }
    }

    // -- Reads ----------------------------------------------------------------

    /// Current committed value at `address`.
    pub async fn get(&self, address: &Address) -> Result<Option<Value>, RouterError> {
        if let Some(entry) = self.inner.cache.get(address) {
            return Ok(entry.value);
        }

        let fetch = match self.inner.in_flight.entry(*address) {
            Entry::Occupied(occupied) => {
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                let inner = Arc::clone(&self.inner);
                let address = *address;
                let fetch = async move {
                    let result = inner.fetch(address).await;
                    inner.in_flight.remove(&address);
                    result
                }
                .boxed()
                .shared();
                vacant.insert(fetch.clone());
                fetch
            }
        };
        fetch.await
    }

    /// Read many addresses concurrently. Fails on the first error.
    pub async fn get_many(&self, addresses: &[Address]) -> Result<Vec<Option<Value>>, RouterError> {
        futures::future::try_join_all(addresses.iter().map(|a| self.get(a))).await
    }

    // -- Commits --------------------------------------------------------------

    /// Commit a block's staged writes on top of `parent` (the tip the block
    /// extends, `None` for genesis).
    pub async fn commit(
        &self,
        parent: Option<[u8; 32]>,
        commit_id: CommitId,
        staged: StagedWrites,
    ) -> Result<CommitReport, RouterError> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.commit_block(parent, commit_id, staged).await })
            .await
            .map_err(|e| RouterError::TaskFailed(e.to_string()))?
    }

    // -- Bootstrap ------------------------------------------------------------

    /// Seed every empty local shard that has a download source from that
    /// source. Returns the number of entries imported.
    pub async fn bootstrap(&self) -> Result<usize, RouterError> {
        self.bootstrap_with(|source| {
            Arc::new(RemoteShardStore::new(source.host.clone(), source.port)) as Arc<dyn ShardStore>
        })
        .await
    }

    /// [`StateRouter::bootstrap`] with a caller-supplied way to reach each
    /// download source.
    pub async fn bootstrap_with<F>(&self, connect: F) -> Result<usize, RouterError>
    where
        F: Fn(&DownloadSource) -> Arc<dyn ShardStore>,
    {
        let prefix_bytes = self.inner.table.keyspace().prefix_bytes();
        let mut imported = 0usize;

        for descriptor in self.inner.table.shards() {
            let Some(source) = &descriptor.download_source else {
                continue;
            };
            if descriptor.endpoint != ShardEndpoint::Local {
                continue;
            }
            let store = self
                .store(descriptor.id)
                .ok_or(RouterError::MissingStore(descriptor.id))?;
            let bootstrap_err = |e: ShardError| RouterError::Bootstrap {
                shard: descriptor.id,
                reason: e.to_string(),
            };
            if !store.is_empty().await.map_err(bootstrap_err)? {
                debug!(shard = %descriptor.id, "local shard already populated, skipping bootstrap");
                continue;
            }

            info!(shard = %descriptor.id, range = %descriptor.range, %source, "bootstrapping shard");
            let mut pages = Box::pin(bulk_export(
                connect(source),
                descriptor.range,
                prefix_bytes,
                EXPORT_PAGE_SIZE,
            ));
            let mut count = 0usize;
            while let Some(page) = pages.next().await {
                let page = page.map_err(bootstrap_err)?;
                count += page.len();
                store.import(page).await.map_err(bootstrap_err)?;
            }
            info!(shard = %descriptor.id, entries = count, "shard bootstrap complete");
            imported += count;
        }
        Ok(imported)
    }
}

impl RouterInner {
    fn store_for(&self, shard: ShardId) -> Result<Arc<dyn ShardStore>, RouterError> {
        self.stores
            .get(&shard)
            .cloned()
            .ok_or(RouterError::MissingStore(shard))
    }

    async fn fetch(&self, address: Address) -> FetchResult {
        let shard = self.table.resolve_address(&address).id;
        let store = self.store_for(shard)?;
        let epoch = self.cache.epoch();

        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let mut attempts = Attempts::default();
        let result = self
            .retry
            .run(shard, &mut attempts, || store.get(&address))
            .await;
        self.counters
            .retries
            .fetch_add(u64::from(attempts.retries()), Ordering::Relaxed);

        let value = result?;
        debug!(%address, %shard, found = value.is_some(), "fetched state from shard");
        self.cache.insert_if_current(
            address,
            CacheEntry {
                value: value.clone(),
                shard,
            },
            epoch,
        );
        Ok(value)
    }

    async fn with_retry<T, F, Fut>(&self, shard: ShardId, op: F) -> Result<T, RouterError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ShardError>>,
    {
        let mut attempts = Attempts::default();
        let result = self.retry.run(shard, &mut attempts, op).await;
        self.counters
            .retries
            .fetch_add(u64::from(attempts.retries()), Ordering::Relaxed);
        result
    }

    async fn commit_block(
        &self,
        parent: Option<[u8; 32]>,
        commit_id: CommitId,
        staged: StagedWrites,
    ) -> Result<CommitReport, RouterError> {
        let tip = parent.unwrap_or([0u8; 32]);
        let lock = self
            .commit_locks
            .entry(tip)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.two_phase_commit(commit_id, staged).await
        };

        // Drop the lock entry unless another commit on this tip is waiting.
        self.commit_locks
            .remove_if(&tip, |_, l| Arc::strong_count(l) <= 2);

        match &result {
            Ok(report) => {
                self.counters.commits.fetch_add(1, Ordering::Relaxed);
                info!(
                    commit = %commit_id,
                    shards = report.shards,
                    writes = report.writes,
                    "block writes committed"
                );
            }
            Err(e) => {
                self.counters.failed_commits.fetch_add(1, Ordering::Relaxed);
                warn!(commit = %commit_id, error = %e, "block commit failed");
            }
        }
        result
    }

    async fn two_phase_commit(
        &self,
        commit_id: CommitId,
        staged: StagedWrites,
    ) -> Result<CommitReport, RouterError> {
        let writes = staged.len();
        let mut by_shard: BTreeMap<ShardId, Vec<(Address, Value)>> = BTreeMap::new();
        for (address, value) in staged {
            let shard = self.table.resolve_address(&address).id;
            by_shard.entry(shard).or_default().push((address, value));
        }
        let touched: Vec<Address> = by_shard
            .values()
            .flat_map(|w| w.iter().map(|(a, _)| *a))
            .collect();

        if by_shard.is_empty() {
            return Ok(CommitReport { shards: 0, writes });
        }

        let mut stores = Vec::with_capacity(by_shard.len());
        for shard in by_shard.keys() {
            stores.push((*shard, self.store_for(*shard)?));
        }

        // Phase one.
        let prepares = stores.iter().map(|(shard, store)| {
            let shard_writes = by_shard.get(shard).cloned().unwrap_or_default();
            async move {
                self.with_retry(*shard, || {
                    let store = Arc::clone(store);
                    let shard_writes = shard_writes.clone();
                    async move {
                        match store.prepare(commit_id, shard_writes).await {
                            // A timed-out attempt may have landed.
                            Err(ShardError::AlreadyPrepared(_)) => Ok(()),
                            other => other,
                        }
                    }
                })
                .await
            }
        });
        let prepared = join_all(prepares).await;

        if let Some((shard, error)) = stores
            .iter()
            .zip(prepared.iter())
            .find_map(|((shard, _), r)| r.as_ref().err().map(|e| (*shard, e.clone())))
        {
            for (abort_shard, store) in &stores {
                if let Err(e) = self
                    .with_retry(*abort_shard, || store.abort(commit_id))
                    .await
                {
                    warn!(shard = %abort_shard, error = %e, "abort after failed prepare did not reach shard");
                }
            }
            self.cache.invalidate(touched.iter());
            return Err(RouterError::CommitAborted {
                shard,
                reason: error.to_string(),
            });
        }

        // Phase two.
        let commits = stores.iter().map(|(shard, store)| async move {
            (
                *shard,
                self.with_retry(*shard, || store.commit(commit_id)).await,
            )
        });
        let committed = join_all(commits).await;
        if let Some((shard, Err(e))) = committed.iter().find(|(_, r)| r.is_err()) {
            self.cache.invalidate(touched.iter());
            return Err(RouterError::CommitIncomplete {
                shard: *shard,
                reason: e.to_string(),
            });
        }

        self.cache.write_through(by_shard.into_iter().flat_map(|(shard, writes)| {
            writes.into_iter().map(move |(address, value)| {
                let value = if value.is_null() { None } else { Some(value) };
                (address, CacheEntry { value, shard })
            })
        }));

        Ok(CommitReport {
            shards: stores.len(),
            writes,
        })
    }
}

#[async_trait]
impl StateReader for StateRouter {
    async fn get_state(&self, address: &Address) -> Result<Option<Value>, RouterError> {
        self.get(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr(first: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[0] = first;
        Address::new(bytes)
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            timeout: Duration::from_millis(200),
        }
    }

    /// Two shards `[0,100)` and `[100,256)` over memory stores.
    fn two_shard_router(cache: usize) -> (StateRouter, Arc<MemoryShardStore>, Arc<MemoryShardStore>) {
        let low = Arc::new(MemoryShardStore::with_entries([(addr(10), Value::from(1u64))]));
        let high = Arc::new(MemoryShardStore::with_entries([(addr(200), Value::from(2u64))]));
        let table = RangeTable::new(
            vec![
                ShardDescriptor::local(0, 0, 100),
                ShardDescriptor::local(1, 100, 256),
            ],
            Keyspace::default(),
        )
        .unwrap();
        let mut stores: HashMap<ShardId, Arc<dyn ShardStore>> = HashMap::new();
        stores.insert(ShardId(0), low.clone());
        stores.insert(ShardId(1), high.clone());
        let router = StateRouter::new(table, stores, cache, retry()).unwrap();
        (router, low, high)
    }

    #[tokio::test]
    async fn routes_reads_to_owning_shard() {
        let (router, low, high) = two_shard_router(8);
        assert_eq!(router.get(&addr(10)).await.unwrap(), Some(Value::from(1u64)));
        assert_eq!(router.get(&addr(200)).await.unwrap(), Some(Value::from(2u64)));
        assert_eq!(router.get(&addr(50)).await.unwrap(), None);
        assert_eq!(low.get_calls(), 2);
        assert_eq!(high.get_calls(), 1);
    }

    #[tokio::test]
    async fn cached_reads_skip_the_shard() {
        let (router, low, _) = two_shard_router(8);
        router.get(&addr(10)).await.unwrap();
        router.get(&addr(10)).await.unwrap();
        router.get(&addr(50)).await.unwrap();
        router.get(&addr(50)).await.unwrap();
        assert_eq!(low.get_calls(), 2);
        let stats = router.stats();
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.fetches, 2);
    }

    #[tokio::test]
    async fn eviction_forces_refetch() {
        let (router, low, _) = two_shard_router(2);
        router.get(&addr(1)).await.unwrap();
        router.get(&addr(2)).await.unwrap();
        router.get(&addr(3)).await.unwrap(); // evicts addr(1)
        assert_eq!(low.get_calls(), 3);
        assert!(!router.cache().contains(&addr(1)));

        router.get(&addr(1)).await.unwrap();
        assert_eq!(low.get_calls(), 4);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let (router, low, _) = two_shard_router(8);
        low.set_read_delay(Some(Duration::from_millis(50)));

        let reads = (0..16).map(|_| {
            let router = router.clone();
            tokio::spawn(async move { router.get(&addr(10)).await })
        });
        for read in join_all(reads).await {
            assert_eq!(read.unwrap().unwrap(), Some(Value::from(1u64)));
        }
        assert_eq!(low.get_calls(), 1);
        assert_eq!(router.stats().coalesced, 15);
    }

    #[tokio::test]
    async fn transient_read_failures_are_retried() {
        let (router, low, _) = two_shard_router(8);
        low.fail_next_gets(2);
        assert_eq!(router.get(&addr(10)).await.unwrap(), Some(Value::from(1u64)));
        assert_eq!(low.get_calls(), 3);
        assert_eq!(router.stats().retries, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_shard_unavailable() {
        let (router, low, _) = two_shard_router(8);
        low.fail_next_gets(10);
        let err = router.get(&addr(10)).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::ShardUnavailable { shard: ShardId(0), attempts: 3, .. }
        ));
        // Failures are not cached.
        assert!(!router.cache().contains(&addr(10)));
    }

    #[tokio::test]
    async fn commit_spans_shards_and_writes_through() {
        let (router, low, high) = two_shard_router(8);
        router.get(&addr(10)).await.unwrap();

        let mut staged = StagedWrites::new();
        staged.put(addr(10), Value::from(11u64));
        staged.put(addr(150), Value::from("new"));
        staged.put(addr(200), Value::Null);

        let report = router
            .commit(None, CommitId([1; 32]), staged)
            .await
            .unwrap();
        assert_eq!(report, CommitReport { shards: 2, writes: 3 });

        assert_eq!(low.snapshot().get(&addr(10)), Some(&Value::from(11u64)));
        assert_eq!(high.snapshot().get(&addr(150)), Some(&Value::from("new")));
        assert!(high.snapshot().get(&addr(200)).is_none());

        let calls = low.get_calls();
        assert_eq!(router.get(&addr(10)).await.unwrap(), Some(Value::from(11u64)));
        assert_eq!(router.get(&addr(200)).await.unwrap(), None);
        assert_eq!(low.get_calls(), calls);
    }

    #[tokio::test]
    async fn failed_prepare_leaves_every_shard_unchanged() {
        let (router, low, high) = two_shard_router(8);
        high.set_fail_prepare(true);
        let before_low = low.snapshot();
        let before_high = high.snapshot();

        let mut staged = StagedWrites::new();
        staged.put(addr(10), Value::from(99u64));
        staged.put(addr(150), Value::from(99u64));
        let err = router
            .commit(Some([7; 32]), CommitId([2; 32]), staged)
            .await
            .unwrap_err();

        assert!(matches!(err, RouterError::CommitAborted { shard: ShardId(1), .. }));
        assert_eq!(low.snapshot(), before_low);
        assert_eq!(high.snapshot(), before_high);
        assert_eq!(low.prepared_count(), 0);
        assert_eq!(router.stats().failed_commits, 1);
    }

    #[tokio::test]
    async fn empty_commit_touches_nothing() {
        let (router, low, _) = two_shard_router(8);
        let report = router
            .commit(None, CommitId([3; 32]), StagedWrites::new())
            .await
            .unwrap();
        assert_eq!(report.shards, 0);
        assert_eq!(low.prepared_count(), 0);
    }

    #[tokio::test]
    async fn missing_store_is_rejected() {
        let table = RangeTable::new(vec![ShardDescriptor::local(0, 0, 256)], Keyspace::default())
            .unwrap();
        let err = StateRouter::new(table, HashMap::new(), 4, retry()).err();
        assert_eq!(err, Some(RouterError::MissingStore(ShardId(0))));
    }

    #[tokio::test]
    async fn bootstrap_seeds_empty_local_shard() {
        let source = Arc::new(MemoryShardStore::with_entries(
            (0..=255u8).map(|i| (addr(i), Value::from(u64::from(i)))).collect::<Vec<_>>(),
        ));
        let mut low = ShardDescriptor::local(0, 0, 100);
        low.download_source = Some(DownloadSource {
            host: "seed".into(),
            port: 1,
        });
        let high = ShardDescriptor::local(1, 100, 256);
        let router =
            StateRouter::from_descriptors(vec![low, high], Keyspace::default(), 8, retry()).unwrap();

        let imported = router
            .bootstrap_with(|_| source.clone() as Arc<dyn ShardStore>)
            .await
            .unwrap();
        assert_eq!(imported, 100);
        assert_eq!(router.get(&addr(42)).await.unwrap(), Some(Value::from(42u64)));
        // The high shard had no download source.
        assert_eq!(router.get(&addr(142)).await.unwrap(), None);

        // Already populated: a second run imports nothing.
        let again = router
            .bootstrap_with(|_| source.clone() as Arc<dyn ShardStore>)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }
}
