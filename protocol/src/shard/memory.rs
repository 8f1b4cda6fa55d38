//! In-memory shard store.
//!
//! Backs tests and throwaway nodes. It also carries a few knobs for fault
//! injection (failed reads, failed prepares, slow reads) so router
//! behaviour under a misbehaving shard can be exercised without sockets.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use super::descriptor::ShardRange;
use super::store::{CommitId, ExportPage, ShardError, ShardStore};
use crate::address::Address;
use crate::value::Value;

#[derive(Default)]
pub struct MemoryShardStore {
    state: RwLock<BTreeMap<Address, Value>>,
    prepared: Mutex<HashMap<CommitId, Vec<(Address, Value)>>>,
    committed: Mutex<HashSet<CommitId>>,
    get_calls: AtomicUsize,
    failing_gets: AtomicU32,
    fail_prepare: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

impl MemoryShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = (Address, Value)>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write();
            for (address, value) in entries {
                if !value.is_null() {
                    state.insert(address, value);
                }
            }
        }
        store
    }

    /// Number of `get` calls served, failed ones included.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` reads fail with a transient error.
    pub fn fail_next_gets(&self, n: u32) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    /// Make every `prepare` fail until reset.
    pub fn set_fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    /// Delay every read by `delay`.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    /// Snapshot of the committed state.
    pub fn snapshot(&self) -> BTreeMap<Address, Value> {
        self.state.read().clone()
    }

    pub fn prepared_count(&self) -> usize {
        self.prepared.lock().len()
    }

    fn apply(&self, writes: Vec<(Address, Value)>) {
        let mut state = self.state.write();
        for (address, value) in writes {
            if value.is_null() {
                state.remove(&address);
            } else {
                state.insert(address, value);
            }
        }
    }
}

#[async_trait]
impl ShardStore for MemoryShardStore {
    async fn get(&self, address: &Address) -> Result<Option<Value>, ShardError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ShardError::Unreachable("injected read failure".into()));
        }
        Ok(self.state.read().get(address).cloned())
    }

    async fn export_page(
        &self,
        range: ShardRange,
        prefix_bytes: usize,
        after: Option<Address>,
        limit: usize,
    ) -> Result<ExportPage, ShardError> {
        let lower = match after {
            Some(a) => Bound::Excluded(a),
            None => Bound::Included(range.lower_bound(prefix_bytes)),
        };
        let state = self.state.read();
        let entries: Vec<(Address, Value)> = state
            .range((lower, Bound::Unbounded))
            .take_while(|(a, _)| a.range_key(prefix_bytes) < range.end)
            .filter(|(a, _)| range.contains_address(a, prefix_bytes))
            .take(limit)
            .map(|(a, v)| (*a, v.clone()))
            .collect();
        let next = if entries.len() == limit {
            entries.last().map(|(a, _)| *a)
        } else {
            None
        };
        Ok(ExportPage { entries, next })
    }

    async fn import(&self, entries: Vec<(Address, Value)>) -> Result<(), ShardError> {
        self.apply(entries);
        Ok(())
    }

    async fn prepare(
        &self,
        commit_id: CommitId,
        writes: Vec<(Address, Value)>,
    ) -> Result<(), ShardError> {
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(ShardError::Storage("injected prepare failure".into()));
        }
        let mut prepared = self.prepared.lock();
        if prepared.contains_key(&commit_id) || self.committed.lock().contains(&commit_id) {
            return Err(ShardError::AlreadyPrepared(commit_id));
        }
        prepared.insert(commit_id, writes);
        Ok(())
    }

    async fn commit(&self, commit_id: CommitId) -> Result<(), ShardError> {
        let mut prepared = self.prepared.lock();
        let mut committed = self.committed.lock();
        if committed.contains(&commit_id) {
            return Ok(());
        }
        let writes = prepared
            .remove(&commit_id)
            .ok_or(ShardError::UnknownCommit(commit_id))?;
        self.apply(writes);
        committed.insert(commit_id);
        Ok(())
    }

    async fn abort(&self, commit_id: CommitId) -> Result<(), ShardError> {
        self.prepared.lock().remove(&commit_id);
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool, ShardError> {
        Ok(self.state.read().is_empty())
    }
}
