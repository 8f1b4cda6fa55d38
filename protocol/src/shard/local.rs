//! # Local Shard Store
//!
//! A persistent shard on sled's embedded key-value store.
//!
//! ## Tree layout
//!
//! | Tree      | Key                | Value                                  |
//! |-----------|--------------------|----------------------------------------|
//! | `state`   | address (20 bytes) | canonical value bytes                  |
//! | `pending` | commit id (32B)    | `bincode(Vec<(address, value bytes)>)` |
//! | `commits` | commit id (32B)    | empty                                  |
//!
//! Addresses are stored raw, so sled's lexicographic key order matches the
//! range-key order and range exports are plain range scans.
//!
//! ## Atomicity
//!
//! `prepare` persists the write set in `pending` and flushes, so a prepared
//! commit survives a restart. `commit` applies the whole set to `state` as
//! one `Batch`, records the id in `commits` and then drops the pending
//! entry. Either every write of a block lands or none does.
//!
//! A commit id found in `commits` is acknowledged again without touching
//! `state`, so a router that lost the first acknowledgement can retry.
//! A crash between the batch and the marker leaves the set in `pending`;
//! its writes are absolute values, so applying it again is harmless.

use async_trait::async_trait;
use sled::{Batch, Db, Tree};
use std::path::Path;
use tracing::debug;

use super::descriptor::ShardRange;
use super::store::{CommitId, ExportPage, ShardError, ShardStore};
use crate::address::Address;
use crate::value::{self, Value};

type EncodedWrites = Vec<(Address, Vec<u8>)>;

/// sled-backed shard store. Cheap to clone; clones share the database.
#[derive(Debug, Clone)]
pub struct LocalShardStore {
    db: Db,
    state: Tree,
    pending: Tree,
    commits: Tree,
}

impl LocalShardStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ShardError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A store that lives in a temp directory and is removed on drop.
    pub fn open_temporary() -> Result<Self, ShardError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, ShardError> {
        let state = db.open_tree("state")?;
        let pending = db.open_tree("pending")?;
        let commits = db.open_tree("commits")?;
        Ok(Self {
            db,
            state,
            pending,
            commits,
        })
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    fn decode_entry(key: &[u8], raw: &[u8]) -> Result<(Address, Value), ShardError> {
        let address = Address::try_from_slice(key)
            .map_err(|e| ShardError::Storage(format!("bad key in state tree: {}", e)))?;
        Ok((address, value::decode(raw)?))
    }

    fn batch_for(writes: &[(Address, Vec<u8>)]) -> Batch {
        let mut batch = Batch::default();
        for (address, bytes) in writes {
            // `n` is the canonical encoding of Null.
            if bytes.as_slice() == b"n" {
                batch.remove(address.as_bytes().as_slice());
            } else {
                batch.insert(address.as_bytes().as_slice(), bytes.as_slice());
            }
        }
        batch
    }

    fn encode_writes(writes: Vec<(Address, Value)>) -> EncodedWrites {
        writes
            .into_iter()
            .map(|(address, value)| (address, value::encode(&value)))
            .collect()
    }
}

#[async_trait]
impl ShardStore for LocalShardStore {
    async fn get(&self, address: &Address) -> Result<Option<Value>, ShardError> {
        match self.state.get(address.as_bytes())? {
            Some(raw) => Ok(Some(value::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn export_page(
        &self,
        range: ShardRange,
        prefix_bytes: usize,
        after: Option<Address>,
        limit: usize,
    ) -> Result<ExportPage, ShardError> {
        let start = range.lower_bound(prefix_bytes);
        let mut entries = Vec::with_capacity(limit.min(1024));

        for item in self.state.range(start.as_bytes().as_slice()..) {
            if entries.len() >= limit {
                break;
            }
            let (key, raw) = item?;
            let (address, value) = Self::decode_entry(&key, &raw)?;
            if after.map_or(false, |a| address <= a) {
                continue;
            }
            if !range.contains_address(&address, prefix_bytes) {
                break;
            }
            entries.push((address, value));
        }

        let next = if entries.len() == limit {
            entries.last().map(|(a, _)| *a)
        } else {
            None
        };
        Ok(ExportPage { entries, next })
    }

    async fn import(&self, entries: Vec<(Address, Value)>) -> Result<(), ShardError> {
        let count = entries.len();
        let writes = Self::encode_writes(entries);
        self.state.apply_batch(Self::batch_for(&writes))?;
        self.db.flush_async().await?;
        debug!(count, "imported entries into local shard");
        Ok(())
    }

    async fn prepare(
        &self,
        commit_id: CommitId,
        writes: Vec<(Address, Value)>,
    ) -> Result<(), ShardError> {
        if self.pending.contains_key(commit_id.0)? || self.commits.contains_key(commit_id.0)? {
            return Err(ShardError::AlreadyPrepared(commit_id));
        }
        let encoded = bincode::serialize(&Self::encode_writes(writes))
            .map_err(|e| ShardError::Storage(e.to_string()))?;
        self.pending.insert(commit_id.0, encoded)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn commit(&self, commit_id: CommitId) -> Result<(), ShardError> {
        if self.commits.contains_key(commit_id.0)? {
            debug!(commit = %commit_id, "local shard commit already applied");
            return Ok(());
        }
        let raw = self
            .pending
            .get(commit_id.0)?
            .ok_or(ShardError::UnknownCommit(commit_id))?;
        let writes: EncodedWrites =
            bincode::deserialize(&raw).map_err(|e| ShardError::Storage(e.to_string()))?;

        self.state.apply_batch(Self::batch_for(&writes))?;
        self.commits.insert(commit_id.0, &[] as &[u8])?;
        self.pending.remove(commit_id.0)?;
        self.db.flush_async().await?;
        debug!(commit = %commit_id, writes = writes.len(), "local shard commit applied");
        Ok(())
    }

    async fn abort(&self, commit_id: CommitId) -> Result<(), ShardError> {
        self.pending.remove(commit_id.0)?;
        Ok(())
    }

    async fn is_empty(&self) -> Result<bool, ShardError> {
        Ok(self.state.is_empty())
    }
}
