//! # State Router
//!
//! Everything between the evaluator and the shards: resolving an address to
//! its owner, reading with timeouts and retries, caching, and committing a
//! block's writes across shards.

pub mod cache;
pub mod retry;
pub mod state_router;

use std::collections::BTreeMap;
use thiserror::Error;

use crate::address::Address;
use crate::evaluator::StateDelta;
use crate::shard::{RangeError, ShardError, ShardId};
use crate::value::Value;

pub use cache::{CacheEntry, StateCache};
pub use retry::{Attempts, RetryPolicy};
pub use state_router::{CommitReport, RouterStats, StateRouter};

/// Router failures. `Clone` so one result can be handed to every caller
/// waiting on a coalesced fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("{shard} unavailable after {attempts} attempts: {reason}")]
    ShardUnavailable {
        shard: ShardId,
        attempts: u32,
        reason: String,
    },

    #[error("{shard} failed: {source}")]
    Shard {
        shard: ShardId,
        #[source]
        source: ShardError,
    },

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("no store attached for {0}")]
    MissingStore(ShardId),

    #[error("commit aborted, {shard} refused to prepare: {reason}")]
    CommitAborted { shard: ShardId, reason: String },

    #[error("commit incomplete, {shard} failed phase two: {reason}")]
    CommitIncomplete { shard: ShardId, reason: String },

    #[error("bootstrap of {shard} failed: {reason}")]
    Bootstrap { shard: ShardId, reason: String },

    #[error("commit task failed: {0}")]
    TaskFailed(String),
}

impl RouterError {
    /// The shard this error came from, when there is one.
    pub fn shard(&self) -> Option<ShardId> {
        match self {
            RouterError::ShardUnavailable { shard, .. }
            | RouterError::Shard { shard, .. }
            | RouterError::CommitAborted { shard, .. }
            | RouterError::CommitIncomplete { shard, .. }
            | RouterError::Bootstrap { shard, .. } => Some(*shard),
            RouterError::MissingStore(shard) => Some(*shard),
            RouterError::Range(_) | RouterError::TaskFailed(_) => None,
        }
    }
}

/// Writes collected while building a block. Invisible to readers until the
/// router commits them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedWrites {
    writes: BTreeMap<Address, Value>,
}

impl StagedWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a write. A later write to the same address replaces it.
    pub fn put(&mut self, address: Address, value: Value) {
        self.writes.insert(address, value);
    }

    /// Stage every entry of a delta.
    pub fn extend(&mut self, delta: &StateDelta) {
        for (address, value) in delta.iter() {
            self.writes.insert(*address, value.clone());
        }
    }

    pub fn get(&self, address: &Address) -> Option<&Value> {
        self.writes.get(address)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Value)> {
        self.writes.iter()
    }
}

impl From<StateDelta> for StagedWrites {
    fn from(delta: StateDelta) -> Self {
        Self {
            writes: delta.into_iter().collect(),
        }
    }
}

impl IntoIterator for StagedWrites {
    type Item = (Address, Value);
    type IntoIter = std::collections::btree_map::IntoIter<Address, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}
