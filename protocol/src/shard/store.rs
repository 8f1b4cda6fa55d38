//! The shard store contract.
//!
//! Every shard, local or remote, answers the same small set of calls: point
//! reads, paged export of a key range, and a prepare/commit/abort triple for
//! block commits. Stores hold plain values keyed by address; writing
//! [`Value::Null`] deletes the slot.

use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::descriptor::ShardRange;
use crate::address::Address;
use crate::value::{CodecError, Value};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of a single shard call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardError {
    #[error("shard I/O error: {0}")]
    Io(String),

    #[error("shard call timed out after {ms} ms")]
    Timeout { ms: u64 },

    #[error("shard unreachable: {0}")]
    Unreachable(String),

    #[error("shard storage error: {0}")]
    Storage(String),

    #[error("stored value is corrupt: {0}")]
    Corrupt(#[from] CodecError),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("unexpected shard response: {0}")]
    Protocol(String),

    #[error("shard rejected request: {0}")]
    Remote(String),

    #[error("no prepared commit {0}")]
    UnknownCommit(CommitId),

    #[error("commit {0} is already prepared")]
    AlreadyPrepared(CommitId),
}

impl ShardError {
    /// Errors worth retrying: the shard may answer on the next attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ShardError::Io(_) | ShardError::Timeout { .. } | ShardError::Unreachable(_)
        )
    }
}

impl From<sled::Error> for ShardError {
    fn from(e: sled::Error) -> Self {
        match e {
            sled::Error::Io(io) => ShardError::Io(io.to_string()),
            other => ShardError::Storage(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ShardError {
    fn from(e: std::io::Error) -> Self {
        ShardError::Io(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Commit ids and export pages
// ---------------------------------------------------------------------------

/// Identifies one prepared write set on a shard. The router uses the hash of
/// the block being committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(pub [u8; 32]);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &hex::encode(self.0)[..16])
    }
}

/// One page of a range export, in ascending address order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportPage {
    pub entries: Vec<(Address, Value)>,
    /// Resume point for the next page. `None` once the range is exhausted.
    pub next: Option<Address>,
}

// ---------------------------------------------------------------------------
// ShardStore
// ---------------------------------------------------------------------------

/// A partition of account state.
#[async_trait]
pub trait ShardStore: Send + Sync {
    /// Current value at `address`, or `None` if the slot was never written.
    async fn get(&self, address: &Address) -> Result<Option<Value>, ShardError>;

    /// Up to `limit` entries of `range`, strictly after `after` when given.
    async fn export_page(
        &self,
        range: ShardRange,
        prefix_bytes: usize,
        after: Option<Address>,
        limit: usize,
    ) -> Result<ExportPage, ShardError>;

    /// Write entries directly, outside any commit. Used for bootstrap.
    async fn import(&self, entries: Vec<(Address, Value)>) -> Result<(), ShardError>;

    /// Phase one: stage `writes` under `commit_id` without making them
    /// visible. An id that is already staged or committed is rejected with
    /// `AlreadyPrepared`.
    async fn prepare(
        &self,
        commit_id: CommitId,
        writes: Vec<(Address, Value)>,
    ) -> Result<(), ShardError>;

    /// Phase two: atomically apply a prepared write set. Committing an id
    /// that was already committed returns `Ok` and changes nothing.
    async fn commit(&self, commit_id: CommitId) -> Result<(), ShardError>;

    /// Drop a prepared write set. Aborting an unknown id is not an error.
    async fn abort(&self, commit_id: CommitId) -> Result<(), ShardError>;

    async fn is_empty(&self) -> Result<bool, ShardError>;
}

/// Stream every entry of `range` from `store`, one page at a time.
pub fn bulk_export(
    store: Arc<dyn ShardStore>,
    range: ShardRange,
    prefix_bytes: usize,
    page_size: usize,
) -> impl Stream<Item = Result<Vec<(Address, Value)>, ShardError>> {
    // State: (store, cursor, done).
    stream::unfold(
        (store, None::<Address>, false),
        move |(store, after, done)| async move {
            if done {
                return None;
            }
            match store.export_page(range, prefix_bytes, after, page_size).await {
                Ok(page) => {
                    let finished = page.next.is_none();
                    Some((Ok(page.entries), (store, page.next, finished)))
                }
                Err(e) => Some((Err(e), (store, after, true))),
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ShardError::Timeout { ms: 10 }.is_transient());
        assert!(ShardError::Unreachable("refused".into()).is_transient());
        assert!(ShardError::Io("reset".into()).is_transient());
        assert!(!ShardError::Storage("disk full".into()).is_transient());
        assert!(!ShardError::Remote("no".into()).is_transient());
        assert!(!ShardError::UnknownCommit(CommitId([0; 32])).is_transient());
    }
}
