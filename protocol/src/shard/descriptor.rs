//! Shard descriptors: who owns which slice of the keyspace and how to
//! reach them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::address::Address;
use crate::config::ADDRESS_LENGTH;

/// Position of a shard in the node configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// Half-open interval `[start, end)` of range keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardRange {
    pub start: u64,
    pub end: u64,
}

impl ShardRange {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, key: u64) -> bool {
        self.start <= key && key < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Does `address` fall inside this range under `prefix_bytes`?
    pub fn contains_address(&self, address: &Address, prefix_bytes: usize) -> bool {
        self.contains(address.range_key(prefix_bytes))
    }

    /// Smallest address whose range key is `start`. Addresses sort
    /// lexicographically, so every address in the range is `>=` this one.
    pub fn lower_bound(&self, prefix_bytes: usize) -> Address {
        let n = prefix_bytes.clamp(1, 8);
        let mut bytes = [0u8; ADDRESS_LENGTH];
        let be = self.start.to_be_bytes();
        bytes[..n].copy_from_slice(&be[8 - n..]);
        Address::new(bytes)
    }
}

impl fmt::Display for ShardRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// How the router reaches a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardEndpoint {
    /// In-process store opened from the descriptor's `store_path`.
    Local,
    /// A `strata-node serve-shard` instance.
    Remote { host: String, port: u16 },
}

impl fmt::Display for ShardEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardEndpoint::Local => write!(f, "local"),
            ShardEndpoint::Remote { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// Remote shard server used to seed an empty local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSource {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything the router knows about one shard. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub id: ShardId,
    pub endpoint: ShardEndpoint,
    pub range: ShardRange,
    pub store_path: Option<PathBuf>,
    pub download_source: Option<DownloadSource>,
}

impl ShardDescriptor {
    /// A local shard without a backing path or download source. Mostly
    /// useful in tests with in-memory stores.
    pub fn local(id: u32, start: u64, end: u64) -> Self {
        Self {
            id: ShardId(id),
            endpoint: ShardEndpoint::Local,
            range: ShardRange::new(start, end),
            store_path: None,
            download_source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_half_open() {
        let range = ShardRange::new(100, 256);
        assert!(!range.contains(99));
        assert!(range.contains(100));
        assert!(range.contains(255));
        assert!(!range.contains(256));
        assert!(ShardRange::new(5, 5).is_empty());
    }

    #[test]
    fn lower_bound_pads_prefix_with_zeros() {
        let bound = ShardRange::new(0x96, 0x100).lower_bound(1);
        assert_eq!(bound.as_bytes()[0], 0x96);
        assert!(bound.as_bytes()[1..].iter().all(|b| *b == 0));

        let bound = ShardRange::new(0x0102, 0x0200).lower_bound(2);
        assert_eq!(&bound.as_bytes()[..3], &[0x01, 0x02, 0x00]);
    }
}
