//! # Shard Range Table
//!
//! Maps the address keyspace to the shards that own it. The table is built
//! once from configuration and never changes, so lookups need no locking.
//!
//! Construction fails fast on any layout that would leave an address with
//! zero or two owners.

use thiserror::Error;

use super::descriptor::{ShardDescriptor, ShardRange};
use crate::address::Address;
use crate::config::{DEFAULT_PREFIX_BYTES, MAX_PREFIX_BYTES};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("no shards configured")]
    NoShards,

    #[error("shard range {range} is empty")]
    EmptyRange { range: ShardRange },

    #[error("shard ranges {left} and {right} overlap")]
    RangeOverlap { left: ShardRange, right: ShardRange },

    #[error("gap between shard ranges {left} and {right}")]
    RangeGap { left: ShardRange, right: ShardRange },

    #[error("shard ranges cover [{covered_start}, {covered_end}) but the keyspace is [{min}, {max})")]
    RangeCoverageError {
        covered_start: u64,
        covered_end: u64,
        min: u64,
        max: u64,
    },

    #[error("range key {key} is outside the keyspace [0, {max})")]
    AddressOutOfRange { key: u64, max: u64 },
}

/// The space of range keys: `[0, 256^prefix_bytes)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keyspace {
    prefix_bytes: usize,
}

impl Keyspace {
    /// `prefix_bytes` is clamped to the supported `1..=MAX_PREFIX_BYTES`.
    pub fn new(prefix_bytes: usize) -> Self {
        Self {
            prefix_bytes: prefix_bytes.clamp(1, MAX_PREFIX_BYTES),
        }
    }

    pub fn prefix_bytes(&self) -> usize {
        self.prefix_bytes
    }

    pub fn min(&self) -> u64 {
        0
    }

    /// Exclusive upper bound.
    pub fn max(&self) -> u64 {
        1u64 << (8 * self.prefix_bytes)
    }

    pub fn key_of(&self, address: &Address) -> u64 {
        address.range_key(self.prefix_bytes)
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX_BYTES)
    }
}

/// Disjoint, gap-free assignment of the keyspace to shards.
#[derive(Debug, Clone)]
pub struct RangeTable {
    keyspace: Keyspace,
    /// Sorted by `range.start`.
    shards: Vec<ShardDescriptor>,
}

impl RangeTable {
    pub fn new(mut shards: Vec<ShardDescriptor>, keyspace: Keyspace) -> Result<Self, RangeError> {
        if shards.is_empty() {
            return Err(RangeError::NoShards);
        }
        if let Some(bad) = shards.iter().find(|d| d.range.is_empty()) {
            return Err(RangeError::EmptyRange { range: bad.range });
        }

        shards.sort_by_key(|d| d.range.start);

        for pair in shards.windows(2) {
            let (left, right) = (pair[0].range, pair[1].range);
            if left.end > right.start {
                return Err(RangeError::RangeOverlap { left, right });
            }
            if left.end < right.start {
                return Err(RangeError::RangeGap { left, right });
            }
        }

        let covered_start = shards[0].range.start;
        let covered_end = shards[shards.len() - 1].range.end;
        if covered_start != keyspace.min() || covered_end != keyspace.max() {
            return Err(RangeError::RangeCoverageError {
                covered_start,
                covered_end,
                min: keyspace.min(),
                max: keyspace.max(),
            });
        }

        Ok(Self { keyspace, shards })
    }

    /// Owner of a raw range key.
    pub fn resolve(&self, key: u64) -> Result<&ShardDescriptor, RangeError> {
        if key >= self.keyspace.max() {
            return Err(RangeError::AddressOutOfRange {
                key,
                max: self.keyspace.max(),
            });
        }
        // Index of the last shard whose start is <= key. Coverage guarantees
        // one exists and that it contains the key.
        let idx = self.shards.partition_point(|d| d.range.start <= key) - 1;
        Ok(&self.shards[idx])
    }

    /// Owner of an address.
    pub fn resolve_address(&self, address: &Address) -> &ShardDescriptor {
        let key = self.keyspace.key_of(address);
        // Range keys are always inside the keyspace.
        let idx = self.shards.partition_point(|d| d.range.start <= key) - 1;
        &self.shards[idx]
    }

    pub fn keyspace(&self) -> Keyspace {
        self.keyspace
    }

    /// Shards in ascending range order.
    pub fn shards(&self) -> &[ShardDescriptor] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}
