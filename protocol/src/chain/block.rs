//! # Blocks
//!
//! ```text
//! Block
//! ├── index          u64, genesis = 0
//! ├── previous_hash  none for genesis
//! ├── miner          address credited by the block action
//! ├── timestamp      UTC, microseconds
//! ├── difficulty     from the block policy
//! ├── transactions   in execution order
//! └── hash           BLAKE3 over the header and the tx Merkle root
//! ```
//!
//! The hash covers every header field plus the Merkle root of the
//! transaction ids, so reordering, adding or dropping a transaction changes
//! it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ChainError;
use crate::address::Address;
use crate::config::HASH_LENGTH;
use crate::crypto::hash::BLOCK_HASH_CONTEXT;
use crate::crypto::{domain_separated_hash, merkle_root};
use crate::shard::CommitId;
use crate::transaction::types::{format_timestamp, normalize_timestamp, parse_timestamp};
use crate::transaction::Transaction;
use crate::value::{self, Value, ValueMap};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; HASH_LENGTH]);

impl BlockHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({}..)", &self.to_hex()[..12])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub previous_hash: Option<BlockHash>,
    pub miner: Address,
    pub timestamp: DateTime<Utc>,
    pub difficulty: u64,
    pub transactions: Vec<Transaction>,
    pub hash: BlockHash,
}

impl Block {
    pub fn new(
        index: u64,
        previous_hash: Option<BlockHash>,
        miner: Address,
        timestamp: DateTime<Utc>,
        difficulty: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        let mut block = Self {
            index,
            previous_hash,
            miner,
            timestamp: normalize_timestamp(timestamp),
            difficulty,
            transactions,
            hash: BlockHash([0; HASH_LENGTH]),
        };
        block.hash = block.compute_hash();
        block
    }

    /// The first block: index 0, no parent, no transactions, difficulty 0.
    /// Deterministic in its arguments, so every node configured alike
    /// derives the same genesis hash.
    pub fn genesis(miner: Address, timestamp: DateTime<Utc>) -> Self {
        Self::new(0, None, miner, timestamp, 0, Vec::new())
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash.is_none()
    }

    pub fn tx_root(&self) -> [u8; HASH_LENGTH] {
        let ids: Vec<[u8; HASH_LENGTH]> = self.transactions.iter().map(|tx| tx.id().0).collect();
        merkle_root(&ids)
    }

    /// Recompute the hash from the current field values.
    pub fn compute_hash(&self) -> BlockHash {
        let mut header = self.header_map();
        header.insert("tx_root", &self.tx_root()[..]);
        BlockHash(domain_separated_hash(
            BLOCK_HASH_CONTEXT,
            &value::encode(&Value::Map(header)),
        ))
    }

    /// Two-phase-commit id for this block's state writes.
    pub fn commit_id(&self) -> CommitId {
        CommitId(self.hash.0)
    }

    pub fn byte_size(&self) -> usize {
        self.encode().len()
    }

    /// Bytes a transaction serialized to `tx_bytes` bytes adds to the
    /// encoded block: its length prefix, the `:` and the bytes themselves.
    pub fn transaction_entry_len(tx_bytes: usize) -> usize {
        tx_bytes.to_string().len() + 1 + tx_bytes
    }

    fn header_map(&self) -> ValueMap {
        let mut map = ValueMap::with_capacity(8);
        map.insert("index", self.index);
        map.insert(
            "previous_hash",
            self.previous_hash.map(|h| Value::Bytes(h.0.to_vec())),
        );
        map.insert("miner", self.miner.to_value());
        map.insert("timestamp", format_timestamp(&self.timestamp));
        map.insert("difficulty", self.difficulty);
        map
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.header_map();
        map.insert(
            "transactions",
            Value::list(self.transactions.iter().map(|tx| Value::Bytes(tx.serialize(true)))),
        );
        map.insert("hash", &self.hash.0[..]);
        Value::Map(map)
    }

    pub fn encode(&self) -> Vec<u8> {
        value::encode(&self.to_value())
    }

    /// Decode a stored block. Transactions are re-verified and the stored
    /// hash must match the recomputed one.
    pub fn decode(bytes: &[u8]) -> Result<Self, ChainError> {
        let decoded = value::decode(bytes).map_err(|e| ChainError::Corrupt(e.to_string()))?;
        let map = decoded
            .as_map()
            .ok_or_else(|| ChainError::Corrupt("block is not a map".into()))?;
        let field = |key: &str| {
            map.get_text_key(key)
                .ok_or_else(|| ChainError::Corrupt(format!("block is missing `{}`", key)))
        };
        let hash32 = |v: &Value| {
            v.as_bytes()
                .and_then(|b| <[u8; HASH_LENGTH]>::try_from(b).ok())
                .map(BlockHash)
                .ok_or_else(|| ChainError::Corrupt("hash must be 32 bytes".into()))
        };

        let index = field("index")?
            .as_u64()
            .ok_or_else(|| ChainError::Corrupt("index must be a u64".into()))?;
        let previous_hash = match field("previous_hash")? {
            Value::Null => None,
            other => Some(hash32(other)?),
        };
        let miner = Address::from_value(field("miner")?)
            .map_err(|e| ChainError::Corrupt(e.to_string()))?;
        let timestamp = field("timestamp")?
            .as_text()
            .ok_or_else(|| ChainError::Corrupt("timestamp must be text".into()))
            .and_then(|s| parse_timestamp(s).map_err(|e| ChainError::Corrupt(e.to_string())))?;
        let difficulty = field("difficulty")?
            .as_u64()
            .ok_or_else(|| ChainError::Corrupt("difficulty must be a u64".into()))?;
        let transactions = field("transactions")?
            .as_list()
            .ok_or_else(|| ChainError::Corrupt("transactions must be a list".into()))?
            .iter()
            .map(|v| {
                let bytes = v
                    .as_bytes()
                    .ok_or_else(|| ChainError::Corrupt("transaction must be bytes".into()))?;
                Transaction::deserialize(bytes, true).map_err(|e| ChainError::Corrupt(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let hash = hash32(field("hash")?)?;

        let block = Self {
            index,
            previous_hash,
            miner,
            timestamp,
            difficulty,
            transactions,
            hash,
        };
        let computed = block.compute_hash();
        if computed != hash {
            return Err(ChainError::Corrupt(format!(
                "block {} hash mismatch: stored {}, computed {}",
                index, hash, computed
            )));
        }
        Ok(block)
    }
}
