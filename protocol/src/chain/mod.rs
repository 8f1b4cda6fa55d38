//! # Chain
//!
//! The ordered list of accepted blocks, plus what the block policy needs to
//! know about it: the tip, the genesis hash and each signer's last nonce.
//! Optionally backed by a [`ChainStore`] so the chain outlives the process.

pub mod block;
pub mod store;

use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

use crate::address::Address;
use crate::policy::ChainView;

pub use block::{Block, BlockHash};
pub use store::ChainStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("block store error: {0}")]
    Store(String),

    #[error("corrupt chain data: {0}")]
    Corrupt(String),

    #[error("expected block {expected}, got {actual}")]
    NotNext { expected: u64, actual: u64 },

    #[error("block {index} does not extend the tip")]
    ParentMismatch { index: u64 },
}

impl From<sled::Error> for ChainError {
    fn from(e: sled::Error) -> Self {
        ChainError::Store(e.to_string())
    }
}

#[derive(Debug, Default)]
pub struct Chain {
    blocks: Vec<Block>,
    by_hash: HashMap<BlockHash, u64>,
    nonces: HashMap<Address, u64>,
    store: Option<ChainStore>,
}

impl Chain {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load every block from `store` and keep appending to it.
    pub fn open(store: ChainStore) -> Result<Self, ChainError> {
        let mut chain = Self::default();
        for block in store.load_all()? {
            chain.push(block)?;
        }
        info!(height = chain.len(), "chain loaded from disk");
        chain.store = Some(store);
        Ok(chain)
    }

    /// Append a block that extends the tip. Full validation is the block
    /// policy's job; this only guards linkage.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        self.check_links(&block)?;
        if let Some(store) = &self.store {
            store.put_block(&block)?;
        }
        self.push(block)
    }

    fn check_links(&self, block: &Block) -> Result<(), ChainError> {
        let expected = self.blocks.len() as u64;
        if block.index != expected {
            return Err(ChainError::NotNext {
                expected,
                actual: block.index,
            });
        }
        if block.previous_hash != self.blocks.last().map(|b| b.hash) {
            return Err(ChainError::ParentMismatch { index: block.index });
        }
        Ok(())
    }

    fn push(&mut self, block: Block) -> Result<(), ChainError> {
        self.check_links(&block)?;
        for tx in &block.transactions {
            self.nonces.insert(tx.signer(), tx.nonce());
        }
        self.by_hash.insert(block.hash, block.index);
        self.blocks.push(block);
        Ok(())
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    pub fn get_by_hash(&self, hash: &BlockHash) -> Option<&Block> {
        self.by_hash.get(hash).and_then(|i| self.get(*i))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

impl ChainView for Chain {
    fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    fn genesis_hash(&self) -> Option<BlockHash> {
        self.blocks.first().map(|b| b.hash)
    }

    fn last_nonce(&self, signer: &Address) -> Option<u64> {
        self.nonces.get(signer).copied()
    }
}
