//! Durable block log on sled.
//!
//! | Tree       | Key                 | Value                  |
//! |------------|---------------------|------------------------|
//! | `blocks`   | `index` (8B BE)     | canonical block bytes  |
//! | `metadata` | key (UTF-8)         | value (bytes)          |
//!
//! Big-endian keys make sled's iteration order the chain order.

use sled::{Db, Tree};
use std::path::Path;

use super::block::Block;
use super::ChainError;

const META_TIP_INDEX: &[u8] = b"tip_index";

#[derive(Debug, Clone)]
pub struct ChainStore {
    db: Db,
    blocks: Tree,
    metadata: Tree,
}

impl ChainStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ChainError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory store for tests, removed on drop.
    pub fn open_temporary() -> Result<Self, ChainError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, ChainError> {
        Ok(Self {
            blocks: db.open_tree("blocks")?,
            metadata: db.open_tree("metadata")?,
            db,
        })
    }

    /// Persist `block` and move the tip to it, then flush.
    pub fn put_block(&self, block: &Block) -> Result<(), ChainError> {
        let key = block.index.to_be_bytes();
        self.blocks.insert(key, block.encode())?;
        self.metadata.insert(META_TIP_INDEX, &key)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_block(&self, index: u64) -> Result<Option<Block>, ChainError> {
        match self.blocks.get(index.to_be_bytes())? {
            Some(bytes) => Ok(Some(Block::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn tip_index(&self) -> Result<Option<u64>, ChainError> {
        match self.metadata.get(META_TIP_INDEX)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| ChainError::Corrupt("tip index is not 8 bytes".into()))?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Every stored block in index order.
    pub fn load_all(&self) -> Result<Vec<Block>, ChainError> {
        self.blocks
            .iter()
            .values()
            .map(|bytes| Block::decode(&bytes?))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use chrono::{TimeZone, Utc};

    #[test]
    fn blocks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = Block::genesis(Address::ZERO, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        {
            let store = ChainStore::open(dir.path()).unwrap();
            store.put_block(&genesis).unwrap();
        }
        let store = ChainStore::open(dir.path()).unwrap();
        assert_eq!(store.tip_index().unwrap(), Some(0));
        assert_eq!(store.get_block(0).unwrap(), Some(genesis));
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn empty_store_has_no_tip() {
        let store = ChainStore::open_temporary().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.tip_index().unwrap(), None);
        assert!(store.get_block(0).unwrap().is_none());
    }
}
