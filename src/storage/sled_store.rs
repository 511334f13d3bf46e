// Disk-backed block store on sled

use super::block_store::{BlockStore, StoreError, StoredBlock};
use crate::core::Hash256;
use crate::params::NetworkParams;
use sled::Db;
use std::path::Path;

const HEAD_KEY: &[u8] = b"head";

/// Block store persisted in a sled database.
///
/// Same contract as the in-memory store; a reopened database keeps its
/// chain. Records are stored in the same serialized form.
pub struct SledBlockStore {
    db: Db,
}

impl SledBlockStore {
    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P, params: &NetworkParams) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::with_db(db, params)
    }

    /// A temporary store for tests; dropped with the process.
    pub fn temporary(params: &NetworkParams) -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::with_db(db, params)
    }

    fn with_db(db: Db, params: &NetworkParams) -> Result<Self, StoreError> {
        let mut store = Self { db };
        if store.head_hash()?.is_none() {
            let genesis = StoredBlock::genesis(params.genesis_block().header);
            store.put(&genesis)?;
            store.set_chain_head(&genesis)?;
        }
        Ok(store)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn head_hash(&self) -> Result<Option<Hash256>, StoreError> {
        match self.db.get(HEAD_KEY).map_err(|e| StoreError::Backend(e.to_string()))? {
            Some(data) => {
                let hash = Hash256::from_slice(&data).map_err(StoreError::Corrupt)?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    fn block_key(hash: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'b');
        key.extend_from_slice(hash.as_bytes());
        key
    }
}

impl BlockStore for SledBlockStore {
    fn put(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
        self.db
            .insert(Self::block_key(&block.hash()), block.serialize())
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn get(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StoreError> {
        match self
            .db
            .get(Self::block_key(hash))
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(data) => {
                let block = StoredBlock::deserialize(&data).map_err(StoreError::Corrupt)?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    fn chain_head(&self) -> Result<StoredBlock, StoreError> {
        let hash = self
            .head_hash()?
            .ok_or_else(|| StoreError::Corrupt("no chain head recorded".to_string()))?;
        self.get(&hash)?
            .ok_or_else(|| StoreError::Corrupt(format!("chain head {} not in store", hash)))
    }

    fn set_chain_head(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
        self.db
            .insert(HEAD_KEY, block.hash().as_bytes().as_slice())
            .map(|_| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
