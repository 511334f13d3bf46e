// Block store: hash-keyed stored-block records plus the chain head pointer

use crate::core::{BlockHeader, Hash256};
use crate::params::NetworkParams;
use crate::U256;
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Write};

/// A backing-store failure. Fatal to the operation that hit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The underlying store reported an IO or database failure.
    Backend(String),
    /// A stored record failed to decode, or a record the chain relies on
    /// is missing.
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::Backend(what) => write!(f, "block store backend failure: {}", what),
            StoreError::Corrupt(what) => write!(f, "block store corrupt: {}", what),
        }
    }
}

impl std::error::Error for StoreError {}

/// A block header annotated with its position in the chain: cumulative
/// work from genesis and height (genesis = 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub header: BlockHeader,
    /// Sum of per-block work from genesis up to and including this block.
    pub chain_work: U256,
    pub height: u32,
}

/// Serialized record size: 80-byte header + 32-byte work + 4-byte height.
const RECORD_LEN: usize = 116;

impl StoredBlock {
    /// Wrap a genesis header: height 0, cumulative work = own work.
    pub fn genesis(header: BlockHeader) -> Self {
        let chain_work = header.work();
        Self {
            header,
            chain_work,
            height: 0,
        }
    }

    /// Derive the record for a block building on this one.
    pub fn build(&self, header: BlockHeader) -> Self {
        let chain_work = self.chain_work + header.work();
        Self {
            header,
            chain_work,
            height: self.height + 1,
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn more_work_than(&self, other: &StoredBlock) -> bool {
        self.chain_work > other.chain_work
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        buf.write_all(&self.header.serialize()).unwrap();
        let mut work = [0u8; 32];
        self.chain_work.to_big_endian(&mut work);
        buf.write_all(&work).unwrap();
        buf.write_all(&self.height.to_le_bytes()).unwrap();
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, String> {
        if data.len() != RECORD_LEN {
            return Err(format!(
                "stored block record: expected {} bytes, got {}",
                RECORD_LEN,
                data.len()
            ));
        }
        let mut cursor = Cursor::new(data);

        let mut header_bytes = [0u8; 80];
        cursor.read_exact(&mut header_bytes).map_err(|e| e.to_string())?;
        let header = BlockHeader::deserialize(&header_bytes)?;

        let mut work = [0u8; 32];
        cursor.read_exact(&mut work).map_err(|e| e.to_string())?;
        let chain_work = U256::from_big_endian(&work);

        let mut height_bytes = [0u8; 4];
        cursor.read_exact(&mut height_bytes).map_err(|e| e.to_string())?;
        let height = u32::from_le_bytes(height_bytes);

        Ok(Self {
            header,
            chain_work,
            height,
        })
    }
}

/// Storage contract for the chain engine.
///
/// On creation an implementation inserts the genesis block and designates
/// it the chain head.
pub trait BlockStore: Send {
    fn put(&mut self, block: &StoredBlock) -> Result<(), StoreError>;
    fn get(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StoreError>;
    fn chain_head(&self) -> Result<StoredBlock, StoreError>;
    fn set_chain_head(&mut self, block: &StoredBlock) -> Result<(), StoreError>;
}

/// The reference in-memory store.
///
/// Records are held in serialized form and decoded on every read, so a
/// caller can never alias state inside the map.
pub struct MemoryBlockStore {
    blocks: HashMap<Hash256, Vec<u8>>,
    head: Hash256,
}

impl MemoryBlockStore {
    pub fn new(params: &NetworkParams) -> Result<Self, StoreError> {
        let genesis = StoredBlock::genesis(params.genesis_block().header);
        let mut store = Self {
            blocks: HashMap::new(),
            head: genesis.hash(),
        };
        store.put(&genesis)?;
        Ok(store)
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
        self.blocks.insert(block.hash(), block.serialize());
        Ok(())
    }

    fn get(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StoreError> {
        match self.blocks.get(hash) {
            Some(data) => {
                let block = StoredBlock::deserialize(data).map_err(StoreError::Corrupt)?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    fn chain_head(&self) -> Result<StoredBlock, StoreError> {
        self.get(&self.head)?
            .ok_or_else(|| StoreError::Corrupt(format!("chain head {} not in store", self.head)))
    }

    fn set_chain_head(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
        self.head = block.hash();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pow::Target;

    fn store() -> MemoryBlockStore {
        MemoryBlockStore::new(&NetworkParams::unit_tests()).unwrap()
    }

    fn child_header(parent: &StoredBlock) -> BlockHeader {
        BlockHeader::new(1, parent.hash(), Hash256::zero(), parent.header.time + 600, parent.header.bits, 0)
    }

    #[test]
    fn test_genesis_is_head_on_creation() {
        let store = store();
        let head = store.chain_head().unwrap();
        assert_eq!(head.height, 0);
        assert_eq!(
            head.header,
            NetworkParams::unit_tests().genesis_block().header
        );
        assert!(store.get(&head.hash()).unwrap().is_some());
    }

    #[test]
    fn test_build_accumulates_work_and_height() {
        let head = store().chain_head().unwrap();
        let header = child_header(&head);
        let next = head.build(header.clone());

        assert_eq!(next.height, 1);
        assert_eq!(
            next.chain_work,
            head.chain_work + Target::from_compact(header.bits).work()
        );
        assert!(next.more_work_than(&head));
    }

    #[test]
    fn test_put_get_round_trip() {
        let mut store = store();
        let head = store.chain_head().unwrap();
        let next = head.build(child_header(&head));

        store.put(&next).unwrap();
        assert_eq!(store.get(&next.hash()).unwrap().unwrap(), next);
        assert_eq!(store.get(&Hash256::new([9; 32])).unwrap(), None);
    }

    #[test]
    fn test_reads_are_fresh_records() {
        let mut store = store();
        let head = store.chain_head().unwrap();
        let next = head.build(child_header(&head));
        store.put(&next).unwrap();

        // Mutating one read must not be visible through another.
        let mut first = store.get(&next.hash()).unwrap().unwrap();
        first.height = 99;
        let second = store.get(&next.hash()).unwrap().unwrap();
        assert_eq!(second.height, 1);
    }

    #[test]
    fn test_set_chain_head() {
        let mut store = store();
        let head = store.chain_head().unwrap();
        let next = head.build(child_header(&head));
        store.put(&next).unwrap();
        store.set_chain_head(&next).unwrap();
        assert_eq!(store.chain_head().unwrap(), next);
    }

    #[test]
    fn test_stored_block_serialization() {
        let head = store().chain_head().unwrap();
        let bytes = head.serialize();
        assert_eq!(bytes.len(), RECORD_LEN);
        assert_eq!(StoredBlock::deserialize(&bytes).unwrap(), head);
        assert!(StoredBlock::deserialize(&bytes[1..]).is_err());
    }
}
