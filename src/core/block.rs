// Block data structures and the Merkle tree

use super::serialize::{read_u32, read_hash, read_varint, write_varint};
use crate::consensus::pow::Target;
use crate::core::{hash256, Hash256, Transaction, Serializable};
use crate::U256;
use std::io::{Cursor, Read, Write};

/// Block header, 80 bytes on the wire.
///
/// Identity is the double SHA256 of the serialized header, displayed
/// big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    /// Hash of the previous block.
    pub prev_block_hash: Hash256,
    /// Merkle root over the block's transactions.
    pub merkle_root: Hash256,
    /// Block timestamp, Unix seconds.
    pub time: u32,
    /// Difficulty target in compact form.
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_block_hash: Hash256,
        merkle_root: Hash256,
        time: u32,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            prev_block_hash,
            merkle_root,
            time,
            bits,
            nonce,
        }
    }

    /// Hash of this header (the block id).
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// Amount of work this header represents: floor(2^256 / (target + 1)).
    pub fn work(&self) -> U256 {
        Target::from_compact(self.bits).work()
    }

    /// Serialize the header; always 80 bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(80);
        buf.write_all(&self.version.to_le_bytes()).unwrap();
        buf.write_all(self.prev_block_hash.as_bytes()).unwrap();
        buf.write_all(self.merkle_root.as_bytes()).unwrap();
        buf.write_all(&self.time.to_le_bytes()).unwrap();
        buf.write_all(&self.bits.to_le_bytes()).unwrap();
        buf.write_all(&self.nonce.to_le_bytes()).unwrap();
        buf
    }

    pub fn from_reader(reader: &mut dyn Read) -> Result<Self, String> {
        let version = read_u32(reader).map_err(|e| format!("header version: {}", e))?;
        let prev_block_hash = read_hash(reader).map_err(|e| format!("header prev hash: {}", e))?;
        let merkle_root = read_hash(reader).map_err(|e| format!("header merkle root: {}", e))?;
        let time = read_u32(reader).map_err(|e| format!("header time: {}", e))?;
        let bits = read_u32(reader).map_err(|e| format!("header bits: {}", e))?;
        let nonce = read_u32(reader).map_err(|e| format!("header nonce: {}", e))?;

        Ok(Self {
            version,
            prev_block_hash,
            merkle_root,
            time,
            bits,
            nonce,
        })
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);
        Self::from_reader(&mut cursor)
    }
}

/// Block: header plus optional ordered transactions.
///
/// A block received over the wire carries its transactions; blocks
/// reconstructed from the store are header-only. When transactions are
/// present the first must be the coinbase and the Merkle root must match
/// the header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Block id; depends on the 80-byte header only.
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.prev_block_hash.is_zero()
    }

    pub fn has_transactions(&self) -> bool {
        !self.transactions.is_empty()
    }

    /// Merkle root over a list of transactions.
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        let leaves: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();
        match build_merkle_tree(&leaves).last() {
            Some(root) => *root,
            None => Hash256::zero(),
        }
    }
}

/// Build the full Merkle tree as a flat sequence [leaves.., level1.., .., root].
///
/// At each level hashes are paired (i, i+1); an odd count pairs the last
/// element with itself; each pair emits hash256(left || right). An empty
/// leaf list yields an empty tree.
pub fn build_merkle_tree(leaves: &[Hash256]) -> Vec<Hash256> {
    let mut tree: Vec<Hash256> = leaves.to_vec();
    if leaves.is_empty() {
        return tree;
    }

    let mut level_start = 0;
    let mut level_len = leaves.len();
    while level_len > 1 {
        let level: Vec<Hash256> = tree[level_start..level_start + level_len].to_vec();
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };

            let mut combined = Vec::with_capacity(64);
            combined.extend_from_slice(left.as_bytes());
            combined.extend_from_slice(right.as_bytes());
            tree.push(hash256(&combined));
        }
        level_start += level_len;
        level_len = (level_len + 1) / 2;
    }

    tree
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.write_all(&self.header.serialize()).unwrap();
        write_varint(&mut buf, self.transactions.len() as u64).unwrap();
        for tx in &self.transactions {
            buf.write_all(&tx.serialize()).unwrap();
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);

        let header = BlockHeader::from_reader(&mut cursor)?;

        let tx_count = read_varint(&mut cursor).map_err(|e| format!("block tx count: {}", e))? as usize;
        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(&mut cursor)?);
        }

        Ok(Self {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TxOutput;

    fn coinbase(tag: u8) -> Transaction {
        Transaction::coinbase(vec![tag], TxOutput::new(5_000_000_000, vec![tag]))
    }

    #[test]
    fn test_block_header_serialization() {
        let header = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 1234567890, 0x1d00ffff, 0);

        let serialized = header.serialize();
        assert_eq!(serialized.len(), 80);

        let deserialized = BlockHeader::deserialize(&serialized).unwrap();
        assert_eq!(header, deserialized);
    }

    #[test]
    fn test_block_hash_depends_on_header_only() {
        let tx = coinbase(1);
        let header = BlockHeader::new(
            1,
            Hash256::zero(),
            Block::calculate_merkle_root(&[tx.clone()]),
            1234567890,
            0x1d00ffff,
            0,
        );
        let with_txs = Block::new(header.clone(), vec![tx]);
        let header_only = Block::new(header, vec![]);

        assert_eq!(with_txs.hash(), header_only.hash());
    }

    #[test]
    fn test_merkle_root_single_tx() {
        let tx = coinbase(1);
        let merkle = Block::calculate_merkle_root(std::slice::from_ref(&tx));
        assert_eq!(merkle, tx.txid());
    }

    #[test]
    fn test_merkle_tree_shape_even() {
        let leaves: Vec<Hash256> = (0..4u8).map(|i| Hash256::new([i; 32])).collect();
        let tree = build_merkle_tree(&leaves);
        // 4 leaves + 2 + 1 root.
        assert_eq!(tree.len(), 7);
        assert_eq!(&tree[..4], &leaves[..]);
    }

    #[test]
    fn test_merkle_tree_shape_odd() {
        let leaves: Vec<Hash256> = (0..5u8).map(|i| Hash256::new([i; 32])).collect();
        let tree = build_merkle_tree(&leaves);
        // 5 leaves + 3 + 2 + 1 root.
        assert_eq!(tree.len(), 11);
    }

    #[test]
    fn test_merkle_odd_duplicates_last() {
        // With an odd count the last leaf pairs with itself, so appending a
        // copy of it changes nothing.
        let txs: Vec<Transaction> = (0..3u8).map(coinbase).collect();
        let mut padded = txs.clone();
        padded.push(txs.last().unwrap().clone());

        assert_eq!(
            Block::calculate_merkle_root(&txs),
            Block::calculate_merkle_root(&padded)
        );
    }

    #[test]
    fn test_block_round_trip() {
        let txs = vec![coinbase(1), {
            let input = crate::core::TxInput::new(Hash256::new([2; 32]), 0, vec![7]);
            Transaction::new(vec![input], vec![TxOutput::new(100, vec![8])])
        }];
        let header = BlockHeader::new(
            1,
            Hash256::new([1; 32]),
            Block::calculate_merkle_root(&txs),
            1234567890,
            0x1d00ffff,
            42,
        );
        let block = Block::new(header, txs);

        let bytes = block.serialize();
        let decoded = Block::deserialize(&bytes).unwrap();
        assert_eq!(block, decoded);
        assert_eq!(decoded.serialize(), bytes);
    }
}
