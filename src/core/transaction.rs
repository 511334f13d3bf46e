// Transaction data structures

use crate::core::serialize::{read_u32, read_u64, read_hash, read_var_bytes, read_varint, write_var_bytes, write_varint};
use crate::core::{hash256, Hash256, Serializable};
use std::io::{Cursor, Read, Write};

/// Transaction input, referencing an output of a previous transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the previous transaction.
    pub prev_tx_hash: Hash256,
    /// Index of the output in the previous transaction.
    pub prev_index: u32,
    /// scriptSig proving the spender may consume the referenced output.
    pub script_sig: Vec<u8>,
    /// Sequence number, usually 0xffffffff.
    pub sequence: u32,
}

impl TxInput {
    pub fn new(prev_tx_hash: Hash256, prev_index: u32, script_sig: Vec<u8>) -> Self {
        Self {
            prev_tx_hash,
            prev_index,
            script_sig,
            sequence: 0xffffffff,
        }
    }

    /// Coinbase input: 32 zero bytes as the previous hash and index
    /// 0xffffffff.
    pub fn coinbase(script_sig: Vec<u8>) -> Self {
        Self {
            prev_tx_hash: Hash256::zero(),
            prev_index: 0xffffffff,
            script_sig,
            sequence: 0xffffffff,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_hash.is_zero() && self.prev_index == 0xffffffff
    }

    /// The (prev_txid, prev_out_index) pair this input consumes. Two inputs
    /// with the same outpoint are a double spend.
    pub fn outpoint(&self) -> (Hash256, u32) {
        (self.prev_tx_hash, self.prev_index)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_all(self.prev_tx_hash.as_bytes()).unwrap();
        buf.write_all(&self.prev_index.to_le_bytes()).unwrap();
        write_var_bytes(&mut buf, &self.script_sig).unwrap();
        buf.write_all(&self.sequence.to_le_bytes()).unwrap();
        buf
    }

    pub fn deserialize(reader: &mut dyn Read) -> Result<Self, String> {
        let prev_tx_hash = read_hash(reader).map_err(|e| format!("input prev hash: {}", e))?;
        let prev_index = read_u32(reader).map_err(|e| format!("input prev index: {}", e))?;
        let script_sig = read_var_bytes(reader).map_err(|e| format!("input scriptSig: {}", e))?;
        let sequence = read_u32(reader).map_err(|e| format!("input sequence: {}", e))?;

        Ok(Self {
            prev_tx_hash,
            prev_index,
            script_sig,
            sequence,
        })
    }
}

/// Transaction output: a value in nanocoins and the script that locks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in nanocoins (10^8 nanocoins = 1 coin).
    pub value: u64,
    /// scriptPubKey specifying the spending condition.
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        Self { value, script_pubkey }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_all(&self.value.to_le_bytes()).unwrap();
        write_var_bytes(&mut buf, &self.script_pubkey).unwrap();
        buf
    }

    pub fn deserialize(reader: &mut dyn Read) -> Result<Self, String> {
        let value = read_u64(reader).map_err(|e| format!("output value: {}", e))?;
        let script_pubkey = read_var_bytes(reader).map_err(|e| format!("output scriptPubKey: {}", e))?;

        Ok(Self { value, script_pubkey })
    }
}

/// Transaction: version, inputs, outputs and lock time.
///
/// Identity is the double SHA256 of the full serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which the transaction is not final.
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Create a coinbase transaction.
    pub fn coinbase(script_sig: Vec<u8>, output: TxOutput) -> Self {
        Self {
            version: 1,
            inputs: vec![TxInput::coinbase(script_sig)],
            outputs: vec![output],
            lock_time: 0,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Transaction id: double SHA256 of the serialized transaction.
    pub fn txid(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|out| out.value).sum()
    }

    /// Deserialize from a reader, consuming exactly one transaction.
    pub fn from_reader(reader: &mut dyn Read) -> Result<Self, String> {
        let version = read_u32(reader).map_err(|e| format!("tx version: {}", e))?;

        let input_count = read_varint(reader).map_err(|e| format!("tx input count: {}", e))? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TxInput::deserialize(reader)?);
        }

        let output_count = read_varint(reader).map_err(|e| format!("tx output count: {}", e))? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TxOutput::deserialize(reader)?);
        }

        let lock_time = read_u32(reader).map_err(|e| format!("tx lock time: {}", e))?;

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.write_all(&self.version.to_le_bytes()).unwrap();

        write_varint(&mut buf, self.inputs.len() as u64).unwrap();
        for input in &self.inputs {
            buf.write_all(&input.serialize()).unwrap();
        }

        write_varint(&mut buf, self.outputs.len() as u64).unwrap();
        for output in &self.outputs {
            buf.write_all(&output.serialize()).unwrap();
        }

        buf.write_all(&self.lock_time.to_le_bytes()).unwrap();

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);
        Self::from_reader(&mut cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coinbase_input() {
        let input = TxInput::coinbase(vec![1, 2, 3]);
        assert!(input.is_coinbase());
        assert_eq!(input.prev_tx_hash, Hash256::zero());
        assert_eq!(input.prev_index, 0xffffffff);
    }

    #[test]
    fn test_transaction_round_trip() {
        let input = TxInput::new(Hash256::new([9; 32]), 1, vec![1, 2, 3]);
        let outputs = vec![
            TxOutput::new(5_000_000_000, vec![4, 5, 6]),
            TxOutput::new(1, vec![]),
        ];
        let tx = Transaction::new(vec![input], outputs);

        let serialized = tx.serialize();
        let deserialized = Transaction::deserialize(&serialized).unwrap();
        assert_eq!(tx, deserialized);
        // And the bytes themselves round-trip.
        assert_eq!(deserialized.serialize(), serialized);
    }

    #[test]
    fn test_txid_stable() {
        let tx = Transaction::coinbase(vec![4, 5, 6], TxOutput::new(5_000_000_000, vec![1]));
        assert_eq!(tx.txid(), tx.txid());
        assert!(tx.is_coinbase());
    }

    #[test]
    fn test_txid_changes_with_content() {
        let a = Transaction::coinbase(vec![1], TxOutput::new(1000, vec![]));
        let b = Transaction::coinbase(vec![2], TxOutput::new(1000, vec![]));
        assert_ne!(a.txid(), b.txid());
    }

    #[test]
    fn test_truncated_transaction() {
        let tx = Transaction::coinbase(vec![1], TxOutput::new(1000, vec![]));
        let bytes = tx.serialize();
        assert!(Transaction::deserialize(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_outpoint() {
        let input = TxInput::new(Hash256::new([3; 32]), 7, vec![]);
        assert_eq!(input.outpoint(), (Hash256::new([3; 32]), 7));
    }
}
