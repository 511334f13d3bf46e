// Basic types shared across the chain and wallet

use std::fmt;

/// 256-bit hash (32 bytes), stored in wire byte order.
///
/// Used for block hashes, transaction ids and Merkle roots. Displayed in
/// big-endian hex (the conventional reversed form); equality and map hashing
/// are over the full 32 bytes, so it can key a `HashMap` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a Hash256 from a slice of exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, String> {
        if slice.len() != 32 {
            return Err(format!("invalid hash length: expected 32, got {}", slice.len()));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The all-zero hash (previous-block hash of a genesis block, and the
    /// "send as many as possible" stop hash in getblocks).
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Big-endian hex form (byte-reversed relative to the wire order).
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// Parse the big-endian hex form back into wire order.
    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex string: {}", e))?;
        if bytes.len() != 32 {
            return Err(format!("invalid hash length: expected 32, got {}", bytes.len()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        hash.reverse();
        Ok(Self(hash))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_creation() {
        let hash = Hash256::new([1u8; 32]);
        assert_eq!(hash.as_bytes(), &[1u8; 32]);
    }

    #[test]
    fn test_hash256_zero() {
        assert!(Hash256::zero().is_zero());
        assert!(!Hash256::new([1u8; 32]).is_zero());
    }

    #[test]
    fn test_hash256_hex_round_trip() {
        let hash = Hash256::new([
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66,
            0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x01, 0x02, 0x03, 0x04,
            0x05, 0x06, 0x07, 0x08,
        ]);
        let hex = hash.to_hex();
        let decoded = Hash256::from_hex(&hex).unwrap();
        assert_eq!(hash, decoded);
    }

    #[test]
    fn test_hex_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = Hash256::new(bytes);
        // Wire byte 0 appears last in the display form.
        assert!(hash.to_hex().ends_with("ab"));
        assert!(hash.to_hex().starts_with("00"));
    }

    #[test]
    fn test_hashmap_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(Hash256::new([7u8; 32]), "seven");
        assert_eq!(map.get(&Hash256::new([7u8; 32])), Some(&"seven"));
        assert_eq!(map.get(&Hash256::zero()), None);
    }
}
