// Hashing primitives

use crate::core::Hash256;
use sha2::{Digest, Sha256};

/// Double SHA256: hash256 = SHA256(SHA256(data)).
///
/// Block ids, transaction ids, Merkle nodes and message checksums all use
/// this form.
pub fn hash256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    Hash256::from_slice(&second).expect("SHA256 always returns 32 bytes")
}

/// RIPEMD160(SHA256(data)), used to derive addresses from public keys.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::{Digest as RipemdDigest, Ripemd160};
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut result = [0u8; 20];
    result.copy_from_slice(&ripemd);
    result
}
