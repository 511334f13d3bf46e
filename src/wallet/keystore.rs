// Keys and addresses

use crate::core::{hash160, hash256, Script};
use crate::params::NetworkParams;
use rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

/// An address: network version byte plus the hash160 of a public key.
///
/// Rendered as hex of version || hash160 || 4-byte double-SHA256 checksum,
/// so a mistyped address fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    version: u8,
    hash: [u8; 20],
}

impl Address {
    pub fn from_pubkey_hash(version: u8, hash: [u8; 20]) -> Self {
        Self { version, hash }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn pubkey_hash(&self) -> &[u8; 20] {
        &self.hash
    }

    /// The P2PKH scriptPubKey paying this address.
    pub fn script_pubkey(&self) -> Vec<u8> {
        Script::p2pkh_script_pubkey(&self.hash)
    }

    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(25);
        payload.push(self.version);
        payload.extend_from_slice(&self.hash);
        let check = hash256(&payload);
        payload.extend_from_slice(&check.as_bytes()[..4]);
        hex::encode(payload)
    }

    pub fn decode(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid address: {}", e))?;
        if bytes.len() != 25 {
            return Err(format!("invalid address length: {}", bytes.len()));
        }
        let check = hash256(&bytes[..21]);
        if bytes[21..] != check.as_bytes()[..4] {
            return Err(format!("address checksum mismatch: {}", s));
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[1..21]);
        Ok(Self {
            version: bytes[0],
            hash,
        })
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// An ECDSA key pair held in the wallet's key ring.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    /// Optional human-readable label, kept through wallet serialization.
    pub label: Option<String>,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = secret_key.public_key(&secp);
        Self {
            secret_key,
            public_key,
            label: None,
        }
    }

    pub fn generate_labeled(label: &str) -> Self {
        let mut key = Self::generate();
        key.label = Some(label.to_string());
        key
    }

    /// Rebuild a key pair from its 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8], label: Option<String>) -> Result<Self, String> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| format!("invalid secret key: {}", e))?;
        let public_key = secret_key.public_key(&secp);
        Ok(Self {
            secret_key,
            public_key,
            label,
        })
    }

    /// Compressed public key bytes.
    pub fn pubkey_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.pubkey_bytes())
    }

    pub fn address(&self, params: &NetworkParams) -> Address {
        Address::from_pubkey_hash(params.address_prefix, self.pubkey_hash())
    }

    /// The P2PKH scriptPubKey paying this key.
    pub fn script_pubkey(&self) -> Vec<u8> {
        Script::p2pkh_script_pubkey(&self.pubkey_hash())
    }

    /// Sign a 32-byte digest, returning the DER-encoded signature.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<Vec<u8>, String> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(digest).map_err(|e| format!("invalid digest: {}", e))?;
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_der().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.pubkey_bytes().len(), 33); // compressed
        assert_eq!(kp.pubkey_hash().len(), 20);
        assert!(kp.label.is_none());
    }

    #[test]
    fn test_secret_round_trip() {
        let kp = KeyPair::generate_labeled("savings");
        let rebuilt =
            KeyPair::from_secret_bytes(&kp.secret_key.secret_bytes(), kp.label.clone()).unwrap();
        assert_eq!(rebuilt.public_key, kp.public_key);
        assert_eq!(rebuilt.label.as_deref(), Some("savings"));
    }

    #[test]
    fn test_address_round_trip() {
        let params = NetworkParams::unit_tests();
        let kp = KeyPair::generate();
        let addr = kp.address(&params);

        let decoded = Address::decode(&addr.encode()).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(decoded.version(), params.address_prefix);
        assert_eq!(decoded.pubkey_hash(), &kp.pubkey_hash());
    }

    #[test]
    fn test_address_checksum_rejects_corruption() {
        let addr = KeyPair::generate().address(&NetworkParams::unit_tests());
        let mut encoded = addr.encode();
        // Flip a nibble in the hash portion.
        let flipped = if encoded.as_bytes()[10] == b'0' { '1' } else { '0' };
        encoded.replace_range(10..11, &flipped.to_string());
        assert!(Address::decode(&encoded).is_err());
    }

    #[test]
    fn test_script_pubkey_pays_hash() {
        let kp = KeyPair::generate();
        let script = kp.script_pubkey();
        assert_eq!(script.len(), 25);
        assert_eq!(&script[3..23], &kp.pubkey_hash());
    }

    #[test]
    fn test_sign_verifies() {
        let kp = KeyPair::generate();
        let digest = [0x55; 32];
        let sig = kp.sign(&digest).unwrap();
        let script_sig = Script::p2pkh_script_sig(&sig, &kp.pubkey_bytes());
        let script_pubkey = kp.script_pubkey();
        assert_eq!(Script::verify_spend(&script_sig, &script_pubkey, &digest), Ok(true));
    }
}
