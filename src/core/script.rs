// Script handling for the two standard payment forms: pay-to-pubkey-hash
// and pay-to-pubkey.

use crate::core::hash160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1};
use std::fmt;

/// Error raised for scripts this wallet cannot understand. Never fatal to
/// chain processing; the transaction carrying the script is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The scriptPubKey matches no recognized payment template.
    UnknownForm,
    /// A push or opcode runs past the end of the script.
    Malformed(String),
    /// The embedded signature or public key failed to parse.
    BadCrypto(String),
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScriptError::UnknownForm => write!(f, "unrecognized script form"),
            ScriptError::Malformed(what) => write!(f, "malformed script: {}", what),
            ScriptError::BadCrypto(what) => write!(f, "bad signature material: {}", what),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Opcodes used by the standard templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    OpDup = 0x76,
    OpHash160 = 0xa9,
    OpPushBytes20 = 0x14,
    OpEqualVerify = 0x88,
    OpCheckSig = 0xac,
}

/// Who a scriptPubKey pays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayTo {
    /// OP_DUP OP_HASH160 <hash160> OP_EQUALVERIFY OP_CHECKSIG
    PubKeyHash([u8; 20]),
    /// <pubkey> OP_CHECKSIG (the form early coinbases used)
    PubKey(Vec<u8>),
}

/// Script construction and verification helpers.
pub struct Script;

impl Script {
    /// Build a P2PKH scriptPubKey.
    pub fn p2pkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
        let mut script = Vec::with_capacity(25);
        script.push(OpCode::OpDup as u8);
        script.push(OpCode::OpHash160 as u8);
        script.push(OpCode::OpPushBytes20 as u8);
        script.extend_from_slice(pubkey_hash);
        script.push(OpCode::OpEqualVerify as u8);
        script.push(OpCode::OpCheckSig as u8);
        script
    }

    /// Build a P2PK scriptPubKey: <pubkey> OP_CHECKSIG.
    pub fn p2pk_script_pubkey(pubkey: &[u8]) -> Vec<u8> {
        let mut script = Vec::with_capacity(pubkey.len() + 2);
        script.push(pubkey.len() as u8);
        script.extend_from_slice(pubkey);
        script.push(OpCode::OpCheckSig as u8);
        script
    }

    /// Build a P2PKH scriptSig: <signature> <pubkey>.
    pub fn p2pkh_script_sig(signature: &[u8], pubkey: &[u8]) -> Vec<u8> {
        let mut script = Vec::with_capacity(signature.len() + pubkey.len() + 2);
        script.push(signature.len() as u8);
        script.extend_from_slice(signature);
        script.push(pubkey.len() as u8);
        script.extend_from_slice(pubkey);
        script
    }

    /// Build a P2PK scriptSig: <signature>.
    pub fn p2pk_script_sig(signature: &[u8]) -> Vec<u8> {
        let mut script = Vec::with_capacity(signature.len() + 1);
        script.push(signature.len() as u8);
        script.extend_from_slice(signature);
        script
    }

    /// Classify a scriptPubKey into one of the recognized payment forms.
    pub fn classify(script_pubkey: &[u8]) -> Result<PayTo, ScriptError> {
        if script_pubkey.len() == 25
            && script_pubkey[0] == OpCode::OpDup as u8
            && script_pubkey[1] == OpCode::OpHash160 as u8
            && script_pubkey[2] == OpCode::OpPushBytes20 as u8
            && script_pubkey[23] == OpCode::OpEqualVerify as u8
            && script_pubkey[24] == OpCode::OpCheckSig as u8
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script_pubkey[3..23]);
            return Ok(PayTo::PubKeyHash(hash));
        }

        // <len><pubkey> OP_CHECKSIG with a plausible key length.
        if script_pubkey.len() >= 3 {
            let len = script_pubkey[0] as usize;
            if (len == 33 || len == 65)
                && script_pubkey.len() == len + 2
                && script_pubkey[len + 1] == OpCode::OpCheckSig as u8
            {
                return Ok(PayTo::PubKey(script_pubkey[1..1 + len].to_vec()));
            }
        }

        Err(ScriptError::UnknownForm)
    }

    /// Parse a scriptSig into (signature, optional pubkey).
    pub fn parse_script_sig(script_sig: &[u8]) -> Result<(Vec<u8>, Option<Vec<u8>>), ScriptError> {
        let (signature, rest) = Self::take_push(script_sig)?;
        if rest.is_empty() {
            return Ok((signature, None));
        }
        let (pubkey, rest) = Self::take_push(rest)?;
        if !rest.is_empty() {
            return Err(ScriptError::Malformed("trailing bytes after pubkey push".to_string()));
        }
        Ok((signature, Some(pubkey)))
    }

    fn take_push(script: &[u8]) -> Result<(Vec<u8>, &[u8]), ScriptError> {
        if script.is_empty() {
            return Err(ScriptError::Malformed("empty push".to_string()));
        }
        let len = script[0] as usize;
        if 1 + len > script.len() {
            return Err(ScriptError::Malformed(format!(
                "push of {} bytes overruns script of {}",
                len,
                script.len()
            )));
        }
        Ok((script[1..1 + len].to_vec(), &script[1 + len..]))
    }

    /// Verify that a scriptSig satisfies a scriptPubKey for the given signed
    /// message hash.
    pub fn verify_spend(
        script_sig: &[u8],
        script_pubkey: &[u8],
        message: &[u8; 32],
    ) -> Result<bool, ScriptError> {
        let (signature, sig_pubkey) = Self::parse_script_sig(script_sig)?;

        let pubkey = match Self::classify(script_pubkey)? {
            PayTo::PubKeyHash(expected_hash) => {
                let pubkey = sig_pubkey
                    .ok_or_else(|| ScriptError::Malformed("P2PKH scriptSig missing pubkey".to_string()))?;
                if hash160(&pubkey) != expected_hash {
                    return Ok(false);
                }
                pubkey
            }
            PayTo::PubKey(pubkey) => pubkey,
        };

        Self::verify_signature(&signature, &pubkey, message)
    }

    fn verify_signature(
        signature: &[u8],
        pubkey: &[u8],
        message: &[u8; 32],
    ) -> Result<bool, ScriptError> {
        let secp = Secp256k1::verification_only();

        let pubkey = PublicKey::from_slice(pubkey)
            .map_err(|e| ScriptError::BadCrypto(format!("public key: {}", e)))?;
        let signature = Signature::from_der(signature)
            .map_err(|e| ScriptError::BadCrypto(format!("signature: {}", e)))?;
        let message = Message::from_digest_slice(message)
            .map_err(|e| ScriptError::BadCrypto(format!("message: {}", e)))?;

        Ok(secp.verify_ecdsa(&message, &signature, &pubkey).is_ok())
    }
}
