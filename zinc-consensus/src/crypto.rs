//! Content hashing and the signature-verification capability
//!
//! Transaction ids and block hashes are hex SHA-256 digests over canonical JSON,
//! i.e. JSON with every object's keys in sorted order. Signature checking is an
//! injected capability so the ledger never depends on a particular key scheme.

use crate::Result;
use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, VerifyOnly};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Serialize `value` as JSON with object keys sorted at every level
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = sort_keys(serde_json::to_value(value)?);
    Ok(serde_json::to_vec(&value)?)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Hex SHA-256 of the canonical serialization of `value`
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let bytes = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Verifies `signature` over `message` for the holder of `pubkey`.
///
/// Both key and signature are hex strings. Implementations answer `false` for
/// anything they cannot decode. The crate exports no permissive verifier:
///
/// ```compile_fail
/// use zinc_consensus::crypto::AcceptAllVerifier;
/// ```
pub trait SignatureVerifier: Send + Sync {
    /// Check a signature
    fn verify(&self, pubkey: &str, message: &str, signature: &str) -> bool;
}

/// ECDSA over secp256k1 with a SHA-256 message digest
pub struct Secp256k1Verifier {
    secp: Secp256k1<VerifyOnly>,
}

impl Secp256k1Verifier {
    /// Create a verification-only context
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }

    fn parse_public_key(pubkey: &str) -> Option<PublicKey> {
        let mut bytes = hex::decode(pubkey).ok()?;
        // Raw 64-byte x||y keys are uncompressed SEC1 keys without the tag
        if bytes.len() == 64 {
            bytes.insert(0, 0x04);
        }
        PublicKey::from_slice(&bytes).ok()
    }

    fn parse_signature(signature: &str) -> Option<ecdsa::Signature> {
        let bytes = hex::decode(signature).ok()?;
        let mut sig = if bytes.len() == 64 {
            ecdsa::Signature::from_compact(&bytes).ok()?
        } else {
            ecdsa::Signature::from_der(&bytes).ok()?
        };
        sig.normalize_s();
        Some(sig)
    }
}

impl Default for Secp256k1Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Secp256k1Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secp256k1Verifier").finish()
    }
}

impl SignatureVerifier for Secp256k1Verifier {
    fn verify(&self, pubkey: &str, message: &str, signature: &str) -> bool {
        let Some(public_key) = Self::parse_public_key(pubkey) else {
            return false;
        };
        let Some(sig) = Self::parse_signature(signature) else {
            return false;
        };

        let digest: [u8; 32] = Sha256::digest(message.as_bytes()).into();
        let msg = Message::from_digest(digest);

        self.secp.verify_ecdsa(&msg, &sig, &public_key).is_ok()
    }
}

/// Verifier that accepts everything
#[cfg(test)]
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AcceptAllVerifier;

#[cfg(test)]
impl SignatureVerifier for AcceptAllVerifier {
    fn verify(&self, _pubkey: &str, _message: &str, _signature: &str) -> bool {
        true
    }
}
