//! Signature verification for Ed25519, secp256k1 and P-256 keys.
//!
//! The key family is implied by the textual prefix of the public key
//! (`edpk`, `sppk`, `p2pk`). Verification is total: malformed keys,
//! malformed signatures and points that are not on the curve all yield
//! `false`.

use ed25519_dalek::Verifier;
use k256::ecdsa::signature::hazmat::PrehashVerifier;

use crate::encoding::{self, ED25519_PUBLIC_KEY, P256_PUBLIC_KEY, SECP256K1_PUBLIC_KEY};
use crate::error::{CoreError, Result};

/// A parsed public key of one of the supported families.
#[derive(Debug, Clone)]
pub enum PublicKey {
    /// `edpk...`
    Ed25519(ed25519_dalek::VerifyingKey),
    /// `sppk...`
    Secp256k1(k256::ecdsa::VerifyingKey),
    /// `p2pk...`, decompressed from its SEC1 form
    P256(p256::ecdsa::VerifyingKey),
}

impl PublicKey {
    /// Parse a base58check public key.
    pub fn from_base58(text: &str) -> Result<Self> {
        let invalid = |reason: String| CoreError::InvalidBase58 {
            input: text.to_string(),
            reason,
        };

        if text.starts_with(ED25519_PUBLIC_KEY.text) {
            let bytes = encoding::decode(text, &ED25519_PUBLIC_KEY)?;
            let mut raw = [0u8; 32];
            raw.copy_from_slice(&bytes);
            let key = ed25519_dalek::VerifyingKey::from_bytes(&raw)
                .map_err(|e| invalid(e.to_string()))?;
            Ok(Self::Ed25519(key))
        } else if text.starts_with(SECP256K1_PUBLIC_KEY.text) {
            let bytes = encoding::decode(text, &SECP256K1_PUBLIC_KEY)?;
            let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(&bytes)
                .map_err(|e| invalid(e.to_string()))?;
            Ok(Self::Secp256k1(key))
        } else if text.starts_with(P256_PUBLIC_KEY.text) {
            let bytes = encoding::decode(text, &P256_PUBLIC_KEY)?;
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&bytes)
                .map_err(|e| invalid(e.to_string()))?;
            Ok(Self::P256(key))
        } else {
            Err(CoreError::UnexpectedPrefix {
                input: text.to_string(),
                expected: "edpk|sppk|p2pk",
            })
        }
    }

    /// Check a raw 64-byte signature over a 32-byte digest.
    pub fn verify_digest(&self, digest: &[u8; 32], signature: &[u8; 64]) -> bool {
        match self {
            Self::Ed25519(key) => {
                let sig = ed25519_dalek::Signature::from_bytes(signature);
                key.verify(digest, &sig).is_ok()
            }
            Self::Secp256k1(key) => {
                let Ok(sig) = k256::ecdsa::Signature::from_slice(signature) else {
                    return false;
                };
                // Signers are not required to produce low-s signatures.
                let sig = sig.normalize_s().unwrap_or(sig);
                key.verify_prehash(digest, &sig).is_ok()
            }
            Self::P256(key) => {
                let Ok(sig) = p256::ecdsa::Signature::from_slice(signature) else {
                    return false;
                };
                key.verify_prehash(digest, &sig).is_ok()
            }
        }
    }
}

/// Verify a base58check signature against a base58check public key.
///
/// Returns `false` whenever the check cannot be completed.
pub fn verify(public_key: &str, signature: &str, digest: &[u8; 32]) -> bool {
    let Ok(key) = PublicKey::from_base58(public_key) else {
        return false;
    };
    let Ok(raw) = encoding::decode_signature(signature) else {
        return false;
    };
    key.verify_digest(digest, &raw)
}
