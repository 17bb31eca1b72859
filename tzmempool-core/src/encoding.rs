//! Base58check values with Tezos prefixes.
//!
//! Every textual hash, key, and signature handled by the tracker is a
//! base58check string whose decoded bytes start with a fixed prefix. The
//! prefix bytes are chosen so that the encoded text always starts with the
//! same characters (`B`, `Net`, `edpk`, ...).

use crate::error::{CoreError, Result};

/// A known base58check prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    /// Leading characters of the encoded text
    pub text: &'static str,
    /// Leading bytes of the decoded value
    pub bytes: &'static [u8],
    /// Length of the payload after the prefix
    pub payload_len: usize,
}

/// Block hash (`B...`).
pub const BLOCK_HASH: Prefix = Prefix { text: "B", bytes: &[1, 52], payload_len: 32 };

/// Operation hash (`o...`).
pub const OPERATION_HASH: Prefix = Prefix { text: "o", bytes: &[5, 116], payload_len: 32 };

/// Chain identifier (`Net...`).
pub const CHAIN_ID: Prefix = Prefix { text: "Net", bytes: &[87, 82, 0], payload_len: 4 };

/// Ed25519 public key.
pub const ED25519_PUBLIC_KEY: Prefix =
    Prefix { text: "edpk", bytes: &[13, 15, 37, 217], payload_len: 32 };

/// Compressed secp256k1 public key.
pub const SECP256K1_PUBLIC_KEY: Prefix =
    Prefix { text: "sppk", bytes: &[3, 254, 226, 86], payload_len: 33 };

/// Compressed P-256 public key.
pub const P256_PUBLIC_KEY: Prefix =
    Prefix { text: "p2pk", bytes: &[3, 178, 139, 127], payload_len: 33 };

/// Curve-agnostic signature.
pub const GENERIC_SIGNATURE: Prefix = Prefix { text: "sig", bytes: &[4, 130, 43], payload_len: 64 };

/// Ed25519 signature.
pub const ED25519_SIGNATURE: Prefix =
    Prefix { text: "edsig", bytes: &[9, 245, 205, 134, 18], payload_len: 64 };

/// Secp256k1 signature.
pub const SECP256K1_SIGNATURE: Prefix =
    Prefix { text: "spsig1", bytes: &[13, 115, 101, 19, 63], payload_len: 64 };

/// P-256 signature.
pub const P256_SIGNATURE: Prefix =
    Prefix { text: "p2sig", bytes: &[54, 240, 44, 52], payload_len: 64 };

/// Decode a base58check string and strip the expected prefix.
pub fn decode(input: &str, prefix: &Prefix) -> Result<Vec<u8>> {
    let raw = bs58::decode(input)
        .with_check(None)
        .into_vec()
        .map_err(|e| CoreError::InvalidBase58 {
            input: input.to_string(),
            reason: e.to_string(),
        })?;

    let payload = raw.strip_prefix(prefix.bytes).ok_or(CoreError::UnexpectedPrefix {
        input: input.to_string(),
        expected: prefix.text,
    })?;

    if payload.len() != prefix.payload_len {
        return Err(CoreError::InvalidLength {
            input: input.to_string(),
            expected: prefix.payload_len,
            actual: payload.len(),
        });
    }

    Ok(payload.to_vec())
}

/// Encode a payload with the given prefix.
pub fn encode(payload: &[u8], prefix: &Prefix) -> Result<String> {
    if payload.len() != prefix.payload_len {
        return Err(CoreError::InvalidLength {
            input: format!("<{} raw bytes>", payload.len()),
            expected: prefix.payload_len,
            actual: payload.len(),
        });
    }
    let mut raw = Vec::with_capacity(prefix.bytes.len() + payload.len());
    raw.extend_from_slice(prefix.bytes);
    raw.extend_from_slice(payload);
    Ok(bs58::encode(raw).with_check().into_string())
}

/// Decode a signature in any of the supported textual forms into its 64 raw bytes.
pub fn decode_signature(input: &str) -> Result<[u8; 64]> {
    let prefix = [
        ED25519_SIGNATURE,
        SECP256K1_SIGNATURE,
        P256_SIGNATURE,
        GENERIC_SIGNATURE,
    ]
    .into_iter()
    .find(|p| input.starts_with(p.text))
    .ok_or(CoreError::UnexpectedPrefix {
        input: input.to_string(),
        expected: "sig",
    })?;

    let payload = decode(input, &prefix)?;
    let mut out = [0u8; 64];
    out.copy_from_slice(&payload);
    Ok(out)
}
