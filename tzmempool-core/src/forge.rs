//! Canonical forging of endorsement bytes.
//!
//! An endorsement signs `branch ‖ tag ‖ level`, prefixed by a watermark
//! made of a magic byte and the chain identifier. The resulting bytes are
//! hashed with Blake2b-256 before signing.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use crate::encoding::{self, BLOCK_HASH, CHAIN_ID};
use crate::error::{CoreError, Result};

type Blake2b256 = Blake2b<U32>;

/// Magic byte preceding the chain id for endorsements.
pub const ENDORSEMENT_WATERMARK: u8 = 0x02;

/// Operation tag of an endorsement content.
pub const ENDORSEMENT_TAG: u64 = 0;

/// Forge a block hash into its 32 raw bytes.
pub fn forge_branch(branch: &str) -> Result<[u8; 32]> {
    let bytes = encoding::decode(branch, &BLOCK_HASH)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Forge a natural number as a little-endian base-128 varint.
pub fn forge_nat(value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = value;
    loop {
        let byte = (rest & 0x7f) as u8;
        rest >>= 7;
        if rest == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Forge a level as a 4-byte big-endian integer.
pub fn forge_level(level: u64) -> Result<[u8; 4]> {
    let level = i32::try_from(level).map_err(|_| CoreError::LevelOverflow(level))?;
    Ok(level.to_be_bytes())
}

/// Bytes an endorsement of `level` built on `branch` signs.
pub fn endorsement_bytes(branch: &str, level: u64) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(32 + 1 + 4);
    out.extend_from_slice(&forge_branch(branch)?);
    out.extend_from_slice(&forge_nat(ENDORSEMENT_TAG));
    out.extend_from_slice(&forge_level(level)?);
    Ok(out)
}

/// Watermark prefix for endorsements on the given chain.
pub fn chain_watermark(chain_id: &str) -> Result<Vec<u8>> {
    let mut out = vec![ENDORSEMENT_WATERMARK];
    out.extend_from_slice(&encoding::decode(chain_id, &CHAIN_ID)?);
    Ok(out)
}

/// Blake2b-256 of `watermark ‖ bytes`.
pub fn signing_digest(watermark: &[u8], bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(watermark);
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forge_nat() {
        assert_eq!(forge_nat(0), vec![0x00]);
        assert_eq!(forge_nat(1), vec![0x01]);
        assert_eq!(forge_nat(127), vec![0x7f]);
        assert_eq!(forge_nat(128), vec![0x80, 0x01]);
        assert_eq!(forge_nat(300), vec![0xac, 0x02]);
    }

    #[test]
    fn test_forge_level_big_endian() {
        assert_eq!(forge_level(1).unwrap(), [0, 0, 0, 1]);
        assert_eq!(forge_level(0x0102_0304).unwrap(), [1, 2, 3, 4]);
        assert!(matches!(
            forge_level(u64::from(u32::MAX)),
            Err(CoreError::LevelOverflow(_))
        ));
    }

    #[test]
    fn test_endorsement_bytes_layout() {
        let branch = encoding::encode(&[0xab; 32], &BLOCK_HASH).unwrap();
        let bytes = endorsement_bytes(&branch, 100).unwrap();
        assert_eq!(bytes.len(), 37);
        assert_eq!(&bytes[..32], &[0xab; 32]);
        assert_eq!(bytes[32], 0x00);
        assert_eq!(&bytes[33..], &[0, 0, 0, 100]);
    }

    #[test]
    fn test_chain_watermark() {
        let watermark = chain_watermark("NetXdQprcVkpaWU").unwrap();
        assert_eq!(watermark, vec![0x02, 0x7a, 0x06, 0xa7, 0x70]);
    }

    #[test]
    fn test_digest_known_vector() {
        // Blake2b-256 of the empty input.
        assert_eq!(
            hex::encode(signing_digest(&[], &[])),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );

        let branch = encoding::encode(&[0xab; 32], &BLOCK_HASH).unwrap();
        let bytes = endorsement_bytes(&branch, 0x0102).unwrap();
        assert_eq!(hex::encode(bytes), format!("{}0000000102", "ab".repeat(32)));
    }

    #[test]
    fn test_digest_depends_on_watermark() {
        let a = signing_digest(&[0x02, 1, 2, 3, 4], b"payload");
        let b = signing_digest(&[0x02, 1, 2, 3, 5], b"payload");
        assert_ne!(a, b);
        assert_eq!(a, signing_digest(&[0x02, 1, 2, 3, 4], b"payload"));
    }
}
