//! Ed25519 key handling for the relay.
//!
//! Keys travel as 32 raw bytes (base64 in transit) and signatures are exactly
//! 64 bytes; anything else fails closed. The relay never holds container
//! private keys — signing support exists for the relay's own test and tooling
//! needs.

mod key_material;

pub use key_material::*;

use sha2::{Digest, Sha256};

/// Length of the hex-encoded public key hash: 16 bytes of SHA-256, hex
pub const PUB_KEY_HASH_LENGTH: usize = 32;

/// Derive the registry discovery hash for a raw Ed25519 public key: the first
/// 16 bytes of its SHA-256 digest, lower-case hex. Always recomputed on
/// write, never accepted from a client.
pub fn pub_key_hash(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..16])
}

/// SHA-256 of arbitrary bytes
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_derives_a_32_character_hex_hash() {
        let hash = pub_key_hash(&[0u8; 32]);
        assert_eq!(hash.len(), PUB_KEY_HASH_LENGTH);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn it_truncates_the_full_digest() {
        let key = [7u8; 32];
        let full = sha256(&key);
        assert_eq!(pub_key_hash(&key), hex::encode(&full[..16]));
    }
}
