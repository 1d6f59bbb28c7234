use anyhow::{anyhow, Result};
use base64::Engine;
use ed25519_zebra::{Signature, SigningKey as Ed25519PrivateKey, VerificationKey as Ed25519PublicKey};

/// The fixed DER prefix that wraps a raw Ed25519 public key into an SPKI
/// document: SEQUENCE, AlgorithmIdentifier for id-Ed25519, BIT STRING header
pub const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Raw Ed25519 public keys are exactly this many bytes
pub const ED25519_KEY_LENGTH: usize = 32;

/// Ed25519 signatures are exactly this many bytes; anything else fails closed
pub const ED25519_SIGNATURE_LENGTH: usize = 64;

/// An Ed25519 keypair as the relay sees it: always a public key, and a
/// private half only for keys the local process minted (tests, tooling and
/// the relay's own challenge generation).
#[derive(Clone)]
pub struct Ed25519KeyMaterial(pub Ed25519PublicKey, pub Option<Ed25519PrivateKey>);

impl Ed25519KeyMaterial {
    /// Interpret 32 raw bytes as a public verification key. An SPKI-wrapped
    /// document (the raw key behind [ED25519_SPKI_PREFIX]) is also accepted.
    pub fn from_public_key_bytes(bytes: &[u8]) -> Result<Self> {
        let raw = match bytes.len() {
            ED25519_KEY_LENGTH => bytes,
            44 if bytes.starts_with(&ED25519_SPKI_PREFIX) => &bytes[ED25519_SPKI_PREFIX.len()..],
            length => return Err(anyhow!("Expected a 32-byte Ed25519 key, got {} bytes", length)),
        };
        let public_key = Ed25519PublicKey::try_from(raw)?;
        Ok(Ed25519KeyMaterial(public_key, None))
    }

    /// Decode a base64 (standard alphabet) public key, as carried in
    /// registration bodies and capability token `iss`/`sub` fields
    pub fn from_base64_public_key(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        Self::from_public_key_bytes(&bytes)
    }

    /// Generate a fresh keypair; for tests and tooling
    #[cfg(any(test, feature = "helpers"))]
    pub fn generate() -> Self {
        let private_key = Ed25519PrivateKey::new(rand::thread_rng());
        let public_key = Ed25519PublicKey::from(&private_key);
        Ed25519KeyMaterial(public_key, Some(private_key))
    }

    /// The raw 32 public key bytes
    pub fn public_key_bytes(&self) -> [u8; ED25519_KEY_LENGTH] {
        self.0.into()
    }

    /// The public key as standard base64, the transit form
    pub fn public_key_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.public_key_bytes())
    }

    /// The public key wrapped in the fixed SPKI DER prefix, for callers that
    /// exchange keys with SPKI-based verifiers
    pub fn spki_document(&self) -> Vec<u8> {
        [&ED25519_SPKI_PREFIX[..], &self.public_key_bytes()[..]].concat()
    }

    /// Sign a payload with the private half
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match &self.1 {
            Some(private_key) => {
                let signature = private_key.sign(payload);
                let bytes: [u8; ED25519_SIGNATURE_LENGTH] = signature.into();
                Ok(bytes.to_vec())
            }
            None => Err(anyhow!("No private key; cannot sign data")),
        }
    }

    /// Verify the alleged signature of a payload against this key. Signatures
    /// that are not exactly 64 bytes are rejected before any verification.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<()> {
        if signature.len() != ED25519_SIGNATURE_LENGTH {
            return Err(anyhow!(
                "Expected a 64-byte Ed25519 signature, got {} bytes",
                signature.len()
            ));
        }
        let signature = Signature::try_from(signature)?;
        self.0
            .verify(&signature, payload)
            .map_err(|error| anyhow!("Could not verify signature: {:?}", error))
    }
}

/// Verify a detached signature given base64 forms of the key and signature;
/// the common shape for envelope checks throughout the relay
pub fn verify_detached(public_key_base64: &str, payload: &[u8], signature_base64: &str) -> Result<()> {
    let key = Ed25519KeyMaterial::from_base64_public_key(public_key_base64)?;
    let signature = base64::engine::general_purpose::STANDARD.decode(signature_base64)?;
    key.verify(payload, &signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_can_sign_and_verify_a_payload() {
        let key = Ed25519KeyMaterial::generate();
        let signature = key.sign(b"challenge bytes").unwrap();
        key.verify(b"challenge bytes", &signature).unwrap();
        assert!(key.verify(b"different bytes", &signature).is_err());
    }

    #[test]
    fn it_rejects_signatures_of_the_wrong_length() {
        let key = Ed25519KeyMaterial::generate();
        assert!(key.verify(b"payload", &[0u8; 63]).is_err());
        assert!(key.verify(b"payload", &[0u8; 65]).is_err());
    }

    #[test]
    fn it_accepts_spki_wrapped_keys() {
        let key = Ed25519KeyMaterial::generate();
        let spki = key.spki_document();
        assert_eq!(spki.len(), 44);
        let reparsed = Ed25519KeyMaterial::from_public_key_bytes(&spki).unwrap();
        assert_eq!(reparsed.public_key_bytes(), key.public_key_bytes());
    }

    #[test]
    fn it_round_trips_base64_keys() {
        let key = Ed25519KeyMaterial::generate();
        let encoded = key.public_key_base64();
        let decoded = Ed25519KeyMaterial::from_base64_public_key(&encoded).unwrap();
        let signature = key.sign(b"payload").unwrap();
        decoded.verify(b"payload", &signature).unwrap();
    }
}
