use crate::{
    authority::{verify_detached, Ed25519KeyMaterial},
    data::CachedSnapshot,
};
use anyhow::{anyhow, Result};
use base64::Engine;

/// The byte payload a snapshot signature covers:
/// `capabilityId || ":" || encryptedData || ":" || ephemeralPubKey`
pub fn snapshot_signing_payload(snapshot: &CachedSnapshot) -> Vec<u8> {
    [
        snapshot.capability_id.as_ref(),
        b":",
        snapshot.encrypted_data.as_bytes(),
        b":",
        snapshot.ephemeral_pub_key.as_bytes(),
    ]
    .concat()
}

/// Verify a snapshot's issuer signature and that it has not already expired.
/// Called before any snapshot write is accepted.
pub fn verify_snapshot(snapshot: &CachedSnapshot, now: u64) -> Result<()> {
    if snapshot.expires_at <= now {
        return Err(anyhow!("Snapshot is already expired"));
    }

    verify_detached(
        &snapshot.issuer_pub_key,
        &snapshot_signing_payload(snapshot),
        &snapshot.signature,
    )
}

/// Sign a snapshot in place with the issuer key; for tests and issuer-side
/// tooling
pub fn sign_snapshot(snapshot: &mut CachedSnapshot, issuer: &Ed25519KeyMaterial) -> Result<()> {
    snapshot.issuer_pub_key = issuer.public_key_base64();
    let signature = issuer.sign(&snapshot_signing_payload(snapshot))?;
    snapshot.signature = base64::engine::general_purpose::STANDARD.encode(signature);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CapabilityId;

    fn unsigned_snapshot() -> CachedSnapshot {
        CachedSnapshot {
            capability_id: CapabilityId::from("cap-1"),
            recipient_pub_key: "cmVjaXBpZW50".into(),
            issuer_pub_key: String::new(),
            encrypted_data: "Y2lwaGVydGV4dA==".into(),
            ephemeral_pub_key: "ZXBoZW1lcmFs".into(),
            nonce: "bm9uY2U=".into(),
            tag: "dGFn".into(),
            signature: String::new(),
            created_at: 100,
            expires_at: 10_000,
        }
    }

    #[test]
    fn it_verifies_a_signed_snapshot() {
        let issuer = Ed25519KeyMaterial::generate();
        let mut snapshot = unsigned_snapshot();
        sign_snapshot(&mut snapshot, &issuer).unwrap();
        verify_snapshot(&snapshot, 500).unwrap();
    }

    #[test]
    fn it_rejects_expired_snapshots() {
        let issuer = Ed25519KeyMaterial::generate();
        let mut snapshot = unsigned_snapshot();
        sign_snapshot(&mut snapshot, &issuer).unwrap();
        assert!(verify_snapshot(&snapshot, 10_000).is_err());
    }

    #[test]
    fn it_rejects_tampered_ciphertext() {
        let issuer = Ed25519KeyMaterial::generate();
        let mut snapshot = unsigned_snapshot();
        sign_snapshot(&mut snapshot, &issuer).unwrap();
        snapshot.encrypted_data = "c3dhcHBlZA==".into();
        assert!(verify_snapshot(&snapshot, 500).is_err());
    }
}
