use crate::{
    authority::{verify_detached, Ed25519KeyMaterial},
    capability::canonical_json,
    data::CapabilityId,
};
use anyhow::{anyhow, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Signed envelopes are rejected when their timestamp strays more than this
/// many seconds from the relay clock; the boundary itself is accepted
pub const REPLAY_WINDOW_SECONDS: u64 = 5 * 60;

/// A signed request to revoke a capability. The signature is produced by the
/// issuer over the canonical revoke claims.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevocationRequest {
    pub capability_id: CapabilityId,
    /// The revoking (issuer) public key, standard base64
    pub revoked_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The capability's own expiry; lets the cleanup sweep retire the row
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_expiry: Option<u64>,
    /// Unix seconds at signing time
    pub timestamp: u64,
    pub signature: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RevocationClaims<'a> {
    action: &'static str,
    capability_id: &'a CapabilityId,
    revoked_by: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_expiry: Option<u64>,
    timestamp: u64,
}

impl RevocationRequest {
    /// Verify the replay window and issuer signature against the given clock
    pub fn verify(&self, now: u64) -> Result<()> {
        if now.abs_diff(self.timestamp) > REPLAY_WINDOW_SECONDS {
            return Err(anyhow!(
                "Revocation timestamp outside the {} second replay window",
                REPLAY_WINDOW_SECONDS
            ));
        }

        let claims = canonical_json(&self.claims())?;
        verify_detached(&self.revoked_by, &claims, &self.signature)
    }

    /// Build and sign a revocation request; the key must carry its private
    /// half
    pub fn sign(
        issuer: &Ed25519KeyMaterial,
        capability_id: CapabilityId,
        reason: Option<String>,
        original_expiry: Option<u64>,
        timestamp: u64,
    ) -> Result<Self> {
        let mut request = RevocationRequest {
            capability_id,
            revoked_by: issuer.public_key_base64(),
            reason,
            original_expiry,
            timestamp,
            signature: String::new(),
        };
        let claims = canonical_json(&request.claims())?;
        let signature = issuer.sign(&claims)?;
        request.signature = base64::engine::general_purpose::STANDARD.encode(signature);
        Ok(request)
    }

    fn claims(&self) -> RevocationClaims<'_> {
        RevocationClaims {
            action: "revoke",
            capability_id: &self.capability_id,
            revoked_by: &self.revoked_by,
            reason: self.reason.as_deref(),
            original_expiry: self.original_expiry,
            timestamp: self.timestamp,
        }
    }
}

/// A signed request to list the snapshots held for a recipient. Proving
/// possession of the recipient key prevents snapshot enumeration by third
/// parties.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshotsRequest {
    /// The recipient public key whose snapshots are requested, standard base64
    pub recipient_public_key: String,
    /// Unix seconds at signing time
    pub timestamp: u64,
    pub signature: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListSnapshotsClaims<'a> {
    action: &'static str,
    recipient_public_key: &'a str,
    timestamp: u64,
}

impl ListSnapshotsRequest {
    /// Verify the replay window and that the signature was produced by the
    /// recipient key itself
    pub fn verify(&self, now: u64) -> Result<()> {
        if now.abs_diff(self.timestamp) > REPLAY_WINDOW_SECONDS {
            return Err(anyhow!(
                "List request timestamp outside the {} second replay window",
                REPLAY_WINDOW_SECONDS
            ));
        }

        let claims = canonical_json(&ListSnapshotsClaims {
            action: "list-snapshots",
            recipient_public_key: &self.recipient_public_key,
            timestamp: self.timestamp,
        })?;
        verify_detached(&self.recipient_public_key, &claims, &self.signature)
    }

    /// Build and sign a list request with the recipient's own key
    pub fn sign(recipient: &Ed25519KeyMaterial, timestamp: u64) -> Result<Self> {
        let recipient_public_key = recipient.public_key_base64();
        let claims = canonical_json(&ListSnapshotsClaims {
            action: "list-snapshots",
            recipient_public_key: &recipient_public_key,
            timestamp,
        })?;
        let signature = recipient.sign(&claims)?;
        Ok(ListSnapshotsRequest {
            recipient_public_key,
            timestamp,
            signature: base64::engine::general_purpose::STANDARD.encode(signature),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_accepts_a_fresh_signed_revocation() {
        let issuer = Ed25519KeyMaterial::generate();
        let request = RevocationRequest::sign(
            &issuer,
            CapabilityId::from("cap-1"),
            Some("compromised".into()),
            Some(10_000),
            1_000,
        )
        .unwrap();
        request.verify(1_000).unwrap();
    }

    #[test]
    fn it_enforces_the_replay_window_inclusively() {
        let issuer = Ed25519KeyMaterial::generate();
        let request =
            RevocationRequest::sign(&issuer, CapabilityId::from("cap-1"), None, None, 1_000).unwrap();
        // 5 minutes away on the nose is accepted; one second beyond is not
        request.verify(1_000 + REPLAY_WINDOW_SECONDS).unwrap();
        request.verify(1_000 - REPLAY_WINDOW_SECONDS).unwrap();
        assert!(request.verify(1_001 + REPLAY_WINDOW_SECONDS).is_err());
    }

    #[test]
    fn it_rejects_a_forged_revocation() {
        let issuer = Ed25519KeyMaterial::generate();
        let mut request =
            RevocationRequest::sign(&issuer, CapabilityId::from("cap-1"), None, None, 1_000).unwrap();
        request.capability_id = CapabilityId::from("cap-2");
        assert!(request.verify(1_000).is_err());
    }

    #[test]
    fn list_requests_must_be_signed_by_the_recipient_key() {
        let recipient = Ed25519KeyMaterial::generate();
        let other = Ed25519KeyMaterial::generate();

        let request = ListSnapshotsRequest::sign(&recipient, 500).unwrap();
        request.verify(500).unwrap();

        let mut forged = request.clone();
        forged.recipient_public_key = other.public_key_base64();
        assert!(forged.verify(500).is_err());
    }
}
