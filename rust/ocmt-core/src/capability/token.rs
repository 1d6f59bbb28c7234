use crate::{
    authority::{verify_detached, Ed25519KeyMaterial},
    capability::canonical_json,
    data::CapabilityId,
    time::now_seconds,
};
use anyhow::Result;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A compact, self-describing capability token: a grant from `iss` to `sub`
/// over some `resource`/`scope`, signed by the issuer and carried base64url
/// in forward envelopes.
///
/// `resource` and `scope` are opaque to the relay and re-emitted verbatim.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CapabilityToken {
    pub id: CapabilityId,
    /// Issuer public key, standard base64
    pub iss: String,
    /// Subject public key
    pub sub: String,
    pub resource: Value,
    pub scope: Value,
    /// Unix seconds; a token with `exp == now` is already expired
    pub exp: u64,
    /// Ed25519 over the canonical JSON of all other fields
    pub sig: String,
}

/// The claims a capability signature covers: every token field except `sig`
#[derive(Serialize)]
struct CapabilityClaims<'a> {
    id: &'a CapabilityId,
    iss: &'a str,
    sub: &'a str,
    resource: &'a Value,
    scope: &'a Value,
    exp: u64,
}

impl CapabilityToken {
    /// Decode and fully verify a transit-form token against the current
    /// time. Any failure — undecodable, missing fields, bad signature,
    /// expired — collapses to `None` so that rejection reveals nothing about
    /// which check tripped.
    pub fn decode(token: &str) -> Option<Self> {
        Self::decode_at(token, now_seconds())
    }

    /// [CapabilityToken::decode] against an explicit clock
    pub fn decode_at(token: &str, now: u64) -> Option<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token.trim_end_matches('='))
            .ok()?;
        let token: CapabilityToken = serde_json::from_slice(&bytes).ok()?;

        let claims = canonical_json(&token.claims()).ok()?;
        verify_detached(&token.iss, &claims, &token.sig).ok()?;

        match token.exp > now {
            true => Some(token),
            false => None,
        }
    }

    /// Produce the transit form: base64url (unpadded) over the canonical
    /// JSON of the whole token
    pub fn encode(&self) -> Result<String> {
        let bytes = canonical_json(self)?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Issue and sign a new token. The key must carry its private half.
    pub fn issue(
        issuer: &Ed25519KeyMaterial,
        id: CapabilityId,
        sub: String,
        resource: Value,
        scope: Value,
        exp: u64,
    ) -> Result<Self> {
        let mut token = CapabilityToken {
            id,
            iss: issuer.public_key_base64(),
            sub,
            resource,
            scope,
            exp,
            sig: String::new(),
        };
        let claims = canonical_json(&token.claims())?;
        let signature = issuer.sign(&claims)?;
        token.sig = base64::engine::general_purpose::STANDARD.encode(signature);
        Ok(token)
    }

    fn claims(&self) -> CapabilityClaims<'_> {
        CapabilityClaims {
            id: &self.id,
            iss: &self.iss,
            sub: &self.sub,
            resource: &self.resource,
            scope: &self.scope,
            exp: self.exp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issue_test_token(exp: u64) -> (Ed25519KeyMaterial, CapabilityToken) {
        let issuer = Ed25519KeyMaterial::generate();
        let subject = Ed25519KeyMaterial::generate();
        let token = CapabilityToken::issue(
            &issuer,
            CapabilityId::from("cap-1"),
            subject.public_key_base64(),
            json!("mesh://files"),
            json!(["read"]),
            exp,
        )
        .unwrap();
        (issuer, token)
    }

    #[test]
    fn it_round_trips_a_valid_token() {
        let (_, token) = issue_test_token(1_000);
        let decoded = CapabilityToken::decode_at(&token.encode().unwrap(), 500).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn it_rejects_a_token_expiring_now_or_earlier() {
        let (_, token) = issue_test_token(1_000);
        let encoded = token.encode().unwrap();
        assert!(CapabilityToken::decode_at(&encoded, 1_000).is_none());
        assert!(CapabilityToken::decode_at(&encoded, 2_000).is_none());
        assert!(CapabilityToken::decode_at(&encoded, 999).is_some());
    }

    #[test]
    fn it_rejects_a_tampered_token() {
        let (_, mut token) = issue_test_token(1_000);
        token.scope = json!(["read", "write"]);
        let encoded = token.encode().unwrap();
        assert!(CapabilityToken::decode_at(&encoded, 500).is_none());
    }

    #[test]
    fn it_rejects_a_token_signed_by_the_wrong_key() {
        let (_, mut token) = issue_test_token(1_000);
        let interloper = Ed25519KeyMaterial::generate();
        token.iss = interloper.public_key_base64();
        let encoded = token.encode().unwrap();
        assert!(CapabilityToken::decode_at(&encoded, 500).is_none());
    }

    #[test]
    fn it_rejects_garbage_and_missing_fields() {
        assert!(CapabilityToken::decode_at("not base64!!!", 0).is_none());
        let missing_sig = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(br#"{"id":"x","iss":"y","sub":"z","resource":"r","scope":"s","exp":10}"#);
        assert!(CapabilityToken::decode_at(&missing_sig, 0).is_none());
    }
}
