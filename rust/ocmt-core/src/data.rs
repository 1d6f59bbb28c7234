//! The relay's persistent and wire-facing data model. These records are what
//! the storage layer serializes and what audit consumers read; the HTTP
//! request/response shapes live in `ocmt-api`.

use serde::{Deserialize, Serialize};
use std::{fmt::Display, hash::Hash, ops::Deref};
use strum_macros::{Display as EnumDisplay, EnumString};

/// A helper to stamp out trait implementations that promote coherence between
/// Rust strings and a given wrapper type
macro_rules! string_coherent {
    ($wrapper:ty) => {
        impl Deref for $wrapper {
            type Target = String;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl Hash for $wrapper {
            fn hash<H>(&self, hasher: &mut H)
            where
                H: std::hash::Hasher,
            {
                Hash::hash(&self.0, hasher)
            }
        }

        impl From<&str> for $wrapper {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $wrapper {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<$wrapper> for String {
            fn from(value: $wrapper) -> Self {
                value.0
            }
        }

        impl PartialEq<str> for $wrapper {
            fn eq(&self, other: &str) -> bool {
                &self.0 == other
            }
        }

        impl PartialEq<&str> for $wrapper {
            fn eq(&self, other: &&str) -> bool {
                &self.0 == *other
            }
        }

        impl PartialEq for $wrapper {
            fn eq(&self, other: &Self) -> bool {
                self.0 == other.0
            }
        }

        impl Eq for $wrapper {}

        impl Display for $wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl AsRef<[u8]> for $wrapper {
            fn as_ref(&self) -> &[u8] {
                self.0.as_ref()
            }
        }
    };
}

/// The stable, opaque identifier of a container. The relay never mints these;
/// they originate in the shared user table.
#[repr(transparent)]
#[derive(Default, Clone, Debug, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ContainerId(pub String);

string_coherent!(ContainerId);

/// The unique identifier of a capability token, as chosen by its issuer
#[repr(transparent)]
#[derive(Default, Clone, Debug, Serialize, Deserialize, PartialOrd, Ord)]
pub struct CapabilityId(pub String);

string_coherent!(CapabilityId);

/// Lifecycle status of a container as reported by the agent server
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumDisplay, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContainerStatus {
    Active,
    Suspended,
    Hibernated,
    Stopped,
    Unknown,
}

impl ContainerStatus {
    /// Statuses for which the relay asks the agent server to wake the
    /// container after live and callback delivery have both failed
    pub fn is_wakeable(&self) -> bool {
        matches!(self, ContainerStatus::Hibernated | ContainerStatus::Stopped)
    }
}

/// Delivery status of a stored message. Transitions are monotone: a message
/// leaves [MessageStatus::Pending] exactly once and never returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Expired,
}

/// A stored relay message. The payload is an opaque blob the relay cannot
/// read; `size` is its byte length and is recomputed by the relay on write.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: ContainerId,
    pub to: ContainerId,
    pub payload: String,
    pub size: u64,
    /// Unix milliseconds
    pub created_at: u64,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<u64>,
}

impl Message {
    /// Construct a freshly-queued message for the given sender, recipient and
    /// opaque payload
    pub fn queued(id: String, from: ContainerId, to: ContainerId, payload: String, created_at: u64) -> Self {
        let size = payload.len() as u64;
        Message {
            id,
            from,
            to,
            payload,
            size,
            created_at,
            status: MessageStatus::Pending,
            delivered_at: None,
            expired_at: None,
        }
    }
}

/// A container's registry row: its signing identity, optional encryption
/// identity, and optional callback endpoint. `pub_key_hash` is derived; see
/// [crate::authority::pub_key_hash].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRecord {
    pub container_id: ContainerId,
    /// Raw Ed25519 public key, standard base64
    pub signing_pub_key: String,
    /// Opaque encryption public key; the relay stores but never uses it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_pub_key: Option<String>,
    /// First 16 bytes of SHA-256 of the signing key, hex; indexed for discovery
    pub pub_key_hash: String,
    /// Never exposed by lookup endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// An authoritative revocation row. Presence in the persistent table is the
/// definition of "revoked"; the Bloom filter and cache are advisory mirrors.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevocationRecord {
    pub capability_id: CapabilityId,
    /// The issuer key that authorized the revocation, standard base64
    pub issuer_pub_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The revoked capability's own expiry, used by the cleanup sweep
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_expiry: Option<u64>,
    pub revoked_at: u64,
    pub signature: String,
}

/// An encrypted capability snapshot pinned at the relay so an offline
/// recipient can fetch it later. All cryptographic fields are opaque to the
/// relay except `signature`, which it verifies on upsert.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedSnapshot {
    pub capability_id: CapabilityId,
    pub recipient_pub_key: String,
    pub issuer_pub_key: String,
    pub encrypted_data: String,
    pub ephemeral_pub_key: String,
    pub nonce: String,
    pub tag: String,
    pub signature: String,
    pub created_at: u64,
    pub expires_at: u64,
}

/// Outcome classification for relay audit rows
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditStatus {
    DeliveredWs,
    DeliveredCallback,
    Queued,
    RateLimited,
    InvalidCapability,
    InvalidDestination,
    Error,
}

/// One row of the append-only relay audit log. Metadata only; payload bytes
/// never appear here.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: u64,
    pub from: ContainerId,
    pub to: ContainerId,
    pub size: u64,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Capability-relevant events mirrored to the mesh audit stream shared with
/// the management server
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MeshAuditAction {
    CapabilityDenied,
    CapabilityUsed,
    CapabilityRevoked,
    RelayMessageForwarded,
}

/// A mesh audit event as posted to the shared audit sink
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeshAuditEvent {
    pub action: MeshAuditAction,
    /// Always `"relay-server"` for events the relay emits
    pub source: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<CapabilityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<ContainerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The audit source tag for every mesh event the relay produces
pub const MESH_AUDIT_SOURCE: &str = "relay-server";

impl MeshAuditEvent {
    /// A mesh event stamped with the relay's source tag and the current time
    pub fn new(action: MeshAuditAction, timestamp: u64) -> Self {
        MeshAuditEvent {
            action,
            source: MESH_AUDIT_SOURCE.into(),
            timestamp,
            capability_id: None,
            container_id: None,
            detail: None,
        }
    }

    /// Attach the capability id this event concerns
    pub fn for_capability(mut self, capability_id: &CapabilityId) -> Self {
        self.capability_id = Some(capability_id.clone());
        self
    }

    /// Attach the container id this event concerns
    pub fn for_container(mut self, container_id: &ContainerId) -> Self {
        self.container_id = Some(container_id.clone());
        self
    }
}

/// A row of the shared user table, read-only to the relay. The management
/// server owns writes; the relay only verifies gateway tokens against it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub container_id: ContainerId,
    /// Long-lived, high-entropy bearer secret
    pub gateway_token: String,
    pub status: ContainerStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_to_their_wire_names() {
        assert_eq!(
            serde_json::to_string(&AuditStatus::InvalidCapability).unwrap(),
            "\"invalid_capability\""
        );
        assert_eq!(
            serde_json::to_string(&MessageStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&MeshAuditAction::CapabilityDenied).unwrap(),
            "\"CAPABILITY_DENIED\""
        );
        assert_eq!(AuditStatus::DeliveredWs.to_string(), "delivered_ws");
    }

    #[test]
    fn queued_messages_record_payload_size() {
        let message = Message::queued(
            "m1".into(),
            ContainerId::from("a"),
            ContainerId::from("b"),
            "QUJD".into(),
            1,
        );
        assert_eq!(message.size, 4);
        assert_eq!(message.status, MessageStatus::Pending);
        assert!(message.delivered_at.is_none());
    }
}
