//! Request, response and frame shapes for the relay API. Field names are
//! camelCase on the wire, matching what containers already speak.

use ocmt_core::data::{CachedSnapshot, CapabilityId, ContainerId};
use serde::{Deserialize, Serialize};

/// Bodies over this size are rejected before any handler runs
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Message payloads over this size return `413 payload_too_large`
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Upper bound on ids per acknowledgement batch, HTTP and WebSocket alike
pub const MAX_ACK_BATCH: usize = 100;

/// Upper bound on ids per revocation batch check
pub const MAX_REVOCATION_CHECK_BATCH: usize = 1000;

/// Header names the relay reads or writes
pub mod headers {
    pub const MESSAGE_ID: &str = "X-OCMT-Message-Id";
    pub const FROM: &str = "X-OCMT-From";
    pub const CONTAINER_ID: &str = "X-Container-Id";
    pub const AUTH_TOKEN: &str = "X-Auth-Token";
    pub const RATE_LIMIT_LIMIT: &str = "RateLimit-Limit";
    pub const RATE_LIMIT_REMAINING: &str = "RateLimit-Remaining";
    pub const RATE_LIMIT_RESET: &str = "RateLimit-Reset";
    pub const RETRY_AFTER: &str = "Retry-After";
}

/// The WebSocket subprotocol the server echoes back
pub const WS_SUBPROTOCOL: &str = "ocmt-relay";

/// Prefix of the credential pseudo-protocol offered beside [WS_SUBPROTOCOL]:
/// `token.<base64("<containerId>:<gatewayToken>")>`
pub const WS_TOKEN_PROTOCOL_PREFIX: &str = "token.";

/// The standard error body: `{error, details?}`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// Send / forward /////////////////////////////////////////////////////////

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendBody {
    pub to_container_id: ContainerId,
    /// Opaque blob, base64 or UTF-8, at most [MAX_PAYLOAD_BYTES]
    pub payload: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardBody {
    pub to_container_id: ContainerId,
    /// Transit-form capability token authorizing this forward
    pub capability_token: String,
    pub encrypted_payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Where a send/forward ended up from the caller's point of view
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Queued,
}

/// The channel that completed a delivery
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Websocket,
    Callback,
}

/// The rate-limit block included in send/forward responses, mirroring the
/// `RateLimit-*` response headers
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds at which the current window closes
    pub reset: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub message_id: String,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_method: Option<DeliveryMethod>,
    pub wake_triggered: bool,
    pub rate_limit: RateLimitInfo,
}

/// The envelope a `forward` wraps around its payload before delivery; the
/// relay fills it verbatim from the forward body and never interprets the
/// capability's `resource` or `scope`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityExecutionEnvelope {
    /// Always `"capability_execution"`
    #[serde(rename = "type")]
    pub kind: String,
    pub capability_token: String,
    pub encrypted_payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

// Pending queue //////////////////////////////////////////////////////////

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Comma-separated ids to acknowledge before listing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub id: String,
    pub from: ContainerId,
    pub payload: String,
    pub size: u64,
    /// Unix milliseconds
    pub timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessagesResponse {
    pub count: usize,
    pub messages: Vec<PendingMessage>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AckBody {
    pub message_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    /// Number of messages newly marked delivered; duplicates count zero
    pub acknowledged: u64,
}

// Revocation /////////////////////////////////////////////////////////////

/// Which layer answered a revocation check
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RevocationSource {
    BloomFilter,
    Cache,
    Database,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevokeResponse {
    pub revoked: bool,
    pub capability_id: CapabilityId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevocationStatusResponse {
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub source: RevocationSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckRevocationsBody {
    pub capability_ids: Vec<CapabilityId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckRevocationsResponse {
    /// The subset of the queried ids that are revoked
    pub revoked: Vec<CapabilityId>,
}

// Snapshots //////////////////////////////////////////////////////////////

/// A snapshot as uploaded; `createdAt` is stamped by the relay
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotUpload {
    pub capability_id: CapabilityId,
    pub recipient_pub_key: String,
    pub issuer_pub_key: String,
    pub encrypted_data: String,
    pub ephemeral_pub_key: String,
    pub nonce: String,
    pub tag: String,
    pub signature: String,
    pub expires_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStoredResponse {
    pub stored: bool,
    pub capability_id: CapabilityId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshotsResponse {
    pub count: usize,
    pub snapshots: Vec<CachedSnapshot>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub deleted: bool,
}

// Registry ///////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub container_id: ContainerId,
    /// Raw Ed25519 key, standard base64
    pub signing_pub_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_pub_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Challenge bytes (base64) signed to prove private-key possession
    pub challenge: String,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRegistrationBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_pub_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Clears the callback URL when true
    #[serde(default)]
    pub clear_callback_url: bool,
}

/// The discovery view of a registration; never includes the callback URL
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationView {
    pub container_id: ContainerId,
    pub signing_pub_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_pub_key: Option<String>,
    pub pub_key_hash: String,
    pub registered_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LookupBody {
    /// Raw Ed25519 key, standard base64
    pub public_key: String,
}

// Health /////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCounters {
    pub pending_messages: usize,
    pub registered_containers: usize,
    pub live_connections: usize,
    pub revocations: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub counters: HealthCounters,
}

// Callback delivery //////////////////////////////////////////////////////

/// The JSON body POSTed to a container's callback URL
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackDelivery {
    /// Always `"message"`
    #[serde(rename = "type")]
    pub kind: String,
    pub message_id: String,
    pub from: ContainerId,
    pub payload: String,
    /// Unix milliseconds
    pub timestamp: u64,
}

// WebSocket frames ///////////////////////////////////////////////////////

/// Frames the relay pushes to a subscribed container
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Connected { container_id: ContainerId, timestamp: u64 },
    Message {
        id: String,
        from: ContainerId,
        payload: String,
        timestamp: u64,
    },
    Pong { timestamp: u64 },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

/// Frames a subscribed container sends to the relay
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Ack { message_id: String },
    #[serde(rename_all = "camelCase")]
    AckBatch { message_ids: Vec<String> },
    Ping,
}

// Agent server RPC ///////////////////////////////////////////////////////

/// Response shape of the agent server's container status endpoint
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatusResponse {
    pub status: ocmt_core::data::ContainerStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_tag_by_type() {
        let frame = ServerFrame::Message {
            id: "m1".into(),
            from: ContainerId::from("a"),
            payload: "QUJD".into(),
            timestamp: 9,
        };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"type":"message","id":"m1","from":"a","payload":"QUJD","timestamp":9}"#
        );

        let ack: ClientFrame = serde_json::from_str(r#"{"type":"ack","messageId":"m1"}"#).unwrap();
        assert_eq!(ack, ClientFrame::Ack { message_id: "m1".into() });

        let ping: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientFrame::Ping);
    }

    #[test]
    fn revocation_sources_use_kebab_names() {
        assert_eq!(
            serde_json::to_string(&RevocationSource::BloomFilter).unwrap(),
            "\"bloom-filter\""
        );
    }

    #[test]
    fn delivery_wire_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&DeliveryStatus::Queued).unwrap(), "\"queued\"");
        assert_eq!(
            serde_json::to_string(&DeliveryMethod::Websocket).unwrap(),
            "\"websocket\""
        );
    }
}
