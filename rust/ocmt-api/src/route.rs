use ocmt_core::data::CapabilityId;
use std::fmt::Display;

/// All relay routes live under this prefix
pub const API_PREFIX: &str = "/relay";

/// Every HTTP and WebSocket route the relay exposes. `Display` renders the
/// axum-compatible pattern when a parameter is absent and the concrete path
/// when one is supplied, so the same enum drives both router and client.
pub enum Route {
    Send,
    Forward,
    PendingMessages,
    AckMessages,
    Revoke,
    RevocationStatus(Option<CapabilityId>),
    CheckRevocations,
    Snapshots,
    Snapshot(Option<CapabilityId>),
    ListSnapshots,
    Register,
    UpdateRegistration,
    Registration,
    LookupByHash(Option<String>),
    Lookup,
    Health,
    Subscribe,
}

impl Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fragment = match self {
            Route::Send => "send".into(),
            Route::Forward => "forward".into(),
            Route::PendingMessages => "messages/pending".into(),
            Route::AckMessages => "messages/ack".into(),
            Route::Revoke => "revoke".into(),
            Route::RevocationStatus(capability_id) => match capability_id {
                Some(capability_id) => format!("revocation/{capability_id}"),
                None => "revocation/:capabilityId".into(),
            },
            Route::CheckRevocations => "check-revocations".into(),
            Route::Snapshots => "snapshots".into(),
            Route::Snapshot(capability_id) => match capability_id {
                Some(capability_id) => format!("snapshots/{capability_id}"),
                None => "snapshots/:capabilityId".into(),
            },
            Route::ListSnapshots => "snapshots/list".into(),
            Route::Register => "registry/register".into(),
            Route::UpdateRegistration => "registry/update".into(),
            Route::Registration => "registry".into(),
            Route::LookupByHash(hash) => match hash {
                Some(hash) => format!("registry/lookup/{hash}"),
                None => "registry/lookup/:publicKeyHash".into(),
            },
            Route::Lookup => "registry/lookup".into(),
            Route::Health => "health".into(),
            Route::Subscribe => "subscribe".into(),
        };

        write!(f, "{API_PREFIX}/{fragment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_renders_patterns_and_concrete_paths() {
        assert_eq!(Route::Send.to_string(), "/relay/send");
        assert_eq!(
            Route::RevocationStatus(None).to_string(),
            "/relay/revocation/:capabilityId"
        );
        assert_eq!(
            Route::Snapshot(Some(CapabilityId::from("cap-1"))).to_string(),
            "/relay/snapshots/cap-1"
        );
        assert_eq!(Route::Subscribe.to_string(), "/relay/subscribe");
    }
}
