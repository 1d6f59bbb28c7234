use crate::{error::RelayError, state::RelayState};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use base64::Engine;
use ocmt_api::data::{headers, WS_TOKEN_PROTOCOL_PREFIX};
use ocmt_core::data::{ContainerId, ContainerStatus};
use ocmt_storage::Storage;
use serde::Deserialize;

/// Proof that the request-maker is a known, non-suspended container: the
/// bearer gateway token matched the shared user table row named by the
/// `X-Container-Id` header.
pub struct ContainerAuthority {
    pub container_id: ContainerId,
}

/// Check a presented gateway token against the user table. Fails closed on
/// any mismatch and refuses suspended containers outright.
pub(crate) async fn authorize_container<S>(
    state: &RelayState<S>,
    container_id: ContainerId,
    gateway_token: &str,
) -> Result<ContainerAuthority, RelayError>
where
    S: Storage,
{
    let user = state
        .db
        .get_user(&container_id)
        .await
        .map_err(RelayError::Internal)?;

    match user {
        Some(user) if user.gateway_token == gateway_token => {
            if user.status == ContainerStatus::Suspended {
                return Err(RelayError::Suspended);
            }
            Ok(ContainerAuthority { container_id })
        }
        Some(_) => Err(RelayError::Unauthorized),
        None => Err(RelayError::Unauthorized),
    }
}

#[async_trait]
impl<S> FromRequestParts<RelayState<S>> for ContainerAuthority
where
    S: Storage + 'static,
{
    type Rejection = RelayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &RelayState<S>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| RelayError::Unauthorized)?;

        let container_id = parts
            .headers
            .get(headers::CONTAINER_ID)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(RelayError::Unauthorized)?;

        authorize_container(state, ContainerId::from(container_id), bearer.token()).await
    }
}

/// Credentials for a WebSocket subscription, carried in the
/// `Sec-WebSocket-Protocol` offer as `token.<base64(containerId:token)>`.
/// Query-parameter credentials are still accepted but deprecation-logged.
pub struct SubscriberAuthority {
    pub container_id: ContainerId,
}

#[derive(Deserialize)]
struct SubscribeQuery {
    token: Option<String>,
    #[serde(rename = "containerId")]
    container_id: Option<String>,
}

fn credentials_from_protocols(parts: &Parts) -> Option<(ContainerId, String)> {
    for header in parts.headers.get_all("sec-websocket-protocol") {
        let value = header.to_str().ok()?;
        for offered in value.split(',') {
            let Some(encoded) = offered.trim().strip_prefix(WS_TOKEN_PROTOCOL_PREFIX) else {
                continue;
            };
            // Padding is not legal in a subprotocol token, so clients send
            // the unpadded form; tolerate both
            let decoded = base64::engine::general_purpose::STANDARD_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (container_id, token) = decoded.split_once(':')?;
            return Some((ContainerId::from(container_id), token.to_string()));
        }
    }
    None
}

fn credentials_from_query(parts: &Parts) -> Option<(ContainerId, String)> {
    let query: SubscribeQuery = serde_urlencoded::from_str(parts.uri.query()?).ok()?;
    let container_id = query.container_id?;
    let token = query.token?;
    warn!(
        "Subscriber {} authenticated via deprecated query parameters; \
         use the Sec-WebSocket-Protocol token instead",
        container_id
    );
    Some((ContainerId::from(container_id), token))
}

#[async_trait]
impl<S> FromRequestParts<RelayState<S>> for SubscriberAuthority
where
    S: Storage + 'static,
{
    type Rejection = RelayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &RelayState<S>,
    ) -> Result<Self, Self::Rejection> {
        let (container_id, gateway_token) = credentials_from_protocols(parts)
            .or_else(|| credentials_from_query(parts))
            .ok_or(RelayError::Unauthorized)?;

        let authority = authorize_container(state, container_id, &gateway_token).await?;
        Ok(SubscriberAuthority {
            container_id: authority.container_id,
        })
    }
}
