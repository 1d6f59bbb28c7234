use crate::{
    delivery,
    error::{insert_rate_limit_headers, RelayError},
    extractors::ContainerAuthority,
    state::RelayState,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use ocmt_api::data::{
    AckBody, AckResponse, CapabilityExecutionEnvelope, ForwardBody, PendingMessage,
    PendingMessagesResponse, PendingQuery, RateLimitInfo, SendBody, SendResponse,
    MAX_ACK_BATCH, MAX_PAYLOAD_BYTES,
};
use ocmt_core::{
    capability::CapabilityToken,
    data::{
        AuditRecord, AuditStatus, ContainerId, MeshAuditAction, MeshAuditEvent, Message,
    },
    time::{now_millis, now_seconds},
};
use ocmt_storage::Storage;
use uuid::Uuid;

const DEFAULT_PENDING_LIMIT: usize = 100;
const MAX_PENDING_LIMIT: usize = 1000;

/// `POST /relay/send` — the bare channel between mutually-trusting containers
pub async fn send_route<S>(
    State(state): State<RelayState<S>>,
    authority: ContainerAuthority,
    Json(body): Json<SendBody>,
) -> Result<impl IntoResponse, RelayError>
where
    S: Storage + 'static,
{
    let from = authority.container_id;
    let to = body.to_container_id;
    let size = body.payload.len() as u64;

    let rate_limit = enforce_message_limits(&state, &from, &to, size).await?;
    check_payload_size(&state, &from, &to, size).await?;

    let (response, _) = dispatch(&state, from, to, body.payload, rate_limit).await?;
    Ok(respond_with_rate_headers(response, rate_limit))
}

/// `POST /relay/forward` — the capability-gated channel. The relay verifies
/// token signature, expiry and revocation state, then forwards the
/// `capability_execution` envelope untouched.
pub async fn forward_route<S>(
    State(state): State<RelayState<S>>,
    authority: ContainerAuthority,
    Json(body): Json<ForwardBody>,
) -> Result<impl IntoResponse, RelayError>
where
    S: Storage + 'static,
{
    let from = authority.container_id;
    let to = body.to_container_id.clone();
    let size = body.encrypted_payload.len() as u64;

    let rate_limit = enforce_message_limits(&state, &from, &to, size).await?;
    check_payload_size(&state, &from, &to, size).await?;

    // Malformed, unsigned, expired and revoked all collapse to the same 403
    let Some(token) = CapabilityToken::decode(&body.capability_token) else {
        return Err(deny_capability(&state, &from, &to, size, None).await);
    };
    if state.revocations.is_revoked(&token.id).await.revoked {
        return Err(deny_capability(&state, &from, &to, size, Some(&token)).await);
    }

    let envelope = CapabilityExecutionEnvelope {
        kind: "capability_execution".into(),
        capability_token: body.capability_token,
        encrypted_payload: body.encrypted_payload,
        nonce: body.nonce,
        signature: body.signature,
    };
    let payload = serde_json::to_string(&envelope).map_err(anyhow::Error::from)?;

    let (response, _) = dispatch(&state, from.clone(), to.clone(), payload, rate_limit).await?;

    state.audit.mesh(
        MeshAuditEvent::new(MeshAuditAction::CapabilityUsed, now_seconds())
            .for_capability(&token.id)
            .for_container(&from),
    );
    state.audit.mesh(
        MeshAuditEvent::new(MeshAuditAction::RelayMessageForwarded, now_seconds())
            .for_capability(&token.id)
            .for_container(&to),
    );

    Ok(respond_with_rate_headers(response, rate_limit))
}

/// `GET /relay/messages/pending?limit=&ack=` — poll the queue, optionally
/// acknowledging ids in passing
pub async fn pending_route<S>(
    State(state): State<RelayState<S>>,
    authority: ContainerAuthority,
    Query(query): Query<PendingQuery>,
) -> Result<Json<PendingMessagesResponse>, RelayError>
where
    S: Storage + 'static,
{
    if let Some(ack) = &query.ack {
        for id in ack.split(',').map(str::trim).filter(|id| !id.is_empty()) {
            acknowledge(&state, &authority.container_id, id).await;
        }
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PENDING_LIMIT)
        .min(MAX_PENDING_LIMIT);
    let messages = state
        .db
        .list_pending(&authority.container_id, limit)
        .await
        .map_err(RelayError::Internal)?;

    Ok(Json(PendingMessagesResponse {
        count: messages.len(),
        messages: messages
            .into_iter()
            .map(|message| PendingMessage {
                id: message.id,
                from: message.from,
                payload: message.payload,
                size: message.size,
                timestamp: message.created_at,
            })
            .collect(),
    }))
}

/// `POST /relay/messages/ack` — idempotent batch acknowledgement
pub async fn ack_route<S>(
    State(state): State<RelayState<S>>,
    authority: ContainerAuthority,
    Json(body): Json<AckBody>,
) -> Result<Json<AckResponse>, RelayError>
where
    S: Storage + 'static,
{
    if body.message_ids.len() > MAX_ACK_BATCH {
        return Err(RelayError::InvalidRequest(format!(
            "At most {} message ids per acknowledgement",
            MAX_ACK_BATCH
        )));
    }

    let mut acknowledged = 0;
    for id in &body.message_ids {
        if acknowledge(&state, &authority.container_id, id).await {
            acknowledged += 1;
        }
    }

    Ok(Json(AckResponse { acknowledged }))
}

/// Mark one message delivered if it is addressed to `container_id` and still
/// pending. Duplicate and foreign ids are a quiet no-op.
pub(crate) async fn acknowledge<S>(
    state: &RelayState<S>,
    container_id: &ContainerId,
    message_id: &str,
) -> bool
where
    S: Storage,
{
    let owned = match state.db.get_message(message_id).await {
        Ok(Some(message)) => &message.to == container_id,
        Ok(None) => false,
        Err(error) => {
            warn!("Could not look up message {}: {}", message_id, error);
            false
        }
    };
    if !owned {
        return false;
    }

    let mut db = state.db.clone();
    match db.mark_delivered(message_id, now_millis()).await {
        Ok(marked) => marked,
        Err(error) => {
            warn!("Could not acknowledge message {}: {}", message_id, error);
            false
        }
    }
}

/// Both message limiters in order: the shared-store minute window, then the
/// DB-backed long window. The long counter fails open.
async fn enforce_message_limits<S>(
    state: &RelayState<S>,
    from: &ContainerId,
    to: &ContainerId,
    size: u64,
) -> Result<RateLimitInfo, RelayError>
where
    S: Storage + 'static,
{
    let now = now_millis();
    let decision = state.limiters.messages.check(from, now).await;
    if !decision.allowed {
        audit(state, from, to, size, AuditStatus::RateLimited, None).await;
        return Err(RelayError::RateLimited {
            retry_after_seconds: decision.retry_after_seconds,
            info: decision.info,
        });
    }

    let window_ms = state.configuration.rate_limit_window_ms;
    let window_start = now - (now % window_ms);
    let mut db = state.db.clone();
    match db.increment_rate_window(from, window_start).await {
        Ok(count) if count > state.configuration.messages_per_hour => {
            audit(state, from, to, size, AuditStatus::RateLimited, None).await;
            Err(RelayError::RateLimited {
                retry_after_seconds: (window_start + window_ms)
                    .saturating_sub(now)
                    .div_ceil(1000),
                info: RateLimitInfo {
                    limit: state.configuration.messages_per_hour,
                    remaining: 0,
                    reset: (window_start + window_ms) / 1000,
                },
            })
        }
        Ok(_) => Ok(decision.info),
        Err(error) => {
            warn!("DB-backed rate counter failed for {}: {}", from, error);
            Ok(decision.info)
        }
    }
}

async fn check_payload_size<S>(
    state: &RelayState<S>,
    from: &ContainerId,
    to: &ContainerId,
    size: u64,
) -> Result<(), RelayError>
where
    S: Storage + 'static,
{
    if size as usize > MAX_PAYLOAD_BYTES {
        audit(
            state,
            from,
            to,
            size,
            AuditStatus::Error,
            Some("payload too large".into()),
        )
        .await;
        return Err(RelayError::PayloadTooLarge);
    }
    Ok(())
}

/// The shared tail of `send` and `forward`: persist, attempt delivery, audit
/// the outcome, shape the response
async fn dispatch<S>(
    state: &RelayState<S>,
    from: ContainerId,
    to: ContainerId,
    payload: String,
    rate_limit: RateLimitInfo,
) -> Result<(SendResponse, AuditStatus), RelayError>
where
    S: Storage + 'static,
{
    let size = payload.len() as u64;

    let recipient = state
        .db
        .get_user(&to)
        .await
        .map_err(RelayError::Internal)?;
    if recipient.is_none() {
        audit(state, &from, &to, size, AuditStatus::InvalidDestination, None).await;
        return Err(RelayError::NotFound);
    }

    let message = Message::queued(
        Uuid::new_v4().to_string(),
        from.clone(),
        to.clone(),
        payload,
        now_millis(),
    );

    let mut db = state.db.clone();
    db.insert_message(&message)
        .await
        .map_err(RelayError::Internal)?;

    let outcome = delivery::deliver(
        &mut db,
        &state.connections,
        &state.forwarder,
        state.agent.as_ref(),
        &message,
    )
    .await;

    audit(state, &from, &to, size, outcome.audit_status, None).await;

    Ok((
        SendResponse {
            message_id: message.id,
            status: outcome.status,
            delivery_method: outcome.method,
            wake_triggered: outcome.wake_triggered,
            rate_limit,
        },
        outcome.audit_status,
    ))
}

/// Reject a forward for capability reasons: one audit row, one mesh event,
/// one indistinct 403
async fn deny_capability<S>(
    state: &RelayState<S>,
    from: &ContainerId,
    to: &ContainerId,
    size: u64,
    token: Option<&CapabilityToken>,
) -> RelayError
where
    S: Storage + 'static,
{
    audit(state, from, to, size, AuditStatus::InvalidCapability, None).await;

    let mut event = MeshAuditEvent::new(MeshAuditAction::CapabilityDenied, now_seconds())
        .for_container(from);
    if let Some(token) = token {
        event = event.for_capability(&token.id);
    }
    state.audit.mesh(event);

    RelayError::InvalidCapability
}

async fn audit<S>(
    state: &RelayState<S>,
    from: &ContainerId,
    to: &ContainerId,
    size: u64,
    status: AuditStatus,
    error_message: Option<String>,
) where
    S: Storage + 'static,
{
    state
        .audit
        .record(AuditRecord {
            timestamp: now_millis(),
            from: from.clone(),
            to: to.clone(),
            size,
            status,
            error_message,
        })
        .await;
}

fn respond_with_rate_headers(
    response: SendResponse,
    rate_limit: RateLimitInfo,
) -> axum::response::Response {
    let mut response = (StatusCode::OK, Json(response)).into_response();
    insert_rate_limit_headers(response.headers_mut(), &rate_limit);
    response
}
