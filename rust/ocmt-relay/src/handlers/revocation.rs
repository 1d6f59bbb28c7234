use crate::{error::RelayError, extractors::ContainerAuthority, state::RelayState};
use axum::{
    extract::{Path, State},
    Json,
};
use ocmt_api::data::{
    CheckRevocationsBody, CheckRevocationsResponse, RevocationStatusResponse, RevokeResponse,
    MAX_REVOCATION_CHECK_BATCH,
};
use ocmt_core::capability::RevocationRequest;
use ocmt_core::data::CapabilityId;
use ocmt_storage::Storage;

/// `POST /relay/revoke` — apply a signed revocation envelope
pub async fn revoke_route<S>(
    State(state): State<RelayState<S>>,
    _authority: ContainerAuthority,
    Json(request): Json<RevocationRequest>,
) -> Result<Json<RevokeResponse>, RelayError>
where
    S: Storage + 'static,
{
    let (_, record) = state
        .revocations
        .revoke(&request, &state.audit)
        .await
        .map_err(|error| {
            debug!("Rejected revocation of {}: {}", request.capability_id, error);
            RelayError::InvalidRequest("Revocation envelope did not verify".into())
        })?;

    Ok(Json(RevokeResponse {
        revoked: true,
        capability_id: record.capability_id,
    }))
}

/// `GET /relay/revocation/:capabilityId` — interactive check; answers from
/// the fastest layer that can and fails open on storage trouble
pub async fn revocation_status_route<S>(
    State(state): State<RelayState<S>>,
    _authority: ContainerAuthority,
    Path(capability_id): Path<String>,
) -> Result<Json<RevocationStatusResponse>, RelayError>
where
    S: Storage + 'static,
{
    let check = state
        .revocations
        .is_revoked(&CapabilityId::from(capability_id))
        .await;

    let record = check.record;
    Ok(Json(RevocationStatusResponse {
        revoked: check.revoked,
        revoked_at: record.as_ref().map(|record| record.revoked_at),
        revoked_by: record.as_ref().map(|record| record.issuer_pub_key.clone()),
        reason: record.and_then(|record| record.reason),
        source: check.source,
        warning: check.warning,
    }))
}

/// `POST /relay/check-revocations` — batch form of the interactive check
pub async fn check_revocations_route<S>(
    State(state): State<RelayState<S>>,
    _authority: ContainerAuthority,
    Json(body): Json<CheckRevocationsBody>,
) -> Result<Json<CheckRevocationsResponse>, RelayError>
where
    S: Storage + 'static,
{
    if body.capability_ids.len() > MAX_REVOCATION_CHECK_BATCH {
        return Err(RelayError::InvalidRequest(format!(
            "At most {} capability ids per check",
            MAX_REVOCATION_CHECK_BATCH
        )));
    }

    let revoked = state.revocations.batch_check(&body.capability_ids).await;
    Ok(Json(CheckRevocationsResponse { revoked }))
}
