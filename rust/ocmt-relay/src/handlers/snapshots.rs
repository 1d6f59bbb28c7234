use crate::{error::RelayError, extractors::ContainerAuthority, state::RelayState};
use axum::{
    extract::{Path, State},
    Json,
};
use ocmt_api::data::{
    DeletedResponse, ListSnapshotsResponse, SnapshotStoredResponse, SnapshotUpload,
};
use ocmt_core::{
    capability::{verify_snapshot, ListSnapshotsRequest},
    data::{CachedSnapshot, CapabilityId},
    time::now_seconds,
};
use ocmt_storage::Storage;

/// `POST /relay/snapshots` — pin an encrypted snapshot. The revocation gate
/// here fails closed: a storage error rejects the write rather than risking
/// a snapshot for a revoked capability.
pub async fn store_snapshot_route<S>(
    State(state): State<RelayState<S>>,
    _authority: ContainerAuthority,
    Json(upload): Json<SnapshotUpload>,
) -> Result<Json<SnapshotStoredResponse>, RelayError>
where
    S: Storage + 'static,
{
    if state
        .revocations
        .is_revoked_strict(&upload.capability_id)
        .await
        .map_err(RelayError::Internal)?
    {
        return Err(RelayError::InvalidCapability);
    }

    let snapshot = CachedSnapshot {
        capability_id: upload.capability_id,
        recipient_pub_key: upload.recipient_pub_key,
        issuer_pub_key: upload.issuer_pub_key,
        encrypted_data: upload.encrypted_data,
        ephemeral_pub_key: upload.ephemeral_pub_key,
        nonce: upload.nonce,
        tag: upload.tag,
        signature: upload.signature,
        created_at: now_seconds(),
        expires_at: upload.expires_at,
    };

    verify_snapshot(&snapshot, now_seconds()).map_err(|error| {
        debug!(
            "Rejected snapshot for {}: {}",
            snapshot.capability_id, error
        );
        RelayError::InvalidRequest("Snapshot did not verify".into())
    })?;

    let mut db = state.db.clone();
    db.upsert_snapshot(&snapshot)
        .await
        .map_err(RelayError::Internal)?;

    Ok(Json(SnapshotStoredResponse {
        stored: true,
        capability_id: snapshot.capability_id,
    }))
}

/// `GET /relay/snapshots/:capabilityId` — fetch a pinned snapshot. Revoked
/// capabilities read as absent, and their rows are deleted on sight.
pub async fn get_snapshot_route<S>(
    State(state): State<RelayState<S>>,
    _authority: ContainerAuthority,
    Path(capability_id): Path<String>,
) -> Result<Json<CachedSnapshot>, RelayError>
where
    S: Storage + 'static,
{
    let capability_id = CapabilityId::from(capability_id);

    if state
        .revocations
        .is_revoked_strict(&capability_id)
        .await
        .map_err(RelayError::Internal)?
    {
        let mut db = state.db.clone();
        if let Err(error) = db.delete_snapshot(&capability_id).await {
            warn!("Could not drop revoked snapshot {}: {}", capability_id, error);
        }
        return Err(RelayError::NotFound);
    }

    let snapshot = state
        .db
        .get_snapshot(&capability_id)
        .await
        .map_err(RelayError::Internal)?
        .ok_or(RelayError::NotFound)?;

    Ok(Json(snapshot))
}

/// `DELETE /relay/snapshots/:capabilityId` — explicit deletion. The caller
/// must be registered with the issuer or recipient key of the snapshot;
/// everything else reads as absent to avoid existence probing.
pub async fn delete_snapshot_route<S>(
    State(state): State<RelayState<S>>,
    authority: ContainerAuthority,
    Path(capability_id): Path<String>,
) -> Result<Json<DeletedResponse>, RelayError>
where
    S: Storage + 'static,
{
    let capability_id = CapabilityId::from(capability_id);

    let snapshot = state
        .db
        .get_snapshot(&capability_id)
        .await
        .map_err(RelayError::Internal)?
        .ok_or(RelayError::NotFound)?;

    let registration = state
        .db
        .get_registration(&authority.container_id)
        .await
        .map_err(RelayError::Internal)?;
    let owns = registration
        .map(|record| {
            record.signing_pub_key == snapshot.issuer_pub_key
                || record.signing_pub_key == snapshot.recipient_pub_key
        })
        .unwrap_or(false);
    if !owns {
        return Err(RelayError::NotFound);
    }

    let mut db = state.db.clone();
    let deleted = db
        .delete_snapshot(&capability_id)
        .await
        .map_err(RelayError::Internal)?;

    Ok(Json(DeletedResponse { deleted }))
}

/// `POST /relay/snapshots/list` — list snapshots held for a recipient key.
/// The request itself must be signed by that key; rows whose capability has
/// been revoked are deleted on sight and omitted.
pub async fn list_snapshots_route<S>(
    State(state): State<RelayState<S>>,
    _authority: ContainerAuthority,
    Json(request): Json<ListSnapshotsRequest>,
) -> Result<Json<ListSnapshotsResponse>, RelayError>
where
    S: Storage + 'static,
{
    request.verify(now_seconds()).map_err(|error| {
        debug!("Rejected snapshot list request: {}", error);
        RelayError::InvalidRequest("List request did not verify".into())
    })?;

    let rows = state
        .db
        .list_snapshots_by_recipient(&request.recipient_public_key)
        .await
        .map_err(RelayError::Internal)?;

    let mut snapshots = Vec::new();
    for snapshot in rows {
        if state
            .revocations
            .is_revoked_strict(&snapshot.capability_id)
            .await
            .map_err(RelayError::Internal)?
        {
            let mut db = state.db.clone();
            if let Err(error) = db.delete_snapshot(&snapshot.capability_id).await {
                warn!(
                    "Could not drop revoked snapshot {}: {}",
                    snapshot.capability_id, error
                );
            }
            continue;
        }
        snapshots.push(snapshot);
    }

    Ok(Json(ListSnapshotsResponse {
        count: snapshots.len(),
        snapshots,
    }))
}
