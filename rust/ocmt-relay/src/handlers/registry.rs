use crate::{
    delivery::validate_callback_url, error::RelayError, extractors::ContainerAuthority,
    state::RelayState,
};
use axum::{
    extract::{Path, State},
    Json,
};
use base64::Engine;
use ocmt_api::data::{
    DeletedResponse, LookupBody, RegisterBody, RegistrationView, UpdateRegistrationBody,
};
use ocmt_core::{
    authority::{pub_key_hash, Ed25519KeyMaterial, PUB_KEY_HASH_LENGTH},
    data::RegistryRecord,
    time::now_seconds,
};
use ocmt_storage::Storage;

fn view(record: RegistryRecord) -> RegistrationView {
    RegistrationView {
        container_id: record.container_id,
        signing_pub_key: record.signing_pub_key,
        encryption_pub_key: record.encryption_pub_key,
        pub_key_hash: record.pub_key_hash,
        registered_at: record.created_at,
    }
}

/// `POST /relay/registry/register` — create or replace the caller's
/// registration after an Ed25519 challenge-response proves possession of the
/// signing key. The discovery hash is always recomputed server-side.
pub async fn register_route<S>(
    State(state): State<RelayState<S>>,
    authority: ContainerAuthority,
    Json(body): Json<RegisterBody>,
) -> Result<Json<RegistrationView>, RelayError>
where
    S: Storage + 'static,
{
    if body.container_id != authority.container_id {
        return Err(RelayError::InvalidRequest(
            "Registration container id must match the authenticated container".into(),
        ));
    }

    let key = Ed25519KeyMaterial::from_base64_public_key(&body.signing_pub_key)
        .map_err(|_| RelayError::InvalidRequest("signingPubKey must be a 32-byte Ed25519 key".into()))?;

    let signature = base64::engine::general_purpose::STANDARD
        .decode(&body.signature)
        .map_err(|_| RelayError::InvalidRequest("signature must be base64".into()))?;
    key.verify(body.challenge.as_bytes(), &signature)
        .map_err(|_| RelayError::InvalidRequest("Challenge signature did not verify".into()))?;

    if let Some(callback_url) = &body.callback_url {
        validate_callback_url(callback_url)
            .map_err(|error| RelayError::InvalidRequest(error.to_string()))?;
    }

    let now = now_seconds();
    let created_at = match state
        .db
        .get_registration(&authority.container_id)
        .await
        .map_err(RelayError::Internal)?
    {
        Some(existing) => existing.created_at,
        None => now,
    };

    let record = RegistryRecord {
        container_id: authority.container_id,
        pub_key_hash: pub_key_hash(&key.public_key_bytes()),
        signing_pub_key: body.signing_pub_key,
        encryption_pub_key: body.encryption_pub_key,
        callback_url: body.callback_url,
        created_at,
        updated_at: now,
    };

    let mut db = state.db.clone();
    db.upsert_registration(&record)
        .await
        .map_err(RelayError::Internal)?;

    info!("Registered container {}", record.container_id);
    Ok(Json(view(record)))
}

/// `PATCH /relay/registry/update` — adjust the mutable parts of a
/// registration; key changes go through register with a fresh challenge
pub async fn update_registration_route<S>(
    State(state): State<RelayState<S>>,
    authority: ContainerAuthority,
    Json(body): Json<UpdateRegistrationBody>,
) -> Result<Json<RegistrationView>, RelayError>
where
    S: Storage + 'static,
{
    let mut record = state
        .db
        .get_registration(&authority.container_id)
        .await
        .map_err(RelayError::Internal)?
        .ok_or(RelayError::NotFound)?;

    if let Some(encryption_pub_key) = body.encryption_pub_key {
        record.encryption_pub_key = Some(encryption_pub_key);
    }
    if let Some(callback_url) = body.callback_url {
        validate_callback_url(&callback_url)
            .map_err(|error| RelayError::InvalidRequest(error.to_string()))?;
        record.callback_url = Some(callback_url);
    } else if body.clear_callback_url {
        record.callback_url = None;
    }
    record.updated_at = now_seconds();

    let mut db = state.db.clone();
    db.upsert_registration(&record)
        .await
        .map_err(RelayError::Internal)?;

    Ok(Json(view(record)))
}

/// `GET /relay/registry` — the caller's own registration, callback URL
/// included; only lookups by third parties hide it
pub async fn registration_route<S>(
    State(state): State<RelayState<S>>,
    authority: ContainerAuthority,
) -> Result<Json<RegistryRecord>, RelayError>
where
    S: Storage + 'static,
{
    let record = state
        .db
        .get_registration(&authority.container_id)
        .await
        .map_err(RelayError::Internal)?
        .ok_or(RelayError::NotFound)?;
    Ok(Json(record))
}

/// `DELETE /relay/registry`
pub async fn unregister_route<S>(
    State(state): State<RelayState<S>>,
    authority: ContainerAuthority,
) -> Result<Json<DeletedResponse>, RelayError>
where
    S: Storage + 'static,
{
    let mut db = state.db.clone();
    let deleted = db
        .delete_registration(&authority.container_id)
        .await
        .map_err(RelayError::Internal)?;
    Ok(Json(DeletedResponse { deleted }))
}

/// `GET /relay/registry/lookup/:publicKeyHash` — discovery by the
/// 32-hex-character signing key hash
pub async fn lookup_by_hash_route<S>(
    State(state): State<RelayState<S>>,
    _authority: ContainerAuthority,
    Path(public_key_hash): Path<String>,
) -> Result<Json<RegistrationView>, RelayError>
where
    S: Storage + 'static,
{
    let public_key_hash = public_key_hash.to_ascii_lowercase();
    if public_key_hash.len() != PUB_KEY_HASH_LENGTH
        || !public_key_hash.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(RelayError::InvalidRequest(format!(
            "publicKeyHash must be {} hex characters",
            PUB_KEY_HASH_LENGTH
        )));
    }

    let record = state
        .db
        .find_registration_by_hash(&public_key_hash)
        .await
        .map_err(RelayError::Internal)?
        .ok_or(RelayError::NotFound)?;
    Ok(Json(view(record)))
}

/// `POST /relay/registry/lookup` — discovery by full signing key
pub async fn lookup_route<S>(
    State(state): State<RelayState<S>>,
    _authority: ContainerAuthority,
    Json(body): Json<LookupBody>,
) -> Result<Json<RegistrationView>, RelayError>
where
    S: Storage + 'static,
{
    let key = Ed25519KeyMaterial::from_base64_public_key(&body.public_key)
        .map_err(|_| RelayError::InvalidRequest("publicKey must be a 32-byte Ed25519 key".into()))?;

    let record = state
        .db
        .find_registration_by_hash(&pub_key_hash(&key.public_key_bytes()))
        .await
        .map_err(RelayError::Internal)?
        // The hash is a truncation; confirm the full key before answering
        .filter(|record| record.signing_pub_key == body.public_key)
        .ok_or(RelayError::NotFound)?;

    Ok(Json(view(record)))
}
