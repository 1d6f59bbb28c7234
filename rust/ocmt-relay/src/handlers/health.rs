use crate::{error::RelayError, state::RelayState};
use axum::{extract::State, Json};
use ocmt_api::data::{HealthCounters, HealthResponse};
use ocmt_storage::Storage;

/// `GET /relay/health` — liveness plus coarse counters; unauthenticated
pub async fn health_route<S>(
    State(state): State<RelayState<S>>,
) -> Result<Json<HealthResponse>, RelayError>
where
    S: Storage + 'static,
{
    Ok(Json(HealthResponse {
        status: "ok".into(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        counters: HealthCounters {
            pending_messages: state
                .db
                .count_pending_messages()
                .await
                .map_err(RelayError::Internal)?,
            registered_containers: state
                .db
                .count_registrations()
                .await
                .map_err(RelayError::Internal)?,
            live_connections: state.connections.connection_count().await,
            revocations: state
                .db
                .count_revocations()
                .await
                .map_err(RelayError::Internal)?,
        },
    }))
}
