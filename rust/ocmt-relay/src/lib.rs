//! The OCMT zero-knowledge message relay: containers exchange opaque
//! encrypted payloads through an HTTP + WebSocket surface while the relay
//! enforces capability revocation, rate limits and delivery fallbacks
//! without ever being able to read a byte of content.

#[macro_use]
extern crate tracing;

mod audit;
mod config;
mod delivery;
mod error;
mod extractors;
mod handlers;
mod rate_limit;
mod revocation;
mod state;
mod worker;

pub use audit::*;
pub use config::*;
pub use delivery::*;
pub use error::*;
pub use rate_limit::*;
pub use revocation::*;
pub use state::*;
pub use worker::*;

use anyhow::Result;
use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Request, State},
    http::{HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use ocmt_api::{data::MAX_BODY_BYTES, route::Route};
use ocmt_core::time::now_millis;
use ocmt_storage::Storage;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Assemble the full relay router over the given state. Kept separate from
/// [start_relay] so tests can drive it without a listener.
pub fn relay_router<S>(state: RelayState<S>) -> Router
where
    S: Storage + 'static,
{
    Router::new()
        .route(&Route::Send.to_string(), post(handlers::send_route::<S>))
        .route(&Route::Forward.to_string(), post(handlers::forward_route::<S>))
        .route(
            &Route::PendingMessages.to_string(),
            get(handlers::pending_route::<S>),
        )
        .route(&Route::AckMessages.to_string(), post(handlers::ack_route::<S>))
        .route(&Route::Revoke.to_string(), post(handlers::revoke_route::<S>))
        .route(
            &Route::RevocationStatus(None).to_string(),
            get(handlers::revocation_status_route::<S>),
        )
        .route(
            &Route::CheckRevocations.to_string(),
            post(handlers::check_revocations_route::<S>),
        )
        .route(
            &Route::Snapshots.to_string(),
            post(handlers::store_snapshot_route::<S>),
        )
        .route(
            &Route::Snapshot(None).to_string(),
            get(handlers::get_snapshot_route::<S>)
                .delete(handlers::delete_snapshot_route::<S>),
        )
        .route(
            &Route::ListSnapshots.to_string(),
            post(handlers::list_snapshots_route::<S>),
        )
        .route(&Route::Register.to_string(), post(handlers::register_route::<S>))
        .route(
            &Route::UpdateRegistration.to_string(),
            patch(handlers::update_registration_route::<S>),
        )
        .route(
            &Route::Registration.to_string(),
            get(handlers::registration_route::<S>)
                .delete(handlers::unregister_route::<S>),
        )
        .route(
            &Route::LookupByHash(None).to_string(),
            get(handlers::lookup_by_hash_route::<S>),
        )
        .route(&Route::Lookup.to_string(), post(handlers::lookup_route::<S>))
        .route(&Route::Health.to_string(), get(handlers::health_route::<S>))
        .route(&Route::Subscribe.to_string(), get(handlers::subscribe_route::<S>))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            general_rate_limit::<S>,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(&state.configuration.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS from the explicit allow-list. An empty list allows no cross-origin
/// caller; there is no wildcard fallback.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparseable allowed origin {:?}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_headers(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
}

/// The coarse per-address limiter in front of every route
async fn general_rate_limit<S>(
    State(state): State<RelayState<S>>,
    ConnectInfo(address): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response
where
    S: Storage + 'static,
{
    let decision = state
        .limiters
        .general
        .check(&address.ip().to_string(), now_millis())
        .await;

    if !decision.allowed {
        return RelayError::RateLimited {
            retry_after_seconds: decision.retry_after_seconds,
            info: decision.info,
        }
        .into_response();
    }

    next.run(request).await
}

/// Start the OCMT relay: spawn the sweepers and serve until the listener
/// closes. Pending work beyond the accept loop is not drained on shutdown;
/// at-least-once delivery covers the gap.
pub async fn start_relay<S>(listener: TcpListener, state: RelayState<S>) -> Result<()>
where
    S: Storage + 'static,
{
    let (_sweep_tx, sweep_task) = start_sweepers(state.clone());

    let app = relay_router(state);

    info!(
        "OCMT relay listening on {}",
        listener
            .local_addr()
            .map(|address| address.to_string())
            .unwrap_or_else(|_| "unknown address".into())
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received; draining the accept loop");
    })
    .await?;

    sweep_task.abort();

    Ok(())
}
