use crate::{
    audit::{AuditWriter, HttpMeshAuditSink, MeshAuditSink, NullMeshAuditSink},
    config::RelayConfiguration,
    delivery::{AgentServerClient, CallbackForwarder, ConnectionRegistry},
    rate_limit::{RateLimiters, SharedCounterStore},
    revocation::RevocationIndex,
};
use anyhow::Result;
use ocmt_storage::{RelayDb, Storage};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Every shared construct a request handler or background worker can touch,
/// threaded explicitly through axum state rather than living in globals.
#[derive(Clone)]
pub struct RelayState<S>
where
    S: Storage,
{
    pub db: RelayDb<S>,
    pub connections: ConnectionRegistry,
    pub revocations: RevocationIndex<S>,
    pub limiters: Arc<RateLimiters>,
    pub forwarder: CallbackForwarder,
    pub agent: Option<AgentServerClient>,
    pub audit: AuditWriter<S>,
    pub configuration: Arc<RelayConfiguration>,
    pub started_at: Instant,
}

impl<S> RelayState<S>
where
    S: Storage + 'static,
{
    /// Assemble the relay over a storage backend: prime the revocation
    /// index, build the delivery clients, and wire the audit sinks.
    pub async fn new(storage: &S, configuration: RelayConfiguration) -> Result<Self> {
        Self::with_shared_counters(storage, configuration, None).await
    }

    /// [RelayState::new], with an externally-provided shared counter store
    /// for cross-process rate limiting
    pub async fn with_shared_counters(
        storage: &S,
        configuration: RelayConfiguration,
        shared_counters: Option<Arc<dyn SharedCounterStore>>,
    ) -> Result<Self> {
        let db = RelayDb::new(storage).await?;
        let revocations = RevocationIndex::load(db.clone()).await?;

        let mesh: Arc<dyn MeshAuditSink> = match &configuration.mesh_audit_url {
            Some(endpoint) => Arc::new(HttpMeshAuditSink::new(endpoint.clone())?),
            None => Arc::new(NullMeshAuditSink),
        };

        let agent = match configuration.agent_server()? {
            Some((url, token)) => Some(AgentServerClient::new(url, token)?),
            None => {
                warn!("No agent server configured; wake-on-arrival is disabled");
                None
            }
        };

        let limiters = Arc::new(RateLimiters::new(
            configuration.messages_per_minute,
            configuration.requests_per_hour,
            shared_counters,
        ));

        let forwarder = CallbackForwarder::new(
            Duration::from_millis(configuration.forward_timeout_ms),
            configuration.forward_max_retries,
        )?;

        Ok(RelayState {
            audit: AuditWriter::new(db.clone(), mesh),
            db,
            connections: ConnectionRegistry::default(),
            revocations,
            limiters,
            forwarder,
            agent,
            configuration: Arc::new(configuration),
            started_at: Instant::now(),
        })
    }
}
