//! Audit plumbing: the append-only relay audit log (metadata only, never
//! payload bytes) and the mesh audit stream shared with the management
//! server.

use anyhow::Result;
use async_trait::async_trait;
use ocmt_core::data::{AuditRecord, MeshAuditEvent};
use ocmt_storage::{RelayDb, Storage};
use std::sync::Arc;
use url::Url;

/// A destination for capability-relevant events outside the relay's own log
#[async_trait]
pub trait MeshAuditSink: Send + Sync {
    async fn record(&self, event: MeshAuditEvent) -> Result<()>;
}

/// Posts mesh events to the shared audit endpoint of the management server
pub struct HttpMeshAuditSink {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpMeshAuditSink {
    pub fn new(endpoint: Url) -> Result<Self> {
        Ok(HttpMeshAuditSink {
            endpoint,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()?,
        })
    }
}

#[async_trait]
impl MeshAuditSink for HttpMeshAuditSink {
    async fn record(&self, event: MeshAuditEvent) -> Result<()> {
        self.client
            .post(self.endpoint.clone())
            .json(&event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Logs mesh events locally; used by development relays and tests
pub struct NullMeshAuditSink;

#[async_trait]
impl MeshAuditSink for NullMeshAuditSink {
    async fn record(&self, event: MeshAuditEvent) -> Result<()> {
        debug!("Mesh audit ({}): {:?}", event.action, event.capability_id);
        Ok(())
    }
}

/// Writes relay audit rows and forwards mesh events. Auditing never fails a
/// request: write errors are logged and swallowed.
#[derive(Clone)]
pub struct AuditWriter<S>
where
    S: Storage,
{
    db: RelayDb<S>,
    mesh: Arc<dyn MeshAuditSink>,
}

impl<S> AuditWriter<S>
where
    S: Storage + 'static,
{
    pub fn new(db: RelayDb<S>, mesh: Arc<dyn MeshAuditSink>) -> Self {
        AuditWriter { db, mesh }
    }

    /// Append one row to `relay_audit_log`
    pub async fn record(&self, record: AuditRecord) {
        let mut db = self.db.clone();
        if let Err(error) = db.append_audit(&record).await {
            error!("Could not append audit record: {}", error);
        }
    }

    /// Dispatch a mesh event without blocking the request path
    pub fn mesh(&self, event: MeshAuditEvent) {
        let mesh = self.mesh.clone();
        tokio::spawn(async move {
            let action = event.action;
            if let Err(error) = mesh.record(event).await {
                warn!("Mesh audit dispatch of {} failed: {}", action, error);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocmt_core::data::{AuditStatus, ContainerId};
    use ocmt_storage::MemoryStorage;

    #[tokio::test]
    async fn records_land_in_the_audit_table() {
        let db = RelayDb::new(&MemoryStorage::default()).await.unwrap();
        let audit = AuditWriter::new(db.clone(), Arc::new(NullMeshAuditSink));

        audit
            .record(AuditRecord {
                timestamp: 42,
                from: ContainerId::from("a"),
                to: ContainerId::from("b"),
                size: 10,
                status: AuditStatus::Queued,
                error_message: None,
            })
            .await;

        let rows = db.recent_audit(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, AuditStatus::Queued);
    }
}
