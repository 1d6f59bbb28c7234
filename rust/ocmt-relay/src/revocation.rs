//! The capability revocation index: a process-local Bloom filter and FIFO
//! cache in front of the authoritative persistent table.
//!
//! The two read paths deliberately disagree about failure. Interactive
//! checks fail open — a container replaying an already-delivered capability
//! should not be blocked by a storage hiccup. Snapshot writes and reads fail
//! closed — handing out material for a possibly-revoked capability is worse
//! than a transient 5xx.

use crate::audit::AuditWriter;
use anyhow::Result;
use ocmt_api::data::RevocationSource;
use ocmt_core::{
    bloom::RevocationBloom,
    capability::RevocationRequest,
    data::{CapabilityId, MeshAuditAction, MeshAuditEvent, RevocationRecord},
    time::now_seconds,
};
use ocmt_storage::{RelayDb, Storage};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::sync::{Mutex, RwLock};

/// Cap on advisory cache entries; eviction is FIFO by insertion order, which
/// is acceptable because the cache is advisory
const CACHE_CAPACITY: usize = 10_000;

/// Result of a revocation lookup, tagged with the layer that answered it
#[derive(Clone, Debug)]
pub struct RevocationCheck {
    pub revoked: bool,
    pub record: Option<RevocationRecord>,
    pub source: RevocationSource,
    pub warning: Option<String>,
}

#[derive(Clone, Debug)]
struct CachedCheck {
    record: Option<RevocationRecord>,
}

#[derive(Default)]
struct FifoCache {
    entries: HashMap<CapabilityId, CachedCheck>,
    order: VecDeque<CapabilityId>,
}

impl FifoCache {
    fn get(&self, capability_id: &CapabilityId) -> Option<&CachedCheck> {
        self.entries.get(capability_id)
    }

    fn insert(&mut self, capability_id: CapabilityId, check: CachedCheck) {
        if !self.entries.contains_key(&capability_id) {
            self.order.push_back(capability_id.clone());
            if self.order.len() > CACHE_CAPACITY {
                if let Some(evicted) = self.order.pop_front() {
                    self.entries.remove(&evicted);
                }
            }
        }
        self.entries.insert(capability_id, check);
    }
}

/// The layered revocation service shared by every handler
#[derive(Clone)]
pub struct RevocationIndex<S>
where
    S: Storage,
{
    db: RelayDb<S>,
    bloom: Arc<RwLock<RevocationBloom>>,
    cache: Arc<Mutex<FifoCache>>,
}

impl<S> RevocationIndex<S>
where
    S: Storage + 'static,
{
    /// Build the index, priming the Bloom filter from the authoritative
    /// table. A crash between a persisted revoke and its Bloom insert is
    /// recovered right here on the next startup.
    pub async fn load(db: RelayDb<S>) -> Result<Self> {
        let index = RevocationIndex {
            db,
            bloom: Arc::new(RwLock::new(RevocationBloom::default())),
            cache: Arc::new(Mutex::new(FifoCache::default())),
        };
        index.rebuild_bloom().await?;
        Ok(index)
    }

    /// Reconstruct the Bloom filter from the persistent table; called at
    /// startup and after the expiry sweep (bits are never cleared in place)
    pub async fn rebuild_bloom(&self) -> Result<u64> {
        let ids = self.db.all_revoked_capability_ids().await?;
        let mut rebuilt = RevocationBloom::default();
        for id in &ids {
            rebuilt.insert(id);
        }
        let count = rebuilt.item_count();

        *self.bloom.write().await = rebuilt;
        info!("Revocation Bloom filter rebuilt with {} entries", count);
        Ok(count)
    }

    /// The interactive check: Bloom fast path, then cache, then store, and
    /// fail open with a warning when the store is unreachable
    pub async fn is_revoked(&self, capability_id: &CapabilityId) -> RevocationCheck {
        if !self.bloom.read().await.contains(capability_id) {
            return RevocationCheck {
                revoked: false,
                record: None,
                source: RevocationSource::BloomFilter,
                warning: None,
            };
        }

        if let Some(cached) = self.cache.lock().await.get(capability_id) {
            return RevocationCheck {
                revoked: cached.record.is_some(),
                record: cached.record.clone(),
                source: RevocationSource::Cache,
                warning: None,
            };
        }

        match self.db.find_revocation(capability_id).await {
            Ok(record) => {
                self.cache.lock().await.insert(
                    capability_id.clone(),
                    CachedCheck {
                        record: record.clone(),
                    },
                );
                RevocationCheck {
                    revoked: record.is_some(),
                    record,
                    source: RevocationSource::Database,
                    warning: None,
                }
            }
            Err(error) => {
                warn!(
                    "Revocation store unavailable while checking {}: {}",
                    capability_id, error
                );
                RevocationCheck {
                    revoked: false,
                    record: None,
                    source: RevocationSource::Error,
                    warning: Some("database unavailable".into()),
                }
            }
        }
    }

    /// The snapshot-path check: Bloom fast path, authoritative otherwise,
    /// and storage errors propagate so the caller rejects
    pub async fn is_revoked_strict(&self, capability_id: &CapabilityId) -> Result<bool> {
        if !self.bloom.read().await.contains(capability_id) {
            return Ok(false);
        }
        self.db.is_revoked(capability_id).await
    }

    /// Check up to a batch of ids, returning the revoked subset
    pub async fn batch_check(&self, capability_ids: &[CapabilityId]) -> Vec<CapabilityId> {
        let mut revoked = Vec::new();
        for capability_id in capability_ids {
            if self.is_revoked(capability_id).await.revoked {
                revoked.push(capability_id.clone());
            }
        }
        revoked
    }

    /// Prune revocations whose capability has itself expired, then rebuild
    /// the Bloom filter from the surviving rows and drop the advisory cache
    pub async fn cleanup_expired(&self, now: u64) -> Result<u64> {
        let mut db = self.db.clone();
        let removed = db.cleanup_expired_revocations(now).await?;
        if removed > 0 {
            *self.cache.lock().await = FifoCache::default();
            self.rebuild_bloom().await?;
        }
        Ok(removed)
    }

    /// Apply a verified-or-not revocation request: verify the envelope,
    /// persist first (the order that startup rebuild can recover), mirror
    /// into Bloom and cache, cascade-delete cached snapshots, and audit.
    ///
    /// Idempotent; re-revoking reports `false` and leaves the original row.
    pub async fn revoke(
        &self,
        request: &RevocationRequest,
        audit: &AuditWriter<S>,
    ) -> Result<(bool, RevocationRecord)> {
        request.verify(now_seconds())?;

        let record = RevocationRecord {
            capability_id: request.capability_id.clone(),
            issuer_pub_key: request.revoked_by.clone(),
            reason: request.reason.clone(),
            original_expiry: request.original_expiry,
            revoked_at: now_seconds(),
            signature: request.signature.clone(),
        };

        let mut db = self.db.clone();
        let created = db.create_revocation(&record).await?;
        let record = match created {
            true => record,
            // Keep reporting the original row on replays
            false => db
                .find_revocation(&request.capability_id)
                .await?
                .unwrap_or(record),
        };

        self.bloom.write().await.insert(&record.capability_id);
        self.cache.lock().await.insert(
            record.capability_id.clone(),
            CachedCheck {
                record: Some(record.clone()),
            },
        );

        if let Err(error) = db.delete_snapshot(&record.capability_id).await {
            warn!(
                "Cascade delete of snapshot for {} failed: {}",
                record.capability_id, error
            );
        }

        audit.mesh(
            MeshAuditEvent::new(MeshAuditAction::CapabilityRevoked, now_seconds())
                .for_capability(&record.capability_id),
        );

        Ok((created, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditWriter, NullMeshAuditSink};
    use ocmt_core::authority::Ed25519KeyMaterial;
    use ocmt_storage::MemoryStorage;

    async fn index_and_audit() -> (RevocationIndex<MemoryStorage>, AuditWriter<MemoryStorage>) {
        let db = RelayDb::new(&MemoryStorage::default()).await.unwrap();
        let audit = AuditWriter::new(db.clone(), Arc::new(NullMeshAuditSink));
        (RevocationIndex::load(db).await.unwrap(), audit)
    }

    fn revocation(issuer: &Ed25519KeyMaterial, id: &str) -> RevocationRequest {
        RevocationRequest::sign(
            issuer,
            CapabilityId::from(id),
            Some("rotated".into()),
            None,
            now_seconds(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_ids_answer_from_the_bloom_filter() {
        let (index, _) = index_and_audit().await;
        let check = index.is_revoked(&CapabilityId::from("never-seen")).await;
        assert!(!check.revoked);
        assert_eq!(check.source, RevocationSource::BloomFilter);
    }

    #[tokio::test]
    async fn revoke_then_check_is_positive_and_idempotent() {
        let (index, audit) = index_and_audit().await;
        let issuer = Ed25519KeyMaterial::generate();
        let request = revocation(&issuer, "cap-1");

        let (created, record) = index.revoke(&request, &audit).await.unwrap();
        assert!(created);

        let (created_again, record_again) = index.revoke(&request, &audit).await.unwrap();
        assert!(!created_again);
        assert_eq!(record.revoked_at, record_again.revoked_at);

        let check = index.is_revoked(&CapabilityId::from("cap-1")).await;
        assert!(check.revoked);
        assert!(check.record.is_some());
        assert!(index
            .is_revoked_strict(&CapabilityId::from("cap-1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn a_tampered_envelope_is_rejected() {
        let (index, audit) = index_and_audit().await;
        let issuer = Ed25519KeyMaterial::generate();
        let mut request = revocation(&issuer, "cap-1");
        request.capability_id = CapabilityId::from("cap-other");

        assert!(index.revoke(&request, &audit).await.is_err());
        assert!(!index.is_revoked(&CapabilityId::from("cap-other")).await.revoked);
    }

    #[tokio::test]
    async fn cleanup_prunes_expired_rows_and_rebuilds_the_filter() {
        let (index, audit) = index_and_audit().await;
        let issuer = Ed25519KeyMaterial::generate();

        let expired = RevocationRequest::sign(
            &issuer,
            CapabilityId::from("cap-expired"),
            None,
            Some(now_seconds() - 60),
            now_seconds(),
        )
        .unwrap();
        let kept = revocation(&issuer, "cap-kept");
        index.revoke(&expired, &audit).await.unwrap();
        index.revoke(&kept, &audit).await.unwrap();

        assert_eq!(index.cleanup_expired(now_seconds()).await.unwrap(), 1);

        let check = index.is_revoked(&CapabilityId::from("cap-expired")).await;
        assert!(!check.revoked);
        assert_eq!(check.source, RevocationSource::BloomFilter);
        assert!(index.is_revoked(&CapabilityId::from("cap-kept")).await.revoked);
    }
}
