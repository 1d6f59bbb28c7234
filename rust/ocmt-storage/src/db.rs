use crate::{key_value::KeyValueStore, storage::Storage, store::Store};
use anyhow::Result;
use ocmt_core::data::{
    AuditRecord, CachedSnapshot, CapabilityId, ContainerId, Message, MessageStatus,
    RegistryRecord, RevocationRecord, UserRecord,
};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Table (tree) names. `users` and `capability_revocations` are shared with
/// the management server; the relay only reads `users`.
pub const MESSAGES_TABLE: &str = "relay_messages";
pub const MESSAGE_INDEX_TABLE: &str = "relay_message_index";
pub const REGISTRY_TABLE: &str = "relay_container_registry";
pub const REGISTRY_HASH_INDEX_TABLE: &str = "relay_registry_hash_index";
pub const REVOCATIONS_TABLE: &str = "capability_revocations";
pub const SNAPSHOTS_TABLE: &str = "relay_cached_snapshots";
pub const SNAPSHOT_RECIPIENT_INDEX_TABLE: &str = "relay_snapshot_recipient_index";
pub const RATE_LIMITS_TABLE: &str = "relay_rate_limits";
pub const AUDIT_LOG_TABLE: &str = "relay_audit_log";
pub const USERS_TABLE: &str = "users";

/// One fixed-window rate counter row; `relay_rate_limits` keys on the
/// container id
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RateLimitWindow {
    pub window_start: u64,
    pub count: u64,
}

/// The relay's typed view over a [Storage] backend: every table the relay
/// reads or writes, with the operations its services need. The persistent
/// store behind this type is the single source of truth; all in-process
/// caches are advisory.
#[derive(Clone)]
pub struct RelayDb<S>
where
    S: Storage,
{
    messages: S::Store,
    message_index: S::Store,
    registry: S::Store,
    registry_hash_index: S::Store,
    revocations: S::Store,
    snapshots: S::Store,
    snapshot_recipient_index: S::Store,
    rate_limits: S::Store,
    audit_log: S::Store,
    users: S::Store,
    audit_sequence: Arc<AtomicU64>,
}

impl<S> RelayDb<S>
where
    S: Storage,
{
    pub async fn new(storage: &S) -> Result<Self> {
        Ok(RelayDb {
            messages: storage.get_store(MESSAGES_TABLE).await?,
            message_index: storage.get_store(MESSAGE_INDEX_TABLE).await?,
            registry: storage.get_store(REGISTRY_TABLE).await?,
            registry_hash_index: storage.get_store(REGISTRY_HASH_INDEX_TABLE).await?,
            revocations: storage.get_store(REVOCATIONS_TABLE).await?,
            snapshots: storage.get_store(SNAPSHOTS_TABLE).await?,
            snapshot_recipient_index: storage.get_store(SNAPSHOT_RECIPIENT_INDEX_TABLE).await?,
            rate_limits: storage.get_store(RATE_LIMITS_TABLE).await?,
            audit_log: storage.get_store(AUDIT_LOG_TABLE).await?,
            users: storage.get_store(USERS_TABLE).await?,
            audit_sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    fn message_key(to: &ContainerId, created_at: u64, id: &str) -> String {
        format!("{}/{:020}/{}", to, created_at, id)
    }

    // Messages ///////////////////////////////////////////////////////////

    /// Persist a freshly-queued message. The queue key orders rows by
    /// recipient and `createdAt` so that drains are a single prefix scan.
    pub async fn insert_message(&mut self, message: &Message) -> Result<()> {
        let key = Self::message_key(&message.to, message.created_at, &message.id);
        self.messages.set_key(&key, message).await?;
        self.message_index.set_key(&message.id, &key).await?;
        Ok(())
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let Some(key) = self.message_index.get_key::<_, String>(id).await? else {
            return Ok(None);
        };
        self.messages.get_key(&key).await
    }

    /// Transition a message out of `pending`. Returns `false` when the
    /// message is unknown or already left `pending` — the monotone-status
    /// guarantee for concurrent acks, callback completions and sweeps.
    async fn transition_from_pending(
        &mut self,
        id: &str,
        status: MessageStatus,
        at: u64,
    ) -> Result<bool> {
        let Some(key) = self.message_index.get_key::<_, String>(id).await? else {
            return Ok(false);
        };

        loop {
            let Some(bytes) = self.messages.read(key.as_bytes()).await? else {
                return Ok(false);
            };
            let mut message: Message = serde_json::from_slice(&bytes)?;
            if message.status != MessageStatus::Pending {
                return Ok(false);
            }

            message.status = status;
            match status {
                MessageStatus::Delivered => message.delivered_at = Some(at),
                MessageStatus::Expired => message.expired_at = Some(at),
                MessageStatus::Pending => unreachable!("transition targets are terminal"),
            }

            let updated = serde_json::to_vec(&message)?;
            if self
                .messages
                .compare_and_swap(key.as_bytes(), Some(bytes.as_slice()), Some(updated.as_slice()))
                .await?
            {
                return Ok(true);
            }
        }
    }

    /// `UPDATE … SET status='delivered' WHERE id=? AND status='pending'`
    pub async fn mark_delivered(&mut self, id: &str, delivered_at: u64) -> Result<bool> {
        self.transition_from_pending(id, MessageStatus::Delivered, delivered_at)
            .await
    }

    /// `UPDATE … SET status='expired' WHERE id=? AND status='pending'`
    pub async fn mark_expired(&mut self, id: &str, expired_at: u64) -> Result<bool> {
        self.transition_from_pending(id, MessageStatus::Expired, expired_at)
            .await
    }

    /// Pending messages for a recipient in ascending `createdAt` order
    pub async fn list_pending(&self, to: &ContainerId, limit: usize) -> Result<Vec<Message>> {
        let prefix = format!("{}/", to);
        let mut pending = Vec::new();
        for (_, bytes) in self.messages.scan_prefix(prefix.as_bytes()).await? {
            let message: Message = serde_json::from_slice(&bytes)?;
            if message.status == MessageStatus::Pending {
                pending.push(message);
                if pending.len() >= limit {
                    break;
                }
            }
        }
        Ok(pending)
    }

    pub async fn count_pending(&self, to: &ContainerId) -> Result<usize> {
        Ok(self.list_pending(to, usize::MAX).await?.len())
    }

    /// Flip every message still `pending` and older than `cutoff` (unix ms)
    /// to `expired`; returns the ids that were flipped
    pub async fn expire_messages_before(&mut self, cutoff: u64, now: u64) -> Result<Vec<String>> {
        let mut expired = Vec::new();
        for (_, bytes) in self.messages.scan_prefix(b"").await? {
            let message: Message = serde_json::from_slice(&bytes)?;
            if message.status == MessageStatus::Pending
                && message.created_at < cutoff
                && self.mark_expired(&message.id, now).await?
            {
                expired.push(message.id);
            }
        }
        Ok(expired)
    }

    /// Remove terminal (delivered or expired) rows older than `cutoff`
    /// (unix ms); queue hygiene, not part of delivery semantics
    pub async fn purge_messages_before(&mut self, cutoff: u64) -> Result<u64> {
        let mut purged = 0;
        for (key, bytes) in self.messages.scan_prefix(b"").await? {
            let message: Message = serde_json::from_slice(&bytes)?;
            if message.status != MessageStatus::Pending && message.created_at < cutoff {
                self.messages.remove(&key).await?;
                self.message_index.unset_key(&message.id).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Messages still awaiting delivery, across all recipients
    pub async fn count_pending_messages(&self) -> Result<usize> {
        let mut count = 0;
        for (_, bytes) in self.messages.scan_prefix(b"").await? {
            let message: Message = serde_json::from_slice(&bytes)?;
            if message.status == MessageStatus::Pending {
                count += 1;
            }
        }
        Ok(count)
    }

    // Container registry /////////////////////////////////////////////////

    /// Insert or replace a container's registration, maintaining the pub-key
    /// hash index used for discovery
    pub async fn upsert_registration(&mut self, record: &RegistryRecord) -> Result<()> {
        if let Some(previous) = self
            .registry
            .get_key::<_, RegistryRecord>(&record.container_id)
            .await?
        {
            if previous.pub_key_hash != record.pub_key_hash {
                self.registry_hash_index
                    .unset_key(&previous.pub_key_hash)
                    .await?;
            }
        }

        self.registry.set_key(&record.container_id, record).await?;
        self.registry_hash_index
            .set_key(&record.pub_key_hash, &record.container_id)
            .await?;
        Ok(())
    }

    pub async fn get_registration(
        &self,
        container_id: &ContainerId,
    ) -> Result<Option<RegistryRecord>> {
        self.registry.get_key(container_id).await
    }

    pub async fn delete_registration(&mut self, container_id: &ContainerId) -> Result<bool> {
        let Some(record) = self
            .registry
            .get_key::<_, RegistryRecord>(container_id)
            .await?
        else {
            return Ok(false);
        };
        self.registry_hash_index
            .unset_key(&record.pub_key_hash)
            .await?;
        self.registry.unset_key(container_id).await?;
        Ok(true)
    }

    pub async fn find_registration_by_hash(
        &self,
        pub_key_hash: &str,
    ) -> Result<Option<RegistryRecord>> {
        let Some(container_id) = self
            .registry_hash_index
            .get_key::<_, ContainerId>(pub_key_hash)
            .await?
        else {
            return Ok(None);
        };
        self.registry.get_key(&container_id).await
    }

    pub async fn count_registrations(&self) -> Result<usize> {
        Ok(self.registry.scan_prefix(b"").await?.len())
    }

    // Revocations ////////////////////////////////////////////////////////

    /// Record a revocation. Idempotent: re-revoking keeps the original row
    /// and reports `false`.
    pub async fn create_revocation(&mut self, record: &RevocationRecord) -> Result<bool> {
        if self
            .revocations
            .get_key::<_, RevocationRecord>(&record.capability_id)
            .await?
            .is_some()
        {
            return Ok(false);
        }
        self.revocations
            .set_key(&record.capability_id, record)
            .await?;
        Ok(true)
    }

    pub async fn find_revocation(
        &self,
        capability_id: &CapabilityId,
    ) -> Result<Option<RevocationRecord>> {
        self.revocations.get_key(capability_id).await
    }

    pub async fn is_revoked(&self, capability_id: &CapabilityId) -> Result<bool> {
        Ok(self.find_revocation(capability_id).await?.is_some())
    }

    /// Every revoked capability id; feeds Bloom filter (re)builds
    pub async fn all_revoked_capability_ids(&self) -> Result<Vec<CapabilityId>> {
        let mut ids = Vec::new();
        for (_, bytes) in self.revocations.scan_prefix(b"").await? {
            let record: RevocationRecord = serde_json::from_slice(&bytes)?;
            ids.push(record.capability_id);
        }
        Ok(ids)
    }

    /// Drop revocation rows whose capability has itself expired; the Bloom
    /// filter must be rebuilt afterwards
    pub async fn cleanup_expired_revocations(&mut self, now: u64) -> Result<u64> {
        let mut removed = 0;
        for (key, bytes) in self.revocations.scan_prefix(b"").await? {
            let record: RevocationRecord = serde_json::from_slice(&bytes)?;
            if matches!(record.original_expiry, Some(expiry) if expiry <= now) {
                self.revocations.remove(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn count_revocations(&self) -> Result<usize> {
        Ok(self.revocations.scan_prefix(b"").await?.len())
    }

    // Cached snapshots ///////////////////////////////////////////////////

    /// Insert or replace the snapshot stored for a capability id
    pub async fn upsert_snapshot(&mut self, snapshot: &CachedSnapshot) -> Result<()> {
        self.snapshots
            .set_key(&snapshot.capability_id, snapshot)
            .await?;
        self.snapshot_recipient_index
            .set_key(
                format!("{}/{}", snapshot.recipient_pub_key, snapshot.capability_id),
                &snapshot.capability_id,
            )
            .await?;
        Ok(())
    }

    pub async fn get_snapshot(
        &self,
        capability_id: &CapabilityId,
    ) -> Result<Option<CachedSnapshot>> {
        self.snapshots.get_key(capability_id).await
    }

    pub async fn delete_snapshot(&mut self, capability_id: &CapabilityId) -> Result<bool> {
        let Some(snapshot) = self
            .snapshots
            .get_key::<_, CachedSnapshot>(capability_id)
            .await?
        else {
            return Ok(false);
        };
        self.snapshot_recipient_index
            .unset_key(format!(
                "{}/{}",
                snapshot.recipient_pub_key, snapshot.capability_id
            ))
            .await?;
        self.snapshots.unset_key(capability_id).await?;
        Ok(true)
    }

    pub async fn list_snapshots_by_recipient(
        &self,
        recipient_pub_key: &str,
    ) -> Result<Vec<CachedSnapshot>> {
        let prefix = format!("{}/", recipient_pub_key);
        let mut snapshots = Vec::new();
        for (_, bytes) in self
            .snapshot_recipient_index
            .scan_prefix(prefix.as_bytes())
            .await?
        {
            let capability_id: CapabilityId = serde_json::from_slice(&bytes)?;
            if let Some(snapshot) = self.get_snapshot(&capability_id).await? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    /// Delete snapshots that have passed their expiry
    pub async fn prune_expired_snapshots(&mut self, now: u64) -> Result<u64> {
        let mut pruned = 0;
        for (_, bytes) in self.snapshots.scan_prefix(b"").await? {
            let snapshot: CachedSnapshot = serde_json::from_slice(&bytes)?;
            if snapshot.expires_at <= now && self.delete_snapshot(&snapshot.capability_id).await? {
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    // Rate limits ////////////////////////////////////////////////////////

    /// Increment the DB-backed fixed-window counter for a container and
    /// return the count within the current window
    pub async fn increment_rate_window(
        &mut self,
        container_id: &ContainerId,
        window_start: u64,
    ) -> Result<u64> {
        let window = match self
            .rate_limits
            .get_key::<_, RateLimitWindow>(container_id)
            .await?
        {
            Some(window) if window.window_start == window_start => RateLimitWindow {
                window_start,
                count: window.count + 1,
            },
            _ => RateLimitWindow {
                window_start,
                count: 1,
            },
        };
        self.rate_limits.set_key(container_id, &window).await?;
        Ok(window.count)
    }

    // Audit //////////////////////////////////////////////////////////////

    /// Append one row to the relay audit log
    pub async fn append_audit(&mut self, record: &AuditRecord) -> Result<()> {
        let sequence = self.audit_sequence.fetch_add(1, Ordering::Relaxed);
        let key = format!("{:020}/{:06}", record.timestamp, sequence);
        self.audit_log.set_key(&key, record).await?;
        Ok(())
    }

    /// The most recent audit rows, newest last
    pub async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let entries = self.audit_log.scan_prefix(b"").await?;
        let skip = entries.len().saturating_sub(limit);
        entries
            .into_iter()
            .skip(skip)
            .map(|(_, bytes)| {
                let record: AuditRecord = serde_json::from_slice(&bytes)?;
                Ok(record)
            })
            .collect()
    }

    // Users (read-only join) /////////////////////////////////////////////

    pub async fn get_user(&self, container_id: &ContainerId) -> Result<Option<UserRecord>> {
        self.users.get_key(container_id).await
    }

    /// Seed a user row. The management server owns this table in production;
    /// this exists for development servers and tests.
    pub async fn upsert_user(&mut self, user: &UserRecord) -> Result<()> {
        self.users.set_key(&user.container_id, user).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.messages.flush().await?;
        self.message_index.flush().await?;
        self.registry.flush().await?;
        self.registry_hash_index.flush().await?;
        self.revocations.flush().await?;
        self.snapshots.flush().await?;
        self.snapshot_recipient_index.flush().await?;
        self.rate_limits.flush().await?;
        self.audit_log.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use ocmt_core::data::{AuditStatus, MessageStatus};

    async fn test_db() -> RelayDb<MemoryStorage> {
        RelayDb::new(&MemoryStorage::default()).await.unwrap()
    }

    fn message(id: &str, to: &str, created_at: u64) -> Message {
        Message::queued(
            id.into(),
            ContainerId::from("sender"),
            ContainerId::from(to),
            "cGF5bG9hZA==".into(),
            created_at,
        )
    }

    #[tokio::test]
    async fn pending_messages_drain_in_created_at_order() {
        let mut db = test_db().await;
        db.insert_message(&message("m2", "b", 200)).await.unwrap();
        db.insert_message(&message("m1", "b", 100)).await.unwrap();
        db.insert_message(&message("m3", "b", 300)).await.unwrap();
        db.insert_message(&message("other", "c", 50)).await.unwrap();

        let pending = db.list_pending(&ContainerId::from("b"), 10).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|message| message.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn delivery_transitions_are_monotone() {
        let mut db = test_db().await;
        db.insert_message(&message("m1", "b", 100)).await.unwrap();

        assert!(db.mark_delivered("m1", 150).await.unwrap());
        // A second ack and a late sweep both observe the terminal status
        assert!(!db.mark_delivered("m1", 160).await.unwrap());
        assert!(!db.mark_expired("m1", 170).await.unwrap());

        let stored = db.get_message("m1").await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
        assert_eq!(stored.delivered_at, Some(150));
        assert!(stored.expired_at.is_none());
    }

    #[tokio::test]
    async fn expiry_sweep_only_touches_old_pending_rows() {
        let mut db = test_db().await;
        db.insert_message(&message("old", "b", 100)).await.unwrap();
        db.insert_message(&message("new", "b", 5_000)).await.unwrap();
        db.insert_message(&message("done", "b", 50)).await.unwrap();
        db.mark_delivered("done", 60).await.unwrap();

        let expired = db.expire_messages_before(1_000, 9_999).await.unwrap();
        assert_eq!(expired, vec!["old".to_string()]);

        assert_eq!(
            db.get_message("new").await.unwrap().unwrap().status,
            MessageStatus::Pending
        );
        assert_eq!(
            db.get_message("done").await.unwrap().unwrap().status,
            MessageStatus::Delivered
        );
    }

    #[tokio::test]
    async fn registrations_index_by_hash_and_reindex_on_key_change() {
        let mut db = test_db().await;
        let mut record = RegistryRecord {
            container_id: ContainerId::from("c1"),
            signing_pub_key: "a2V5LW9uZQ==".into(),
            encryption_pub_key: None,
            pub_key_hash: "hash-one".into(),
            callback_url: None,
            created_at: 1,
            updated_at: 1,
        };
        db.upsert_registration(&record).await.unwrap();

        let found = db.find_registration_by_hash("hash-one").await.unwrap();
        assert_eq!(found.unwrap().container_id, ContainerId::from("c1"));

        record.pub_key_hash = "hash-two".into();
        db.upsert_registration(&record).await.unwrap();
        assert!(db.find_registration_by_hash("hash-one").await.unwrap().is_none());
        assert!(db.find_registration_by_hash("hash-two").await.unwrap().is_some());

        assert!(db.delete_registration(&ContainerId::from("c1")).await.unwrap());
        assert!(db.find_registration_by_hash("hash-two").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revocations_are_idempotent() {
        let mut db = test_db().await;
        let record = RevocationRecord {
            capability_id: CapabilityId::from("cap-1"),
            issuer_pub_key: "aXNzdWVy".into(),
            reason: None,
            original_expiry: Some(500),
            revoked_at: 100,
            signature: "c2ln".into(),
        };

        assert!(db.create_revocation(&record).await.unwrap());
        assert!(!db.create_revocation(&record).await.unwrap());
        assert_eq!(db.count_revocations().await.unwrap(), 1);
        assert!(db.is_revoked(&CapabilityId::from("cap-1")).await.unwrap());

        assert_eq!(db.cleanup_expired_revocations(500).await.unwrap(), 1);
        assert!(!db.is_revoked(&CapabilityId::from("cap-1")).await.unwrap());
    }

    #[tokio::test]
    async fn snapshots_list_by_recipient_and_cascade_on_delete() {
        let mut db = test_db().await;
        let snapshot = CachedSnapshot {
            capability_id: CapabilityId::from("cap-1"),
            recipient_pub_key: "recipient-a".into(),
            issuer_pub_key: "issuer".into(),
            encrypted_data: "ZGF0YQ==".into(),
            ephemeral_pub_key: "ZXBo".into(),
            nonce: "bm9uY2U=".into(),
            tag: "dGFn".into(),
            signature: "c2ln".into(),
            created_at: 1,
            expires_at: 100,
        };
        db.upsert_snapshot(&snapshot).await.unwrap();

        let listed = db.list_snapshots_by_recipient("recipient-a").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(db.list_snapshots_by_recipient("recipient-b").await.unwrap().is_empty());

        assert!(db.delete_snapshot(&CapabilityId::from("cap-1")).await.unwrap());
        assert!(db.list_snapshots_by_recipient("recipient-a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_windows_reset_when_the_window_moves() {
        let mut db = test_db().await;
        let container = ContainerId::from("c1");

        assert_eq!(db.increment_rate_window(&container, 0).await.unwrap(), 1);
        assert_eq!(db.increment_rate_window(&container, 0).await.unwrap(), 2);
        assert_eq!(db.increment_rate_window(&container, 60_000).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn audit_rows_append_in_order() {
        let mut db = test_db().await;
        for index in 0..3u64 {
            db.append_audit(&AuditRecord {
                timestamp: 1_000 + index,
                from: ContainerId::from("a"),
                to: ContainerId::from("b"),
                size: 3,
                status: AuditStatus::Queued,
                error_message: None,
            })
            .await
            .unwrap();
        }

        let recent = db.recent_audit(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp, 1_001);
        assert_eq!(recent[1].timestamp, 1_002);
    }
}
