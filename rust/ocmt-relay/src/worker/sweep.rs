use crate::state::RelayState;
use anyhow::Result;
use ocmt_core::time::{now_millis, now_seconds};
use ocmt_storage::Storage;
use std::time::Duration;
use strum_macros::Display as EnumDisplay;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

/// Seconds between hourly sweep rounds
const HOURLY_SWEEP_INTERVAL_SECONDS: u64 = 60 * 60;

/// Seconds between revocation cleanup rounds
const DAILY_SWEEP_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

/// Terminal message rows are purged once they are seven TTLs old
const PURGE_TTL_MULTIPLIER: u64 = 7;

#[derive(EnumDisplay)]
pub enum SweepJob {
    /// Flip stale pending messages to expired and purge old terminal rows
    ExpireMessages,
    /// Prune expired revocations, then rebuild the Bloom filter
    CleanupRevocations,
    /// Delete snapshots past their expiry
    PruneSnapshots,
    /// Drop idle in-memory rate-limit windows
    SweepRateLimiters,
}

/// Start the sweep worker set: a processing task fed by a channel, plus
/// periodic tasks that submit the standing jobs. Dropping the handle (or
/// aborting it at shutdown) stops everything.
pub fn start_sweepers<S>(
    state: RelayState<S>,
) -> (UnboundedSender<SweepJob>, JoinHandle<Result<()>>)
where
    S: Storage + 'static,
{
    let (tx, rx) = unbounded_channel();

    (tx.clone(), {
        tokio::task::spawn(async move {
            let _ = tokio::join!(sweep_task(rx, state), periodic_sweep_task(tx));
            Ok(())
        })
    })
}

async fn sweep_task<S>(mut receiver: UnboundedReceiver<SweepJob>, state: RelayState<S>) -> Result<()>
where
    S: Storage + 'static,
{
    debug!("Sweep worker started");

    while let Some(job) = receiver.recv().await {
        if let Err(error) = process_job(job, &state).await {
            warn!("Error processing sweep job: {}", error);
        }
    }

    Ok(())
}

async fn periodic_sweep_task(tx: UnboundedSender<SweepJob>) {
    let mut hourly = tokio::time::interval(Duration::from_secs(HOURLY_SWEEP_INTERVAL_SECONDS));
    let mut daily = tokio::time::interval(Duration::from_secs(DAILY_SWEEP_INTERVAL_SECONDS));
    // Both intervals fire once immediately; consume those ticks so startup
    // is not spent sweeping empty tables
    hourly.tick().await;
    daily.tick().await;

    loop {
        let jobs = tokio::select! {
            _ = hourly.tick() => vec![
                SweepJob::ExpireMessages,
                SweepJob::PruneSnapshots,
                SweepJob::SweepRateLimiters,
            ],
            _ = daily.tick() => vec![SweepJob::CleanupRevocations],
        };

        for job in jobs {
            if let Err(error) = tx.send(job) {
                error!("Periodic sweep submission failed: {}", error);
                return;
            }
        }
    }
}

async fn process_job<S>(job: SweepJob, state: &RelayState<S>) -> Result<()>
where
    S: Storage + 'static,
{
    debug!("Running {}", job);

    match job {
        SweepJob::ExpireMessages => {
            let ttl_ms = state.configuration.message_ttl_hours * 60 * 60 * 1000;
            let now = now_millis();
            let mut db = state.db.clone();

            let expired = db
                .expire_messages_before(now.saturating_sub(ttl_ms), now)
                .await?;
            if !expired.is_empty() {
                info!("Expired {} stale pending message(s)", expired.len());
            }

            let purged = db
                .purge_messages_before(now.saturating_sub(ttl_ms * PURGE_TTL_MULTIPLIER))
                .await?;
            if purged > 0 {
                info!("Purged {} old terminal message row(s)", purged);
            }
        }
        SweepJob::CleanupRevocations => {
            let removed = state.revocations.cleanup_expired(now_seconds()).await?;
            if removed > 0 {
                info!("Pruned {} expired revocation(s)", removed);
            }
        }
        SweepJob::PruneSnapshots => {
            let mut db = state.db.clone();
            let pruned = db.prune_expired_snapshots(now_seconds()).await?;
            if pruned > 0 {
                info!("Pruned {} expired snapshot(s)", pruned);
            }
        }
        SweepJob::SweepRateLimiters => {
            let now = now_millis();
            state.limiters.messages.sweep(now).await;
            state.limiters.general.sweep(now).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfiguration;
    use ocmt_core::data::{ContainerId, Message, MessageStatus};
    use ocmt_storage::MemoryStorage;

    #[tokio::test]
    async fn expire_messages_flips_only_stale_pending_rows() {
        let storage = MemoryStorage::default();
        let state = RelayState::new(&storage, RelayConfiguration::default())
            .await
            .unwrap();
        let mut db = state.db.clone();

        let stale = Message::queued(
            "stale".into(),
            ContainerId::from("a"),
            ContainerId::from("b"),
            "eA==".into(),
            0,
        );
        let mut fresh = stale.clone();
        fresh.id = "fresh".into();
        fresh.created_at = now_millis();
        db.insert_message(&stale).await.unwrap();
        db.insert_message(&fresh).await.unwrap();

        process_job(SweepJob::ExpireMessages, &state).await.unwrap();

        assert_eq!(
            db.get_message("stale").await.unwrap().unwrap().status,
            MessageStatus::Expired
        );
        assert_eq!(
            db.get_message("fresh").await.unwrap().unwrap().status,
            MessageStatus::Pending
        );
    }
}
