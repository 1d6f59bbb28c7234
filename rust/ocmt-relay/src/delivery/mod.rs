//! The multi-mode delivery engine: live WebSocket push, HTTP callback with
//! retry, and hibernation wake, in that order, falling back to the pending
//! queue whenever no channel completes.

mod callback;
mod connections;
mod wake;

pub use callback::*;
pub use connections::*;
pub use wake::*;

use ocmt_api::data::{CallbackDelivery, DeliveryMethod, DeliveryStatus, ServerFrame};
use ocmt_core::{
    data::{AuditStatus, Message},
    time::now_millis,
};
use ocmt_storage::{RelayDb, Storage};

/// What became of one send/forward after the message was persisted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub method: Option<DeliveryMethod>,
    pub wake_triggered: bool,
    pub audit_status: AuditStatus,
}

/// Drive a persisted message through the delivery state machine.
///
/// Downstream failures (callback 5xx, wake refusal, agent server outage)
/// never bubble up; the message simply remains queued and the outcome says
/// so. A message delivered over WebSocket stays `pending` until the client
/// acknowledges it — the push only means at least one live session took the
/// frame.
pub async fn deliver<S>(
    db: &mut RelayDb<S>,
    connections: &ConnectionRegistry,
    forwarder: &CallbackForwarder,
    agent: Option<&AgentServerClient>,
    message: &Message,
) -> DeliveryOutcome
where
    S: Storage,
{
    let frame = ServerFrame::Message {
        id: message.id.clone(),
        from: message.from.clone(),
        payload: message.payload.clone(),
        timestamp: message.created_at,
    };

    if connections.push(&message.to, &frame).await > 0 {
        return DeliveryOutcome {
            status: DeliveryStatus::Delivered,
            method: Some(DeliveryMethod::Websocket),
            wake_triggered: false,
            audit_status: AuditStatus::DeliveredWs,
        };
    }

    if let Some(callback_url) = callback_url_for(db, message).await {
        let delivery = CallbackDelivery {
            kind: "message".into(),
            message_id: message.id.clone(),
            from: message.from.clone(),
            payload: message.payload.clone(),
            timestamp: message.created_at,
        };

        if forwarder.forward(&callback_url, &delivery).await.is_ok() {
            if let Err(error) = db.mark_delivered(&message.id, now_millis()).await {
                warn!(
                    "Callback delivered {} but status update failed: {}; the message may replay",
                    message.id, error
                );
            }
            return DeliveryOutcome {
                status: DeliveryStatus::Delivered,
                method: Some(DeliveryMethod::Callback),
                wake_triggered: false,
                audit_status: AuditStatus::DeliveredCallback,
            };
        }
    }

    let wake_triggered = match agent {
        Some(agent) if !connections.has_connections(&message.to).await => {
            try_wake(agent, message).await
        }
        _ => false,
    };

    DeliveryOutcome {
        status: DeliveryStatus::Queued,
        method: None,
        wake_triggered,
        audit_status: AuditStatus::Queued,
    }
}

async fn callback_url_for<S>(db: &RelayDb<S>, message: &Message) -> Option<String>
where
    S: Storage,
{
    match db.get_registration(&message.to).await {
        Ok(registration) => registration.and_then(|record| record.callback_url),
        Err(error) => {
            warn!("Could not read registration for {}: {}", message.to, error);
            None
        }
    }
}

async fn try_wake(agent: &AgentServerClient, message: &Message) -> bool {
    let status = match agent.status(&message.to).await {
        Ok(status) => status,
        Err(error) => {
            warn!("Could not determine status of {}: {}", message.to, error);
            return false;
        }
    };

    if !status.is_wakeable() {
        return false;
    }

    match agent.wake(&message.to).await {
        Ok(()) => {
            info!("Triggered wake of {} ({})", message.to, status);
            true
        }
        Err(error) => {
            warn!("Wake of {} failed: {}", message.to, error);
            false
        }
    }
}
