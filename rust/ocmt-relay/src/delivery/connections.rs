use ocmt_api::data::ServerFrame;
use ocmt_core::data::ContainerId;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Mutex,
};

/// The set of live WebSocket sessions per container. A container may hold
/// several sessions at once; a push goes to every one of them.
///
/// The registry lock guards only set membership. Frames travel over
/// per-session channels, so sends never hold the set-wide lock.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<ContainerId, Vec<ConnectionHandle>>>>,
    next_id: Arc<AtomicU64>,
}

#[derive(Clone)]
struct ConnectionHandle {
    id: u64,
    sender: UnboundedSender<ServerFrame>,
}

impl ConnectionRegistry {
    /// Add a session for `container_id`; the returned receiver yields the
    /// frames pushed to it and the id deregisters the session later
    pub async fn register(
        &self,
        container_id: &ContainerId,
    ) -> (u64, UnboundedReceiver<ServerFrame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = unbounded_channel();

        let mut connections = self.connections.lock().await;
        connections
            .entry(container_id.clone())
            .or_default()
            .push(ConnectionHandle { id, sender });

        debug!("Registered connection {} for {}", id, container_id);
        (id, receiver)
    }

    /// Drop one session; closed sessions that were never deregistered are
    /// also swept out when their channel is observed closed during a push
    pub async fn unregister(&self, container_id: &ContainerId, id: u64) {
        let mut connections = self.connections.lock().await;
        if let Some(handles) = connections.get_mut(container_id) {
            handles.retain(|handle| handle.id != id);
            if handles.is_empty() {
                connections.remove(container_id);
            }
        }
        debug!("Unregistered connection {} for {}", id, container_id);
    }

    /// Push a frame to every live session of a container, returning how many
    /// sessions it reached. Delivery counts as attempted when this is ≥ 1.
    pub async fn push(&self, container_id: &ContainerId, frame: &ServerFrame) -> usize {
        let handles = {
            let connections = self.connections.lock().await;
            match connections.get(container_id) {
                Some(handles) => handles.clone(),
                None => return 0,
            }
        };

        let mut reached = 0;
        let mut stale = Vec::new();
        for handle in handles {
            match handle.sender.send(frame.clone()) {
                Ok(()) => reached += 1,
                Err(_) => stale.push(handle.id),
            }
        }

        if !stale.is_empty() {
            let mut connections = self.connections.lock().await;
            if let Some(handles) = connections.get_mut(container_id) {
                handles.retain(|handle| !stale.contains(&handle.id));
                if handles.is_empty() {
                    connections.remove(container_id);
                }
            }
        }

        reached
    }

    pub async fn has_connections(&self, container_id: &ContainerId) -> bool {
        let connections = self.connections.lock().await;
        connections.contains_key(container_id)
    }

    /// Total live sessions across all containers
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.lock().await;
        connections.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> ServerFrame {
        ServerFrame::Pong { timestamp: 1 }
    }

    #[tokio::test]
    async fn it_pushes_to_every_session_of_a_container() {
        let registry = ConnectionRegistry::default();
        let container = ContainerId::from("c1");

        let (_, mut first) = registry.register(&container).await;
        let (_, mut second) = registry.register(&container).await;

        assert_eq!(registry.push(&container, &frame()).await, 2);
        assert!(first.recv().await.is_some());
        assert!(second.recv().await.is_some());
    }

    #[tokio::test]
    async fn it_reports_zero_for_unconnected_containers() {
        let registry = ConnectionRegistry::default();
        assert_eq!(registry.push(&ContainerId::from("nobody"), &frame()).await, 0);
    }

    #[tokio::test]
    async fn unregistered_sessions_no_longer_count() {
        let registry = ConnectionRegistry::default();
        let container = ContainerId::from("c1");

        let (id, receiver) = registry.register(&container).await;
        drop(receiver);
        registry.unregister(&container, id).await;

        assert!(!registry.has_connections(&container).await);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn dropped_receivers_are_swept_on_push() {
        let registry = ConnectionRegistry::default();
        let container = ContainerId::from("c1");

        let (_, receiver) = registry.register(&container).await;
        drop(receiver);

        assert_eq!(registry.push(&container, &frame()).await, 0);
        assert!(!registry.has_connections(&container).await);
    }
}
