use crate::{extractors::SubscriberAuthority, handlers::acknowledge, state::RelayState};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use ocmt_api::data::{ClientFrame, ServerFrame, MAX_ACK_BATCH, WS_SUBPROTOCOL};
use ocmt_core::{data::ContainerId, time::now_millis};
use ocmt_storage::Storage;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// `GET /relay/subscribe` — upgrade to the live push channel. The relay
/// echoes the `ocmt-relay` subprotocol and then speaks JSON frames.
pub async fn subscribe_route<S>(
    State(state): State<RelayState<S>>,
    authority: SubscriberAuthority,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse
where
    S: Storage + 'static,
{
    upgrade
        .protocols([WS_SUBPROTOCOL])
        .on_upgrade(move |socket| subscriber_session(state, authority.container_id, socket))
}

/// One live session: greet, flush the pending queue oldest-first, then relay
/// frames both ways until either side goes away. Several sessions may exist
/// for the same container; each gets every push.
async fn subscriber_session<S>(state: RelayState<S>, container_id: ContainerId, socket: WebSocket)
where
    S: Storage + 'static,
{
    let (connection_id, outbound) = state.connections.register(&container_id).await;
    let (mut sink, stream) = socket.split();

    let connected = ServerFrame::Connected {
        container_id: container_id.clone(),
        timestamp: now_millis(),
    };
    if send_frame(&mut sink, &connected).await.is_err() {
        state.connections.unregister(&container_id, connection_id).await;
        return;
    }

    if flush_pending(&state, &container_id, &mut sink).await.is_err() {
        state.connections.unregister(&container_id, connection_id).await;
        return;
    }

    info!("Container {} subscribed (session {})", container_id, connection_id);
    run_session(&state, &container_id, sink, stream, outbound).await;
    info!("Container {} unsubscribed (session {})", container_id, connection_id);

    state.connections.unregister(&container_id, connection_id).await;
}

/// Deliver the whole pending queue in ascending `createdAt` order, one frame
/// per message. Messages stay pending until acknowledged, so a session that
/// drops mid-flush sees the remainder again on reconnect.
async fn flush_pending<S>(
    state: &RelayState<S>,
    container_id: &ContainerId,
    sink: &mut SplitSink<WebSocket, WsMessage>,
) -> Result<(), ()>
where
    S: Storage + 'static,
{
    let pending = match state.db.list_pending(container_id, usize::MAX).await {
        Ok(pending) => pending,
        Err(error) => {
            error!("Could not load pending queue for {}: {}", container_id, error);
            return Err(());
        }
    };

    if !pending.is_empty() {
        debug!("Flushing {} pending message(s) to {}", pending.len(), container_id);
    }

    for message in pending {
        let frame = ServerFrame::Message {
            id: message.id,
            from: message.from,
            payload: message.payload,
            timestamp: message.created_at,
        };
        send_frame(sink, &frame).await?;
    }

    Ok(())
}

async fn run_session<S>(
    state: &RelayState<S>,
    container_id: &ContainerId,
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut stream: SplitStream<WebSocket>,
    mut outbound: UnboundedReceiver<ServerFrame>,
) where
    S: Storage + 'static,
{
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of an interval fires immediately
    ping.tick().await;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if send_frame(&mut sink, &frame).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if handle_client_frame(state, container_id, &mut sink, &text)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    // Protocol pings and pongs are answered underneath us
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Binary(_))) => {
                        let unsupported = ServerFrame::Error {
                            error: "binary frames are not supported".into(),
                            details: None,
                        };
                        if send_frame(&mut sink, &unsupported).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                }
            }
        }
    }
}

async fn handle_client_frame<S>(
    state: &RelayState<S>,
    container_id: &ContainerId,
    sink: &mut SplitSink<WebSocket, WsMessage>,
    text: &str,
) -> Result<(), ()>
where
    S: Storage + 'static,
{
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(error) => {
            let invalid = ServerFrame::Error {
                error: "invalid frame".into(),
                details: Some(error.to_string()),
            };
            return send_frame(sink, &invalid).await;
        }
    };

    match frame {
        ClientFrame::Ack { message_id } => {
            acknowledge(state, container_id, &message_id).await;
            Ok(())
        }
        ClientFrame::AckBatch { message_ids } => {
            if message_ids.len() > MAX_ACK_BATCH {
                let too_many = ServerFrame::Error {
                    error: format!("at most {} message ids per ack_batch", MAX_ACK_BATCH),
                    details: None,
                };
                return send_frame(sink, &too_many).await;
            }
            for message_id in message_ids {
                acknowledge(state, container_id, &message_id).await;
            }
            Ok(())
        }
        ClientFrame::Ping => {
            send_frame(
                sink,
                &ServerFrame::Pong {
                    timestamp: now_millis(),
                },
            )
            .await
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    frame: &ServerFrame,
) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(error) => {
            error!("Could not serialize server frame: {}", error);
            return Err(());
        }
    };
    sink.send(WsMessage::Text(json)).await.map_err(|_| ())
}
