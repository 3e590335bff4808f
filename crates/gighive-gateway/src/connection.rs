use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use gighive_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive a pre-authenticated WebSocket connection.
///
/// The token was validated at the HTTP upgrade layer, so the connection goes
/// straight to `Ready` and the event loop. The subscription lives exactly as
/// long as this function: when either side stops, the cancellation token is
/// fired, both tasks end and the subscription is dropped.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    let mut subscription = dispatcher.subscribe(user_id);
    let cancel = subscription.cancellation();
    let subscription_id = subscription.id();
    info!("{} connected to gateway (subscription {})", user_id, subscription_id);

    if send_event(&mut sender, &GatewayEvent::Ready { user_id }).await.is_err() {
        return;
    }

    // Replies to client commands, written by the recv task and sent by the send task.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let send_cancel = cancel.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                _ = send_cancel.cancelled() => break,
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Some(reply) = reply_rx.recv() => {
                    if send_event(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = sender.send(Message::Close(None)).await;
        // `subscription` is dropped here, releasing the registration.
    });

    let recv_cancel = cancel.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = recv_cancel.cancelled() => break,
                msg = receiver.next() => msg,
            };
            let Some(Ok(msg)) = msg else { break };

            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Heartbeat) => {
                        pong_flag_recv.store(true, Ordering::Release);
                        if reply_tx.send(GatewayEvent::HeartbeatAck).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} bad command: {} -- raw: {}", user_id, e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish, then tear the other one down.
    tokio::select! {
        _ = &mut send_task => {
            cancel.cancel();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            cancel.cancel();
            let _ = send_task.await;
        }
    }

    info!("{} disconnected from gateway (subscription {})", user_id, subscription_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
