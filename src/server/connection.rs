//! WebSocket connection driver
//!
//! One driver task per participant. The driver is the only place that
//! touches the socket: it parses inbound text frames into commands for the
//! dispatcher, drains the participant's outbound queue onto the socket,
//! and answers pings. Registry state is never touched here.

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::DispatcherHandle;
use crate::protocol::{Inbound, Outbound};
use crate::registry::ConnectionHandle;

/// Drive one WebSocket connection until it closes
///
/// Frames that fail to parse (bad JSON, unknown `type`) are dropped
/// without terminating the connection. The shutdown token is cancelled by
/// the liveness monitor; reacting to it here keeps transport termination
/// and registry mutation on separate paths.
pub async fn run(mut socket: WebSocket, dispatcher: DispatcherHandle, outbound_queue: usize) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(outbound_queue);
    let shutdown = CancellationToken::new();
    let transport = ConnectionHandle::new(tx, shutdown.clone());

    let Some((id, label)) = dispatcher.connect(transport).await else {
        tracing::debug!("dispatcher gone, refusing connection");
        return;
    };
    tracing::debug!(id = %id, label = %label, "connection driver started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::debug!(id = %id, "transport terminated by server");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }

            queued = rx.recv() => {
                let Some(frame) = queued else { break };
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "failed to serialize outbound frame");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    tracing::debug!(id = %id, "send failed, closing");
                    break;
                }
            }

            received = socket.recv() => {
                match received {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Inbound>(&text) {
                            Ok(message) => dispatcher.inbound(id, message),
                            Err(e) => {
                                tracing::debug!(id = %id, error = %e, "malformed frame dropped");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(id = %id, "binary frame dropped");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(id = %id, "peer closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(id = %id, error = %e, "socket error");
                        break;
                    }
                }
            }
        }
    }

    dispatcher.close(id);
    tracing::debug!(id = %id, "connection driver finished");
}
