//! WebSocket handler for scan progress

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use lanscope_core::DeviceRecord;
use lanscope_discovery::{ProgressEvent, ScanMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Server to client messages
#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum WsMessage {
    /// Last known result, sent on connect
    Devices(Vec<DeviceRecord>),
    Progress(ProgressEvent),
    ScanRejected { reason: String },
    Pong,
}

/// Client to server messages
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Scan {
        #[serde(default)]
        mode: Option<ScanMode>,
    },
    Ping,
}

fn parse_client_message(text: &str) -> Option<ClientMessage> {
    if text.trim() == "ping" {
        return Some(ClientMessage::Ping);
    }
    serde_json::from_str(text).ok()
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut progress = state.subscribe();

    info!("WebSocket client connected");

    let hello = WsMessage::Devices(state.devices().await);
    if send(&mut sender, &hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = progress.recv() => {
                match event {
                    Ok(event) => {
                        if send(&mut sender, &WsMessage::Progress(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Progress channel lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        let reply = match parse_client_message(text.as_str()) {
                            Some(ClientMessage::Ping) => Some(WsMessage::Pong),
                            Some(ClientMessage::Scan { mode }) => start_scan(&state, mode),
                            None => {
                                debug!(text = %text.as_str(), "Ignoring client message");
                                None
                            }
                        };
                        if let Some(reply) = reply {
                            if send(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

/// Start a scan in the background; its progress reaches every client
fn start_scan(state: &Arc<AppState>, mode: Option<ScanMode>) -> Option<WsMessage> {
    if state.is_scanning() {
        return Some(WsMessage::ScanRejected {
            reason: "A scan is already running".to_string(),
        });
    }

    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = state.run_scan(mode).await {
            debug!(error = %e, "WebSocket scan not started");
        }
    });
    None
}

async fn send<S>(sender: &mut S, msg: &WsMessage) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "Failed to encode WebSocket message");
            Ok(())
        }
    }
}
