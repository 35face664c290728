//! WebSocket transport for session subscribers.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /ws/sessions/{id}`. If the session is unknown
//!    the socket is closed with code 4404 and no state is created.
//! 2. Attaching registers the connection as a subscriber; the first attach
//!    spawns the session's child process.
//! 3. On disconnect the subscriber is detached; the session keeps running.
//!
//! ## Message types (client → server)
//!
//! | Type    | Fields | Effect                              |
//! |---------|--------|-------------------------------------|
//! | `input` | `data` | run through the keystroke parser    |
//! | `ping`  | —      | server responds with `pong`         |
//!
//! Messages with an unrecognized `type` are ignored.
//!
//! ## Message types (server → client)
//!
//! | Type     | Fields | Content                                              |
//! |----------|--------|------------------------------------------------------|
//! | `output` | `data` | terminal bytes (lossy UTF-8), git-delta blocks, exit notices |
//! | `pong`   | —      | ping reply                                           |

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::sessions::SessionError;
use crate::AppState;

/// Close code sent when the requested session is unknown at attach time.
const CLOSE_UNKNOWN_SESSION: u16 = 4404;

/// Inbound message envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Input {
        #[serde(default)]
        data: String,
    },
    Ping,
    /// Anything with an unrecognized `type` tag.
    #[serde(other)]
    Unknown,
}

/// Outbound message envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Output { data: String },
    Pong,
}

impl OutboundMessage {
    pub fn output(data: impl Into<String>) -> Self {
        Self::Output { data: data.into() }
    }
}

/// `GET /ws/sessions/{id}` — WebSocket upgrade handler.
pub async fn session_socket(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Main WebSocket loop for one subscriber.
///
/// The socket splits into a sink and a stream. Outgoing traffic is funneled
/// through an mpsc channel: the session's broadcast fan-out holds one sender
/// (as the subscriber sink) and this connection holds another for pong and
/// error replies. A forwarding task drains the channel into the sink, so
/// session I/O never touches the socket directly.
async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);
    let reply_tx = tx.clone();

    let subscriber_id = match state.session_manager.attach(&session_id, tx).await {
        Ok((_context, subscriber_id)) => subscriber_id,
        Err(SessionError::NotFound(_)) => {
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNKNOWN_SESSION,
                    reason: "session not found".into(),
                })))
                .await;
            return;
        }
        Err(e) => {
            // Spawn failed: surface the error on the output channel, then close.
            if let Ok(text) =
                serde_json::to_string(&OutboundMessage::output(format!("\r\n错误: {e}\r\n")))
            {
                let _ = sink.send(Message::Text(text.into())).await;
            }
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    // Forward channel messages to the WebSocket sink.
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let Ok(inbound) = serde_json::from_str::<InboundMessage>(&text) else {
                    debug!("Session {session_id}: dropping malformed WS message");
                    continue;
                };
                match inbound {
                    InboundMessage::Input { data } => {
                        if let Err(e) = state.session_manager.send_input(&session_id, &data).await {
                            let _ = reply_tx
                                .send(OutboundMessage::output(format!("\r\n错误: {e}\r\n")))
                                .await;
                            break;
                        }
                    }
                    InboundMessage::Ping => {
                        if reply_tx.send(OutboundMessage::Pong).await.is_err() {
                            break;
                        }
                    }
                    InboundMessage::Unknown => {}
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.session_manager.detach(&session_id, subscriber_id).await;
    // Dropping our senders ends the forwarding task once the queue (including
    // any final error message) has been flushed.
    drop(reply_tx);
    let _ = send_task.await;
}
