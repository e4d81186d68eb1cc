//! WebSocket handler for the live circle feed
//!
//! One connection per token: the token in the upgrade path is the
//! subscription, there is no subscribe/unsubscribe protocol. The server
//! pushes the full authoritative circle on every repository event.
//!
//! ## Protocol
//!
//! ### Client → Server
//! ```json
//! {"type": "ping"}
//! ```
//!
//! ### Server → Client
//! ```json
//! {"type": "circle", "mode": "edit", "circle": {...}}
//! {"type": "removed"}
//! {"type": "heartbeat", "timestamp": "..."}
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::model::{AccessMode, Circle};
use crate::repo::CircleRepository;
use crate::response;

/// Heartbeat cadence for idle connections.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Messages from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keep the connection alive
    Ping,
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Authoritative circle state (initial and on every change)
    Circle { mode: AccessMode, circle: Circle },
    /// The circle is gone from the store
    Removed,
    /// Periodic heartbeat
    Heartbeat { timestamp: String },
}

/// Check if the request is a WebSocket upgrade request
pub fn is_websocket_upgrade(req: &Request<Incoming>) -> bool {
    hyper_tungstenite::is_upgrade_request(req)
}

/// Handle WebSocket upgrade for a resolved circle feed
pub fn handle_feed_upgrade(
    mut req: Request<Incoming>,
    repo: Arc<CircleRepository>,
    circle: Circle,
    mode: AccessMode,
) -> Response<Full<Bytes>> {
    let (response, websocket) = match hyper_tungstenite::upgrade(&mut req, None) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "WebSocket upgrade failed");
            return response::bad_request("Expected WebSocket upgrade");
        }
    };

    info!(circle_id = %circle.id, mode = ?mode, "Feed upgrade accepted");

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws_stream) => {
                if let Err(e) = handle_connection(ws_stream, repo, circle, mode).await {
                    warn!(error = %e, "Feed connection error");
                }
            }
            Err(e) => {
                warn!(error = %e, "WebSocket handshake failed");
            }
        }
    });

    response
}

/// Handle an established feed connection
async fn handle_connection(
    ws_stream: tokio_tungstenite::WebSocketStream<
        hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>,
    >,
    repo: Arc<CircleRepository>,
    circle: Circle,
    mode: AccessMode,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let circle_id = circle.id.clone();
    let mut feed = repo.subscribe(&circle_id);
    // First tick one interval out; the initial state just went over the wire
    let mut heartbeat_timer = tokio::time::interval_at(
        tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    );

    // Initial full state so the client never renders from nothing. Re-read
    // after subscribing: the copy resolved during the handshake may predate
    // a write that was broadcast before this feed existed.
    let current = repo
        .get_by_id(&circle_id)
        .await
        .ok()
        .flatten()
        .unwrap_or(circle);
    let initial = FeedMessage::Circle { mode, circle: current };
    ws_sink
        .send(WsMessage::Text(serde_json::to_string(&initial)?.into()))
        .await?;

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Ping) => {
                                let heartbeat = FeedMessage::Heartbeat {
                                    timestamp: chrono::Utc::now().to_rfc3339(),
                                };
                                let json = serde_json::to_string(&heartbeat)?;
                                ws_sink.send(WsMessage::Text(json.into())).await?;
                            }
                            Err(e) => {
                                warn!(error = %e, text = %text, "Failed to parse client message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        ws_sink.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) => {
                        info!(circle_id = %circle_id, "Feed client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Feed receive error");
                        break;
                    }
                    None => break,
                }
            }

            push = feed.next() => {
                match push {
                    Some(Some(updated)) => {
                        let message = FeedMessage::Circle { mode, circle: updated };
                        let json = serde_json::to_string(&message)?;
                        if let Err(e) = ws_sink.send(WsMessage::Text(json.into())).await {
                            warn!(error = %e, "Failed to push circle state");
                            break;
                        }
                    }
                    Some(None) => {
                        debug!(circle_id = %circle_id, "Circle removed, closing feed");
                        let json = serde_json::to_string(&FeedMessage::Removed)?;
                        let _ = ws_sink.send(WsMessage::Text(json.into())).await;
                        break;
                    }
                    None => {
                        info!(circle_id = %circle_id, "Repository feed closed");
                        break;
                    }
                }
            }

            _ = heartbeat_timer.tick() => {
                let heartbeat = FeedMessage::Heartbeat {
                    timestamp: chrono::Utc::now().to_rfc3339(),
                };
                let json = serde_json::to_string(&heartbeat)?;
                if let Err(e) = ws_sink.send(WsMessage::Text(json.into())).await {
                    warn!(error = %e, "Failed to send heartbeat");
                    break;
                }
            }
        }
    }

    info!(circle_id = %circle_id, "Feed connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_parsing() {
        let ping_json = r#"{"type": "ping"}"#;
        let msg: ClientMessage = serde_json::from_str(ping_json).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn feed_message_tagging() {
        let msg = FeedMessage::Heartbeat {
            timestamp: "2026-08-29T00:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"heartbeat\""));

        let removed = serde_json::to_string(&FeedMessage::Removed).unwrap();
        assert!(removed.contains("\"type\":\"removed\""));
    }
}
