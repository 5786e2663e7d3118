use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{info, warn};

use ping_sync::Session;
use ping_types::api::Claims;
use ping_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may take to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// How much of a rejected frame ends up in the log.
const RAW_PREVIEW_CHARS: usize = 200;

/// Handle a single WebSocket connection: `Identify`, `Ready`, then commands
/// until either side goes away. Every live query the client opened is
/// closed when this returns.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let (mut sender, mut receiver) = socket.split();

    let session = match wait_for_identify(&mut receiver, dispatcher.jwt_secret()).await {
        Some(session) => session,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} connected to gateway", session.user_id);

    let ready = GatewayEvent::Ready {
        user_id: session.user_id,
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let (conn, mut events) = dispatcher.connect(session).await;
    let conn = Arc::new(conn);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward snapshots and errors -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
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
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_conn = conn.clone();
    let recv_dispatcher = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => recv_dispatcher.handle_command(&recv_conn, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            recv_conn.session().user_id,
                            e,
                            preview(&text, RAW_PREVIEW_CHARS)
                        );
                        recv_conn.send(GatewayEvent::Error {
                            message: format!("bad command: {}", e),
                        });
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

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(&conn).await;
    info!("{} disconnected from gateway", conn.session().user_id);
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Dropping unserializable event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

/// The first `max` characters of `text`, cut on a character boundary.
fn preview(text: &str, max: usize) -> &str {
    text.char_indices().nth(max).map_or(text, |(i, _)| &text[..i])
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Session> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(Session {
                        user_id: token_data.claims.sub,
                        email: token_data.claims.email,
                    });
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_cuts_on_char_boundaries() {
        assert_eq!(preview("short", RAW_PREVIEW_CHARS), "short");
        assert_eq!(preview("abcdef", 3), "abc");

        // 3-byte characters: byte 200 falls inside one
        let euros = "€".repeat(70);
        let cut = preview(&euros, RAW_PREVIEW_CHARS);
        assert_eq!(cut, euros);

        let long = "€".repeat(250);
        let cut = preview(&long, RAW_PREVIEW_CHARS);
        assert_eq!(cut.chars().count(), RAW_PREVIEW_CHARS);
        assert_eq!(cut.len(), RAW_PREVIEW_CHARS * 3);
    }
}
