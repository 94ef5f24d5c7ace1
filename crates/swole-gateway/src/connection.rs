//! WebSocket plumbing for a platform shim connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use swole_types::events::{PlatformEvent, ReactionEvent};

use crate::ReactionSink;
use crate::relay::RelayGateway;

/// Handle a single shim WebSocket: forward relay commands out, route inbound
/// events to the relay and reactions to the enrollment handler.
pub async fn handle_shim_connection(
    socket: WebSocket,
    relay: RelayGateway,
    reactions: Arc<dyn ReactionSink>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut cmd_rx) = relay.attach_shim().await;

    info!("Platform shim connected ({})", conn_id);

    let mut send_task = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            let text = serde_json::to_string(&cmd).unwrap();
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let relay_recv = relay.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<PlatformEvent>(&text) {
                    Ok(PlatformEvent::ReactionAdded {
                        message_id,
                        channel_id,
                        user_id,
                        username,
                        emoji,
                        is_bot,
                    }) => {
                        reactions
                            .handle_reaction(ReactionEvent {
                                message_id,
                                channel_id,
                                user_id,
                                username,
                                emoji,
                                is_bot,
                            })
                            .await;
                    }
                    Ok(event) => relay_recv.handle_event(event).await,
                    Err(e) => {
                        warn!("Bad shim event: {} -- raw: {}", e, log_preview(&text));
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    relay.detach_shim(conn_id).await;
    info!("Platform shim disconnected ({})", conn_id);
}

/// Truncate an undecodable frame for logging without splitting a multi-byte
/// character.
fn log_preview(text: &str) -> &str {
    const MAX_CHARS: usize = 200;
    match text.char_indices().nth(MAX_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_preview_respects_char_boundaries() {
        assert_eq!(log_preview("hello"), "hello");

        let long = "é".repeat(300);
        let cut = log_preview(&long);
        assert_eq!(cut.chars().count(), 200);
        assert!(long.is_char_boundary(cut.len()));
    }
}
