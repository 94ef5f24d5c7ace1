//! Production [`ChatGateway`]: relays commands to a connected platform shim
//! and correlates the shim's response events back to waiting callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use swole_types::content::OutboundMessage;
use swole_types::events::{PlatformCommand, PlatformEvent, Reactor, SendFailure};

use crate::{ChatGateway, GatewayError, InboundReply, ReplyFilter};

/// How long to wait for the shim to acknowledge a send or reactor fetch.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bridges the workflows to whichever shim connection is currently attached.
/// At most one shim is active; a reconnecting shim replaces the old one.
#[derive(Clone)]
pub struct RelayGateway {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    /// Outbound command channel of the active shim connection, tagged with a
    /// connection id so a stale connection cannot unregister its replacement.
    shim: RwLock<Option<(Uuid, mpsc::UnboundedSender<PlatformCommand>)>>,

    /// request_id -> response slot for in-flight commands.
    pending: Mutex<HashMap<Uuid, oneshot::Sender<PlatformEvent>>>,

    /// user_id -> (waiter_id, sender) for workflows blocked on a DM reply.
    /// One waiter per user; a newer wait replaces the old one.
    reply_waiters: Mutex<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<InboundReply>)>>,
}

impl RelayGateway {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RelayInner {
                shim: RwLock::new(None),
                pending: Mutex::new(HashMap::new()),
                reply_waiters: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Attach a shim connection. Returns (conn_id, command receiver); the
    /// connection task forwards received commands over its socket.
    pub async fn attach_shim(&self) -> (Uuid, mpsc::UnboundedReceiver<PlatformCommand>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shim = self.inner.shim.write().await;
        if shim.is_some() {
            warn!("Replacing existing shim connection");
        }
        *shim = Some((conn_id, tx));
        (conn_id, rx)
    }

    /// Detach a shim connection, but only if conn_id still owns the slot.
    pub async fn detach_shim(&self, conn_id: Uuid) {
        let mut shim = self.inner.shim.write().await;
        if shim.as_ref().is_some_and(|(id, _)| *id == conn_id) {
            *shim = None;
        }
    }

    /// Route an event from the shim to whoever is waiting on it.
    pub async fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::Hello { shim } => {
                debug!("Shim identified as {}", shim);
            }

            PlatformEvent::MessageSent { request_id, .. }
            | PlatformEvent::SendFailed { request_id, .. }
            | PlatformEvent::Reactors { request_id, .. } => {
                let slot = self.inner.pending.lock().await.remove(&request_id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(event);
                    }
                    None => warn!("Response for unknown request {}", request_id),
                }
            }

            PlatformEvent::DirectMessage {
                user_id,
                content,
                photos,
            } => {
                let waiters = self.inner.reply_waiters.lock().await;
                match waiters.get(&user_id) {
                    Some((_, tx)) => {
                        let _ = tx.send(InboundReply { content, photos });
                    }
                    None => debug!("Unsolicited DM from {}, dropping", user_id),
                }
            }

            // Reactions are routed to the ReactionSink by the connection task.
            PlatformEvent::ReactionAdded { .. } => {}
        }
    }

    async fn send_command(&self, cmd: PlatformCommand) -> Result<(), GatewayError> {
        let shim = self.inner.shim.read().await;
        let (_, tx) = shim.as_ref().ok_or(GatewayError::ConnectionClosed)?;
        tx.send(cmd).map_err(|_| GatewayError::ConnectionClosed)
    }

    /// Send a command and wait for its correlated response event.
    async fn request(
        &self,
        request_id: Uuid,
        cmd: PlatformCommand,
    ) -> Result<PlatformEvent, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(request_id, tx);

        if let Err(e) = self.send_command(cmd).await {
            self.inner.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(event)) => Ok(event),
            // Sender dropped: shim connection torn down mid-request.
            Ok(Err(_)) => Err(GatewayError::ConnectionClosed),
            Err(_) => {
                self.inner.pending.lock().await.remove(&request_id);
                Err(GatewayError::Timeout)
            }
        }
    }

    fn send_result(event: PlatformEvent) -> Result<Uuid, GatewayError> {
        match event {
            PlatformEvent::MessageSent { message_id, .. } => Ok(message_id),
            PlatformEvent::SendFailed { reason, .. } => Err(match reason {
                SendFailure::DmsDisabled => GatewayError::DmsDisabled,
                SendFailure::UserNotFound => GatewayError::UserNotFound,
                SendFailure::Other(detail) => GatewayError::Platform(detail),
            }),
            other => Err(GatewayError::Platform(format!(
                "unexpected response: {other:?}"
            ))),
        }
    }
}

impl Default for RelayGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatGateway for RelayGateway {
    async fn send_channel(
        &self,
        channel_id: Uuid,
        message: OutboundMessage,
    ) -> Result<Uuid, GatewayError> {
        let request_id = Uuid::new_v4();
        let event = self
            .request(
                request_id,
                PlatformCommand::SendChannel {
                    request_id,
                    channel_id,
                    message,
                },
            )
            .await?;
        Self::send_result(event)
    }

    async fn send_dm(
        &self,
        user_id: Uuid,
        message: OutboundMessage,
    ) -> Result<Uuid, GatewayError> {
        let request_id = Uuid::new_v4();
        let event = self
            .request(
                request_id,
                PlatformCommand::SendDirect {
                    request_id,
                    user_id,
                    message,
                },
            )
            .await?;
        Self::send_result(event)
    }

    async fn await_dm_reply(
        &self,
        user_id: Uuid,
        filter: ReplyFilter,
        timeout: Duration,
    ) -> Result<InboundReply, GatewayError> {
        let waiter_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner
            .reply_waiters
            .lock()
            .await
            .insert(user_id, (waiter_id, tx));

        let deadline = tokio::time::Instant::now() + timeout;
        let result = loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(reply)) if filter.matches(&reply) => break Ok(reply),
                // Non-matching message: keep waiting on the same deadline.
                Ok(Some(_)) => continue,
                Ok(None) => break Err(GatewayError::ConnectionClosed),
                Err(_) => break Err(GatewayError::Timeout),
            }
        };

        // Unregister only if a newer wait hasn't replaced us.
        let mut waiters = self.inner.reply_waiters.lock().await;
        if waiters.get(&user_id).is_some_and(|(id, _)| *id == waiter_id) {
            waiters.remove(&user_id);
        }
        result
    }

    async fn add_reaction(&self, message_id: Uuid, emoji: &str) -> Result<(), GatewayError> {
        self.send_command(PlatformCommand::AddReaction {
            message_id,
            emoji: emoji.to_string(),
        })
        .await
    }

    async fn reactors(
        &self,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<Vec<Reactor>, GatewayError> {
        let request_id = Uuid::new_v4();
        let event = self
            .request(
                request_id,
                PlatformCommand::FetchReactors {
                    request_id,
                    message_id,
                    emoji: emoji.to_string(),
                },
            )
            .await?;
        match event {
            PlatformEvent::Reactors { reactors, .. } => Ok(reactors),
            other => Err(GatewayError::Platform(format!(
                "unexpected response: {other:?}"
            ))),
        }
    }
}
