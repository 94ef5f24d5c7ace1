//! Chat platform seam. The lifecycle controller and DM workflows talk to a
//! [`ChatGateway`]; in production that is a [`relay::RelayGateway`] bridging
//! to a platform shim over WebSocket, in tests an [`memory::InMemoryGateway`]
//! with scripted replies.

pub mod connection;
pub mod memory;
pub mod relay;

use std::time::Duration;

use async_trait::async_trait;
use swole_types::events::{ReactionEvent, Reactor};
use swole_types::models::PhotoRef;
use swole_types::content::OutboundMessage;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("user has direct messages disabled")]
    DmsDisabled,

    #[error("user not found on the platform")]
    UserNotFound,

    #[error("no platform shim connected")]
    ConnectionClosed,

    #[error("platform error: {0}")]
    Platform(String),
}

impl GatewayError {
    /// True when the recipient cannot be reached at all, as opposed to a
    /// transient delivery problem. Unreachable users are recorded and skipped
    /// rather than retried.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::DmsDisabled | Self::UserNotFound)
    }
}

/// What kind of DM reply a workflow step is waiting for. Non-matching
/// messages are skipped without consuming the step's timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFilter {
    /// Any message carrying text.
    Text,
    /// Any message carrying at least one photo.
    Photo,
    /// The next message, whatever it carries.
    Any,
}

impl ReplyFilter {
    pub fn matches(self, reply: &InboundReply) -> bool {
        match self {
            Self::Text => !reply.content.trim().is_empty(),
            Self::Photo => !reply.photos.is_empty(),
            Self::Any => true,
        }
    }
}

/// A direct message received from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReply {
    pub content: String,
    pub photos: Vec<PhotoRef>,
}

/// Everything the challenge workflows need from the chat platform.
///
/// Send methods resolve once the platform confirms (or refuses) delivery,
/// returning the posted message id on success.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Post a message to a public channel.
    async fn send_channel(
        &self,
        channel_id: Uuid,
        message: OutboundMessage,
    ) -> Result<Uuid, GatewayError>;

    /// Send a direct message to a user.
    async fn send_dm(&self, user_id: Uuid, message: OutboundMessage)
    -> Result<Uuid, GatewayError>;

    /// Wait up to `timeout` for the user's next DM matching `filter`.
    async fn await_dm_reply(
        &self,
        user_id: Uuid,
        filter: ReplyFilter,
        timeout: Duration,
    ) -> Result<InboundReply, GatewayError>;

    /// Seed a reaction on a message so users can click it to vote.
    async fn add_reaction(&self, message_id: Uuid, emoji: &str) -> Result<(), GatewayError>;

    /// List everyone who reacted with `emoji` on a message.
    async fn reactors(&self, message_id: Uuid, emoji: &str)
    -> Result<Vec<Reactor>, GatewayError>;
}

/// Receiver for inbound reaction events (challenge enrollment).
#[async_trait]
pub trait ReactionSink: Send + Sync {
    async fn handle_reaction(&self, event: ReactionEvent);
}
