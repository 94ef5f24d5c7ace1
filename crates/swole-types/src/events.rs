use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::OutboundMessage;
use crate::models::PhotoRef;

/// Commands sent FROM the coordinator TO the platform shim.
///
/// `request_id` correlates a command with its `MessageSent` / `SendFailed` /
/// `Reactors` response event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PlatformCommand {
    /// Post a message to a public channel.
    SendChannel {
        request_id: Uuid,
        channel_id: Uuid,
        message: OutboundMessage,
    },

    /// Send a direct message to a user.
    SendDirect {
        request_id: Uuid,
        user_id: Uuid,
        message: OutboundMessage,
    },

    /// Attach a reaction to a previously posted message (vote affordance).
    AddReaction { message_id: Uuid, emoji: String },

    /// Ask the platform who reacted with `emoji` on a message.
    FetchReactors {
        request_id: Uuid,
        message_id: Uuid,
        emoji: String,
    },
}

/// Events sent FROM the platform shim TO the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PlatformEvent {
    /// Shim identifies itself after connecting.
    Hello { shim: String },

    /// A `SendChannel`/`SendDirect` command succeeded.
    MessageSent { request_id: Uuid, message_id: Uuid },

    /// A `SendChannel`/`SendDirect` command failed.
    SendFailed {
        request_id: Uuid,
        reason: SendFailure,
    },

    /// A user sent the bot a direct message.
    DirectMessage {
        user_id: Uuid,
        content: String,
        #[serde(default)]
        photos: Vec<PhotoRef>,
    },

    /// A user added a reaction to a message the bot can see.
    ReactionAdded {
        message_id: Uuid,
        channel_id: Uuid,
        user_id: Uuid,
        username: String,
        emoji: String,
        is_bot: bool,
    },

    /// Response to `FetchReactors`.
    Reactors {
        request_id: Uuid,
        reactors: Vec<Reactor>,
    },
}

/// Why a send command failed, mapped onto the error taxonomy the workflows
/// care about (unreachable recipients are recorded, not retried).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum SendFailure {
    DmsDisabled,
    UserNotFound,
    Other(String),
}

/// One user who reacted on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactor {
    pub user_id: Uuid,
    pub is_bot: bool,
}

/// An inbound reaction event, as handed to the enrollment handler.
#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub message_id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub emoji: String,
    pub is_bot: bool,
}
