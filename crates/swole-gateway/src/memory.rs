//! In-memory [`ChatGateway`] with scripted replies, for workflow tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use swole_types::content::OutboundMessage;
use swole_types::events::Reactor;

use crate::{ChatGateway, GatewayError, InboundReply, ReplyFilter};

#[derive(Default)]
pub struct InMemoryGateway {
    sent_channel: Mutex<Vec<(Uuid, OutboundMessage)>>,
    sent_dms: Mutex<Vec<(Uuid, OutboundMessage)>>,
    reactions: Mutex<Vec<(Uuid, String)>>,
    /// Scripted DM replies per user, consumed front to back.
    replies: Mutex<HashMap<Uuid, VecDeque<InboundReply>>>,
    /// Users whose DMs fail with DmsDisabled.
    unreachable: Mutex<HashSet<Uuid>>,
    /// Scripted reactor lists per (message, emoji).
    reactor_lists: Mutex<HashMap<(Uuid, String), Vec<Reactor>>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_reply(&self, user_id: Uuid, reply: InboundReply) {
        self.replies
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default()
            .push_back(reply);
    }

    pub fn script_text(&self, user_id: Uuid, content: &str) {
        self.script_reply(
            user_id,
            InboundReply {
                content: content.to_string(),
                photos: vec![],
            },
        );
    }

    pub fn set_unreachable(&self, user_id: Uuid) {
        self.unreachable.lock().unwrap().insert(user_id);
    }

    pub fn set_reactors(&self, message_id: Uuid, emoji: &str, reactors: Vec<Reactor>) {
        self.reactor_lists
            .lock()
            .unwrap()
            .insert((message_id, emoji.to_string()), reactors);
    }

    pub fn channel_posts(&self) -> Vec<(Uuid, OutboundMessage)> {
        self.sent_channel.lock().unwrap().clone()
    }

    pub fn dms(&self) -> Vec<(Uuid, OutboundMessage)> {
        self.sent_dms.lock().unwrap().clone()
    }

    pub fn dms_to(&self, user_id: Uuid) -> Vec<OutboundMessage> {
        self.sent_dms
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn reactions_added(&self) -> Vec<(Uuid, String)> {
        self.reactions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for InMemoryGateway {
    async fn send_channel(
        &self,
        channel_id: Uuid,
        message: OutboundMessage,
    ) -> Result<Uuid, GatewayError> {
        self.sent_channel.lock().unwrap().push((channel_id, message));
        Ok(Uuid::new_v4())
    }

    async fn send_dm(
        &self,
        user_id: Uuid,
        message: OutboundMessage,
    ) -> Result<Uuid, GatewayError> {
        if self.unreachable.lock().unwrap().contains(&user_id) {
            return Err(GatewayError::DmsDisabled);
        }
        self.sent_dms.lock().unwrap().push((user_id, message));
        Ok(Uuid::new_v4())
    }

    async fn await_dm_reply(
        &self,
        user_id: Uuid,
        filter: ReplyFilter,
        _timeout: Duration,
    ) -> Result<InboundReply, GatewayError> {
        // Scripted queue stands in for the user typing; running out of
        // scripted messages plays as a timeout.
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.entry(user_id).or_default();
        while let Some(reply) = queue.pop_front() {
            if filter.matches(&reply) {
                return Ok(reply);
            }
        }
        Err(GatewayError::Timeout)
    }

    async fn add_reaction(&self, message_id: Uuid, emoji: &str) -> Result<(), GatewayError> {
        self.reactions
            .lock()
            .unwrap()
            .push((message_id, emoji.to_string()));
        Ok(())
    }

    async fn reactors(
        &self,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<Vec<Reactor>, GatewayError> {
        Ok(self
            .reactor_lists
            .lock()
            .unwrap()
            .get(&(message_id, emoji.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
