use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ClientRef, Context, EventId, GroupId, MessageId, PresenceState, RsvpStatus, UserId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "message_send")]
    Chat(ChatFrame),
    #[serde(rename = "event_response_update")]
    RsvpUpdate(RsvpFrame),
    #[serde(rename = "presence")]
    Presence(PresenceFrame),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFrame {
    pub sender_id: UserId,
    #[serde(flatten)]
    pub target: ChatTarget,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<ClientRef>,
    pub timestamp: DateTime<Utc>,
}

// Field names are disjoint, so the untagged repr stays unambiguous on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatTarget {
    Receiver { receiver_id: UserId },
    Group { group_id: GroupId },
    Event { event_id: EventId },
}

impl ChatTarget {
    pub fn for_context(context: Context) -> Self {
        match context {
            Context::Group(group_id) => ChatTarget::Group { group_id },
            Context::Event(event_id) => ChatTarget::Event { event_id },
            Context::Private(peer_id) => ChatTarget::Receiver {
                receiver_id: peer_id,
            },
        }
    }
}

impl ChatFrame {
    /// Resolves which context this frame belongs to from the viewer's side.
    /// Direct frames between two other users resolve to no context at all.
    pub fn target_context(&self, viewer_id: UserId) -> Option<Context> {
        match self.target {
            ChatTarget::Group { group_id } => Some(Context::Group(group_id)),
            ChatTarget::Event { event_id } => Some(Context::Event(event_id)),
            ChatTarget::Receiver { receiver_id } => {
                if self.sender_id == viewer_id {
                    Some(Context::Private(receiver_id))
                } else if receiver_id == viewer_id {
                    Some(Context::Private(self.sender_id))
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsvpFrame {
    pub sender_id: UserId,
    pub event_id: EventId,
    pub status: RsvpStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceFrame {
    pub sender_id: UserId,
    #[serde(default)]
    pub status: PresenceState,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedMessage {
    pub server_id: MessageId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<ClientRef>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    #[serde(flatten)]
    pub target: ChatTarget,
    pub content: String,
    pub client_ref: ClientRef,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsvpEntry {
    pub user_id: UserId,
    pub status: RsvpStatus,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
