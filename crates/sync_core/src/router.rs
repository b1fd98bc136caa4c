use shared::{
    domain::{Context, RsvpStatus, UserId},
    protocol::{ChatFrame, ConfirmedMessage, Envelope},
};

pub struct MessageRouter {
    context: Context,
    viewer_id: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    Chat(ConfirmedMessage),
    Rsvp { user_id: UserId, status: RsvpStatus },
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Addressed to a different context; dropped without side effects.
    ForeignTarget,
    /// A chat frame without a permanent id cannot be merged idempotently.
    MissingServerId,
    /// Presence is owned by the client-level tracker, never by sessions.
    Presence,
}

impl MessageRouter {
    pub fn new(context: Context, viewer_id: UserId) -> Self {
        Self { context, viewer_id }
    }

    pub fn route(&self, envelope: Envelope) -> RouteDecision {
        match envelope {
            Envelope::Chat(frame) => self.route_chat(frame),
            Envelope::RsvpUpdate(frame) => {
                if self.context == Context::Event(frame.event_id) {
                    RouteDecision::Rsvp {
                        user_id: frame.sender_id,
                        status: frame.status,
                    }
                } else {
                    RouteDecision::Ignore(IgnoreReason::ForeignTarget)
                }
            }
            Envelope::Presence(_) => RouteDecision::Ignore(IgnoreReason::Presence),
        }
    }

    fn route_chat(&self, frame: ChatFrame) -> RouteDecision {
        if frame.target_context(self.viewer_id) != Some(self.context) {
            return RouteDecision::Ignore(IgnoreReason::ForeignTarget);
        }
        let Some(server_id) = frame.server_id else {
            return RouteDecision::Ignore(IgnoreReason::MissingServerId);
        };
        RouteDecision::Chat(ConfirmedMessage {
            server_id,
            sender_id: frame.sender_id,
            content: frame.content,
            client_ref: frame.client_ref,
            sent_at: frame.timestamp,
        })
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
