use std::collections::HashMap;

use shared::{
    domain::{EventId, RsvpStatus, UserId},
    protocol::RsvpEntry,
};

#[derive(Debug, Clone)]
pub struct RsvpAggregate {
    event_id: EventId,
    viewer_id: UserId,
    responses: HashMap<UserId, RsvpStatus>,
}

impl RsvpAggregate {
    pub fn new(event_id: EventId, viewer_id: UserId) -> Self {
        Self {
            event_id,
            viewer_id,
            responses: HashMap::new(),
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn status_of(&self, user_id: UserId) -> Option<RsvpStatus> {
        self.responses.get(&user_id).copied()
    }

    pub fn viewer_status(&self) -> Option<RsvpStatus> {
        self.status_of(self.viewer_id)
    }

    pub fn snapshot(&self) -> Vec<RsvpEntry> {
        let mut entries: Vec<_> = self
            .responses
            .iter()
            .map(|(user_id, status)| RsvpEntry {
                user_id: *user_id,
                status: *status,
            })
            .collect();
        entries.sort_by_key(|entry| entry.user_id);
        entries
    }

    /// Applies one update off the stream. Returns whether anything changed.
    pub fn apply_update(&mut self, user_id: UserId, status: RsvpStatus) -> bool {
        self.responses.insert(user_id, status) != Some(status)
    }

    /// Upserts a fetched aggregate. Merging never removes absent users, so
    /// the viewer's stored status only moves when the payload explicitly
    /// carries an entry for them.
    pub fn merge_snapshot(&mut self, entries: &[RsvpEntry]) -> bool {
        let mut changed = false;
        for entry in entries {
            changed |= self.apply_update(entry.user_id, entry.status);
        }
        changed
    }
}

#[cfg(test)]
#[path = "tests/rsvp_tests.rs"]
mod tests;
