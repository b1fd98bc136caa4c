use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ClientRef, MessageId, UserId},
    protocol::ConfirmedMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub server_id: Option<MessageId>,
    pub client_ref: Option<ClientRef>,
    pub sender_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub delivery: Delivery,
}

impl LogEntry {
    pub fn from_record(record: &ConfirmedMessage) -> Self {
        Self {
            server_id: Some(record.server_id),
            client_ref: record.client_ref.clone(),
            sender_id: record.sender_id,
            content: record.content.clone(),
            timestamp: record.sent_at,
            delivery: Delivery::Confirmed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Promoted,
    Duplicate,
}

#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    seen: HashSet<MessageId>,
}

impl MessageLog {
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn seed(&mut self, history: impl IntoIterator<Item = ConfirmedMessage>) {
        for record in history {
            self.merge_confirmed(&record);
        }
    }

    /// Merge rules, applied in order: a known `server_id` is a no-op; a
    /// matching `client_ref` promotes the provisional entry under the
    /// permanent id; anything else inserts a confirmed entry in timestamp
    /// order. Every confirmation path (durable response, channel echo,
    /// history resync) goes through here, so arrival order never matters.
    pub fn merge_confirmed(&mut self, record: &ConfirmedMessage) -> MergeOutcome {
        if self.seen.contains(&record.server_id) {
            return MergeOutcome::Duplicate;
        }

        if let Some(reference) = record.client_ref.as_ref() {
            let position = self.entries.iter().position(|entry| {
                entry.server_id.is_none() && entry.client_ref.as_ref() == Some(reference)
            });
            if let Some(position) = position {
                let mut entry = self.entries.remove(position);
                entry.server_id = Some(record.server_id);
                entry.content = record.content.clone();
                entry.timestamp = record.sent_at;
                entry.delivery = Delivery::Confirmed;
                self.seen.insert(record.server_id);
                self.insert_ordered(entry);
                return MergeOutcome::Promoted;
            }
        }

        self.seen.insert(record.server_id);
        self.insert_ordered(LogEntry::from_record(record));
        MergeOutcome::Inserted
    }

    pub(crate) fn insert_pending(&mut self, entry: LogEntry) {
        self.insert_ordered(entry);
    }

    /// Removes a provisional entry, handing its content back. A no-op once
    /// the entry was promoted.
    pub(crate) fn roll_back(&mut self, reference: &ClientRef) -> Option<String> {
        let position = self.entries.iter().position(|entry| {
            entry.server_id.is_none() && entry.client_ref.as_ref() == Some(reference)
        })?;
        Some(self.entries.remove(position).content)
    }

    /// Flags a provisional entry that never resolved. Returns false if it was
    /// confirmed or rolled back in the meantime.
    pub(crate) fn mark_failed(&mut self, reference: &ClientRef) -> bool {
        let entry = self.entries.iter_mut().find(|entry| {
            entry.delivery == Delivery::Pending && entry.client_ref.as_ref() == Some(reference)
        });
        match entry {
            Some(entry) => {
                entry.delivery = Delivery::Failed;
                true
            }
            None => false,
        }
    }

    pub fn find_by_server_id(&self, server_id: MessageId) -> Option<&LogEntry> {
        self.entries
            .iter()
            .find(|entry| entry.server_id == Some(server_id))
    }

    pub fn latest_confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter(|entry| entry.delivery == Delivery::Confirmed)
            .map(|entry| entry.timestamp)
            .max()
    }

    fn insert_ordered(&mut self, entry: LogEntry) {
        let key = sort_key(&entry);
        let index = self
            .entries
            .partition_point(|existing| sort_key(existing) <= key);
        self.entries.insert(index, entry);
    }
}

// Equal timestamps order by server id, with provisional entries after
// confirmed ones.
fn sort_key(entry: &LogEntry) -> (DateTime<Utc>, i64) {
    (entry.timestamp, entry.server_id.map_or(i64::MAX, |id| id.0))
}

#[cfg(test)]
#[path = "tests/log_tests.rs"]
mod tests;
