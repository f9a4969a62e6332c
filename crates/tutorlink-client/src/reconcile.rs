//! Optimistic message reconciliation.
//!
//! A send appends a provisional message to the conversation timeline right
//! away, before the server round-trip. When the server confirms (through the
//! HTTP response or the echoed live event, whichever lands first) the
//! provisional entry is replaced in place by the canonical message. Peer
//! messages are inserted in server-timestamp order; provisional entries stay
//! pinned at the tail in local send order until confirmed.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use tutorlink_shared::types::{
    ConversationRef, DeliveryStatus, MediaAttachment, Message, UserId,
};

/// The ordered message timeline of one conversation.
pub struct ConversationTimeline {
    conversation: ConversationRef,
    entries: Vec<Message>,
    /// correlation id -> index of the provisional entry it will confirm.
    pending: HashMap<Uuid, usize>,
    /// Server ids already present, for duplicate suppression.
    confirmed_ids: HashSet<Uuid>,
}

impl ConversationTimeline {
    pub fn new(conversation: ConversationRef) -> Self {
        Self {
            conversation,
            entries: Vec::new(),
            pending: HashMap::new(),
            confirmed_ids: HashSet::new(),
        }
    }

    pub fn conversation(&self) -> ConversationRef {
        self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    /// Append a provisional message and return it together with the
    /// correlation id the caller must use for the actual submit.
    pub fn send(
        &mut self,
        sender: UserId,
        body: Option<String>,
        attachments: Vec<MediaAttachment>,
    ) -> (Uuid, Message) {
        let correlation_id = Uuid::new_v4();
        let message = Message {
            id: correlation_id,
            conversation: self.conversation,
            sender,
            body,
            attachments,
            created_at: Utc::now(),
            status: DeliveryStatus::Sending,
            read_by: Default::default(),
        };

        self.entries.push(message.clone());
        self.pending.insert(correlation_id, self.entries.len() - 1);
        (correlation_id, message)
    }

    /// Apply a server-confirmed message.
    ///
    /// If `correlation_id` matches a pending provisional entry, that entry
    /// is replaced in place. Otherwise the message is a peer's (or our own
    /// from another device): duplicates by id are dropped, new ones are
    /// inserted in `created_at` order ahead of the provisional tail.
    pub fn confirm(&mut self, message: Message, correlation_id: Option<Uuid>) {
        if self.confirmed_ids.contains(&message.id) {
            debug!(message = %message.id, "dropping duplicate confirmed message");
            return;
        }

        if let Some(idx) = correlation_id.and_then(|c| self.pending.remove(&c)) {
            self.confirmed_ids.insert(message.id);
            self.entries[idx] = message;
            return;
        }

        self.confirmed_ids.insert(message.id);
        let at = self
            .entries
            .iter()
            .position(|m| is_provisional(m) || m.created_at > message.created_at)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, message);

        // Pending entries after the insertion point shift right by one.
        for idx in self.pending.values_mut() {
            if *idx >= at {
                *idx += 1;
            }
        }
    }

    /// Mark a provisional send as failed. The entry is retained so the user
    /// can retry or discard it; the correlation id stays reserved.
    pub fn mark_failed(&mut self, correlation_id: Uuid) {
        if let Some(&idx) = self.pending.get(&correlation_id) {
            self.entries[idx].status = DeliveryStatus::Failed;
        }
    }

    /// Flip a failed entry back to `Sending` and hand back a copy for
    /// resubmission. The same correlation id is reused so the server dedup
    /// window absorbs the case where the first attempt did land.
    pub fn retry_failed(&mut self, correlation_id: Uuid) -> Option<Message> {
        let &idx = self.pending.get(&correlation_id)?;
        if self.entries[idx].status != DeliveryStatus::Failed {
            return None;
        }
        self.entries[idx].status = DeliveryStatus::Sending;
        Some(self.entries[idx].clone())
    }

    /// Drop a failed entry entirely.
    pub fn discard_failed(&mut self, correlation_id: Uuid) {
        let Some(idx) = self.pending.get(&correlation_id).copied() else {
            return;
        };
        if self.entries[idx].status != DeliveryStatus::Failed {
            return;
        }
        self.pending.remove(&correlation_id);
        self.entries.remove(idx);
        for other in self.pending.values_mut() {
            if *other > idx {
                *other -= 1;
            }
        }
    }

    /// Record a reader acknowledgment on every message they did not send.
    pub fn apply_read(&mut self, reader: UserId) {
        for message in &mut self.entries {
            if message.sender != reader && !is_provisional(message) {
                message.read_by.insert(reader);
                if message.conversation.direct_peer(message.sender) == Some(reader) {
                    message.status = DeliveryStatus::Read;
                }
            }
        }
    }

    /// Seed the timeline from a history fetch. Provisional entries are kept
    /// at the tail; already-known ids are skipped.
    pub fn merge_history(&mut self, history: Vec<Message>) {
        for message in history {
            self.confirm(message, None);
        }
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|m| m.status == DeliveryStatus::Failed)
            .count()
    }
}

fn is_provisional(message: &Message) -> bool {
    matches!(
        message.status,
        DeliveryStatus::Sending | DeliveryStatus::Failed
    )
}
