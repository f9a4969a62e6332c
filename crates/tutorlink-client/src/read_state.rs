//! Per-conversation unread counters.
//!
//! Counters are a per-device view: incremented as messages arrive for
//! conversations the user is not looking at, reset when the conversation is
//! acknowledged, and corrected wholesale from the server's counts on a
//! conversation-list refresh.

use std::collections::HashMap;

use tutorlink_shared::types::{ConversationRef, UserId};

#[derive(Default)]
pub struct UnreadCounters {
    counts: HashMap<String, u64>,
    active: Option<ConversationRef>,
}

/// What the caller should do after an arrival was recorded.
#[derive(Debug, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// Not counted: the user sent it themselves.
    OwnMessage,
    /// The conversation is on screen; fire a read acknowledgment upstream.
    AcknowledgeNow,
    /// Counted against a background conversation.
    Counted,
}

impl UnreadCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch which conversation is on screen. Entering a conversation does
    /// not reset its counter by itself; the reset happens when the
    /// acknowledgment round-trip succeeds.
    pub fn set_active(&mut self, conversation: Option<ConversationRef>) {
        self.active = conversation;
    }

    pub fn active(&self) -> Option<ConversationRef> {
        self.active
    }

    /// Record an arriving message.
    pub fn on_arrival(
        &mut self,
        conversation: &ConversationRef,
        sender: UserId,
        me: UserId,
    ) -> ArrivalOutcome {
        if sender == me {
            return ArrivalOutcome::OwnMessage;
        }
        if self.active == Some(*conversation) {
            return ArrivalOutcome::AcknowledgeNow;
        }
        *self.counts.entry(conversation.key()).or_insert(0) += 1;
        ArrivalOutcome::Counted
    }

    /// Reset a conversation's counter after a successful acknowledgment.
    /// Idempotent; a repeat reset stays at zero.
    pub fn reset(&mut self, conversation: &ConversationRef) {
        self.counts.insert(conversation.key(), 0);
    }

    /// Overwrite a counter with the server's authoritative count.
    pub fn correct(&mut self, conversation: &ConversationRef, count: u64) {
        self.counts.insert(conversation.key(), count);
    }

    pub fn count(&self, conversation: &ConversationRef) -> u64 {
        self.counts.get(&conversation.key()).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}
