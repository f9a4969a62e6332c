//! Client-resident chat state: timelines, unread counters and presence.

use std::collections::HashMap;

use tutorlink_shared::types::{ConversationRef, UserId};

use crate::read_state::UnreadCounters;
use crate::reconcile::ConversationTimeline;

pub struct ChatState {
    pub me: UserId,
    timelines: HashMap<String, ConversationTimeline>,
    pub unread: UnreadCounters,
    presence: HashMap<UserId, bool>,
}

impl ChatState {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            timelines: HashMap::new(),
            unread: UnreadCounters::new(),
            presence: HashMap::new(),
        }
    }

    pub fn timeline(&mut self, conversation: ConversationRef) -> &mut ConversationTimeline {
        self.timelines
            .entry(conversation.key())
            .or_insert_with(|| ConversationTimeline::new(conversation))
    }

    pub fn timeline_ref(&self, conversation: &ConversationRef) -> Option<&ConversationTimeline> {
        self.timelines.get(&conversation.key())
    }

    pub fn set_presence(&mut self, user: UserId, online: bool) {
        self.presence.insert(user, online);
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.presence.get(&user).copied().unwrap_or(false)
    }
}
