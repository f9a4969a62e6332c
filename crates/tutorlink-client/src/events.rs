//! Inbound event dispatch.
//!
//! Every live event maps to one pure state transition on [`ChatState`]. The
//! transitions return effects instead of doing I/O, so the whole table is
//! unit-testable without a network.

use tracing::debug;

use tutorlink_shared::protocol::ServerEvent;
use tutorlink_shared::types::ConversationRef;

use crate::read_state::ArrivalOutcome;
use crate::state::ChatState;

/// Side effects the session must carry out after a state transition.
#[derive(Debug, PartialEq, Eq)]
pub enum Effect {
    /// The arriving message targets the on-screen conversation: fire a read
    /// acknowledgment upstream.
    Acknowledge(ConversationRef),
}

pub fn apply(state: &mut ChatState, event: ServerEvent) -> Vec<Effect> {
    match event {
        ServerEvent::MessageCreated {
            message,
            correlation_id,
        } => {
            let conversation = message.conversation;
            let sender = message.sender;
            let me = state.me;

            state.timeline(conversation).confirm(message, correlation_id);

            match state.unread.on_arrival(&conversation, sender, me) {
                ArrivalOutcome::AcknowledgeNow => vec![Effect::Acknowledge(conversation)],
                ArrivalOutcome::OwnMessage | ArrivalOutcome::Counted => vec![],
            }
        }

        ServerEvent::ConversationRead {
            conversation,
            reader_id,
        } => {
            if reader_id == state.me {
                // Our own acknowledgment from another device: the
                // conversation is caught up there, so the counter clears.
                state.unread.reset(&conversation);
            }
            state.timeline(conversation).apply_read(reader_id);
            vec![]
        }

        ServerEvent::PresenceUpdated { user_id, online } => {
            debug!(user = %user_id, online, "presence updated");
            state.set_presence(user_id, online);
            vec![]
        }
    }
}
