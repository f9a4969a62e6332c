//! Message ingress: validate, persist, publish.
//!
//! `submit` is the single write path for messages. It assigns the server id
//! and timestamp, absorbs client retries through a bounded dedup window
//! keyed on `(sender, correlation id)`, and fans the persisted message out
//! on the delivery bus. Unread counters are not touched here; they are
//! derived by the read-state queries or maintained incrementally by clients
//! at delivery time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tutorlink_shared::constants::{MAX_ATTACHMENTS, MAX_BODY_SIZE};
use tutorlink_shared::protocol::ServerEvent;
use tutorlink_shared::types::{ConversationRef, MediaAttachment, Message, UserId};
use tutorlink_shared::ChatError;
use tutorlink_store::Database;

use crate::bus::DeliveryBus;
use crate::error::ServerError;

struct DedupEntry {
    message_id: Uuid,
    seen_at: Instant,
}

pub struct MessageIngress {
    db: Arc<StdMutex<Database>>,
    bus: DeliveryBus,
    dedup: Mutex<HashMap<(UserId, Uuid), DedupEntry>>,
    window: Duration,
}

impl MessageIngress {
    pub fn new(db: Arc<StdMutex<Database>>, bus: DeliveryBus, window: Duration) -> Self {
        Self {
            db,
            bus,
            dedup: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Validate and persist an outbound message, then publish it to every
    /// channel of the conversation.
    ///
    /// A retried submit with the same `(sender, correlation_id)` inside the
    /// dedup window returns the already-persisted message instead of
    /// creating a duplicate.
    pub async fn submit(
        &self,
        sender: UserId,
        conversation: ConversationRef,
        body: Option<String>,
        attachments: Vec<MediaAttachment>,
        correlation_id: Uuid,
    ) -> Result<Message, ServerError> {
        if !Message::has_content(body.as_deref(), &attachments) {
            return Err(ChatError::EmptyMessage.into());
        }
        if body.as_deref().map(|b| b.len() > MAX_BODY_SIZE).unwrap_or(false) {
            return Err(ChatError::BodyTooLarge.into());
        }
        if attachments.len() > MAX_ATTACHMENTS {
            return Err(ChatError::TooManyAttachments.into());
        }

        self.check_membership(sender, &conversation)?;

        // One guard across window check and record, so a retry racing the
        // still-in-flight first attempt cannot slip between them and persist
        // a second copy.
        let mut dedup = self.dedup.lock().await;

        if let Some(entry) = dedup.get(&(sender, correlation_id)) {
            if entry.seen_at.elapsed() < self.window {
                let existing_id = entry.message_id;
                debug!(
                    sender = %sender,
                    correlation = %correlation_id,
                    message = %existing_id,
                    "absorbed duplicate submission"
                );
                drop(dedup);
                let db = self
                    .db
                    .lock()
                    .map_err(|e| ServerError::Internal(format!("store lock poisoned: {e}")))?;
                return Ok(db.message_by_id(existing_id)?);
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation,
            sender,
            body,
            attachments,
            created_at: Utc::now(),
            status: tutorlink_shared::types::DeliveryStatus::Sent,
            read_by: Default::default(),
        };

        {
            let db = self
                .db
                .lock()
                .map_err(|e| ServerError::Internal(format!("store lock poisoned: {e}")))?;
            db.insert_message(&message)?;
        }

        dedup.insert(
            (sender, correlation_id),
            DedupEntry {
                message_id: message.id,
                seen_at: Instant::now(),
            },
        );
        drop(dedup);

        info!(
            message = %message.id,
            conversation = %conversation.key(),
            sender = %sender,
            "message persisted"
        );

        // Fan out. Fire-and-forget from the submitter's perspective: the
        // caller only waits for the persistence round-trip above.
        let event = ServerEvent::MessageCreated {
            message: message.clone(),
            correlation_id: Some(correlation_id),
        };
        for channel in conversation.channels() {
            self.bus.publish(&channel, event.clone()).await;
        }

        Ok(message)
    }

    fn check_membership(
        &self,
        sender: UserId,
        conversation: &ConversationRef,
    ) -> Result<(), ServerError> {
        match conversation {
            ConversationRef::Direct { .. } => {
                if !conversation.is_direct_participant(sender) {
                    return Err(ChatError::NotAMember(sender).into());
                }
            }
            ConversationRef::Group { group_id } => {
                let db = self
                    .db
                    .lock()
                    .map_err(|e| ServerError::Internal(format!("store lock poisoned: {e}")))?;
                if !db.is_member(*group_id, sender)? {
                    return Err(ChatError::NotAMember(sender).into());
                }
            }
        }
        Ok(())
    }

    /// Evict dedup entries older than the retention window. Called from a
    /// periodic background task.
    pub async fn purge_stale(&self) {
        let mut dedup = self.dedup.lock().await;
        let before = dedup.len();
        dedup.retain(|_, entry| entry.seen_at.elapsed() < self.window);
        let evicted = before - dedup.len();
        if evicted > 0 {
            warn!(evicted, remaining = dedup.len(), "purged stale dedup entries");
        }
    }
}
