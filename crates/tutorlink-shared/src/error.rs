use thiserror::Error;
use uuid::Uuid;

use crate::types::UserId;

/// Error taxonomy of the messaging core.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Submit with neither body text nor attachments.
    #[error("Message must have text or at least one attachment")]
    EmptyMessage,

    /// Body text exceeds the maximum size.
    #[error("Message body is too large")]
    BodyTooLarge,

    /// More attachments than a single message may carry.
    #[error("Too many attachments")]
    TooManyAttachments,

    /// Sender is not a participant or member of the target conversation.
    #[error("User {0} is not a participant of this conversation")]
    NotAMember(UserId),

    /// A retried submit matched the dedup window. Absorbed by the ingress
    /// service, never surfaced to the client.
    #[error("Duplicate submission for correlation id {0}")]
    DuplicateSubmission(Uuid),

    /// Transport-level failure; retried with backoff by the connection
    /// manager.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Handshake rejected. Terminal: the session moves straight to closed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A message was already marked read by this user. Benign no-op.
    #[error("Message already marked read")]
    ReadStateConflict,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    /// Validation errors are returned synchronously to the submitting client
    /// and never retried automatically.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyMessage
                | ChatError::BodyTooLarge
                | ChatError::TooManyAttachments
                | ChatError::NotAMember(_)
        )
    }
}
