use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ChannelId, ConversationRef, Message, UserId};

/// Events pushed from the server to a live client over its channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// A message was persisted and is being fanned out. `correlation_id` is
    /// echoed back so the sending client can reconcile its provisional copy;
    /// it is never the canonical id.
    #[serde(rename = "message.created")]
    MessageCreated {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<Uuid>,
    },

    /// A user acknowledged all messages in a conversation.
    #[serde(rename = "conversation.read")]
    ConversationRead {
        conversation: ConversationRef,
        reader_id: UserId,
    },

    /// A user came online or went offline.
    #[serde(rename = "presence.updated")]
    PresenceUpdated { user_id: UserId, online: bool },
}

/// Actions a client sends upstream over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ClientAction {
    #[serde(rename = "subscribe")]
    Subscribe { channel: ChannelId },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { channel: ChannelId },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

impl ClientAction {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::types::DeliveryStatus;

    #[test]
    fn server_event_round_trip() {
        let sender = UserId::new();
        let peer = UserId::new();
        let event = ServerEvent::MessageCreated {
            message: Message {
                id: Uuid::new_v4(),
                conversation: ConversationRef::direct(sender, peer),
                sender,
                body: Some("hello".into()),
                attachments: vec![],
                created_at: Utc::now(),
                status: DeliveryStatus::Sent,
                read_by: Default::default(),
            },
            correlation_id: Some(Uuid::new_v4()),
        };

        let json = event.to_json().unwrap();
        let restored = ServerEvent::from_json(&json).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn event_type_tags_are_stable() {
        let event = ServerEvent::PresenceUpdated {
            user_id: UserId::new(),
            online: true,
        };
        let json = event.to_json().unwrap();
        assert!(json.contains(r#""type":"presence.updated""#));

        let action = ClientAction::Subscribe {
            channel: ChannelId::User(UserId::new()),
        };
        let json = action.to_json().unwrap();
        assert!(json.contains(r#""type":"subscribe""#));
    }

    #[test]
    fn malformed_frame_is_an_error_not_a_panic() {
        assert!(ClientAction::from_json("{\"type\":\"launch-missiles\"}").is_err());
        assert!(ServerEvent::from_json("not even json").is_err());
    }
}
