use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity, issued and verified by the external auth service.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A delivery-bus destination: one personal channel per user, one channel
/// per group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ChannelId {
    User(UserId),
    Group(GroupId),
}

impl ChannelId {
    pub fn to_topic(&self) -> String {
        match self {
            ChannelId::User(id) => format!("user:{}", id),
            ChannelId::Group(id) => format!("group:{}", id),
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        if let Some(rest) = topic.strip_prefix("user:") {
            return Uuid::parse_str(rest).ok().map(|u| ChannelId::User(UserId(u)));
        }
        if let Some(rest) = topic.strip_prefix("group:") {
            return Uuid::parse_str(rest)
                .ok()
                .map(|u| ChannelId::Group(GroupId(u)));
        }
        None
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_topic())
    }
}

/// Identity of a conversation: an unordered participant pair for direct
/// chats, or a group id. Direct conversations are derived, never stored as
/// entities of their own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConversationRef {
    Direct { a: UserId, b: UserId },
    Group { group_id: GroupId },
}

impl ConversationRef {
    /// Build a direct-pair reference. The pair is canonicalised so that the
    /// same two users always produce the same reference, regardless of
    /// argument order.
    pub fn direct(x: UserId, y: UserId) -> Self {
        if x <= y {
            ConversationRef::Direct { a: x, b: y }
        } else {
            ConversationRef::Direct { a: y, b: x }
        }
    }

    pub fn group(group_id: GroupId) -> Self {
        ConversationRef::Group { group_id }
    }

    /// Whether the given user is one of the direct participants. Group
    /// membership lives in the store and must be checked there.
    pub fn is_direct_participant(&self, user: UserId) -> bool {
        match self {
            ConversationRef::Direct { a, b } => *a == user || *b == user,
            ConversationRef::Group { .. } => false,
        }
    }

    /// For a direct pair, the participant that is not `user`.
    pub fn direct_peer(&self, user: UserId) -> Option<UserId> {
        match self {
            ConversationRef::Direct { a, b } if *a == user => Some(*b),
            ConversationRef::Direct { a, b } if *b == user => Some(*a),
            _ => None,
        }
    }

    /// The bus channels a message in this conversation fans out to:
    /// both personal channels for a direct pair, the group channel otherwise.
    pub fn channels(&self) -> Vec<ChannelId> {
        match self {
            ConversationRef::Direct { a, b } => {
                vec![ChannelId::User(*a), ChannelId::User(*b)]
            }
            ConversationRef::Group { group_id } => vec![ChannelId::Group(*group_id)],
        }
    }

    /// Canonical string key, used in REST paths and as a map key.
    /// `direct:<a>:<b>` (a <= b) or `group:<id>`.
    pub fn key(&self) -> String {
        match self {
            ConversationRef::Direct { a, b } => format!("direct:{}:{}", a, b),
            ConversationRef::Group { group_id } => format!("group:{}", group_id),
        }
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        if let Some(rest) = key.strip_prefix("direct:") {
            let (a, b) = rest.split_once(':')?;
            let a = UserId(Uuid::parse_str(a).ok()?);
            let b = UserId(Uuid::parse_str(b).ok()?);
            return Some(Self::direct(a, b));
        }
        if let Some(rest) = key.strip_prefix("group:") {
            return Some(Self::group(GroupId(Uuid::parse_str(rest).ok()?)));
        }
        None
    }
}

/// Kind of an attached media descriptor, as classified by the upload service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Pdf,
    File,
}

/// Descriptor of an already-uploaded media object. Upload happens before
/// submit; the messaging core only ever sees durable URLs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    pub url: String,
    pub kind: MediaKind,
    /// Size in bytes.
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Duration in seconds, for audio/video.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Display status of a message.
///
/// `Sending` and `Failed` exist only in client memory for provisional
/// messages; the store persists `Sent`, `Delivered` and `Read`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

/// A single chat message. The id and `created_at` are server-assigned at
/// persistence time; client timestamps are never trusted for ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation: ConversationRef,
    pub sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<MediaAttachment>,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    /// Users who have acknowledged the message. Canonical read-state
    /// representation for both conversation kinds; the direct tri-state
    /// status is a projection of this set.
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,
}

impl Message {
    /// A message must carry a non-empty body or at least one attachment.
    pub fn has_content(body: Option<&str>, attachments: &[MediaAttachment]) -> bool {
        body.map(|b| !b.trim().is_empty()).unwrap_or(false) || !attachments.is_empty()
    }

    pub fn is_read_by(&self, user: UserId) -> bool {
        self.read_by.contains(&user)
    }

    /// Status of a direct message as seen by its sender: `Read` once the
    /// peer has acknowledged it, otherwise the persisted status.
    pub fn direct_status(&self) -> DeliveryStatus {
        if let Some(peer) = self.conversation.direct_peer(self.sender) {
            if self.read_by.contains(&peer) {
                return DeliveryStatus::Read;
            }
        }
        self.status
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub user: UserId,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
}

/// An explicit group conversation entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_by: UserId,
    pub members: Vec<GroupMember>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn is_member(&self, user: UserId) -> bool {
        self.members.iter().any(|m| m.user == user)
    }

    pub fn role_of(&self, user: UserId) -> Option<GroupRole> {
        self.members.iter().find(|m| m.user == user).map(|m| m.role)
    }

    pub fn admin_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.role == GroupRole::Admin)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_ref_is_order_independent() {
        let x = UserId::new();
        let y = UserId::new();
        assert_eq!(ConversationRef::direct(x, y), ConversationRef::direct(y, x));
        assert_eq!(
            ConversationRef::direct(x, y).key(),
            ConversationRef::direct(y, x).key()
        );
    }

    #[test]
    fn conversation_key_round_trip() {
        let direct = ConversationRef::direct(UserId::new(), UserId::new());
        assert_eq!(ConversationRef::parse_key(&direct.key()), Some(direct));

        let group = ConversationRef::group(GroupId::new());
        assert_eq!(ConversationRef::parse_key(&group.key()), Some(group));

        assert_eq!(ConversationRef::parse_key("direct:not-a-uuid"), None);
        assert_eq!(ConversationRef::parse_key("something:else"), None);
    }

    #[test]
    fn direct_channels_cover_both_participants() {
        let x = UserId::new();
        let y = UserId::new();
        let channels = ConversationRef::direct(x, y).channels();
        assert_eq!(channels.len(), 2);
        assert!(channels.contains(&ChannelId::User(x)));
        assert!(channels.contains(&ChannelId::User(y)));
    }

    #[test]
    fn message_content_invariant() {
        assert!(!Message::has_content(None, &[]));
        assert!(!Message::has_content(Some("   "), &[]));
        assert!(Message::has_content(Some("hi"), &[]));

        let attachment = MediaAttachment {
            url: "https://media.example/a.png".into(),
            kind: MediaKind::Image,
            size: 1024,
            width: Some(64),
            height: Some(64),
            duration: None,
            filename: None,
            mime_type: Some("image/png".into()),
        };
        assert!(Message::has_content(None, std::slice::from_ref(&attachment)));
    }

    #[test]
    fn direct_status_projects_read_set() {
        let sender = UserId::new();
        let peer = UserId::new();
        let mut msg = Message {
            id: Uuid::new_v4(),
            conversation: ConversationRef::direct(sender, peer),
            sender,
            body: Some("hello".into()),
            attachments: vec![],
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
            read_by: BTreeSet::new(),
        };
        assert_eq!(msg.direct_status(), DeliveryStatus::Sent);

        msg.read_by.insert(peer);
        assert_eq!(msg.direct_status(), DeliveryStatus::Read);
    }

    #[test]
    fn channel_topic_round_trip() {
        let ch = ChannelId::Group(GroupId::new());
        assert_eq!(ChannelId::from_topic(&ch.to_topic()), Some(ch));
        assert_eq!(ChannelId::from_topic("bogus"), None);
    }
}
