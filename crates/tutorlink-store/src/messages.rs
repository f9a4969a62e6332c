//! Message persistence and read-state operations.
//!
//! Timestamps are stored as RFC-3339 with fixed microsecond precision so
//! that lexicographic ordering of the TEXT column matches chronological
//! order (the cursor queries rely on this).

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use uuid::Uuid;

use tutorlink_shared::types::{
    ConversationRef, DeliveryStatus, MediaAttachment, Message, UserId,
};

use crate::database::Database;
use crate::error::{Result, StoreError};

pub(crate) fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_sql(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn status_to_sql(status: DeliveryStatus) -> &'static str {
    match status {
        // Provisional statuses never reach the store; persist them as sent.
        DeliveryStatus::Sending | DeliveryStatus::Failed | DeliveryStatus::Sent => "sent",
        DeliveryStatus::Delivered => "delivered",
        DeliveryStatus::Read => "read",
    }
}

fn status_from_sql(s: &str) -> DeliveryStatus {
    match s {
        "delivered" => DeliveryStatus::Delivered,
        "read" => DeliveryStatus::Read,
        _ => DeliveryStatus::Sent,
    }
}

impl Database {
    /// Insert a persisted message.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let group_id = match &message.conversation {
            ConversationRef::Group { group_id } => Some(group_id.to_string()),
            ConversationRef::Direct { .. } => None,
        };

        let attachments = serde_json::to_string(&message.attachments)?;

        self.conn().execute(
            "INSERT INTO messages (id, conversation, group_id, sender, body, attachments, created_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id.to_string(),
                message.conversation.key(),
                group_id,
                message.sender.to_string(),
                message.body,
                attachments,
                ts_to_sql(&message.created_at),
                status_to_sql(message.status),
            ],
        )?;

        for reader in &message.read_by {
            self.conn().execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    message.id.to_string(),
                    reader.to_string(),
                    ts_to_sql(&Utc::now()),
                ],
            )?;
        }

        Ok(())
    }

    /// Fetch conversation history ordered by `created_at` ascending.
    ///
    /// `cursor` is an exclusive lower bound: only messages strictly newer
    /// than it are returned. Used for both initial loads and offline-gap
    /// recovery.
    pub fn messages_for_conversation(
        &self,
        conversation: &ConversationRef,
        cursor: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation, sender, body, attachments, created_at, status
             FROM messages
             WHERE conversation = ?1 AND created_at > ?2
             ORDER BY created_at ASC
             LIMIT ?3",
        )?;

        let floor = cursor
            .map(|c| ts_to_sql(&c))
            .unwrap_or_else(|| String::new());

        let rows = stmt.query_map(params![conversation.key(), floor, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row??;
            message.read_by = self.read_set(message.id)?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Fetch a single message by id, including its read set.
    pub fn message_by_id(&self, id: Uuid) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                "SELECT id, conversation, sender, body, attachments, created_at, status
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })??;
        message.read_by = self.read_set(message.id)?;
        Ok(message)
    }

    /// Record `viewer`'s read acknowledgment on every message of the
    /// conversation that they did not send and have not yet read.
    ///
    /// Returns the number of newly acknowledged messages. Idempotent: a
    /// repeated call returns 0 and changes nothing.
    pub fn mark_read(&self, conversation: &ConversationRef, viewer: UserId) -> Result<u64> {
        let tx = self.conn().unchecked_transaction()?;

        let modified = tx.execute(
            "INSERT INTO message_reads (message_id, user_id, read_at)
             SELECT m.id, ?2, ?3
             FROM messages m
             WHERE m.conversation = ?1
               AND m.sender != ?2
               AND NOT EXISTS (
                   SELECT 1 FROM message_reads r
                   WHERE r.message_id = m.id AND r.user_id = ?2
               )",
            params![
                conversation.key(),
                viewer.to_string(),
                ts_to_sql(&Utc::now()),
            ],
        )?;

        // For direct pairs the tri-state status is kept in sync with the
        // read set so the sender's view advances to 'read'.
        if matches!(conversation, ConversationRef::Direct { .. }) {
            tx.execute(
                "UPDATE messages SET status = 'read'
                 WHERE conversation = ?1 AND sender != ?2 AND status != 'read'",
                params![conversation.key(), viewer.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(modified as u64)
    }

    /// Count of messages in the conversation not authored by `viewer` and
    /// not yet acknowledged by them.
    pub fn unread_count(&self, conversation: &ConversationRef, viewer: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*)
             FROM messages m
             WHERE m.conversation = ?1
               AND m.sender != ?2
               AND NOT EXISTS (
                   SELECT 1 FROM message_reads r
                   WHERE r.message_id = m.id AND r.user_id = ?2
               )",
            params![conversation.key(), viewer.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn read_set(&self, message_id: Uuid) -> Result<BTreeSet<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM message_reads WHERE message_id = ?1")?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut readers = BTreeSet::new();
        for row in rows {
            readers.insert(UserId(Uuid::parse_str(&row?)?));
        }
        Ok(readers)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Message>> {
    let id_str: String = row.get(0)?;
    let conversation_key: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let body: Option<String> = row.get(3)?;
    let attachments_json: String = row.get(4)?;
    let ts_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;

    // Defer fallible domain parsing to a nested Result so rusqlite's own
    // row mapping stays infallible.
    Ok(build_message(
        id_str,
        conversation_key,
        sender_str,
        body,
        attachments_json,
        ts_str,
        status_str,
    ))
}

fn build_message(
    id_str: String,
    conversation_key: String,
    sender_str: String,
    body: Option<String>,
    attachments_json: String,
    ts_str: String,
    status_str: String,
) -> Result<Message> {
    let conversation = ConversationRef::parse_key(&conversation_key)
        .ok_or_else(|| StoreError::Migration(format!("bad conversation key: {conversation_key}")))?;
    let attachments: Vec<MediaAttachment> = serde_json::from_str(&attachments_json)?;

    Ok(Message {
        id: Uuid::parse_str(&id_str)?,
        conversation,
        sender: UserId(Uuid::parse_str(&sender_str)?),
        body,
        attachments,
        created_at: ts_from_sql(&ts_str)?,
        status: status_from_sql(&status_str),
        read_by: BTreeSet::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tutorlink_shared::types::MediaKind;

    fn sample_message(
        conversation: ConversationRef,
        sender: UserId,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation,
            sender,
            body: Some(body.to_string()),
            attachments: vec![],
            created_at,
            status: DeliveryStatus::Sent,
            read_by: BTreeSet::new(),
        }
    }

    #[test]
    fn insert_and_fetch_ordered_ascending() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = ConversationRef::direct(a, b);
        let base = Utc::now();

        // Insert out of chronological order.
        for offset in [3, 1, 2] {
            let msg = sample_message(conv, a, &format!("m{offset}"), base + Duration::seconds(offset));
            db.insert_message(&msg).unwrap();
        }

        let history = db.messages_for_conversation(&conv, None, 50).unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.body.clone().unwrap()).collect();
        assert_eq!(bodies, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn cursor_is_exclusive_lower_bound() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = ConversationRef::direct(a, b);
        let base = Utc::now();

        for offset in 0..5 {
            db.insert_message(&sample_message(
                conv,
                a,
                &format!("m{offset}"),
                base + Duration::seconds(offset),
            ))
            .unwrap();
        }

        let cursor = base + Duration::seconds(2);
        let page = db.messages_for_conversation(&conv, Some(cursor), 50).unwrap();
        let bodies: Vec<_> = page.iter().map(|m| m.body.clone().unwrap()).collect();
        assert_eq!(bodies, vec!["m3", "m4"]);
    }

    #[test]
    fn mark_read_is_idempotent_and_counts() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = ConversationRef::direct(a, b);
        let base = Utc::now();

        for offset in 0..3 {
            db.insert_message(&sample_message(
                conv,
                a,
                "hi",
                base + Duration::seconds(offset),
            ))
            .unwrap();
        }
        // One message from the reader themselves; must not count.
        db.insert_message(&sample_message(conv, b, "yo", base + Duration::seconds(10)))
            .unwrap();

        assert_eq!(db.unread_count(&conv, b).unwrap(), 3);

        let modified = db.mark_read(&conv, b).unwrap();
        assert_eq!(modified, 3);
        assert_eq!(db.unread_count(&conv, b).unwrap(), 0);

        // Repeat is a no-op.
        assert_eq!(db.mark_read(&conv, b).unwrap(), 0);
        assert_eq!(db.unread_count(&conv, b).unwrap(), 0);
    }

    #[test]
    fn mark_read_advances_direct_status_for_sender_view() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = ConversationRef::direct(a, b);

        let msg = sample_message(conv, a, "hello", Utc::now());
        db.insert_message(&msg).unwrap();

        db.mark_read(&conv, b).unwrap();

        let stored = db.message_by_id(msg.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Read);
        assert!(stored.is_read_by(b));
        assert_eq!(stored.direct_status(), DeliveryStatus::Read);
    }

    #[test]
    fn group_read_set_accumulates_per_reader() {
        let db = Database::open_in_memory().unwrap();
        let sender = UserId::new();
        let (x, y) = (UserId::new(), UserId::new());
        let group = db
            .create_group("physics", None, sender, &[x, y])
            .unwrap();
        let conv = ConversationRef::group(group.id);

        let msg = sample_message(conv, sender, "welcome", Utc::now());
        db.insert_message(&msg).unwrap();

        db.mark_read(&conv, x).unwrap();
        db.mark_read(&conv, y).unwrap();

        let stored = db.message_by_id(msg.id).unwrap();
        assert!(stored.is_read_by(x));
        assert!(stored.is_read_by(y));
        assert!(!stored.is_read_by(sender));
    }

    #[test]
    fn attachments_survive_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let conv = ConversationRef::direct(a, b);

        let mut msg = sample_message(conv, a, "", Utc::now());
        msg.body = None;
        msg.attachments = vec![MediaAttachment {
            url: "https://media.example/clip.mp4".into(),
            kind: MediaKind::Video,
            size: 1_048_576,
            width: Some(1280),
            height: Some(720),
            duration: Some(12.5),
            filename: Some("clip.mp4".into()),
            mime_type: Some("video/mp4".into()),
        }];
        db.insert_message(&msg).unwrap();

        let stored = db.message_by_id(msg.id).unwrap();
        assert_eq!(stored.attachments, msg.attachments);
        assert_eq!(stored.body, None);
    }

    #[test]
    fn deleting_a_group_cascades_to_history() {
        let db = Database::open_in_memory().unwrap();
        let owner = UserId::new();
        let group = db.create_group("algebra", None, owner, &[]).unwrap();
        let conv = ConversationRef::group(group.id);

        let msg = sample_message(conv, owner, "bye", Utc::now());
        db.insert_message(&msg).unwrap();

        db.delete_group(group.id).unwrap();
        assert!(matches!(
            db.message_by_id(msg.id),
            Err(StoreError::NotFound)
        ));
    }
}
