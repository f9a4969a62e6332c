//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `groups`, `group_members`, `messages` and
//! `message_reads`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name       TEXT NOT NULL,
    avatar_url TEXT,
    created_by TEXT NOT NULL,               -- UUID of the creating user
    created_at TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Group membership
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_members (
    group_id  TEXT NOT NULL,                -- FK -> groups(id)
    user_id   TEXT NOT NULL,
    role      TEXT NOT NULL,                -- 'admin' | 'member'
    joined_at TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- `conversation` is the canonical conversation key:
--   direct:<a>:<b>  (participant pair, a <= b)
--   group:<id>
-- `group_id` duplicates the group reference so that deleting a group
-- cascades to its history.
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL, -- UUID v4, server-assigned
    conversation TEXT NOT NULL,
    group_id     TEXT,                      -- nullable FK -> groups(id)
    sender       TEXT NOT NULL,             -- UUID of the sender
    body         TEXT,
    attachments  TEXT NOT NULL,             -- JSON array of media descriptors
    created_at   TEXT NOT NULL,             -- server timestamp, sole ordering key
    status       TEXT NOT NULL,             -- 'sent' | 'delivered' | 'read'

    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation, created_at);

-- ----------------------------------------------------------------
-- Read acknowledgments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,               -- FK -> messages(id)
    user_id    TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_message_reads_user ON message_reads(user_id);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
