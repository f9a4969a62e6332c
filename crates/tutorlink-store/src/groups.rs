//! Group entity CRUD and membership operations.
//!
//! Invariant enforced here: every group keeps at least one admin. Removing
//! or demoting the sole admin fails with [`StoreError::LastAdmin`] and
//! leaves membership unchanged.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use tutorlink_shared::types::{
    ConversationRef, Group, GroupId, GroupMember, GroupRole, UserId,
};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::{ts_from_sql, ts_to_sql};

fn role_to_sql(role: GroupRole) -> &'static str {
    match role {
        GroupRole::Admin => "admin",
        GroupRole::Member => "member",
    }
}

fn role_from_sql(s: &str) -> GroupRole {
    match s {
        "admin" => GroupRole::Admin,
        _ => GroupRole::Member,
    }
}

impl Database {
    /// Create a group. The creator always joins as admin; `members` join as
    /// plain members (the creator is skipped if listed).
    pub fn create_group(
        &self,
        name: &str,
        avatar_url: Option<&str>,
        created_by: UserId,
        members: &[UserId],
    ) -> Result<Group> {
        let id = GroupId::new();
        let now = Utc::now();

        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO groups (id, name, avatar_url, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                name,
                avatar_url,
                created_by.to_string(),
                ts_to_sql(&now),
            ],
        )?;

        tx.execute(
            "INSERT INTO group_members (group_id, user_id, role, joined_at)
             VALUES (?1, ?2, 'admin', ?3)",
            params![id.to_string(), created_by.to_string(), ts_to_sql(&now)],
        )?;

        for member in members {
            if *member == created_by {
                continue;
            }
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'member', ?3)",
                params![id.to_string(), member.to_string(), ts_to_sql(&now)],
            )?;
        }

        tx.commit()?;

        tracing::info!(group = %id, name, members = members.len() + 1, "group created");

        self.group_by_id(id)
    }

    /// Fetch a group with its full member list.
    pub fn group_by_id(&self, id: GroupId) -> Result<Group> {
        let (name, avatar_url, created_by, created_at) = self
            .conn()
            .query_row(
                "SELECT name, avatar_url, created_by, created_at FROM groups WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        let mut stmt = self.conn().prepare(
            "SELECT user_id, role, joined_at FROM group_members
             WHERE group_id = ?1
             ORDER BY joined_at ASC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut members = Vec::new();
        for row in rows {
            let (user, role, joined_at) = row?;
            members.push(GroupMember {
                user: UserId(Uuid::parse_str(&user)?),
                role: role_from_sql(&role),
                joined_at: ts_from_sql(&joined_at)?,
            });
        }

        Ok(Group {
            id,
            name,
            avatar_url,
            created_by: UserId(Uuid::parse_str(&created_by)?),
            members,
            created_at: ts_from_sql(&created_at)?,
        })
    }

    /// All groups the user belongs to, each paired with the user's unread
    /// count, newest group first. Backs the conversation-list refresh that
    /// corrects per-device counters.
    pub fn groups_for_user(&self, user: UserId) -> Result<Vec<(Group, u64)>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id FROM groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.user_id = ?1
             ORDER BY g.created_at DESC",
        )?;

        let ids = stmt
            .query_map(params![user.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            let group_id = GroupId(Uuid::parse_str(&id)?);
            let group = self.group_by_id(group_id)?;
            let unread = self.unread_count(&ConversationRef::group(group_id), user)?;
            groups.push((group, unread));
        }
        Ok(groups)
    }

    /// Whether the user is a member of the group.
    pub fn is_member(&self, group_id: GroupId, user: UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Add users as plain members. Users already in the group are skipped.
    /// Returns the number of members actually added.
    pub fn add_members(&self, group_id: GroupId, users: &[UserId]) -> Result<usize> {
        // Existence check so a bad group id is NotFound, not a silent no-op.
        self.group_by_id(group_id)?;

        let now = ts_to_sql(&Utc::now());
        let mut added = 0;
        for user in users {
            added += self.conn().execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'member', ?3)",
                params![group_id.to_string(), user.to_string(), now],
            )?;
        }

        tracing::debug!(group = %group_id, added, "group members added");
        Ok(added)
    }

    /// Change a member's role. Demoting the sole admin is rejected.
    pub fn set_member_role(
        &self,
        group_id: GroupId,
        user: UserId,
        role: GroupRole,
    ) -> Result<()> {
        let group = self.group_by_id(group_id)?;
        let current = group.role_of(user).ok_or(StoreError::NotFound)?;

        if current == GroupRole::Admin && role == GroupRole::Member && group.admin_count() <= 1 {
            return Err(StoreError::LastAdmin);
        }

        self.conn().execute(
            "UPDATE group_members SET role = ?3 WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user.to_string(), role_to_sql(role)],
        )?;
        Ok(())
    }

    /// Remove a member (or let them leave). Removing the sole admin is
    /// rejected; promote someone else first.
    pub fn remove_member(&self, group_id: GroupId, user: UserId) -> Result<()> {
        let group = self.group_by_id(group_id)?;
        let role = group.role_of(user).ok_or(StoreError::NotFound)?;

        if role == GroupRole::Admin && group.admin_count() <= 1 {
            return Err(StoreError::LastAdmin);
        }

        self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user.to_string()],
        )?;

        tracing::debug!(group = %group_id, user = %user, "group member removed");
        Ok(())
    }

    /// Delete a group. Membership and message history cascade.
    pub fn delete_group(&self, group_id: GroupId) -> Result<()> {
        let affected = self.conn().execute(
            "DELETE FROM groups WHERE id = ?1",
            params![group_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
