//! HTTP API client.
//!
//! The async half of a send: submit, history fetch, read acknowledgment and
//! group listing all go over plain HTTP with bounded timeouts, off the
//! caller's critical path. The live channel only ever pushes events down.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tutorlink_shared::constants::SUBMIT_TIMEOUT_SECS;
use tutorlink_shared::types::{ConversationRef, Group, MediaAttachment, Message, UserId};
use tutorlink_shared::ChatError;

use crate::transport::USER_ID_HEADER;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    conversation: &'a ConversationRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    attachments: &'a [MediaAttachment],
    correlation_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    acknowledged: u64,
}

#[derive(Debug, Deserialize)]
struct UnreadResponse {
    unread: u64,
}

/// A group together with the caller's unread count, as returned by the
/// conversation-list refresh.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    #[serde(flatten)]
    pub group: Group,
    pub unread: u64,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    user: UserId,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, user: UserId) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SUBMIT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Submit a message. Safe to retry with the same correlation id; the
    /// server absorbs duplicates within its dedup window.
    pub async fn submit(
        &self,
        conversation: &ConversationRef,
        body: Option<&str>,
        attachments: &[MediaAttachment],
        correlation_id: Uuid,
    ) -> Result<Message, ChatError> {
        let request = SubmitRequest {
            conversation,
            body,
            attachments,
            correlation_id,
        };
        let response = self
            .http
            .post(self.url("/api/messages"))
            .header(USER_ID_HEADER, self.user.to_string())
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    /// Fetch ascending history, optionally only messages strictly newer than
    /// `cursor` (offline gap recovery).
    pub async fn fetch_history(
        &self,
        conversation: &ConversationRef,
        cursor: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, ChatError> {
        let mut request = self
            .http
            .get(self.url(&format!(
                "/api/conversations/{}/messages",
                conversation.key()
            )))
            .header(USER_ID_HEADER, self.user.to_string());
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor.to_rfc3339())]);
        }
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    /// Acknowledge everything in a conversation. Returns how many messages
    /// were newly acknowledged; repeating is a no-op returning 0.
    pub async fn mark_read(&self, conversation: &ConversationRef) -> Result<u64, ChatError> {
        let response = self
            .http
            .post(self.url(&format!("/api/conversations/{}/read", conversation.key())))
            .header(USER_ID_HEADER, self.user.to_string())
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        let body: ReadResponse = Self::decode(response).await?;
        Ok(body.acknowledged)
    }

    pub async fn unread_count(&self, conversation: &ConversationRef) -> Result<u64, ChatError> {
        let response = self
            .http
            .get(self.url(&format!(
                "/api/conversations/{}/unread",
                conversation.key()
            )))
            .header(USER_ID_HEADER, self.user.to_string())
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        let body: UnreadResponse = Self::decode(response).await?;
        Ok(body.unread)
    }

    /// The caller's groups with authoritative unread counts, used to correct
    /// locally drifted counters.
    pub async fn list_groups(&self) -> Result<Vec<GroupSummary>, ChatError> {
        let response = self
            .http
            .get(self.url("/api/groups"))
            .header(USER_ID_HEADER, self.user.to_string())
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ChatError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ChatError::Transport(e.to_string()));
        }

        let detail = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| status.to_string());

        Err(match status.as_u16() {
            401 => ChatError::Authentication(detail),
            _ => ChatError::Transport(detail),
        })
    }
}
