//! Database row types. These map directly to SQLite rows and are converted to
//! `gighive-types` models at the edge of this crate.

use chrono::{DateTime, NaiveDateTime, Utc};
use gighive_types::models::{AttachmentRef, Conversation, Message, User};
use tracing::warn;
use uuid::Uuid;

pub struct UserRow {
    pub id: String,
    pub clerk_id: String,
    pub email: Option<String>,
    pub is_freelancer: bool,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ProfileRow {
    pub id: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub occupation: Option<String>,
    pub description: Option<String>,
    pub hourly_rate: Option<f64>,
    pub country: Option<String>,
    pub avatar_path: Option<String>,
    pub avatar_content_type: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub read: bool,
    pub attachment_path: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_content_type: Option<String>,
    pub created_at: String,
}

/// A message about to be inserted.
pub struct NewMessage<'a> {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: &'a str,
    pub attachment: Option<&'a AttachmentRef>,
}

/// A pending or failed profile deletion awaiting reconciliation.
pub struct DeletionIntentRow {
    pub profile_id: String,
    pub user_id: String,
    pub status: String,
    pub failed_table: Option<String>,
    pub attempts: i64,
}

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

/// Accepts both RFC 3339 (our column default) and SQLite's
/// `datetime('now')` format.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

impl UserRow {
    pub fn into_model(self) -> User {
        User {
            id: parse_uuid(&self.id, "user id"),
            clerk_id: self.clerk_id,
            email: self.email,
            is_freelancer: self.is_freelancer,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

impl ConversationRow {
    pub fn into_model(self) -> Conversation {
        Conversation {
            id: parse_uuid(&self.id, "conversation id"),
            user_a: parse_uuid(&self.user_a, "conversation user_a"),
            user_b: parse_uuid(&self.user_b, "conversation user_b"),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

impl MessageRow {
    pub fn into_model(self) -> Message {
        let attachment = match (self.attachment_path, self.attachment_name, self.attachment_content_type) {
            (Some(path), Some(name), Some(content_type)) => Some(AttachmentRef { path, name, content_type }),
            (Some(path), name, content_type) => Some(AttachmentRef {
                name: name.unwrap_or_else(|| path.rsplit('/').next().unwrap_or_default().to_string()),
                content_type: content_type.unwrap_or_else(|| "application/octet-stream".into()),
                path,
            }),
            _ => None,
        };

        Message {
            id: parse_uuid(&self.id, "message id"),
            conversation_id: parse_uuid(&self.conversation_id, "message conversation_id"),
            sender_id: parse_uuid(&self.sender_id, "message sender_id"),
            receiver_id: parse_uuid(&self.receiver_id, "message receiver_id"),
            content: self.content,
            read: self.read,
            attachment,
            created_at: parse_timestamp(&self.created_at),
        }
    }
}
