use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AttachmentRef, Certificate, Education, Language, Message};

// -- JWT Claims --

/// Claims carried by the identity provider's session token. `sub` is the
/// provider subject id (the `clerk_id` column), not the local row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// -- Generic envelopes --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Result shape of the password server actions: `{success: true}` or
/// `{error: "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionResult {
    Success { success: bool },
    Error { error: String },
}

impl ActionResult {
    pub fn ok() -> Self {
        Self::Success { success: true }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self::Error { error: message.into() }
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct PasswordResetForm {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordUpdateForm {
    pub password: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartConversationRequest {
    pub other_user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartConversationResponse {
    pub conversation_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub other_user_id: Uuid,
    pub other_display_name: Option<String>,
    pub last_message: Option<Message>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachment: Option<AttachmentRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

// -- Attachments --

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub name: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// Rendered inline.
    Image,
    /// Rendered as a downloadable chip.
    File,
}

/// What a client needs to render an attachment. Resolution failure is its own
/// state so a view never sits in "loading" forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttachmentView {
    Ready {
        url: String,
        kind: AttachmentKind,
        icon: String,
        name: String,
        expires_at: Option<DateTime<Utc>>,
    },
    Failed {
        reason: String,
    },
}

// -- Profiles --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileInput {
    pub display_name: Option<String>,
    pub occupation: Option<String>,
    pub description: Option<String>,
    pub hourly_rate: Option<f64>,
    pub country: Option<String>,
    /// `None` leaves the stored collection untouched, `Some` replaces it.
    pub languages: Option<Vec<Language>>,
    /// Category slugs.
    pub categories: Option<Vec<String>>,
    pub skills: Option<Vec<String>>,
    pub education: Option<Vec<Education>>,
    pub certificates: Option<Vec<Certificate>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentInfoInput {
    pub method: String,
    pub account_holder: String,
    #[serde(default)]
    pub account_number: Option<String>,
    pub currency: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteProfileResponse {
    pub deleted: bool,
    pub removed_rows: usize,
}
