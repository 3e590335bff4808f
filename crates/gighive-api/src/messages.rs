use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use gighive_db::models::NewMessage;
use gighive_types::api::{MarkReadRequest, MarkReadResponse, SendMessageRequest, UnreadCountResponse};
use gighive_types::events::GatewayEvent;
use gighive_types::models::{AttachmentRef, Message};

use crate::conversations::require_participant;
use crate::error::ApiError;
use crate::middleware::Identity;
use crate::state::{AppState, with_db};

const MAX_CONTENT_CHARS: usize = 10_000;

/// Conversation an uploaded attachment belongs to, taken from the first
/// segment of its bucket path.
pub(crate) fn attachment_conversation(path: &str) -> Option<Uuid> {
    path.split_once('/').and_then(|(conversation, _)| conversation.parse().ok())
}

fn validate(req: &SendMessageRequest, sender: Uuid) -> Result<(), ApiError> {
    if req.receiver_id == sender {
        return Err(ApiError::bad_request("Cannot message yourself"));
    }
    if req.content.trim().is_empty() && req.attachment.is_none() {
        return Err(ApiError::bad_request("Message must have content or an attachment"));
    }
    if req.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::bad_request(format!("Message exceeds {MAX_CONTENT_CHARS} characters")));
    }
    Ok(())
}

/// POST /messages: store the message and notify the receiver.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&req, identity.user_id)?;

    // An attachment must come from this pair's conversation.
    if let Some(attachment) = &req.attachment {
        let conversation_id = attachment_conversation(&attachment.path)
            .ok_or_else(|| ApiError::bad_request("Invalid attachment path"))?;
        let conversation = require_participant(&state, &identity, conversation_id).await?;
        if !conversation.has_participant(req.receiver_id) {
            return Err(ApiError::bad_request("Attachment belongs to another conversation"));
        }
    }

    let sender_id = identity.user_id;
    let SendMessageRequest { receiver_id, content, attachment } = req;
    let stored = with_db(&state, move |db| {
        if db.get_user_by_id(receiver_id)?.is_none() {
            return Ok(None);
        }
        let attachment: Option<&AttachmentRef> = attachment.as_ref();
        db.send_message(&NewMessage { sender_id, receiver_id, content: &content, attachment })
            .map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("user"))?;

    let message: Message = stored.into_model();
    let delivered = state.dispatcher.send_to_user(
        receiver_id,
        GatewayEvent::MessageCreated {
            conversation_id: message.conversation_id,
            message_id: message.id,
            sender_id,
            created_at: message.created_at,
        },
    );
    debug!("Message {} pushed to {} subscription(s)", message.id, delivered);

    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /messages/read: mark everything addressed to the caller as read,
/// optionally within one conversation, and tell the senders.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(conversation_id) = req.conversation_id {
        require_participant(&state, &identity, conversation_id).await?;
    }

    let reader_id = identity.user_id;
    let receipt = with_db(&state, move |db| db.mark_all_read(reader_id, req.conversation_id)).await?;

    for (conversation_id, sender_id, count) in &receipt.by_sender {
        state.dispatcher.send_to_user(
            *sender_id,
            GatewayEvent::MessagesRead { conversation_id: Some(*conversation_id), reader_id, count: *count },
        );
    }
    if receipt.updated > 0 {
        info!("{} marked {} message(s) read", reader_id, receipt.updated);
    }

    Ok(Json(MarkReadResponse { updated: receipt.updated }))
}

/// GET /messages/unread
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let unread = with_db(&state, move |db| db.unread_count(identity.user_id)).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content: &str, attachment: bool) -> SendMessageRequest {
        SendMessageRequest {
            receiver_id: Uuid::from_u128(2),
            content: content.to_string(),
            attachment: attachment.then(|| AttachmentRef {
                path: format!("{}/x-a.pdf", Uuid::nil()),
                name: "a.pdf".into(),
                content_type: "application/pdf".into(),
            }),
        }
    }

    #[test]
    fn rejects_empty_messages() {
        let sender = Uuid::from_u128(1);
        assert!(validate(&request("  ", false), sender).is_err());
        assert!(validate(&request("", true), sender).is_ok());
        assert!(validate(&request("hi", false), sender).is_ok());
        assert!(validate(&request("hi", false), Uuid::from_u128(2)).is_err());
        assert!(validate(&request(&"x".repeat(MAX_CONTENT_CHARS + 1), false), sender).is_err());
    }

    #[test]
    fn attachment_paths_name_their_conversation() {
        let id = Uuid::new_v4();
        assert_eq!(attachment_conversation(&format!("{id}/abc-report.pdf")), Some(id));
        assert_eq!(attachment_conversation("not-a-uuid/file"), None);
        assert_eq!(attachment_conversation("file"), None);
    }
}
