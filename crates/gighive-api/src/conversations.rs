use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use gighive_types::api::{StartConversationRequest, StartConversationResponse};
use gighive_types::models::{Conversation, Message};

use crate::error::ApiError;
use crate::middleware::Identity;
use crate::state::{AppState, with_db};

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Id of the oldest message of the previous page.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

/// Load a conversation the caller takes part in: 404 if it does not exist,
/// 403 if the caller is not one of its two participants.
pub(crate) async fn require_participant(
    state: &AppState,
    identity: &Identity,
    conversation_id: Uuid,
) -> Result<Conversation, ApiError> {
    let conversation = with_db(state, move |db| db.get_conversation(conversation_id))
        .await?
        .ok_or(ApiError::NotFound("conversation"))?
        .into_model();

    if !conversation.has_participant(identity.user_id) {
        return Err(ApiError::Forbidden);
    }
    Ok(conversation)
}

/// GET /conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = with_db(&state, move |db| db.list_conversations(identity.user_id)).await?;
    Ok(Json(conversations))
}

/// POST /conversations: idempotent, both orderings of a pair return the same
/// conversation.
pub async fn start_conversation(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<StartConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.other_user_id == identity.user_id {
        return Err(ApiError::bad_request("Cannot start a conversation with yourself"));
    }

    let me = identity.user_id;
    let other = req.other_user_id;
    let started = with_db(&state, move |db| {
        if db.get_user_by_id(other)?.is_none() {
            return Ok(None);
        }
        db.start_conversation(me, other).map(Some)
    })
    .await?;

    let (conversation_id, created) = started.ok_or(ApiError::NotFound("user"))?;
    let status = if created {
        info!("Conversation {} started between {} and {}", conversation_id, me, other);
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(StartConversationResponse { conversation_id })))
}

/// GET /conversations/{id}/messages: one page, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    require_participant(&state, &identity, conversation_id).await?;

    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let before = query.before;
    let messages: Vec<Message> = with_db(&state, move |db| db.get_messages(conversation_id, limit, before))
        .await?
        .into_iter()
        .map(|row| row.into_model())
        .collect();

    Ok(Json(messages))
}

/// GET /conversations/{id}/messages/latest: lets a client re-read after a push
/// instead of trusting the event payload.
pub async fn latest_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_participant(&state, &identity, conversation_id).await?;

    let latest: Option<Message> = with_db(&state, move |db| db.latest_message(conversation_id))
        .await?
        .map(|row| row.into_model());
    Ok(Json(latest))
}
