use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use gighive_gateway::connection;

use crate::attachments::{self, MAX_ATTACHMENT_SIZE};
use crate::error::ApiError;
use crate::middleware::{authenticate, require_auth};
use crate::state::AppState;
use crate::{auth, conversations, messages, profiles, storage, webhook};

/// Raw-body uploads need more than axum's 2 MB default.
const BODY_LIMIT: usize = MAX_ATTACHMENT_SIZE + 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/webhooks/clerk", post(webhook::clerk_webhook))
        .route("/auth/callback", get(auth::oauth_callback))
        .route("/auth/password/reset", post(auth::password_reset))
        .route("/categories", get(profiles::list_categories))
        .route("/storage/{bucket}/{*path}", get(storage::download_object))
        .route("/gateway", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/auth/password/update", post(auth::password_update))
        .route(
            "/profile",
            get(profiles::get_own_profile)
                .put(profiles::upsert_profile)
                .delete(profiles::delete_profile),
        )
        .route("/profiles/{user_id}", get(profiles::get_profile))
        .route("/profile/avatar", post(profiles::upload_avatar))
        .route("/profile/documents", post(profiles::upload_document))
        .route("/profile/payment", put(profiles::set_payment_info))
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::start_conversation),
        )
        .route("/conversations/{id}/messages", get(conversations::get_messages))
        .route("/conversations/{id}/messages/latest", get(conversations::latest_message))
        .route("/conversations/{id}/attachments", post(attachments::upload_attachment))
        .route("/attachments/resolve", get(attachments::resolve_attachment))
        .route("/messages", post(messages::send_message))
        .route("/messages/read", post(messages::mark_read))
        .route("/messages/unread", get(messages::unread_count))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

/// GET /gateway?token=: the token is checked before the upgrade request
/// itself, so a bad token gets a plain 401 instead of a socket.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, &query.token).await?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    let dispatcher = state.dispatcher.clone();
    Ok(ws
        .on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, identity.user_id))
        .into_response())
}
