use axum::{
    Extension, Form, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use serde::Deserialize;
use tracing::{info, warn};

use gighive_db::queries::ProfileWrite;
use gighive_types::api::{ActionResult, PasswordResetForm, PasswordUpdateForm};
use gighive_types::models::User;

use crate::error::ApiError;
use crate::identity::Session;
use crate::middleware::Identity;
use crate::state::{AppState, with_db};

const MIN_PASSWORD_LEN: usize = 6;
const DEFAULT_REDIRECT: &str = "/account";

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub next: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Only same-site relative paths are honoured as redirect targets.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => path,
        _ => DEFAULT_REDIRECT,
    }
}

fn error_redirect(message: &str) -> Redirect {
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    Redirect::to(&format!("/auth/error?error={encoded}"))
}

/// GET /auth/callback: exchange the OAuth code, provision the local user and
/// redirect. Provisioning problems are logged and never block the redirect.
pub async fn oauth_callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Redirect {
    if let Some(error) = query.error {
        let message = query.error_description.unwrap_or(error);
        warn!("OAuth provider returned an error: {}", message);
        return error_redirect(&message);
    }

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return error_redirect("Missing authorization code");
    };

    let session = match state.identity.exchange_code(&code).await {
        Ok(session) => session,
        Err(e) => {
            warn!("OAuth code exchange failed: {}", e);
            return error_redirect("Could not complete sign-in");
        }
    };

    if let Err(e) = provision(&state, session).await {
        warn!("Provisioning after sign-in failed: {:#}", e);
    }

    Redirect::to(safe_next(query.next.as_deref()))
}

/// Make sure the signed-in subject has a user row, and a minimal profile when
/// the provider's metadata marks them as a freelancer.
async fn provision(state: &AppState, session: Session) -> anyhow::Result<()> {
    with_db(state, move |db| {
        let outcome = db.ensure_user(&session.subject, session.email.as_deref())?;
        let user = outcome.user.into_model();
        if outcome.created {
            info!("Provisioned user {} for {}", user.id, session.subject);
        }

        if session.is_freelancer && db.get_profile(user.id)?.is_none() {
            let display_name = session.display_name();
            db.upsert_profile(
                user.id,
                &ProfileWrite { display_name: display_name.as_deref(), ..Default::default() },
            )?;
            info!("Created starter profile for {}", user.id);
        }
        Ok(())
    })
    .await
}

/// POST /auth/password/reset
pub async fn password_reset(
    State(state): State<AppState>,
    Form(form): Form<PasswordResetForm>,
) -> (StatusCode, Json<ActionResult>) {
    let email = form.email.trim();
    if email.is_empty() || !email.contains('@') {
        return (StatusCode::BAD_REQUEST, Json(ActionResult::err("A valid email address is required")));
    }

    let redirect_to = format!("{}/auth/update-password", state.config.site_url.trim_end_matches('/'));
    match state.identity.send_password_reset(email, &redirect_to).await {
        Ok(()) => (StatusCode::OK, Json(ActionResult::ok())),
        Err(e) => {
            warn!("Password reset request failed: {}", e);
            (StatusCode::BAD_GATEWAY, Json(ActionResult::err("Could not send the reset email")))
        }
    }
}

/// POST /auth/password/update
pub async fn password_update(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Form(form): Form<PasswordUpdateForm>,
) -> (StatusCode, Json<ActionResult>) {
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        return (
            StatusCode::BAD_REQUEST,
            Json(ActionResult::err(format!("Password must be at least {MIN_PASSWORD_LEN} characters"))),
        );
    }

    match state.identity.update_password(&identity.clerk_id, &form.password).await {
        Ok(()) => {
            info!("Password updated for {}", identity.user_id);
            (StatusCode::OK, Json(ActionResult::ok()))
        }
        Err(e) => {
            warn!("Password update for {} failed: {}", identity.user_id, e);
            (StatusCode::BAD_GATEWAY, Json(ActionResult::err("Could not update the password")))
        }
    }
}

/// GET /me
pub async fn me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let user: User = with_db(&state, move |db| db.get_user_by_id(identity.user_id))
        .await?
        .ok_or(ApiError::NotFound("user"))?
        .into_model();
    Ok(Json(user))
}
