use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tracing::debug;
use uuid::Uuid;

use gighive_types::api::Claims;

use crate::error::ApiError;
use crate::state::{AppState, with_db};

/// The authenticated caller, inserted into request extensions by
/// `require_auth`.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Local `users.id`.
    pub user_id: Uuid,
    /// Identity provider subject id.
    pub clerk_id: String,
}

/// Validate the bearer token and resolve the caller's local user row.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.map_err(|_| ApiError::Unauthorized)?;
    let identity = authenticate(&state, bearer.token()).await?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("Rejected token: {}", e);
            ApiError::Unauthorized
        })
}

/// Token to `Identity`. A valid token whose subject has no local row yet is
/// still unauthorized.
pub async fn authenticate(state: &AppState, token: &str) -> Result<Identity, ApiError> {
    let claims = verify_token(&state.config.jwt_secret, token)?;

    let clerk_id = claims.sub.clone();
    let user = with_db(state, move |db| db.get_user_by_clerk_id(&clerk_id))
        .await?
        .ok_or_else(|| {
            debug!("No local user for subject {}", claims.sub);
            ApiError::Unauthorized
        })?;

    let user = user.into_model();
    Ok(Identity { user_id: user.id, clerk_id: user.clerk_id })
}
