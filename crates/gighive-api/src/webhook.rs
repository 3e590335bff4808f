//! Identity-provider webhooks, delivered with svix signatures.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{error, info, warn};

use gighive_types::api::ErrorBody;

use crate::state::{AppState, with_db};
use crate::storage::Bucket;

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock skew between the sender's timestamp and ours.
const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook secret is not configured")]
    MissingSecret,

    #[error("webhook secret is not valid base64")]
    InvalidSecret,

    #[error("missing svix headers")]
    MissingHeaders,

    #[error("timestamp outside tolerance")]
    InvalidTimestamp,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSecret | Self::InvalidSecret | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingHeaders | Self::InvalidTimestamp | Self::InvalidSignature | Self::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Webhook failed: {}", self);
        } else {
            warn!("Webhook rejected: {}", self);
        }
        let message = match &self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

fn signing_key(secret: &str) -> Result<Vec<u8>, WebhookError> {
    let encoded = secret.strip_prefix("whsec_").unwrap_or(secret);
    B64.decode(encoded).map_err(|_| WebhookError::InvalidSecret)
}

fn signer(key: &[u8], id: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Compute the `v1,<base64>` signature entry for a delivery.
pub fn sign(secret: &str, id: &str, timestamp: i64, body: &[u8]) -> Result<String, WebhookError> {
    let key = signing_key(secret)?;
    let mac = signer(&key, id, &timestamp.to_string(), body)?;
    Ok(format!("v1,{}", B64.encode(mac.finalize().into_bytes())))
}

/// Verify a delivery against `secret`. `now` is unix seconds.
pub fn verify(secret: &str, headers: &HeaderMap, body: &[u8], now: i64) -> Result<(), WebhookError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(id), Some(timestamp), Some(signatures)) =
        (header("svix-id"), header("svix-timestamp"), header("svix-signature"))
    else {
        return Err(WebhookError::MissingHeaders);
    };

    let sent_at: i64 = timestamp.parse().map_err(|_| WebhookError::InvalidTimestamp)?;
    if (now - sent_at).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(WebhookError::InvalidTimestamp);
    }

    let key = signing_key(secret)?;
    for entry in signatures.split_whitespace() {
        let Some(("v1", encoded)) = entry.split_once(',') else {
            continue;
        };
        let Ok(expected) = B64.decode(encoded) else {
            continue;
        };
        if signer(&key, id, timestamp, body)?.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(WebhookError::InvalidSignature)
}

/// Only `type` is required: the shape of `data` depends on it and is decoded
/// once the event is known to be one we handle.
#[derive(Debug, Deserialize)]
struct ClerkEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClerkEvent {
    fn user(self) -> Result<ClerkUser, WebhookError> {
        serde_json::from_value(self.data).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ClerkUser {
    id: String,
    #[serde(default)]
    email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    primary_email_address_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    id: String,
    email_address: String,
}

impl ClerkUser {
    /// The entry flagged as primary, else the first one.
    fn primary_email(&self) -> Option<&str> {
        let primary = self.primary_email_address_id.as_deref();
        self.email_addresses
            .iter()
            .find(|e| Some(e.id.as_str()) == primary)
            .or_else(|| self.email_addresses.first())
            .map(|e| e.email_address.as_str())
    }
}

/// POST /webhooks/clerk
pub async fn clerk_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, WebhookError> {
    let secret = state.config.webhook_secret.as_deref().ok_or(WebhookError::MissingSecret)?;
    verify(secret, &headers, &body, Utc::now().timestamp())?;

    let event: ClerkEvent =
        serde_json::from_slice(&body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
    let kind = event.kind.clone();

    match kind.as_str() {
        "user.created" | "user.updated" => {
            let user = event.user()?;
            let email = user.primary_email().map(str::to_string);
            let clerk_id = user.id;
            let outcome = with_db(&state, move |db| db.upsert_user(&clerk_id, email.as_deref())).await?;
            info!(
                "Webhook {}: {} user {} ({})",
                kind,
                if outcome.created { "created" } else { "updated" },
                outcome.user.id,
                outcome.user.clerk_id
            );
        }
        "user.deleted" => {
            let clerk_id = event.user()?.id;
            let lookup_id = clerk_id.clone();
            let (user, deleted) = with_db(&state, move |db| {
                let user = db.get_user_by_clerk_id(&lookup_id)?;
                let deleted = db.delete_user_by_clerk_id(&lookup_id)?;
                Ok((user, deleted))
            })
            .await?;

            match user.filter(|_| deleted) {
                Some(user) => {
                    for bucket in [Bucket::Avatars, Bucket::FreelancerDocuments, Bucket::ProjectSubmissions] {
                        if let Err(e) = state.storage.delete_prefix(bucket, &user.id).await {
                            warn!("Failed to remove {}/{} for deleted user: {}", bucket, user.id, e);
                        }
                    }
                }
                None => info!("Webhook user.deleted for unknown user {}, ignoring", clerk_id),
            }
        }
        other => info!("Ignoring webhook event {}", other),
    }

    Ok("OK")
}
