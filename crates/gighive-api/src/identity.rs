//! Client for the hosted identity provider.
//!
//! Handlers only see the `IdentityProvider` trait; the HTTP implementation is
//! injected at startup and tests substitute their own.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::IdentityConfig;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("authorization code rejected: {0}")]
    InvalidCode(String),

    #[error("identity provider returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The authenticated subject returned by an OAuth code exchange.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Provider subject id (`clerk_id`).
    pub subject: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_freelancer: bool,
}

impl Session {
    /// Best available display name: full name, else the email's local part.
    pub fn display_name(&self) -> Option<String> {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !full.is_empty() {
            return Some(full);
        }
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .map(str::to_string)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an OAuth authorization code for the session's subject.
    async fn exchange_code(&self, code: &str) -> Result<Session, IdentityError>;

    /// Ask the provider to mail a reset link that lands on `redirect_to`.
    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> Result<(), IdentityError>;

    async fn update_password(&self, subject: &str, password: &str) -> Result<(), IdentityError>;
}

pub struct HttpIdentityProvider {
    client: reqwest::Client,
    config: IdentityConfig,
}

impl HttpIdentityProvider {
    pub fn new(config: IdentityConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    public_metadata: Value,
    #[serde(default)]
    unsafe_metadata: Value,
}

impl UserInfo {
    fn is_freelancer(&self) -> bool {
        [&self.public_metadata, &self.unsafe_metadata]
            .iter()
            .any(|metadata| metadata.get("is_freelancer").and_then(Value::as_bool).unwrap_or(false))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn exchange_code(&self, code: &str) -> Result<Session, IdentityError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            return Err(IdentityError::InvalidCode(response.text().await.unwrap_or_default()));
        }
        if !status.is_success() {
            return Err(IdentityError::Upstream { status: status.as_u16(), body: response.text().await.unwrap_or_default() });
        }
        let token: TokenResponse = response.json().await?;

        let response = self.client.get(&self.config.userinfo_url).bearer_auth(&token.access_token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IdentityError::Upstream { status: status.as_u16(), body: response.text().await.unwrap_or_default() });
        }
        let info: UserInfo = response.json().await?;
        debug!("Exchanged authorization code for subject {}", info.sub);

        Ok(Session {
            is_freelancer: info.is_freelancer(),
            subject: info.sub,
            email: info.email,
            first_name: info.given_name,
            last_name: info.family_name,
        })
    }

    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> Result<(), IdentityError> {
        let response = self
            .client
            .post(format!("{}/password_resets", self.config.api_url))
            .bearer_auth(&self.config.secret_key)
            .json(&serde_json::json!({ "email_address": email, "redirect_url": redirect_to }))
            .send()
            .await?;
        check_status(response).await
    }

    async fn update_password(&self, subject: &str, password: &str) -> Result<(), IdentityError> {
        let response = self
            .client
            .patch(format!("{}/users/{}", self.config.api_url, subject))
            .bearer_auth(&self.config.secret_key)
            .json(&serde_json::json!({ "password": password }))
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), IdentityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(IdentityError::Upstream { status: status.as_u16(), body: response.text().await.unwrap_or_default() })
}
