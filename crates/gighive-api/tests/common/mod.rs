#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use gighive_api::config::Config;
use gighive_api::identity::{IdentityError, IdentityProvider, Session};
use gighive_api::storage::Storage;
use gighive_api::webhook;
use gighive_api::{AppState, AppStateInner};
use gighive_db::Database;
use gighive_gateway::dispatcher::Dispatcher;
use gighive_types::api::Claims;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

/// Identity provider double: codes map to canned sessions and every call is
/// recorded.
#[derive(Default)]
pub struct FakeIdentity {
    pub sessions: Mutex<HashMap<String, Session>>,
    pub resets: Mutex<Vec<(String, String)>>,
    pub password_updates: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn exchange_code(&self, code: &str) -> Result<Session, IdentityError> {
        self.sessions
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| IdentityError::InvalidCode(code.to_string()))
    }

    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> Result<(), IdentityError> {
        self.resets.lock().unwrap().push((email.to_string(), redirect_to.to_string()));
        Ok(())
    }

    async fn update_password(&self, subject: &str, password: &str) -> Result<(), IdentityError> {
        self.password_updates.lock().unwrap().push((subject.to_string(), password.to_string()));
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub identity: Arc<FakeIdentity>,
    _storage_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_webhook_secret(Some(WEBHOOK_SECRET))
    }

    pub fn with_webhook_secret(secret: Option<&str>) -> Self {
        let storage_dir = tempfile::tempdir().unwrap();
        let config = Config {
            jwt_secret: JWT_SECRET.into(),
            webhook_secret: secret.map(str::to_string),
            storage_signing_key: "test-storage-key".into(),
            storage_dir: storage_dir.path().to_path_buf(),
            ..Config::default()
        };
        let storage = Storage::new(storage_dir.path(), &config.storage_signing_key, &config.public_url).unwrap();
        let identity = Arc::new(FakeIdentity::default());

        let state: AppState = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            storage,
            dispatcher: Dispatcher::new(),
            identity: identity.clone(),
            config,
        });

        Self { router: gighive_api::router(state.clone()), state, identity, _storage_dir: storage_dir }
    }

    /// Create a local user for `clerk_id` and return its id and a session token.
    pub fn user(&self, clerk_id: &str) -> (Uuid, String) {
        let outcome = self.state.db.upsert_user(clerk_id, Some(&format!("{clerk_id}@example.com"))).unwrap();
        (outcome.user.into_model().id, token(clerk_id))
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    /// JSON request; returns the status and the parsed body (`Null` when the
    /// body is not JSON).
    pub async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.send(req).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    /// Deliver a signed webhook. `tamper` flips the body after signing.
    pub async fn webhook(&self, body: &Value, tamper: bool) -> StatusCode {
        let raw = body.to_string();
        let now = chrono::Utc::now().timestamp();
        let signature = webhook::sign(WEBHOOK_SECRET, "msg_test", now, raw.as_bytes()).unwrap();
        let delivered = if tamper { raw.replace("example.com", "evil.com") } else { raw };

        let req = Request::builder()
            .method("POST")
            .uri("/webhooks/clerk")
            .header("svix-id", "msg_test")
            .header("svix-timestamp", now.to_string())
            .header("svix-signature", signature)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(delivered))
            .unwrap();
        self.send(req).await.status()
    }
}

pub fn token(clerk_id: &str) -> String {
    let claims = Claims {
        sub: clerk_id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        email: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap_or(Value::Null)
}

pub fn user_event(kind: &str, clerk_id: &str, email: &str) -> Value {
    serde_json::json!({
        "type": kind,
        "data": {
            "id": clerk_id,
            "email_addresses": [{ "id": "idn_1", "email_address": email }],
            "primary_email_address_id": "idn_1"
        }
    })
}
