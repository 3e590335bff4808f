use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

/// Placeholder secrets that MUST NOT be used outside local development.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

/// Runtime configuration, read once at startup and passed into `AppState`.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    /// HS256 secret the identity provider signs session tokens with.
    pub jwt_secret: String,
    /// `whsec_...` secret for identity-provider webhooks. The webhook endpoint
    /// answers 500 while this is unset.
    pub webhook_secret: Option<String>,
    pub storage_signing_key: String,
    /// Public site URL used to build redirect links.
    pub site_url: String,
    /// Base URL this server is reachable at, used for storage links.
    pub public_url: String,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    pub api_url: String,
    pub secret_key: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            db_path: "gighive.db".into(),
            storage_dir: "./storage".into(),
            jwt_secret: String::new(),
            webhook_secret: None,
            storage_signing_key: String::new(),
            site_url: "http://localhost:3000".into(),
            public_url: "http://localhost:3000".into(),
            identity: IdentityConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("GIGHIVE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("GIGHIVE_JWT_SECRET is unset or still a placeholder");
        }

        let webhook_secret = env::var("CLERK_WEBHOOK_SECRET").ok().filter(|s| !s.is_empty());
        if webhook_secret.is_none() {
            warn!("CLERK_WEBHOOK_SECRET not set, identity webhooks will be rejected");
        }

        let storage_signing_key = env::var("GIGHIVE_STORAGE_SIGNING_KEY").unwrap_or_else(|_| jwt_secret.clone());
        let site_url: String = try_load("NEXT_PUBLIC_SITE_URL", "http://localhost:3000");
        let public_url = try_load("GIGHIVE_PUBLIC_URL", &site_url);
        let api_url: String = try_load("CLERK_API_URL", "https://api.clerk.com/v1");

        Ok(Self {
            host: try_load("GIGHIVE_HOST", "0.0.0.0"),
            port: try_load_parsed("GIGHIVE_PORT", "3000")?,
            db_path: try_load::<String>("GIGHIVE_DB_PATH", "gighive.db").into(),
            storage_dir: try_load::<String>("GIGHIVE_STORAGE_DIR", "./storage").into(),
            jwt_secret,
            webhook_secret,
            storage_signing_key,
            identity: IdentityConfig {
                secret_key: env::var("CLERK_SECRET_KEY").unwrap_or_default(),
                token_url: try_load("OAUTH_TOKEN_URL", &format!("{api_url}/oauth/token")),
                userinfo_url: try_load("OAUTH_USERINFO_URL", &format!("{api_url}/oauth/userinfo")),
                client_id: env::var("OAUTH_CLIENT_ID").unwrap_or_default(),
                client_secret: env::var("OAUTH_CLIENT_SECRET").unwrap_or_default(),
                redirect_uri: format!("{public_url}/auth/callback"),
                api_url,
            },
            site_url,
            public_url,
        })
    }
}

fn try_load<T: From<String>>(key: &str, default: &str) -> T {
    env::var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .into()
}

fn try_load_parsed<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw: String = try_load(key, default);
    raw.parse()
        .map_err(|e: T::Err| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value: {raw}"))
}
