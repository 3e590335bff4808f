//! Bucketed object storage on the local filesystem, with HMAC-signed links
//! for private buckets.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path as UrlPath, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of links handed out for private objects.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Avatars,
    Portfolio,
    FreelancerDocuments,
    MessageAttachments,
    ProjectSubmissions,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avatars => "avatars",
            Self::Portfolio => "portfolio",
            Self::FreelancerDocuments => "freelancer-documents",
            Self::MessageAttachments => "message-attachments",
            Self::ProjectSubmissions => "project_submissions",
        }
    }

    /// Public buckets are served without a signature.
    pub fn is_public(self) -> bool {
        matches!(self, Self::Avatars | Self::Portfolio)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avatars" => Ok(Self::Avatars),
            "portfolio" => Ok(Self::Portfolio),
            "freelancer-documents" => Ok(Self::FreelancerDocuments),
            "message-attachments" => Ok(Self::MessageAttachments),
            "project_submissions" => Ok(Self::ProjectSubmissions),
            _ => Err(StorageError::UnknownBucket(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unknown bucket {0}")]
    UnknownBucket(String),

    #[error("invalid object path")]
    InvalidPath,

    #[error("object not found")]
    NotFound,

    #[error("link expired")]
    Expired,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid signing key")]
    InvalidKey,

    #[error("invalid public url: {0}")]
    InvalidUrl(String),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::UnknownBucket(_) | Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidPath => StatusCode::BAD_REQUEST,
            Self::Expired => StatusCode::GONE,
            Self::InvalidSignature => StatusCode::FORBIDDEN,
            Self::InvalidKey | Self::InvalidUrl(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub struct Storage {
    root: PathBuf,
    signer: HmacSha256,
    public_url: String,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>, signing_key: &str, public_url: &str) -> Result<Self, StorageError> {
        let signer = HmacSha256::new_from_slice(signing_key.as_bytes()).map_err(|_| StorageError::InvalidKey)?;
        Ok(Self {
            root: root.into(),
            signer,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    /// Map a bucket-relative path onto the filesystem. Only plain relative
    /// segments are accepted.
    fn object_path(&self, bucket: Bucket, path: &str) -> Result<PathBuf, StorageError> {
        if path.is_empty() || path.contains('\\') || path.split('/').any(str::is_empty) {
            return Err(StorageError::InvalidPath);
        }
        let relative = Path::new(path);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(StorageError::InvalidPath);
        }
        Ok(self.root.join(bucket.as_str()).join(relative))
    }

    /// Write an object, replacing any previous one at the same path.
    pub async fn put(&self, bucket: Bucket, path: &str, bytes: &[u8]) -> Result<u64, StorageError> {
        let target = self.object_path(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&target).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        debug!("Stored {}/{} ({} bytes)", bucket, path, bytes.len());
        Ok(bytes.len() as u64)
    }

    pub async fn open(&self, bucket: Bucket, path: &str) -> Result<(tokio::fs::File, u64), StorageError> {
        let target = self.object_path(bucket, path)?;
        let file = tokio::fs::File::open(&target).await.map_err(not_found_or_io)?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    pub async fn exists(&self, bucket: Bucket, path: &str) -> Result<bool, StorageError> {
        let target = self.object_path(bucket, path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }

    /// Returns `false` if there was nothing to delete.
    pub async fn delete(&self, bucket: Bucket, path: &str) -> Result<bool, StorageError> {
        let target = self.object_path(bucket, path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every object under `prefix/`.
    pub async fn delete_prefix(&self, bucket: Bucket, prefix: &str) -> Result<bool, StorageError> {
        let target = self.object_path(bucket, prefix)?;
        match tokio::fs::remove_dir_all(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn object_url(&self, bucket: Bucket, path: &str) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.public_url).map_err(|e| StorageError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidUrl(self.public_url.clone()))?
            .pop_if_empty()
            .push("storage")
            .push(bucket.as_str())
            .extend(path.split('/'));
        Ok(url)
    }

    pub fn public_url(&self, bucket: Bucket, path: &str) -> Result<String, StorageError> {
        self.object_path(bucket, path)?;
        Ok(self.object_url(bucket, path)?.into())
    }

    /// A link to a private object that stops working after `ttl`.
    pub fn signed_url(
        &self,
        bucket: Bucket,
        path: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), StorageError> {
        self.object_path(bucket, path)?;
        let ttl = chrono::Duration::from_std(ttl).map_err(|_| StorageError::InvalidPath)?;
        let expires_at = now + ttl;
        let expires = expires_at.timestamp();

        let mut url = self.object_url(bucket, path)?;
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &self.sign(bucket, path, expires));
        Ok((url.into(), expires_at))
    }

    /// Public URL for public buckets, signed URL (with its expiry) otherwise.
    pub fn resolve_url(&self, bucket: Bucket, path: &str) -> Result<(String, Option<DateTime<Utc>>), StorageError> {
        if bucket.is_public() {
            return Ok((self.public_url(bucket, path)?, None));
        }
        let (url, expires_at) = self.signed_url(bucket, path, SIGNED_URL_TTL, Utc::now())?;
        Ok((url, Some(expires_at)))
    }

    fn mac(&self, bucket: Bucket, path: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.signer.clone();
        mac.update(format!("{bucket}/{path}:{expires}").as_bytes());
        mac
    }

    fn sign(&self, bucket: Bucket, path: &str, expires: i64) -> String {
        hex::encode(self.mac(bucket, path, expires).finalize().into_bytes())
    }

    /// Check a link's signature first, then its expiry, so a modified
    /// `expires` is reported as tampering rather than expiry.
    pub fn verify_signature(
        &self,
        bucket: Bucket,
        path: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> Result<(), StorageError> {
        let signature = hex::decode(signature).map_err(|_| StorageError::InvalidSignature)?;
        self.mac(bucket, path, expires)
            .verify_slice(&signature)
            .map_err(|_| StorageError::InvalidSignature)?;
        if now > expires {
            return Err(StorageError::Expired);
        }
        Ok(())
    }
}

fn not_found_or_io(e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound { StorageError::NotFound } else { StorageError::Io(e) }
}

/// Reduce an uploaded file name to a safe single path segment.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .take(128)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() { "file".to_string() } else { cleaned.to_string() }
}

pub fn extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty() && !ext.contains('/')).then(|| ext.to_ascii_lowercase())
}

/// Content type guessed from a file name, for objects served without one.
pub fn content_type_for(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Types a browser may render in place. Anything else (SVG, HTML, scripts)
/// is forced to download so it never runs on our origin.
fn renders_inline(content_type: &str) -> bool {
    matches!(
        content_type,
        "image/png" | "image/jpeg" | "image/gif" | "image/webp" | "application/pdf" | "audio/mpeg" | "video/mp4"
    )
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

/// GET /storage/{bucket}/{*path}: stream an object. Private buckets need a
/// valid, unexpired signature.
pub async fn download_object(
    State(state): State<AppState>,
    UrlPath((bucket, path)): UrlPath<(String, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let bucket: Bucket = bucket.parse()?;

    if !bucket.is_public() {
        let (Some(expires), Some(signature)) = (query.expires, query.signature.as_deref()) else {
            return Err(StorageError::InvalidSignature.into());
        };
        if let Err(e) = state.storage.verify_signature(bucket, &path, expires, signature, Utc::now().timestamp()) {
            warn!("Rejected storage link for {}/{}: {}", bucket, path, e);
            return Err(e.into());
        }
    }

    let (file, len) = state.storage.open(bucket, &path).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let content_type = content_type_for(&path);
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    if !renders_inline(content_type) {
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment"));
    }
    Ok(response)
}
