use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use gighive_types::api::{AttachmentKind, AttachmentView, UploadResponse};

use crate::conversations::require_participant;
use crate::error::ApiError;
use crate::messages::attachment_conversation;
use crate::middleware::Identity;
use crate::state::AppState;
use crate::storage::{Bucket, StorageError, content_type_for, extension, sanitize_filename};

/// 25 MB upload limit for message attachments.
pub const MAX_ATTACHMENT_SIZE: usize = 25 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "avif"];

/// How a client should render an attachment, and which icon to show for
/// non-image files.
pub fn classify(name: &str, content_type: &str) -> (AttachmentKind, &'static str) {
    let ext = extension(name);
    let ext = ext.as_deref().unwrap_or_default();

    if content_type.starts_with("image/") || IMAGE_EXTENSIONS.contains(&ext) {
        return (AttachmentKind::Image, "image");
    }

    let icon = match ext {
        "pdf" => "pdf",
        "doc" | "docx" | "odt" | "rtf" => "doc",
        "xls" | "xlsx" | "ods" | "csv" => "sheet",
        "ppt" | "pptx" | "odp" | "key" => "slides",
        "zip" | "rar" | "7z" | "tar" | "gz" => "archive",
        "mp3" | "wav" | "ogg" | "flac" | "m4a" => "audio",
        "mp4" | "mov" | "avi" | "mkv" | "webm" => "video",
        "rs" | "js" | "ts" | "py" | "go" | "java" | "c" | "cpp" | "html" | "css" | "json" => "code",
        "txt" | "md" => "text",
        _ if content_type.starts_with("audio/") => "audio",
        _ if content_type.starts_with("video/") => "video",
        _ if content_type.starts_with("text/") => "text",
        _ => "file",
    };
    (AttachmentKind::File, icon)
}

/// POST /conversations/{id}/attachments: raw body, file name in `x-file-name`.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    require_participant(&state, &identity, conversation_id).await?;

    if bytes.is_empty() {
        return Err(ApiError::bad_request("Empty upload"));
    }
    if bytes.len() > MAX_ATTACHMENT_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }

    let raw_name = headers
        .get("x-file-name")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing x-file-name header"))?;
    let name = sanitize_filename(raw_name);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
        .unwrap_or_else(|| content_type_for(&name))
        .to_string();

    let path = format!("{}/{}-{}", conversation_id, Uuid::new_v4(), name);
    let size = state.storage.put(Bucket::MessageAttachments, &path, &bytes).await?;
    info!("{} uploaded attachment {} ({} bytes)", identity.user_id, path, size);

    Ok((StatusCode::CREATED, Json(UploadResponse { path, name, content_type, size })))
}

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub path: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// GET /attachments/resolve: turn a stored path into something renderable.
/// Lookup problems come back as a `failed` view, authorization problems as
/// errors.
pub async fn resolve_attachment(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ResolveQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let bucket = match query.bucket.as_deref() {
        Some(bucket) => bucket.parse::<Bucket>()?,
        None => Bucket::MessageAttachments,
    };

    match bucket {
        Bucket::MessageAttachments => {
            let conversation_id = attachment_conversation(&query.path)
                .ok_or_else(|| ApiError::bad_request("Invalid attachment path"))?;
            require_participant(&state, &identity, conversation_id).await?;
        }
        Bucket::FreelancerDocuments | Bucket::ProjectSubmissions => {
            let owner = query.path.split('/').next().unwrap_or_default();
            if owner != identity.user_id.to_string() {
                return Err(ApiError::Forbidden);
            }
        }
        Bucket::Avatars | Bucket::Portfolio => {}
    }

    Ok(Json(resolve_view(&state, bucket, &query).await))
}

async fn resolve_view(state: &AppState, bucket: Bucket, query: &ResolveQuery) -> AttachmentView {
    let failed = |reason: &str| AttachmentView::Failed { reason: reason.to_string() };

    match state.storage.exists(bucket, &query.path).await {
        Ok(true) => {}
        Ok(false) => return failed("Attachment not found"),
        Err(StorageError::InvalidPath) => return failed("Invalid attachment path"),
        Err(e) => {
            warn!("Attachment lookup for {}/{} failed: {}", bucket, query.path, e);
            return failed("Attachment unavailable");
        }
    }

    let (url, expires_at) = match state.storage.resolve_url(bucket, &query.path) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("Could not build a link for {}/{}: {}", bucket, query.path, e);
            return failed("Attachment unavailable");
        }
    };

    let name = query.name.clone().unwrap_or_else(|| display_name(&query.path));
    let content_type = query.content_type.as_deref().unwrap_or_else(|| content_type_for(&name));
    let (kind, icon) = classify(&name, content_type);

    AttachmentView::Ready { url, kind, icon: icon.to_string(), name, expires_at }
}

/// File name without the directory and upload prefix.
fn display_name(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    // "{uuid}-{name}": a hyphenated uuid is 36 characters.
    match file.get(..36).map(str::parse::<Uuid>) {
        Some(Ok(_)) if file.as_bytes().get(36) == Some(&b'-') => file[37..].to_string(),
        _ => file.to_string(),
    }
}
