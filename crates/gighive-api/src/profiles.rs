use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use gighive_db::queries::{DeleteOutcome, ProfileWrite};
use gighive_types::api::{DeleteProfileResponse, PaymentInfoInput, ProfileInput};
use gighive_types::models::{FreelancerProfile, PaymentInfo, StoredObject};

use crate::error::ApiError;
use crate::middleware::Identity;
use crate::state::{AppState, with_db};
use crate::storage::{Bucket, Storage, content_type_for, sanitize_filename};

/// 5 MB limit for avatars.
pub const MAX_AVATAR_SIZE: usize = 5 * 1024 * 1024;
/// 25 MB limit for profile documents.
pub const MAX_DOCUMENT_SIZE: usize = 25 * 1024 * 1024;

const MAX_DISPLAY_NAME_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 5_000;

async fn load_profile(state: &AppState, user_id: Uuid) -> Result<FreelancerProfile, ApiError> {
    with_db(state, move |db| db.get_profile(user_id))
        .await?
        .ok_or(ApiError::NotFound("profile"))
}

/// GET /profile
pub async fn get_own_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_profile(&state, identity.user_id).await?))
}

/// GET /profiles/{user_id}
pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_profile(&state, user_id).await?))
}

fn validate(input: &ProfileInput) -> Result<(), ApiError> {
    if let Some(name) = &input.display_name {
        let len = name.trim().chars().count();
        if len == 0 || len > MAX_DISPLAY_NAME_CHARS {
            return Err(ApiError::bad_request(format!(
                "Display name must be 1-{MAX_DISPLAY_NAME_CHARS} characters"
            )));
        }
    }
    if input.description.as_ref().is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_CHARS) {
        return Err(ApiError::bad_request(format!("Description exceeds {MAX_DESCRIPTION_CHARS} characters")));
    }
    if input.hourly_rate.is_some_and(|rate| !rate.is_finite() || rate < 0.0) {
        return Err(ApiError::bad_request("Hourly rate must be a non-negative number"));
    }
    Ok(())
}

/// PUT /profile: create or update the caller's profile. The profile row, its
/// collections and the user's freelancer flag are written together or not at
/// all.
pub async fn upsert_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(input): Json<ProfileInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&input)?;

    let user_id = identity.user_id;
    let result = with_db(&state, move |db| {
        let category_ids = match &input.categories {
            Some(slugs) => {
                let (found, missing) = db.resolve_categories(slugs)?;
                if !missing.is_empty() {
                    return Ok(Err(missing));
                }
                Some(found.into_iter().map(|c| c.id).collect::<Vec<_>>())
            }
            None => None,
        };

        let write = ProfileWrite {
            display_name: input.display_name.as_deref().map(str::trim),
            occupation: input.occupation.as_deref(),
            description: input.description.as_deref(),
            hourly_rate: input.hourly_rate,
            country: input.country.as_deref(),
            languages: input.languages.as_deref(),
            category_ids: category_ids.as_deref(),
            skills: input.skills.as_deref(),
            education: input.education.as_deref(),
            certificates: input.certificates.as_deref(),
        };
        db.upsert_profile(user_id, &write)?;
        Ok(Ok(db.get_profile(user_id)?))
    })
    .await?;

    match result {
        Ok(Some(profile)) => {
            info!("Profile {} saved for {}", profile.id, user_id);
            Ok(Json(profile))
        }
        Ok(None) => Err(ApiError::NotFound("profile")),
        Err(missing) => Err(ApiError::bad_request(format!("Unknown categories: {}", missing.join(", ")))),
    }
}

fn avatar_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        // SVG can carry script and avatars are served from a public bucket.
        _ => None,
    }
}

/// POST /profile/avatar: raw image body. The stored path and content type are
/// recorded on the profile so readers never guess the extension.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .unwrap_or_default();
    if !content_type.starts_with("image/") {
        return Err(ApiError::bad_request("Avatar must be an image"));
    }
    let ext = avatar_extension(&content_type).ok_or_else(|| ApiError::bad_request("Unsupported image type"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("Empty upload"));
    }
    if bytes.len() > MAX_AVATAR_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }

    let previous = load_profile(&state, identity.user_id).await?.avatar;

    let path = format!("{}/avatar.{}", identity.user_id, ext);
    state.storage.put(Bucket::Avatars, &path, &bytes).await?;

    let user_id = identity.user_id;
    let (stored_path, stored_type) = (path.clone(), content_type.clone());
    let updated = with_db(&state, move |db| db.set_avatar(user_id, &stored_path, &stored_type)).await?;
    if !updated {
        // Profile deleted concurrently; do not leave the object behind.
        if let Err(e) = state.storage.delete(Bucket::Avatars, &path).await {
            warn!("Failed to remove orphaned avatar {}: {}", path, e);
        }
        return Err(ApiError::NotFound("profile"));
    }

    if let Some(old) = previous.filter(|old| old.path != path) {
        if let Err(e) = state.storage.delete(Bucket::Avatars, &old.path).await {
            warn!("Failed to remove old avatar {}: {}", old.path, e);
        }
    }

    info!("Avatar updated for {}", user_id);
    Ok(Json(StoredObject { bucket: Bucket::Avatars.as_str().to_string(), path, content_type }))
}

/// POST /profile/documents: raw body with `x-file-name` and an optional
/// `x-document-kind` (defaults to `other`). A name already in use is a 409;
/// the stored document is never overwritten.
pub async fn upload_document(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::bad_request("Empty upload"));
    }
    if bytes.len() > MAX_DOCUMENT_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }

    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
    let name = sanitize_filename(
        header_str("x-file-name").ok_or_else(|| ApiError::bad_request("Missing x-file-name header"))?,
    );
    let kind = header_str("x-document-kind").filter(|k| !k.is_empty()).unwrap_or("other").to_string();
    let content_type = header_str(header::CONTENT_TYPE.as_str())
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| content_type_for(&name))
        .to_string();

    let path = format!("{}/{}", identity.user_id, name);
    if state.storage.exists(Bucket::FreelancerDocuments, &path).await? {
        return Err(ApiError::Conflict(format!("A document named {name} already exists")));
    }
    state.storage.put(Bucket::FreelancerDocuments, &path, &bytes).await?;

    let user_id = identity.user_id;
    let stored_path = path.clone();
    let document = with_db(&state, move |db| db.add_document(user_id, &name, &kind, &stored_path, &content_type))
        .await?;

    match document {
        Some(document) => {
            info!("Document {} stored for {}", document.id, user_id);
            Ok((StatusCode::CREATED, Json(document)))
        }
        None => {
            if let Err(e) = state.storage.delete(Bucket::FreelancerDocuments, &path).await {
                warn!("Failed to remove orphaned document {}: {}", path, e);
            }
            Err(ApiError::NotFound("profile"))
        }
    }
}

/// Keep only the last four digits of an account number.
fn last4(account_number: &str) -> Result<String, ApiError> {
    let digits: Vec<char> = account_number.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return Err(ApiError::bad_request("Account number must contain at least 4 digits"));
    }
    Ok(digits[digits.len() - 4..].iter().collect())
}

/// PUT /profile/payment
pub async fn set_payment_info(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(input): Json<PaymentInfoInput>,
) -> Result<impl IntoResponse, ApiError> {
    if input.method.trim().is_empty() || input.account_holder.trim().is_empty() {
        return Err(ApiError::bad_request("Payment method and account holder are required"));
    }
    let currency = input.currency.trim().to_ascii_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ApiError::bad_request("Currency must be a 3-letter code"));
    }

    let info = PaymentInfo {
        method: input.method.trim().to_string(),
        account_holder: input.account_holder.trim().to_string(),
        account_last4: input.account_number.as_deref().map(last4).transpose()?,
        currency,
    };

    let user_id = identity.user_id;
    let stored = info.clone();
    if !with_db(&state, move |db| db.upsert_payment_info(user_id, &stored)).await? {
        return Err(ApiError::NotFound("profile"));
    }
    Ok(Json(info))
}

/// Best-effort removal of a deleted profile's stored files.
pub(crate) async fn remove_profile_objects(storage: &Storage, avatar_path: Option<&str>, document_paths: &[String]) {
    if let Some(path) = avatar_path {
        if let Err(e) = storage.delete(Bucket::Avatars, path).await {
            warn!("Failed to remove avatar {}: {}", path, e);
        }
    }
    for path in document_paths {
        if let Err(e) = storage.delete(Bucket::FreelancerDocuments, path).await {
            warn!("Failed to remove document {}: {}", path, e);
        }
    }
}

/// DELETE /profile: remove the profile and its child rows in one transaction.
/// A failed step leaves everything in place and names the table.
pub async fn delete_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.user_id;
    match with_db(&state, move |db| db.delete_profile(user_id)).await? {
        DeleteOutcome::NotFound => Err(ApiError::NotFound("profile")),
        DeleteOutcome::Deleted { profile_id, removed_rows, avatar_path, document_paths } => {
            remove_profile_objects(&state.storage, avatar_path.as_deref(), &document_paths).await;
            info!("Profile {} of {} deleted", profile_id, user_id);
            Ok(Json(DeleteProfileResponse { deleted: true, removed_rows }))
        }
        DeleteOutcome::Failed { profile_id, table, error } => {
            warn!("Profile {} deletion failed at {}: {}", profile_id, table, error);
            Err(ApiError::CascadeFailed { table })
        }
    }
}

/// GET /categories
pub async fn list_categories(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(with_db(&state, |db| db.list_categories()).await?))
}
