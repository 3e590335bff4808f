use tracing::{info, warn};
use uuid::Uuid;

use gighive_db::queries::DeleteOutcome;

use crate::profiles::remove_profile_objects;
use crate::state::{AppState, with_db};

/// Intents are retried at most this many times before they are left for a
/// human to look at.
pub const MAX_DELETION_ATTEMPTS: i64 = 5;

/// Finish profile deletions that were interrupted or failed. Returns how many
/// intents were resolved.
pub async fn reconcile_profile_deletions(state: &AppState) -> anyhow::Result<usize> {
    let intents = with_db(state, |db| db.pending_profile_deletions(MAX_DELETION_ATTEMPTS)).await?;
    if intents.is_empty() {
        return Ok(0);
    }
    info!("Reconciling {} profile deletion(s)", intents.len());

    let mut resolved = 0;
    for intent in intents {
        let Ok(profile_id) = intent.profile_id.parse::<Uuid>() else {
            warn!("Deletion intent for user {} has a corrupt profile id {}", intent.user_id, intent.profile_id);
            continue;
        };

        // Keyed by profile id: a profile created after this intent is not ours.
        let outcome = with_db(state, move |db| match db.delete_profile_by_id(profile_id)? {
            // Already gone: close the intent.
            DeleteOutcome::NotFound => {
                db.mark_deletion(&profile_id.to_string(), "completed", None, None)?;
                Ok(DeleteOutcome::NotFound)
            }
            other => Ok(other),
        })
        .await?;

        match outcome {
            DeleteOutcome::NotFound => resolved += 1,
            DeleteOutcome::Deleted { avatar_path, document_paths, .. } => {
                remove_profile_objects(&state.storage, avatar_path.as_deref(), &document_paths).await;
                resolved += 1;
            }
            DeleteOutcome::Failed { table, error, .. } => {
                warn!(
                    "Profile {} still failing at {} (attempt {}): {}",
                    intent.profile_id,
                    table,
                    intent.attempts + 1,
                    error
                );
            }
        }
    }

    info!("Reconciled {} profile deletion(s)", resolved);
    Ok(resolved)
}
