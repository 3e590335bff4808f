use anyhow::Result;
use rusqlite::{Connection, Row};
use tracing::info;
use uuid::Uuid;

use super::OptionalExt;
use super::profiles::delete_profile_rows;
use crate::Database;
use crate::models::UserRow;

const USER_COLUMNS: &str = "id, clerk_id, email, is_freelancer, created_at, updated_at";

pub struct UpsertOutcome {
    pub user: UserRow,
    pub created: bool,
}

impl Database {
    // -- Users --

    /// Upsert keyed by the identity provider's subject id. The freelancer flag
    /// is only defaulted on insert; updates refresh the email.
    pub fn upsert_user(&self, clerk_id: &str, email: Option<&str>) -> Result<UpsertOutcome> {
        self.with_tx(|tx| {
            let existing = query_user_by_clerk_id(tx, clerk_id)?;
            let created = existing.is_none();

            tx.execute(
                "INSERT INTO users (id, clerk_id, email) VALUES (?1, ?2, ?3)
                 ON CONFLICT(clerk_id) DO UPDATE SET
                     email = excluded.email,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                (Uuid::new_v4().to_string(), clerk_id, email),
            )?;

            let user = query_user_by_clerk_id(tx, clerk_id)?
                .ok_or_else(|| anyhow::anyhow!("User {} vanished after upsert", clerk_id))?;
            Ok(UpsertOutcome { user, created })
        })
    }

    /// Insert a user row only if none exists for `clerk_id`. Never overwrites.
    pub fn ensure_user(&self, clerk_id: &str, email: Option<&str>) -> Result<UpsertOutcome> {
        self.with_tx(|tx| {
            let inserted = tx.execute(
                "INSERT INTO users (id, clerk_id, email) VALUES (?1, ?2, ?3)
                 ON CONFLICT(clerk_id) DO NOTHING",
                (Uuid::new_v4().to_string(), clerk_id, email),
            )?;

            let user = query_user_by_clerk_id(tx, clerk_id)?
                .ok_or_else(|| anyhow::anyhow!("User {} vanished after insert", clerk_id))?;
            Ok(UpsertOutcome { user, created: inserted == 1 })
        })
    }

    pub fn get_user_by_clerk_id(&self, clerk_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_clerk_id(conn, clerk_id))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id.to_string()],
                user_from_row,
            )
            .optional()
        })
    }

    /// Remove a user and everything hanging off it. Returns `false` when no
    /// row matched, which callers treat as a no-op.
    pub fn delete_user_by_clerk_id(&self, clerk_id: &str) -> Result<bool> {
        self.with_tx(|tx| {
            let Some(user) = query_user_by_clerk_id(tx, clerk_id)? else {
                return Ok(false);
            };

            let profile_id: Option<String> = tx
                .query_row(
                    "SELECT id FROM freelancer_profiles WHERE user_id = ?1",
                    [&user.id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(profile_id) = profile_id {
                delete_profile_rows(tx, &profile_id).map_err(|failure| {
                    anyhow::anyhow!("Cascade failed at {}: {}", failure.table, failure.message)
                })?;
            }

            tx.execute("DELETE FROM users WHERE id = ?1", [&user.id])?;
            info!("Deleted user {} ({})", user.id, clerk_id);
            Ok(true)
        })
    }
}

pub(crate) fn query_user_by_clerk_id(conn: &Connection, clerk_id: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE clerk_id = ?1"),
        [clerk_id],
        user_from_row,
    )
    .optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        clerk_id: row.get(1)?,
        email: row.get(2)?,
        is_freelancer: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
