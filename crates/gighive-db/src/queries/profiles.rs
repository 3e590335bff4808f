use std::fmt;

use anyhow::{Result, bail};
use rusqlite::{Connection, params};
use tracing::{info, warn};
use uuid::Uuid;

use gighive_types::models::{
    Category, Certificate, Document, Education, FreelancerProfile, Language, PaymentInfo, StoredObject,
};

use super::OptionalExt;
use crate::Database;
use crate::models::{DeletionIntentRow, ProfileRow, parse_timestamp, parse_uuid};

/// Child tables of `freelancer_profiles`, in the order they are deleted.
pub const CASCADE_ORDER: [&str; 7] = [
    "freelancer_payment_info",
    "freelancer_documents",
    "freelancer_certificates",
    "freelancer_education",
    "freelancer_skills",
    "freelancer_categories",
    "freelancer_languages",
];

/// Bucket names recorded with stored avatars.
const AVATAR_BUCKET: &str = "avatars";

/// Fields of a profile upsert. `None` scalars keep the stored value, `None`
/// collections leave the stored rows untouched.
#[derive(Debug, Default)]
pub struct ProfileWrite<'a> {
    pub display_name: Option<&'a str>,
    pub occupation: Option<&'a str>,
    pub description: Option<&'a str>,
    pub hourly_rate: Option<f64>,
    pub country: Option<&'a str>,
    pub languages: Option<&'a [Language]>,
    pub category_ids: Option<&'a [i64]>,
    pub skills: Option<&'a [String]>,
    pub education: Option<&'a [Education]>,
    pub certificates: Option<&'a [Certificate]>,
}

#[derive(Debug)]
pub enum DeleteOutcome {
    NotFound,
    Deleted {
        profile_id: Uuid,
        removed_rows: usize,
        avatar_path: Option<String>,
        document_paths: Vec<String>,
    },
    /// The cascade rolled back; nothing was removed.
    Failed {
        profile_id: Uuid,
        table: String,
        error: String,
    },
}

#[derive(Debug)]
pub(crate) struct CascadeFailure {
    pub table: &'static str,
    pub message: String,
}

impl fmt::Display for CascadeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delete from {} failed: {}", self.table, self.message)
    }
}

impl std::error::Error for CascadeFailure {}

impl Database {
    // -- Profiles --

    /// Upsert the profile keyed by `user_id`, replace provided collections and
    /// flag the user as a freelancer, all in one transaction.
    pub fn upsert_profile(&self, user_id: Uuid, write: &ProfileWrite<'_>) -> Result<Uuid> {
        let uid = user_id.to_string();
        self.with_tx(|tx| {
            let user_exists: Option<i64> = tx
                .query_row("SELECT 1 FROM users WHERE id = ?1", [&uid], |row| row.get(0))
                .optional()?;
            if user_exists.is_none() {
                bail!("Unknown user {}", uid);
            }

            tx.execute(
                "INSERT INTO freelancer_profiles
                     (id, user_id, display_name, occupation, description, hourly_rate, country)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = COALESCE(excluded.display_name, freelancer_profiles.display_name),
                     occupation   = COALESCE(excluded.occupation, freelancer_profiles.occupation),
                     description  = COALESCE(excluded.description, freelancer_profiles.description),
                     hourly_rate  = COALESCE(excluded.hourly_rate, freelancer_profiles.hourly_rate),
                     country      = COALESCE(excluded.country, freelancer_profiles.country),
                     updated_at   = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![
                    Uuid::new_v4().to_string(),
                    &uid,
                    write.display_name,
                    write.occupation,
                    write.description,
                    write.hourly_rate,
                    write.country,
                ],
            )?;

            let profile_id: String =
                tx.query_row("SELECT id FROM freelancer_profiles WHERE user_id = ?1", [&uid], |row| row.get(0))?;

            replace_collections(tx, &profile_id, write)?;

            tx.execute(
                "UPDATE users SET is_freelancer = 1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                [&uid],
            )?;

            Ok(parse_uuid(&profile_id, "profile id"))
        })
    }

    pub fn get_profile(&self, user_id: Uuid) -> Result<Option<FreelancerProfile>> {
        self.with_conn(|conn| query_profile(conn, &user_id.to_string()))
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, slug FROM categories ORDER BY name")?;
            let rows = stmt
                .query_map([], |row| Ok(Category { id: row.get(0)?, name: row.get(1)?, slug: row.get(2)? }))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Resolve category slugs. Returns the matched categories and the slugs
    /// that matched nothing.
    pub fn resolve_categories(&self, slugs: &[String]) -> Result<(Vec<Category>, Vec<String>)> {
        let all = self.list_categories()?;
        let mut found = Vec::with_capacity(slugs.len());
        let mut missing = Vec::new();
        for slug in slugs {
            match all.iter().find(|c| &c.slug == slug) {
                Some(category) => found.push(category.clone()),
                None => missing.push(slug.clone()),
            }
        }
        Ok((found, missing))
    }

    /// Record the avatar's storage path and content type. Returns `false` if
    /// the user has no profile.
    pub fn set_avatar(&self, user_id: Uuid, path: &str, content_type: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE freelancer_profiles
                 SET avatar_path = ?1, avatar_content_type = ?2,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE user_id = ?3",
                (path, content_type, user_id.to_string()),
            )?;
            Ok(changed == 1)
        })
    }

    /// Returns `None` if the user has no profile.
    pub fn add_document(
        &self,
        user_id: Uuid,
        name: &str,
        kind: &str,
        storage_path: &str,
        content_type: &str,
    ) -> Result<Option<Document>> {
        let uid = user_id.to_string();
        self.with_tx(|tx| {
            let Some(profile_id) = profile_id_for(tx, &uid)? else {
                return Ok(None);
            };

            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO freelancer_documents (id, profile_id, name, kind, storage_path, content_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id.to_string(), &profile_id, name, kind, storage_path, content_type),
            )?;
            let uploaded_at: String =
                tx.query_row("SELECT uploaded_at FROM freelancer_documents WHERE id = ?1", [id.to_string()], |row| {
                    row.get(0)
                })?;

            Ok(Some(Document {
                id,
                name: name.to_string(),
                kind: kind.to_string(),
                storage_path: storage_path.to_string(),
                content_type: content_type.to_string(),
                uploaded_at: parse_timestamp(&uploaded_at),
            }))
        })
    }

    /// Returns `false` if the user has no profile.
    pub fn upsert_payment_info(&self, user_id: Uuid, info: &PaymentInfo) -> Result<bool> {
        let uid = user_id.to_string();
        self.with_tx(|tx| {
            let Some(profile_id) = profile_id_for(tx, &uid)? else {
                return Ok(false);
            };

            tx.execute(
                "INSERT INTO freelancer_payment_info (profile_id, method, account_holder, account_last4, currency)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(profile_id) DO UPDATE SET
                     method = excluded.method,
                     account_holder = excluded.account_holder,
                     account_last4 = excluded.account_last4,
                     currency = excluded.currency,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                (&profile_id, &info.method, &info.account_holder, &info.account_last4, &info.currency),
            )?;
            Ok(true)
        })
    }

    /// Delete the profile owned by `user_id`. See `delete_profile_by_id`.
    pub fn delete_profile(&self, user_id: Uuid) -> Result<DeleteOutcome> {
        let profile_id = self.with_conn(|conn| profile_id_for(conn, &user_id.to_string()))?;
        match profile_id {
            Some(profile_id) => self.delete_profile_by_id(parse_uuid(&profile_id, "profile id")),
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    /// Delete one profile row and its seven child tables in `CASCADE_ORDER`.
    ///
    /// A `profile_deletions` intent row is written first and updated with the
    /// result, so a failed cascade stays visible and can be retried by
    /// `pending_profile_deletions`. A profile the user created after the
    /// intent was recorded has a different id and is never touched.
    pub fn delete_profile_by_id(&self, profile_id: Uuid) -> Result<DeleteOutcome> {
        let pid = profile_id.to_string();

        let target = self.with_conn_mut(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, avatar_path FROM freelancer_profiles WHERE id = ?1",
                    [&pid],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
                )
                .optional()?;
            let Some((uid, avatar_path)) = row else {
                return Ok(None);
            };

            let mut stmt = conn.prepare("SELECT storage_path FROM freelancer_documents WHERE profile_id = ?1")?;
            let document_paths = stmt
                .query_map([&pid], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            conn.execute(
                "INSERT INTO profile_deletions (profile_id, user_id, status) VALUES (?1, ?2, 'pending')
                 ON CONFLICT(profile_id) DO UPDATE SET
                     status = 'pending',
                     failed_table = NULL,
                     error = NULL,
                     attempts = profile_deletions.attempts + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                (&pid, &uid),
            )?;

            Ok(Some((uid, avatar_path, document_paths)))
        })?;

        let Some((uid, avatar_path, document_paths)) = target else {
            return Ok(DeleteOutcome::NotFound);
        };

        let result = self.with_tx(|tx| {
            let removed = delete_profile_rows(tx, &pid)?;
            tx.execute(
                "UPDATE users SET is_freelancer = 0, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                [&uid],
            )?;
            Ok(removed)
        });

        match result {
            Ok(removed_rows) => {
                self.mark_deletion(&pid, "completed", None, None)?;
                info!("Deleted profile {} ({} rows)", pid, removed_rows);
                Ok(DeleteOutcome::Deleted {
                    profile_id,
                    removed_rows,
                    avatar_path,
                    document_paths,
                })
            }
            Err(e) => {
                let (table, error) = match e.downcast::<CascadeFailure>() {
                    Ok(failure) => (failure.table.to_string(), failure.message),
                    Err(other) => ("transaction".to_string(), other.to_string()),
                };
                warn!("Profile {} cascade failed at {}: {}", pid, table, error);
                self.mark_deletion(&pid, "failed", Some(&table), Some(&error))?;
                Ok(DeleteOutcome::Failed {
                    profile_id,
                    table,
                    error,
                })
            }
        }
    }

    /// Deletion intents that still need work, oldest first.
    pub fn pending_profile_deletions(&self, max_attempts: i64) -> Result<Vec<DeletionIntentRow>> {
        self.with_conn_mut(|conn| {
            let mut stmt = conn.prepare(
                "SELECT profile_id, user_id, status, failed_table, attempts FROM profile_deletions
                 WHERE status IN ('pending', 'failed') AND attempts < ?1
                 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([max_attempts], |row| {
                    Ok(DeletionIntentRow {
                        profile_id: row.get(0)?,
                        user_id: row.get(1)?,
                        status: row.get(2)?,
                        failed_table: row.get(3)?,
                        attempts: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_deletion_intent(&self, profile_id: Uuid) -> Result<Option<DeletionIntentRow>> {
        self.with_conn_mut(|conn| {
            conn.query_row(
                "SELECT profile_id, user_id, status, failed_table, attempts FROM profile_deletions
                 WHERE profile_id = ?1",
                [profile_id.to_string()],
                |row| {
                    Ok(DeletionIntentRow {
                        profile_id: row.get(0)?,
                        user_id: row.get(1)?,
                        status: row.get(2)?,
                        failed_table: row.get(3)?,
                        attempts: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn mark_deletion(
        &self,
        profile_id: &str,
        status: &str,
        failed_table: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE profile_deletions
                 SET status = ?2, failed_table = ?3, error = ?4,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE profile_id = ?1",
                (profile_id, status, failed_table, error),
            )?;
            Ok(())
        })
    }
}

/// Delete every child row and then the profile row itself. Must run inside a
/// transaction: on error the caller's transaction rolls everything back.
pub(crate) fn delete_profile_rows(conn: &Connection, profile_id: &str) -> std::result::Result<usize, CascadeFailure> {
    let mut removed = 0;
    for table in CASCADE_ORDER {
        removed += conn
            .execute(&format!("DELETE FROM {table} WHERE profile_id = ?1"), [profile_id])
            .map_err(|e| CascadeFailure { table, message: e.to_string() })?;
    }

    removed += conn
        .execute("DELETE FROM freelancer_profiles WHERE id = ?1", [profile_id])
        .map_err(|e| CascadeFailure { table: "freelancer_profiles", message: e.to_string() })?;

    Ok(removed)
}

fn profile_id_for(conn: &Connection, user_id: &str) -> Result<Option<String>> {
    conn.query_row("SELECT id FROM freelancer_profiles WHERE user_id = ?1", [user_id], |row| row.get(0))
        .optional()
}

fn replace_collections(conn: &Connection, profile_id: &str, write: &ProfileWrite<'_>) -> Result<()> {
    if let Some(languages) = write.languages {
        conn.execute("DELETE FROM freelancer_languages WHERE profile_id = ?1", [profile_id])?;
        let mut stmt = conn.prepare(
            "INSERT OR REPLACE INTO freelancer_languages (profile_id, language, proficiency) VALUES (?1, ?2, ?3)",
        )?;
        for language in languages {
            stmt.execute((profile_id, &language.language, &language.proficiency))?;
        }
    }

    if let Some(category_ids) = write.category_ids {
        conn.execute("DELETE FROM freelancer_categories WHERE profile_id = ?1", [profile_id])?;
        let mut stmt =
            conn.prepare("INSERT OR IGNORE INTO freelancer_categories (profile_id, category_id) VALUES (?1, ?2)")?;
        for category_id in category_ids {
            stmt.execute((profile_id, category_id))?;
        }
    }

    if let Some(skills) = write.skills {
        conn.execute("DELETE FROM freelancer_skills WHERE profile_id = ?1", [profile_id])?;
        let mut stmt = conn.prepare("INSERT OR IGNORE INTO freelancer_skills (profile_id, skill) VALUES (?1, ?2)")?;
        for skill in skills {
            stmt.execute((profile_id, skill))?;
        }
    }

    if let Some(education) = write.education {
        conn.execute("DELETE FROM freelancer_education WHERE profile_id = ?1", [profile_id])?;
        let mut stmt = conn.prepare(
            "INSERT INTO freelancer_education (profile_id, institution, degree, field, start_year, end_year)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for entry in education {
            stmt.execute(params![
                profile_id,
                entry.institution,
                entry.degree,
                entry.field,
                entry.start_year,
                entry.end_year
            ])?;
        }
    }

    if let Some(certificates) = write.certificates {
        conn.execute("DELETE FROM freelancer_certificates WHERE profile_id = ?1", [profile_id])?;
        let mut stmt =
            conn.prepare("INSERT INTO freelancer_certificates (profile_id, name, issuer, year) VALUES (?1, ?2, ?3, ?4)")?;
        for certificate in certificates {
            stmt.execute((profile_id, &certificate.name, &certificate.issuer, certificate.year))?;
        }
    }

    Ok(())
}

fn query_profile(conn: &Connection, user_id: &str) -> Result<Option<FreelancerProfile>> {
    let row = conn
        .query_row(
            "SELECT id, user_id, display_name, occupation, description, hourly_rate, country,
                    avatar_path, avatar_content_type, created_at, updated_at
             FROM freelancer_profiles WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok(ProfileRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    display_name: row.get(2)?,
                    occupation: row.get(3)?,
                    description: row.get(4)?,
                    hourly_rate: row.get(5)?,
                    country: row.get(6)?,
                    avatar_path: row.get(7)?,
                    avatar_content_type: row.get(8)?,
                    created_at: row.get(9)?,
                    updated_at: row.get(10)?,
                })
            },
        )
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };
    let pid = row.id.as_str();

    let languages = conn
        .prepare("SELECT language, proficiency FROM freelancer_languages WHERE profile_id = ?1 ORDER BY language")?
        .query_map([pid], |r| Ok(Language { language: r.get(0)?, proficiency: r.get(1)? }))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let categories = conn
        .prepare(
            "SELECT c.id, c.name, c.slug FROM freelancer_categories fc
             JOIN categories c ON c.id = fc.category_id
             WHERE fc.profile_id = ?1 ORDER BY c.name",
        )?
        .query_map([pid], |r| Ok(Category { id: r.get(0)?, name: r.get(1)?, slug: r.get(2)? }))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let skills = conn
        .prepare("SELECT skill FROM freelancer_skills WHERE profile_id = ?1 ORDER BY skill")?
        .query_map([pid], |r| r.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let education = conn
        .prepare(
            "SELECT institution, degree, field, start_year, end_year FROM freelancer_education
             WHERE profile_id = ?1 ORDER BY id",
        )?
        .query_map([pid], |r| {
            Ok(Education {
                institution: r.get(0)?,
                degree: r.get(1)?,
                field: r.get(2)?,
                start_year: r.get(3)?,
                end_year: r.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let certificates = conn
        .prepare("SELECT name, issuer, year FROM freelancer_certificates WHERE profile_id = ?1 ORDER BY id")?
        .query_map([pid], |r| Ok(Certificate { name: r.get(0)?, issuer: r.get(1)?, year: r.get(2)? }))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let documents = conn
        .prepare(
            "SELECT id, name, kind, storage_path, content_type, uploaded_at FROM freelancer_documents
             WHERE profile_id = ?1 ORDER BY uploaded_at",
        )?
        .query_map([pid], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(id, name, kind, storage_path, content_type, uploaded_at)| Document {
            id: parse_uuid(&id, "document id"),
            name,
            kind,
            storage_path,
            content_type,
            uploaded_at: parse_timestamp(&uploaded_at),
        })
        .collect();

    let payment_info = conn
        .query_row(
            "SELECT method, account_holder, account_last4, currency FROM freelancer_payment_info
             WHERE profile_id = ?1",
            [pid],
            |r| {
                Ok(PaymentInfo {
                    method: r.get(0)?,
                    account_holder: r.get(1)?,
                    account_last4: r.get(2)?,
                    currency: r.get(3)?,
                })
            },
        )
        .optional()?;

    let avatar = match (row.avatar_path, row.avatar_content_type) {
        (Some(path), Some(content_type)) => Some(StoredObject { bucket: AVATAR_BUCKET.into(), path, content_type }),
        _ => None,
    };

    Ok(Some(FreelancerProfile {
        id: parse_uuid(&row.id, "profile id"),
        user_id: parse_uuid(&row.user_id, "profile user_id"),
        display_name: row.display_name,
        occupation: row.occupation,
        description: row.description,
        hourly_rate: row.hourly_rate,
        country: row.country,
        avatar,
        languages,
        categories,
        skills,
        education,
        certificates,
        documents,
        payment_info,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_profile(db: &Database) -> Uuid {
        let user = db.upsert_user("u_1", Some("a@example.com")).unwrap().user.into_model();
        let (categories, _) = db.resolve_categories(&["graphics-design".to_string()]).unwrap();
        let category_ids: Vec<i64> = categories.iter().map(|c| c.id).collect();

        db.upsert_profile(user.id, &ProfileWrite {
            display_name: Some("Ada"),
            occupation: Some("designer"),
            languages: Some(&[Language { language: "English".into(), proficiency: "native".into() }]),
            category_ids: Some(&category_ids),
            skills: Some(&["figma".to_string(), "illustration".to_string()]),
            education: Some(&[Education {
                institution: "RISD".into(),
                degree: Some("BFA".into()),
                field: None,
                start_year: Some(2010),
                end_year: Some(2014),
            }]),
            certificates: Some(&[Certificate { name: "UX".into(), issuer: None, year: Some(2020) }]),
            ..Default::default()
        })
        .unwrap();
        db.add_document(user.id, "id.pdf", "identity", "u/id.pdf", "application/pdf").unwrap();
        db.upsert_payment_info(user.id, &PaymentInfo {
            method: "bank".into(),
            account_holder: "Ada".into(),
            account_last4: Some("1234".into()),
            currency: "EUR".into(),
        })
        .unwrap();
        user.id
    }

    fn child_row_count(db: &Database) -> i64 {
        db.with_conn_mut(|conn| {
            let mut total = 0;
            for table in CASCADE_ORDER {
                total += conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get::<_, i64>(0))?;
            }
            Ok(total)
        })
        .unwrap()
    }

    #[test]
    fn upsert_sets_freelancer_flag_and_collections() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seeded_profile(&db);

        let user = db.get_user_by_id(user_id).unwrap().unwrap();
        assert!(user.is_freelancer);

        let profile = db.get_profile(user_id).unwrap().unwrap();
        assert_eq!(profile.occupation.as_deref(), Some("designer"));
        assert_eq!(profile.skills, vec!["figma".to_string(), "illustration".to_string()]);
        assert_eq!(profile.categories.len(), 1);
        assert_eq!(profile.documents.len(), 1);
        assert_eq!(profile.payment_info.unwrap().account_last4.as_deref(), Some("1234"));
    }

    #[test]
    fn partial_upsert_keeps_existing_fields() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seeded_profile(&db);

        db.upsert_profile(user_id, &ProfileWrite { hourly_rate: Some(80.0), ..Default::default() }).unwrap();

        let profile = db.get_profile(user_id).unwrap().unwrap();
        assert_eq!(profile.occupation.as_deref(), Some("designer"));
        assert_eq!(profile.hourly_rate, Some(80.0));
        assert_eq!(profile.skills.len(), 2);
    }

    #[test]
    fn upsert_for_unknown_user_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.upsert_profile(Uuid::new_v4(), &ProfileWrite::default()).is_err());

        let profiles: i64 = db
            .with_conn_mut(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM freelancer_profiles", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(profiles, 0);
    }

    #[test]
    fn delete_removes_every_child_table() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seeded_profile(&db);
        assert!(child_row_count(&db) > 0);

        let outcome = db.delete_profile(user_id).unwrap();
        let DeleteOutcome::Deleted { profile_id, document_paths, .. } = outcome else {
            panic!("expected Deleted, got {:?}", outcome);
        };

        assert_eq!(document_paths, vec!["u/id.pdf".to_string()]);
        assert_eq!(child_row_count(&db), 0);
        assert!(db.get_profile(user_id).unwrap().is_none());
        assert!(!db.get_user_by_id(user_id).unwrap().unwrap().is_freelancer);
        assert_eq!(db.get_deletion_intent(profile_id).unwrap().unwrap().status, "completed");
    }

    #[test]
    fn failed_child_delete_keeps_parent_and_records_intent() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seeded_profile(&db);
        let before = child_row_count(&db);

        db.with_conn_mut(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER block_cert_delete BEFORE DELETE ON freelancer_certificates
                 BEGIN SELECT RAISE(ABORT, 'certificates locked'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let outcome = db.delete_profile(user_id).unwrap();
        let DeleteOutcome::Failed { profile_id, table, .. } = outcome else {
            panic!("expected Failed, got {:?}", outcome);
        };

        assert_eq!(table, "freelancer_certificates");
        // Rolled back: payment info and documents were deleted earlier in the
        // order but must still be there.
        assert_eq!(child_row_count(&db), before);
        assert!(db.get_profile(user_id).unwrap().is_some());
        assert!(db.get_user_by_id(user_id).unwrap().unwrap().is_freelancer);

        let intent = db.get_deletion_intent(profile_id).unwrap().unwrap();
        assert_eq!(intent.status, "failed");
        assert_eq!(intent.failed_table.as_deref(), Some("freelancer_certificates"));
        assert_eq!(db.pending_profile_deletions(5).unwrap().len(), 1);
    }

    #[test]
    fn delete_by_id_leaves_a_newer_profile_alone() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seeded_profile(&db);
        let DeleteOutcome::Deleted { profile_id: old_id, .. } = db.delete_profile(user_id).unwrap() else {
            panic!("expected Deleted");
        };

        let new_id = db
            .upsert_profile(user_id, &ProfileWrite { occupation: Some("painter"), ..Default::default() })
            .unwrap();
        assert_ne!(new_id, old_id);

        assert!(matches!(db.delete_profile_by_id(old_id).unwrap(), DeleteOutcome::NotFound));
        let profile = db.get_profile(user_id).unwrap().unwrap();
        assert_eq!(profile.id, new_id);
        assert!(db.get_user_by_id(user_id).unwrap().unwrap().is_freelancer);
    }

    #[test]
    fn delete_without_profile_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let user = db.upsert_user("u_9", None).unwrap().user.into_model();
        assert!(matches!(db.delete_profile(user.id).unwrap(), DeleteOutcome::NotFound));
    }

    #[test]
    fn resolve_categories_reports_missing_slugs() {
        let db = Database::open_in_memory().unwrap();
        let (found, missing) =
            db.resolve_categories(&["data".to_string(), "basket-weaving".to_string()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(missing, vec!["basket-weaving".to_string()]);
    }
}
