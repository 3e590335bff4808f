use anyhow::Result;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use gighive_types::api::ConversationSummary;

use super::OptionalExt;
use crate::Database;
use crate::models::{ConversationRow, MessageRow, parse_uuid};

/// Order a pair of user ids so that (A, B) and (B, A) map to the same row.
///
/// `Uuid`'s ordering matches the ordering of its lowercase hyphenated text,
/// which is what the `CHECK (user_a < user_b)` constraint compares.
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

impl Database {
    // -- Conversations --

    /// Look up or create the conversation for an unordered pair of users.
    /// Returns the conversation id and whether this call created it.
    ///
    /// The insert and the lookup share one transaction on the writer, and the
    /// `UNIQUE (user_a, user_b)` constraint turns a lost race into a lookup.
    pub fn start_conversation(&self, a: Uuid, b: Uuid) -> Result<(Uuid, bool)> {
        self.with_tx(|tx| {
            let (id, created) = upsert_conversation(tx, a, b)?;
            Ok((parse_uuid(&id, "conversation id"), created))
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_a, user_b, created_at FROM conversations WHERE id = ?1",
                [id.to_string()],
                conversation_from_row,
            )
            .optional()
        })
    }

    pub fn find_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<ConversationRow>> {
        let (user_a, user_b) = canonical_pair(a, b);
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_a, user_b, created_at FROM conversations WHERE user_a = ?1 AND user_b = ?2",
                (user_a.to_string(), user_b.to_string()),
                conversation_from_row,
            )
            .optional()
        })
    }

    /// Conversations for `user_id` with the latest message and unread count,
    /// most recently active first.
    pub fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        let uid = user_id.to_string();
        self.with_conn(|conn| query_conversation_summaries(conn, &uid, user_id))
    }
}

/// Insert-or-lookup for a canonical pair. Callers must hold a transaction so
/// the insert and the lookup see the same state.
pub(crate) fn upsert_conversation(conn: &Connection, a: Uuid, b: Uuid) -> Result<(String, bool)> {
    let (user_a, user_b) = canonical_pair(a, b);
    let (user_a, user_b) = (user_a.to_string(), user_b.to_string());

    let inserted = conn.execute(
        "INSERT INTO conversations (id, user_a, user_b) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_a, user_b) DO NOTHING",
        (Uuid::new_v4().to_string(), &user_a, &user_b),
    )?;

    let id: String = conn.query_row(
        "SELECT id FROM conversations WHERE user_a = ?1 AND user_b = ?2",
        (&user_a, &user_b),
        |row| row.get(0),
    )?;

    Ok((id, inserted == 1))
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_a: row.get(1)?,
        user_b: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn query_conversation_summaries(conn: &Connection, uid: &str, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.user_a, c.user_b, c.created_at,
                p.display_name,
                (SELECT COUNT(*) FROM messages m
                  WHERE m.conversation_id = c.id AND m.receiver_id = ?1 AND m.read = 0) AS unread,
                (SELECT MAX(m.created_at) FROM messages m WHERE m.conversation_id = c.id) AS last_at
         FROM conversations c
         LEFT JOIN freelancer_profiles p
                ON p.user_id = CASE WHEN c.user_a = ?1 THEN c.user_b ELSE c.user_a END
         WHERE c.user_a = ?1 OR c.user_b = ?1
         ORDER BY COALESCE(last_at, c.created_at) DESC",
    )?;

    let rows = stmt
        .query_map([uid], |row| {
            Ok((
                conversation_from_row(row)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut summaries = Vec::with_capacity(rows.len());
    for (conversation, other_display_name, unread_count) in rows {
        let last_message = super::messages::query_latest_message(conn, &conversation.id)?.map(MessageRow::into_model);
        let model = conversation.into_model();

        summaries.push(ConversationSummary {
            id: model.id,
            other_user_id: model.other_participant(user_id),
            other_display_name,
            last_message,
            unread_count,
            created_at: model.created_at,
        });
    }

    Ok(summaries)
}
