use anyhow::Result;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use super::OptionalExt;
use super::conversations::upsert_conversation;
use crate::Database;
use crate::models::{MessageRow, NewMessage, parse_uuid};

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, content, read,
     attachment_path, attachment_name, attachment_content_type, created_at";

/// Result of a bulk read-state transition.
#[derive(Debug, Default)]
pub struct ReadReceipt {
    pub updated: usize,
    /// (conversation, sender, messages of theirs that were marked read)
    pub by_sender: Vec<(Uuid, Uuid, usize)>,
}

impl Database {
    // -- Messages --

    /// Resolve (or create) the sender/receiver conversation and insert the
    /// message as unread, in one transaction.
    pub fn send_message(&self, message: &NewMessage<'_>) -> Result<MessageRow> {
        self.with_tx(|tx| {
            let (conversation_id, _) = upsert_conversation(tx, message.sender_id, message.receiver_id)?;
            insert_message(tx, &conversation_id, message)
        })
    }

    /// One page of a conversation in chronological order. `before` is the id
    /// of the oldest message of the previous page; messages sharing its
    /// timestamp are ordered by insertion so none are skipped.
    pub fn get_messages(&self, conversation_id: Uuid, limit: u32, before: Option<Uuid>) -> Result<Vec<MessageRow>> {
        let cid = conversation_id.to_string();
        self.with_conn(|conn| {
            let mut rows = match before {
                Some(cursor) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1
                           AND (created_at, rowid) < (
                               SELECT created_at, rowid FROM messages
                               WHERE id = ?2 AND conversation_id = ?1)
                         ORDER BY created_at DESC, rowid DESC LIMIT ?3"
                    ))?;
                    stmt.query_map(rusqlite::params![cid, cursor.to_string(), limit], message_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1
                         ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                    ))?;
                    stmt.query_map(rusqlite::params![cid, limit], message_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            rows.reverse();
            Ok(rows)
        })
    }

    pub fn latest_message(&self, conversation_id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_latest_message(conn, &conversation_id.to_string()))
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id.to_string()],
                message_from_row,
            )
            .optional()
        })
    }

    /// Flip every unread message addressed to `receiver_id` to read, optionally
    /// limited to one conversation. This is the only update ever applied to an
    /// existing message row.
    pub fn mark_all_read(&self, receiver_id: Uuid, conversation_id: Option<Uuid>) -> Result<ReadReceipt> {
        let rid = receiver_id.to_string();
        let cid = conversation_id.map(|c| c.to_string());

        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT conversation_id, sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND read = 0 AND (?2 IS NULL OR conversation_id = ?2)
                 GROUP BY conversation_id, sender_id",
            )?;
            let groups = stmt
                .query_map((&rid, &cid), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let updated = tx.execute(
                "UPDATE messages SET read = 1
                 WHERE receiver_id = ?1 AND read = 0 AND (?2 IS NULL OR conversation_id = ?2)",
                (&rid, &cid),
            )?;

            let by_sender = groups
                .into_iter()
                .map(|(conversation, sender, count)| {
                    (
                        parse_uuid(&conversation, "conversation id"),
                        parse_uuid(&sender, "sender id"),
                        count as usize,
                    )
                })
                .collect();

            Ok(ReadReceipt { updated, by_sender })
        })
    }

    pub fn unread_count(&self, receiver_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND read = 0",
                [receiver_id.to_string()],
                |row| row.get(0),
            )?)
        })
    }
}

fn insert_message(conn: &Connection, conversation_id: &str, message: &NewMessage<'_>) -> Result<MessageRow> {
    let id = Uuid::new_v4().to_string();
    let (path, name, content_type) = match message.attachment {
        Some(a) => (Some(a.path.as_str()), Some(a.name.as_str()), Some(a.content_type.as_str())),
        None => (None, None, None),
    };

    conn.execute(
        "INSERT INTO messages
             (id, conversation_id, sender_id, receiver_id, content, read,
              attachment_path, attachment_name, attachment_content_type)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)",
        rusqlite::params![
            id,
            conversation_id,
            message.sender_id.to_string(),
            message.receiver_id.to_string(),
            message.content,
            path,
            name,
            content_type,
        ],
    )?;

    Ok(conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        [&id],
        message_from_row,
    )?)
}

pub(crate) fn query_latest_message(conn: &Connection, conversation_id: &str) -> Result<Option<MessageRow>> {
    conn.query_row(
        &format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ),
        [conversation_id],
        message_from_row,
    )
    .optional()
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        read: row.get(5)?,
        attachment_path: row.get(6)?,
        attachment_name: row.get(7)?,
        attachment_content_type: row.get(8)?,
        created_at: row.get(9)?,
    })
}
