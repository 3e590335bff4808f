use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Timestamp default used by every table: RFC 3339 with milliseconds, so
/// lexical order is chronological.
const NOW: &str = "(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))";

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, profiles, messaging)");
        conn.execute_batch(&v1_schema())?;
    }

    if version < 2 {
        info!("Running migration v2 (profile deletion intents)");
        conn.execute_batch(&v2_schema())?;
    }

    info!("Database migrations complete");
    Ok(())
}

fn v1_schema() -> String {
    format!(
        "
        CREATE TABLE users (
            id              TEXT PRIMARY KEY,
            clerk_id        TEXT NOT NULL UNIQUE,
            email           TEXT,
            is_freelancer   INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT {NOW},
            updated_at      TEXT NOT NULL DEFAULT {NOW}
        );

        CREATE TABLE freelancer_profiles (
            id                   TEXT PRIMARY KEY,
            user_id              TEXT NOT NULL UNIQUE REFERENCES users(id),
            display_name         TEXT,
            occupation           TEXT,
            description          TEXT,
            hourly_rate          REAL,
            country              TEXT,
            avatar_path          TEXT,
            avatar_content_type  TEXT,
            created_at           TEXT NOT NULL DEFAULT {NOW},
            updated_at           TEXT NOT NULL DEFAULT {NOW}
        );

        CREATE TABLE categories (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            name    TEXT NOT NULL UNIQUE,
            slug    TEXT NOT NULL UNIQUE
        );

        -- Child tables carry no ON DELETE CASCADE: profile deletion removes
        -- them explicitly, in a fixed order, inside one transaction.
        CREATE TABLE freelancer_languages (
            profile_id   TEXT NOT NULL REFERENCES freelancer_profiles(id),
            language     TEXT NOT NULL,
            proficiency  TEXT NOT NULL,
            PRIMARY KEY (profile_id, language)
        );

        CREATE TABLE freelancer_categories (
            profile_id   TEXT NOT NULL REFERENCES freelancer_profiles(id),
            category_id  INTEGER NOT NULL REFERENCES categories(id),
            PRIMARY KEY (profile_id, category_id)
        );

        CREATE TABLE freelancer_skills (
            profile_id  TEXT NOT NULL REFERENCES freelancer_profiles(id),
            skill       TEXT NOT NULL,
            PRIMARY KEY (profile_id, skill)
        );

        CREATE TABLE freelancer_education (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            profile_id   TEXT NOT NULL REFERENCES freelancer_profiles(id),
            institution  TEXT NOT NULL,
            degree       TEXT,
            field        TEXT,
            start_year   INTEGER,
            end_year     INTEGER
        );

        CREATE TABLE freelancer_certificates (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            profile_id  TEXT NOT NULL REFERENCES freelancer_profiles(id),
            name        TEXT NOT NULL,
            issuer      TEXT,
            year        INTEGER
        );

        CREATE TABLE freelancer_documents (
            id            TEXT PRIMARY KEY,
            profile_id    TEXT NOT NULL REFERENCES freelancer_profiles(id),
            name          TEXT NOT NULL,
            kind          TEXT NOT NULL,
            storage_path  TEXT NOT NULL,
            content_type  TEXT NOT NULL,
            uploaded_at   TEXT NOT NULL DEFAULT {NOW}
        );

        CREATE TABLE freelancer_payment_info (
            profile_id      TEXT PRIMARY KEY REFERENCES freelancer_profiles(id),
            method          TEXT NOT NULL,
            account_holder  TEXT NOT NULL,
            account_last4   TEXT,
            currency        TEXT NOT NULL,
            updated_at      TEXT NOT NULL DEFAULT {NOW}
        );

        -- One row per unordered pair: user_a is always the smaller id.
        CREATE TABLE conversations (
            id          TEXT PRIMARY KEY,
            user_a      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            user_b      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL DEFAULT {NOW},
            CHECK (user_a < user_b),
            UNIQUE (user_a, user_b)
        );

        CREATE TABLE messages (
            id                       TEXT PRIMARY KEY,
            conversation_id          TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id                TEXT NOT NULL,
            receiver_id              TEXT NOT NULL,
            content                  TEXT NOT NULL,
            read                     INTEGER NOT NULL DEFAULT 0,
            attachment_path          TEXT,
            attachment_name          TEXT,
            attachment_content_type  TEXT,
            created_at               TEXT NOT NULL DEFAULT {NOW}
        );

        CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);
        CREATE INDEX idx_messages_receiver_unread ON messages(receiver_id, read);

        INSERT INTO categories (name, slug) VALUES
            ('Graphics & Design', 'graphics-design'),
            ('Programming & Tech', 'programming-tech'),
            ('Digital Marketing', 'digital-marketing'),
            ('Writing & Translation', 'writing-translation'),
            ('Video & Animation', 'video-animation'),
            ('Music & Audio', 'music-audio'),
            ('Business', 'business'),
            ('Data', 'data'),
            ('Photography', 'photography');

        INSERT INTO schema_version (version) VALUES (1);
        "
    )
}

fn v2_schema() -> String {
    format!(
        "
        CREATE TABLE profile_deletions (
            profile_id    TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending',
            failed_table  TEXT,
            error         TEXT,
            attempts      INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL DEFAULT {NOW},
            updated_at    TEXT NOT NULL DEFAULT {NOW}
        );

        INSERT INTO schema_version (version) VALUES (2);
        "
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 2);

        let categories: i64 = conn
            .query_row("SELECT COUNT(*) FROM categories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(categories, 9);
    }
}
