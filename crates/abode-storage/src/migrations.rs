//! Database schema migrations.
//!
//! Version 1 creates the property listing read model, the chat session and
//! message tables, and the seeded `chat_suggestions` table.

use rusqlite::Connection;
use tracing::info;

use abode_core::error::AbodeError;

use crate::db::storage_err;

/// Built-in suggestion chips per category, seeded by v1 and used as the
/// last-resort fallback when the database yields nothing.
pub const SEED_SUGGESTIONS: &[(&str, &str)] = &[
    ("general", "Show me 2BHK flats for rent"),
    ("general", "Find houses for sale near me"),
    ("general", "Book a cleaning service"),
    ("general", "Tell me about ongoing projects"),
    ("general", "What can you help me with?"),
    ("property", "Show 3BHK apartments for rent"),
    ("property", "Flats under 15k per month"),
    ("property", "Houses for sale in Siliguri"),
    ("property", "Show newest listings"),
    ("property", "Change my budget"),
    ("service", "Book a plumber"),
    ("service", "Find an electrician"),
    ("service", "Home deep cleaning"),
    ("service", "Painting services near me"),
    ("service", "Carpentry and furniture repair"),
    ("project", "Show ongoing construction projects"),
    ("project", "Find a contractor for renovation"),
    ("project", "How do I start a building project?"),
    ("project", "Compare project timelines"),
    ("project", "Talk to a project expert"),
];

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), AbodeError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(storage_err("Failed to create migrations table"))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(storage_err("Failed to query migration version"))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: listings, chat sessions, chat messages, suggestions.
fn apply_v1(conn: &Connection) -> Result<(), AbodeError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS properties (
            id              TEXT PRIMARY KEY NOT NULL,
            title           TEXT NOT NULL,
            description     TEXT NOT NULL DEFAULT '',
            monthly_rent    INTEGER,
            sale_price      INTEGER,
            bedrooms        INTEGER,
            bathrooms       INTEGER,
            area            REAL,
            city            TEXT NOT NULL DEFAULT '',
            state           TEXT NOT NULL DEFAULT '',
            address         TEXT NOT NULL DEFAULT '',
            listing_type    TEXT NOT NULL
                            CHECK (listing_type IN ('rent', 'sale')),
            property_type   TEXT NOT NULL DEFAULT 'residential',
            images          TEXT NOT NULL DEFAULT '[]',
            status          TEXT NOT NULL DEFAULT 'available',
            is_approved     INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_properties_visible
            ON properties (status, is_approved, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_properties_city
            ON properties (city COLLATE NOCASE);

        -- Timestamps in the chat tables are Unix milliseconds.
        CREATE TABLE IF NOT EXISTS chat_sessions (
            id               TEXT PRIMARY KEY NOT NULL,
            user_id          TEXT,
            location         TEXT NOT NULL DEFAULT '',
            context          TEXT NOT NULL DEFAULT '[]',
            last_query_type  TEXT NOT NULL DEFAULT 'general'
                             CHECK (last_query_type IN ('property', 'service', 'project', 'general')),
            is_active        INTEGER NOT NULL DEFAULT 1,
            created_at       INTEGER NOT NULL,
            last_message_at  INTEGER NOT NULL,
            expires_at       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_sessions_user
            ON chat_sessions (user_id, last_message_at DESC)
            WHERE user_id IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_chat_sessions_expires
            ON chat_sessions (expires_at);

        CREATE TABLE IF NOT EXISTS chat_messages (
            id                  TEXT PRIMARY KEY NOT NULL,
            session_id          TEXT NOT NULL,
            role                TEXT NOT NULL
                                CHECK (role IN ('user', 'assistant')),
            content             TEXT NOT NULL,
            created_at          INTEGER NOT NULL,
            processing_time_ms  INTEGER,
            context_snapshot    TEXT NOT NULL DEFAULT '[]',
            data_results        TEXT NOT NULL DEFAULT 'null',
            suggestions         TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY (session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_session
            ON chat_messages (session_id, created_at);

        CREATE TABLE IF NOT EXISTS chat_suggestions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            category    TEXT NOT NULL,
            text        TEXT NOT NULL,
            priority    INTEGER NOT NULL DEFAULT 0,
            is_active   INTEGER NOT NULL DEFAULT 1,
            UNIQUE (category, text)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_suggestions_category
            ON chat_suggestions (category, priority DESC);
        ",
    )
    .map_err(storage_err("Failed to apply migration v1"))?;

    let mut stmt = conn
        .prepare(
            "INSERT OR IGNORE INTO chat_suggestions (category, text, priority)
             VALUES (?1, ?2, ?3)",
        )
        .map_err(storage_err("Failed to prepare suggestion seed"))?;
    for (i, (category, text)) in SEED_SUGGESTIONS.iter().enumerate() {
        // Earlier seeds rank higher within their category.
        let priority = (SEED_SUGGESTIONS.len() - i) as i64;
        stmt.execute(rusqlite::params![category, text, priority])
            .map_err(storage_err("Failed to seed suggestions"))?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema')",
        [],
    )
    .map_err(storage_err("Failed to record migration v1"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_all_tables_exist() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        for table in ["properties", "chat_sessions", "chat_messages", "chat_suggestions"] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_suggestions_seeded_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chat_suggestions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count as usize, SEED_SUGGESTIONS.len());
    }

    #[test]
    fn test_listing_type_check_constraint() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO properties (id, title, listing_type) VALUES ('p1', 'Flat', 'lease')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_messages_cascade_with_session() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO chat_sessions (id, created_at, last_message_at, expires_at)
             VALUES ('s1', 0, 0, 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO chat_messages (id, session_id, role, content, created_at)
             VALUES ('m1', 's1', 'user', 'hi', 0)",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM chat_sessions WHERE id = 's1'", [])
            .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chat_messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
