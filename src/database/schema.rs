/*!
 * Database schema definitions and migrations.
 *
 * This module contains the SQL schema for all database tables
 * and handles schema migrations for version upgrades.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Initializing database schema v{}", SCHEMA_VERSION);
        create_all_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating database schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        migrate_schema(conn, current_version)?;
    } else {
        debug!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get the current schema version from the database
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .context("Failed to check schema_version table existence")?;

    if !table_exists {
        return Ok(0);
    }

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version in the database
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version, updated_at) VALUES (1, ?1, datetime('now'))",
        [version],
    )?;
    Ok(())
}

/// Create all database tables
fn create_all_tables(conn: &Connection) -> Result<()> {
    // WAL for concurrent readers alongside the writer
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )?;

    // Show -> season hierarchy for episodes
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS shows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id INTEGER NOT NULL UNIQUE,
            title TEXT NOT NULL,
            path TEXT NOT NULL,
            date_added TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS seasons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            show_id INTEGER NOT NULL REFERENCES shows(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            UNIQUE(show_id, number)
        );
        "#,
    )?;

    // Movies and episodes share one table, discriminated by kind
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS media (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('movie', 'episode')),
            season_id INTEGER REFERENCES seasons(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            date_added TEXT NOT NULL,
            exclude_from_translation INTEGER NOT NULL DEFAULT 0,
            is_priority INTEGER NOT NULL DEFAULT 0,
            priority_date TEXT,
            translation_age_threshold INTEGER,
            translation_state TEXT NOT NULL DEFAULT 'unknown',
            indexed_at TEXT,
            state_settings_version INTEGER NOT NULL DEFAULT 0,
            last_subtitle_check_at TEXT,
            UNIQUE(external_id, kind)
        );

        CREATE INDEX IF NOT EXISTS idx_media_state ON media(translation_state);
        CREATE INDEX IF NOT EXISTS idx_media_priority ON media(is_priority, date_added);
        "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS embedded_subtitles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            media_id INTEGER NOT NULL REFERENCES media(id) ON DELETE CASCADE,
            stream_index INTEGER NOT NULL,
            language TEXT,
            title TEXT,
            codec_name TEXT NOT NULL,
            is_text_based INTEGER NOT NULL DEFAULT 0,
            is_default INTEGER NOT NULL DEFAULT 0,
            is_forced INTEGER NOT NULL DEFAULT 0,
            is_extracted INTEGER NOT NULL DEFAULT 0,
            extracted_path TEXT,
            UNIQUE(media_id, stream_index)
        );

        CREATE INDEX IF NOT EXISTS idx_embedded_media ON embedded_subtitles(media_id);
        "#,
    )?;

    // The partial unique index enforces at most one active request per
    // (media, kind, source, target); creators catch the violation and treat
    // it as success
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS translation_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            media_id INTEGER NOT NULL,
            media_kind TEXT NOT NULL CHECK (media_kind IN ('movie', 'episode')),
            title TEXT NOT NULL,
            source_language TEXT NOT NULL,
            target_language TEXT NOT NULL,
            subtitle_to_translate TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            job_id TEXT,
            is_active INTEGER
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_active_tuple
            ON translation_requests(media_id, media_kind, source_language, target_language)
            WHERE is_active = 1;

        CREATE INDEX IF NOT EXISTS idx_requests_status ON translation_requests(status);
        CREATE INDEX IF NOT EXISTS idx_requests_media ON translation_requests(media_id, media_kind);
        "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS translation_request_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id INTEGER NOT NULL REFERENCES translation_requests(id) ON DELETE CASCADE,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            details TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_request_logs_request ON translation_request_logs(request_id);
        "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS subtitle_cleanup_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subtitle_provider_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider TEXT NOT NULL,
            event TEXT NOT NULL,
            details TEXT,
            created_at TEXT NOT NULL
        );
        "#,
    )?;

    info!("Database schema created successfully");
    Ok(())
}

/// Migrate the schema from one version to another
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<()> {
    let current = from_version;

    while current < SCHEMA_VERSION {
        match current {
            // Add migration steps here as the schema evolves
            _ => {
                return Err(anyhow::anyhow!(
                    "Unknown schema version: {}. Cannot migrate.",
                    current
                ));
            }
        }
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    info!("Schema migration completed to v{}", SCHEMA_VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn create_test_connection() -> Connection {
        Connection::open_in_memory().expect("Failed to create in-memory database")
    }

    #[test]
    fn test_initializeSchema_withFreshDatabase_shouldCreateAllTables() {
        let conn = create_test_connection();

        initialize_schema(&conn).expect("Failed to initialize schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"media".to_string()));
        assert!(tables.contains(&"shows".to_string()));
        assert!(tables.contains(&"seasons".to_string()));
        assert!(tables.contains(&"embedded_subtitles".to_string()));
        assert!(tables.contains(&"translation_requests".to_string()));
        assert!(tables.contains(&"translation_request_logs".to_string()));
        assert!(tables.contains(&"settings".to_string()));
        assert!(tables.contains(&"subtitle_cleanup_logs".to_string()));
        assert!(tables.contains(&"subtitle_provider_logs".to_string()));
    }

    #[test]
    fn test_initializeSchema_calledTwice_shouldBeIdempotent() {
        let conn = create_test_connection();

        initialize_schema(&conn).expect("First initialization failed");
        initialize_schema(&conn).expect("Second initialization failed");

        let version = get_schema_version(&conn).expect("Failed to get version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_activeTupleIndex_shouldRejectSecondActiveRow() {
        let conn = create_test_connection();
        initialize_schema(&conn).expect("Failed to initialize schema");

        conn.execute(
            "INSERT INTO translation_requests (media_id, media_kind, title, source_language, target_language, status, created_at, is_active)
             VALUES (1, 'movie', 'Example', 'en', 'ro', 'pending', datetime('now'), 1)",
            [],
        )
        .expect("First insert failed");

        let duplicate = conn.execute(
            "INSERT INTO translation_requests (media_id, media_kind, title, source_language, target_language, status, created_at, is_active)
             VALUES (1, 'movie', 'Example', 'en', 'ro', 'pending', datetime('now'), 1)",
            [],
        );

        assert!(duplicate.is_err(), "Partial unique index should reject");

        // A terminal row with is_active NULL may coexist with an active one
        conn.execute(
            "INSERT INTO translation_requests (media_id, media_kind, title, source_language, target_language, status, created_at, is_active)
             VALUES (1, 'movie', 'Example', 'en', 'ro', 'completed', datetime('now'), NULL)",
            [],
        )
        .expect("Inactive duplicate should be allowed");
    }

    #[test]
    fn test_requestLogs_shouldCascadeDeleteWithRequest() {
        let conn = create_test_connection();
        initialize_schema(&conn).expect("Failed to initialize schema");
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();

        conn.execute(
            "INSERT INTO translation_requests (media_id, media_kind, title, source_language, target_language, status, created_at, is_active)
             VALUES (1, 'movie', 'Example', 'en', 'ro', 'pending', datetime('now'), 1)",
            [],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO translation_request_logs (request_id, level, message, created_at)
             VALUES (1, 'info', 'queued', datetime('now'))",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM translation_requests WHERE id = 1", [])
            .unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM translation_request_logs", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_media_externalIdAndKind_shouldBeUnique() {
        let conn = create_test_connection();
        initialize_schema(&conn).expect("Failed to initialize schema");

        conn.execute(
            "INSERT INTO media (external_id, kind, title, path, file_name, date_added)
             VALUES (42, 'movie', 'A', '/m/A', 'A.mkv', datetime('now'))",
            [],
        )
        .unwrap();

        // Same external id under the other kind is a different item
        conn.execute(
            "INSERT INTO media (external_id, kind, title, path, file_name, date_added)
             VALUES (42, 'episode', 'B', '/s/B', 'B.mkv', datetime('now'))",
            [],
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO media (external_id, kind, title, path, file_name, date_added)
             VALUES (42, 'movie', 'C', '/m/C', 'C.mkv', datetime('now'))",
            [],
        );
        assert!(duplicate.is_err());
    }
}
