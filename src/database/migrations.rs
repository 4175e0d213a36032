//! Schema migrations for the placestore SQLite database.
//!
//! Uses a `schema_version` table to track which migrations have been applied.
//! Each migration runs exactly once and is recorded with a timestamp.

use rusqlite::{params, Connection};

use crate::types::bookmark::{
    now_ms, BookmarkType, SyncStatus, MENU_GUID, MOBILE_GUID, ROOT_GUID, TAGS_GUID, TOOLBAR_GUID,
    UNFILED_GUID,
};

/// Current schema version. Bump this when adding a new migration.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Returns the current schema version from the database (0 if table doesn't exist).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Runs all pending schema migrations against the provided connection.
///
/// Safe to call on every startup.
pub fn run_all(conn: &Connection) -> Result<(), rusqlite::Error> {
    // WAL lets the read-only connection see a consistent snapshot while the
    // writer holds a transaction open.
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY,
             applied_at INTEGER NOT NULL,
             description TEXT NOT NULL
         );",
    )?;

    let current = get_schema_version(conn);

    if current < 1 {
        migration_v1(conn)?;
        record_version(conn, 1, "Initial schema: urls, bookmarks, keywords, tombstones")?;
    }

    if current < 2 {
        migration_v2(conn)?;
        record_version(conn, 2, "Seed reserved root folders")?;
    }

    log::debug!(
        "schema at version {} (was {})",
        CURRENT_SCHEMA_VERSION,
        current
    );
    Ok(())
}

fn record_version(conn: &Connection, version: i32, description: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
        params![version, now_ms() / 1000, description],
    )?;
    Ok(())
}

/// V1: Create all core tables.
fn migration_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS urls (
            id INTEGER PRIMARY KEY,
            url TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS bookmarks (
            id INTEGER PRIMARY KEY,
            guid TEXT NOT NULL UNIQUE,
            parent INTEGER,
            position INTEGER NOT NULL,
            type INTEGER NOT NULL,
            fk INTEGER REFERENCES urls(id),
            title TEXT NOT NULL DEFAULT '',
            date_added INTEGER NOT NULL,
            last_modified INTEGER NOT NULL,
            sync_status INTEGER NOT NULL DEFAULT 0,
            sync_change_counter INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_bookmarks_parent_position
            ON bookmarks(parent, position);
        CREATE INDEX IF NOT EXISTS idx_bookmarks_fk ON bookmarks(fk);
        CREATE INDEX IF NOT EXISTS idx_bookmarks_date_added ON bookmarks(date_added);

        CREATE TABLE IF NOT EXISTS keywords (
            keyword TEXT PRIMARY KEY,
            url_id INTEGER NOT NULL REFERENCES urls(id),
            post_data TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_keywords_url ON keywords(url_id);

        CREATE TABLE IF NOT EXISTS bookmarks_deleted (
            guid TEXT PRIMARY KEY,
            date_removed INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// V2: Insert the top-level root and the five built-in folders under it.
fn migration_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    let now = now_ms();
    let folder = BookmarkType::Folder.as_i64();
    let status = SyncStatus::New.as_i64();

    conn.execute(
        "INSERT OR IGNORE INTO bookmarks
             (id, guid, parent, position, type, title, date_added, last_modified,
              sync_status, sync_change_counter)
         VALUES (1, ?1, NULL, 0, ?2, '', ?3, ?3, ?4, 1)",
        params![ROOT_GUID, folder, now, status],
    )?;

    let children = [
        (MENU_GUID, "menu"),
        (TOOLBAR_GUID, "toolbar"),
        (TAGS_GUID, "tags"),
        (UNFILED_GUID, "unfiled"),
        (MOBILE_GUID, "mobile"),
    ];
    for (position, (guid, title)) in children.iter().enumerate() {
        conn.execute(
            "INSERT OR IGNORE INTO bookmarks
                 (guid, parent, position, type, title, date_added, last_modified,
                  sync_status, sync_change_counter)
             VALUES (?1, 1, ?2, ?3, ?4, ?5, ?5, ?6, 1)",
            params![guid, position as i64, folder, title, now, status],
        )?;
    }
    Ok(())
}
