//! SQLite connection management for placestore.
//!
//! Provides the [`Database`] struct: one writable connection guarded by a
//! mutex (the single writer every mutation serializes on) and, for on-disk
//! stores, an optional read-only connection used by `concurrent` fetches.

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::migrations;
use crate::types::settings::PlacesConfig;

pub struct Database {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens (or creates) a SQLite database at the given file path and runs migrations.
    ///
    /// A read-only companion connection is opened as well.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let path = path.as_ref().to_string_lossy().to_string();
        Self::open_with_config(&PlacesConfig::on_disk(&path))
    }

    /// Opens an in-memory SQLite database and runs migrations.
    ///
    /// In-memory stores have no reader connection; concurrent fetches fall
    /// back to the writer.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::open_with_config(&PlacesConfig::in_memory())
    }

    pub fn open_with_config(config: &PlacesConfig) -> Result<Self, rusqlite::Error> {
        let timeout = Duration::from_millis(config.busy_timeout_ms);

        let (writer, path) = match &config.database_path {
            Some(p) => (Connection::open(p)?, Some(PathBuf::from(p))),
            None => (Connection::open_in_memory()?, None),
        };
        writer.busy_timeout(timeout)?;
        migrations::run_all(&writer)?;

        let reader = match (&path, config.concurrent_reads) {
            (Some(p), true) => {
                let conn = Connection::open_with_flags(
                    p,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                conn.busy_timeout(timeout)?;
                Some(Mutex::new(conn))
            }
            _ => None,
        };

        log::info!(
            "opened bookmarks database at {} (reader: {})",
            path.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string()),
            reader.is_some()
        );

        Ok(Self {
            writer: Mutex::new(writer),
            reader,
            path,
        })
    }

    /// Locks and returns the writable connection. A poisoned lock is
    /// recovered: SQLite already rolled back whatever the panicking holder
    /// left open.
    pub fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Locks the connection reads should go through. `concurrent` picks the
    /// read-only connection when there is one.
    pub fn reader(&self, concurrent: bool) -> MutexGuard<'_, Connection> {
        match (&self.reader, concurrent) {
            (Some(reader), true) => reader.lock().unwrap_or_else(|p| p.into_inner()),
            _ => self.writer(),
        }
    }

    pub fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    /// File backing the store, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
