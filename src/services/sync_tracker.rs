// Placestore Sync Metadata Tracker
// Change-counter and tombstone bookkeeping so an external sync engine can find what
// changed since its last checkpoint. The helpers run inside the caller's unit of work;
// `SyncTracker` is the read/acknowledge surface the sync engine itself uses.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::managers::bookmark_store::StoredItem;
use crate::managers::StoreContext;
use crate::types::bookmark::{now_ms, BookmarkType, SyncStatus};
use crate::types::errors::BookmarkError;
use crate::types::source::ChangeSource;

/// 0 for sync-sourced changes so downloaded records are not re-uploaded.
pub fn determine_sync_change_delta(source: ChangeSource) -> i64 {
    match source {
        ChangeSource::Sync => 0,
        _ => 1,
    }
}

/// Sync status for newly inserted items.
pub fn determine_initial_sync_status(source: ChangeSource) -> SyncStatus {
    match source {
        ChangeSource::Sync => SyncStatus::Normal,
        ChangeSource::RestoreOnStartup => SyncStatus::Unknown,
        _ => SyncStatus::New,
    }
}

/// Raises `last_modified` to at least `time` on `folder_guid` and every
/// folder above it, then bumps the folder's own counter by `delta`. An older
/// `time` never moves a folder backwards.
pub fn set_ancestors_last_modified(
    conn: &Connection,
    folder_guid: &str,
    time: i64,
    delta: i64,
) -> Result<(), BookmarkError> {
    conn.execute(
        "WITH RECURSIVE ancestors(aid) AS (
             SELECT id FROM bookmarks WHERE guid = ?1
             UNION ALL
             SELECT parent FROM bookmarks JOIN ancestors ON id = aid
             WHERE type = ?2 AND parent IS NOT NULL
         )
         UPDATE bookmarks SET last_modified = MAX(last_modified, ?3) WHERE id IN ancestors",
        params![folder_guid, BookmarkType::Folder.as_i64(), time],
    )?;
    if delta != 0 {
        conn.execute(
            "UPDATE bookmarks SET sync_change_counter = sync_change_counter + ?1 WHERE guid = ?2",
            params![delta, folder_guid],
        )?;
    }
    Ok(())
}

/// Bumps every real bookmark for `url_id`. Used when its tags change.
pub fn add_sync_changes_for_bookmarks_with_url(
    conn: &Connection,
    url_id: Option<i64>,
    delta: i64,
) -> Result<(), BookmarkError> {
    let Some(url_id) = url_id else {
        return Ok(());
    };
    if delta == 0 {
        return Ok(());
    }
    conn.execute(
        "UPDATE bookmarks SET sync_change_counter = sync_change_counter + ?1
         WHERE type = ?2 AND fk = ?3",
        params![delta, BookmarkType::Bookmark.as_i64(), url_id],
    )?;
    Ok(())
}

/// Separators are synced by position, so any shift at or after
/// `start_index` changes them.
pub fn adjust_separators_sync_counter(
    conn: &Connection,
    parent_id: i64,
    start_index: i64,
    delta: i64,
) -> Result<(), BookmarkError> {
    if delta == 0 {
        return Ok(());
    }
    conn.execute(
        "UPDATE bookmarks SET sync_change_counter = sync_change_counter + ?1
         WHERE parent = ?2 AND position >= ?3 AND type = ?4",
        params![delta, parent_id, start_index, BookmarkType::Separator.as_i64()],
    )?;
    Ok(())
}

/// Only items the server has seen need a tombstone.
pub fn needs_tombstone(item: &StoredItem) -> bool {
    item.sync_status == SyncStatus::Normal
}

pub fn insert_tombstones(conn: &Connection, removed: &[StoredItem], delta: i64) -> Result<(), BookmarkError> {
    if delta == 0 {
        return Ok(());
    }
    let date_removed = now_ms();
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO bookmarks_deleted (guid, date_removed) VALUES (?1, ?2)",
    )?;
    for item in removed.iter().filter(|item| needs_tombstone(item)) {
        stmt.execute(params![item.guid, date_removed])?;
    }
    Ok(())
}

/// Reinserting a guid revives it; drop its stale tombstone.
pub fn remove_tombstone(conn: &Connection, guid: &str) -> Result<(), BookmarkError> {
    conn.execute("DELETE FROM bookmarks_deleted WHERE guid = ?1", params![guid])?;
    Ok(())
}

/// Removing tag entries changes the tags of their urls.
pub fn add_sync_changes_for_removed_tag_entries(
    conn: &Connection,
    removed: &[StoredItem],
    tags_root_id: i64,
    delta: i64,
) -> Result<(), BookmarkError> {
    if delta == 0 {
        return Ok(());
    }
    for item in removed.iter().filter(|item| item.is_tag_entry(tags_root_id)) {
        add_sync_changes_for_bookmarks_with_url(conn, item.url_id, delta)?;
    }
    Ok(())
}

/// Forget all sync state: drop tombstones, mark everything for a full
/// reconciliation and flag the roots as changed.
pub fn reset_sync_metadata(conn: &Connection, source: ChangeSource) -> Result<(), BookmarkError> {
    if !matches!(source, ChangeSource::Restore | ChangeSource::RestoreOnStartup) {
        return Ok(());
    }
    conn.execute("DELETE FROM bookmarks_deleted", [])?;
    conn.execute(
        "UPDATE bookmarks SET sync_status = ?1, sync_change_counter = 1",
        params![SyncStatus::Unknown.as_i64()],
    )?;
    log::info!("reset sync metadata after {} erase", source.as_str());
    Ok(())
}

// === Sync engine surface ===

/// One pending change: either a live item with a non-zero counter or a
/// tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChange {
    pub guid: String,
    /// Counter value observed when the change was pulled.
    pub counter: i64,
    pub tombstone: bool,
    pub modified: i64,
}

pub trait SyncTrackerTrait {
    fn pull_changes(&self) -> Result<Vec<SyncChange>, BookmarkError>;
    fn acknowledge(&self, changes: &[SyncChange]) -> Result<(), BookmarkError>;
    fn tombstones(&self) -> Result<Vec<String>, BookmarkError>;
}

/// Sync engine surface; refused with `ShuttingDown` once the store closes.
pub struct SyncTracker<'a> {
    ctx: StoreContext<'a>,
}

impl<'a> SyncTracker<'a> {
    pub fn new(ctx: StoreContext<'a>) -> Self {
        Self { ctx }
    }
}

impl<'a> SyncTrackerTrait for SyncTracker<'a> {
    /// Items with pending changes (roots first), then tombstones.
    fn pull_changes(&self) -> Result<Vec<SyncChange>, BookmarkError> {
        self.ctx.read(false, |conn| {
            let mut changes = Vec::new();

            let mut stmt = conn.prepare_cached(
                "SELECT guid, sync_change_counter, last_modified FROM bookmarks
                 WHERE sync_change_counter > 0
                 ORDER BY parent IS NOT NULL, id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SyncChange {
                    guid: row.get(0)?,
                    counter: row.get(1)?,
                    tombstone: false,
                    modified: row.get(2)?,
                })
            })?;
            for row in rows {
                changes.push(row?);
            }

            let mut stmt = conn.prepare_cached(
                "SELECT guid, date_removed FROM bookmarks_deleted ORDER BY date_removed, guid",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SyncChange {
                    guid: row.get(0)?,
                    counter: 1,
                    tombstone: true,
                    modified: row.get(1)?,
                })
            })?;
            for row in rows {
                changes.push(row?);
            }
            Ok(changes)
        })
    }

    /// Marks uploaded items Normal and subtracts the counters that were
    /// uploaded; changes made since the pull stay pending.
    fn acknowledge(&self, changes: &[SyncChange]) -> Result<(), BookmarkError> {
        self.ctx.ensure_open()?;
        let mut conn = self.ctx.db.writer();
        let tx = conn.transaction()?;
        for change in changes {
            if change.tombstone {
                tx.execute(
                    "DELETE FROM bookmarks_deleted WHERE guid = ?1",
                    params![change.guid],
                )?;
            } else {
                tx.execute(
                    "UPDATE bookmarks
                     SET sync_status = ?1,
                         sync_change_counter = MAX(sync_change_counter - ?2, 0)
                     WHERE guid = ?3",
                    params![SyncStatus::Normal.as_i64(), change.counter, change.guid],
                )?;
            }
        }
        tx.commit()?;
        log::debug!("acknowledged {} sync changes", changes.len());
        Ok(())
    }

    fn tombstones(&self) -> Result<Vec<String>, BookmarkError> {
        self.ctx.read(false, |conn| {
            let mut stmt = conn.prepare_cached("SELECT guid FROM bookmarks_deleted ORDER BY guid")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut guids = Vec::new();
            for row in rows {
                guids.push(row?);
            }
            Ok(guids)
        })
    }
}
