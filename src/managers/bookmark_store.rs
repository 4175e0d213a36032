// Placestore Identity/Index Store
// Row-level access to the bookmarks tree: point lookups, sibling positions, moves,
// removals and the read queries the engine exposes. Every write keeps sibling
// positions contiguous; callers pass the unit of work's connection.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;

use crate::types::bookmark::{
    BookmarkItem, BookmarkType, PathEntry, SearchQuery, SyncStatus, DEFAULT_INDEX, ROOT_GUID,
    TAGS_GUID,
};
use crate::types::errors::BookmarkError;
use crate::types::notification::ItemRef;
use crate::types::source::ChangeSource;

const ITEM_SELECT: &str = "
    SELECT b.id, b.guid, b.parent, IFNULL(p.guid, ''), p.parent, b.position, b.type,
           IFNULL(b.title, ''), h.url, b.fk, b.date_added, b.last_modified,
           b.sync_status, b.sync_change_counter,
           (SELECT count(*) FROM bookmarks c WHERE c.parent = b.id)
    FROM bookmarks b
    LEFT JOIN bookmarks p ON p.id = b.parent
    LEFT JOIN urls h ON h.id = b.fk";

/// A bookmarks row plus the ids the engine needs internally.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub id: i64,
    pub guid: String,
    pub parent_id: Option<i64>,
    pub parent_guid: String,
    pub grandparent_id: Option<i64>,
    pub index: i64,
    pub item_type: BookmarkType,
    pub title: String,
    pub url: Option<String>,
    pub url_id: Option<i64>,
    pub date_added: i64,
    pub last_modified: i64,
    pub sync_status: SyncStatus,
    pub sync_change_counter: i64,
    pub child_count: i64,
}

impl StoredItem {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let raw_type: i64 = row.get(6)?;
        let item_type = BookmarkType::from_i64(raw_type)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(6, raw_type))?;
        Ok(Self {
            id: row.get(0)?,
            guid: row.get(1)?,
            parent_id: row.get(2)?,
            parent_guid: row.get(3)?,
            grandparent_id: row.get(4)?,
            index: row.get(5)?,
            item_type,
            title: row.get(7)?,
            url: row.get(8)?,
            url_id: row.get(9)?,
            date_added: row.get(10)?,
            last_modified: row.get(11)?,
            sync_status: SyncStatus::from_i64(row.get(12)?),
            sync_change_counter: row.get(13)?,
            child_count: row.get(14)?,
        })
    }

    pub fn is_folder(&self) -> bool {
        self.item_type == BookmarkType::Folder
    }

    /// An entry under a tag folder rather than a real bookmark.
    pub fn is_tag_entry(&self, tags_root_id: i64) -> bool {
        self.grandparent_id == Some(tags_root_id)
    }

    /// A folder directly under the tags root.
    pub fn is_tag_folder(&self, tags_root_id: i64) -> bool {
        self.parent_id == Some(tags_root_id)
    }

    pub fn to_item(&self) -> BookmarkItem {
        BookmarkItem {
            guid: self.guid.clone(),
            parent_guid: self.parent_guid.clone(),
            index: self.index,
            item_type: self.item_type,
            title: self.title.clone(),
            url: self.url.clone(),
            date_added: self.date_added,
            last_modified: self.last_modified,
            sync_status: self.sync_status,
            sync_change_counter: self.sync_change_counter,
            child_count: self.is_folder().then_some(self.child_count),
            item_id: None,
            parent_id: None,
            path: None,
            tags: None,
        }
    }

    pub fn item_ref(&self, source: ChangeSource, tags_root_id: i64) -> ItemRef {
        ItemRef {
            id: self.id,
            guid: self.guid.clone(),
            parent_id: self.parent_id.unwrap_or(0),
            parent_guid: self.parent_guid.clone(),
            item_type: self.item_type,
            url: self.url.clone(),
            source,
            is_tagging: self.is_tag_entry(tags_root_id) || self.is_tag_folder(tags_root_id),
        }
    }
}

/// Values for a new bookmarks row.
#[derive(Debug, Clone)]
pub struct NewRow {
    pub guid: String,
    pub parent_id: i64,
    pub index: i64,
    pub item_type: BookmarkType,
    pub url_id: Option<i64>,
    pub title: String,
    pub date_added: i64,
    pub last_modified: i64,
    pub sync_status: SyncStatus,
    pub sync_change_counter: i64,
}

pub struct BookmarkStore<'c> {
    conn: &'c Connection,
}

impl<'c> BookmarkStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    // === Lookups ===

    pub fn root_id(&self, guid: &str) -> Result<i64, BookmarkError> {
        self.conn
            .query_row("SELECT id FROM bookmarks WHERE guid = ?1", params![guid], |row| row.get(0))
            .optional()?
            .ok_or_else(|| BookmarkError::NotFound(guid.to_string()))
    }

    pub fn tags_root_id(&self) -> Result<i64, BookmarkError> {
        self.root_id(TAGS_GUID)
    }

    fn query_items(&self, tail: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<StoredItem>, BookmarkError> {
        let sql = format!("{} {}", ITEM_SELECT, tail);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(args, StoredItem::from_row)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    pub fn fetch_by_guid(&self, guid: &str) -> Result<Option<StoredItem>, BookmarkError> {
        Ok(self.query_items("WHERE b.guid = ?1", &[&guid])?.into_iter().next())
    }

    pub fn fetch_by_id(&self, id: i64) -> Result<Option<StoredItem>, BookmarkError> {
        Ok(self.query_items("WHERE b.id = ?1", &[&id])?.into_iter().next())
    }

    /// `index == -1` means the last child.
    pub fn fetch_by_position(&self, parent_guid: &str, index: i64) -> Result<Option<StoredItem>, BookmarkError> {
        let index = if index == DEFAULT_INDEX { None } else { Some(index) };
        let items = self.query_items(
            "WHERE p.guid = ?1
             AND b.position = IFNULL(?2, (SELECT count(*) - 1 FROM bookmarks WHERE parent = p.id))",
            &[&parent_guid, &index],
        )?;
        Ok(items.into_iter().next())
    }

    pub fn fetch_children(&self, parent_id: i64) -> Result<Vec<StoredItem>, BookmarkError> {
        self.query_items("WHERE b.parent = ?1 ORDER BY b.position ASC", &[&parent_id])
    }

    /// Real bookmarks for `url`, most recently modified first.
    pub fn fetch_by_url(&self, url: &str) -> Result<Vec<StoredItem>, BookmarkError> {
        let tags_root = self.tags_root_id()?;
        self.query_items(
            "WHERE h.url = ?1 AND IFNULL(p.parent, 0) <> ?2 ORDER BY b.last_modified DESC",
            &[&url, &tags_root],
        )
    }

    pub fn fetch_by_guid_prefix(&self, prefix: &str) -> Result<Vec<StoredItem>, BookmarkError> {
        let pattern = format!("{}%", prefix);
        self.query_items(
            "WHERE b.guid LIKE ?1 ORDER BY b.last_modified DESC",
            &[&pattern],
        )
    }

    /// Bookmarks whose url carries every tag in `tags` (case-insensitive).
    pub fn fetch_by_tags(&self, tags: &[String]) -> Result<Vec<StoredItem>, BookmarkError> {
        let tags_root = self.tags_root_id()?;
        let mut lowered: Vec<String> = tags.iter().map(|t| t.trim().to_lowercase()).collect();
        lowered.sort();
        lowered.dedup();
        if lowered.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..lowered.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "{} WHERE b.type = 1 AND IFNULL(p.parent, 0) <> ?1
               AND b.fk IN (
                 SELECT b2.fk FROM bookmarks b2
                 JOIN bookmarks p2 ON p2.id = b2.parent
                 WHERE p2.parent = ?1 AND lower(p2.title) IN ({})
                 GROUP BY b2.fk HAVING count(DISTINCT lower(p2.title)) = {}
               )
             ORDER BY b.last_modified DESC",
            ITEM_SELECT,
            placeholders,
            lowered.len()
        );
        let mut args: Vec<rusqlite::types::Value> = vec![tags_root.into()];
        args.extend(lowered.into_iter().map(rusqlite::types::Value::from));
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), StoredItem::from_row)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Most recently added real bookmarks.
    pub fn fetch_recent(&self, limit: i64) -> Result<Vec<StoredItem>, BookmarkError> {
        let tags_root = self.tags_root_id()?;
        self.query_items(
            "WHERE b.type = 1 AND IFNULL(p.parent, 0) <> ?1
             ORDER BY b.date_added DESC, b.id DESC
             LIMIT ?2",
            &[&tags_root, &limit],
        )
    }

    /// Substring and exact-match search. Tag folders and tag entries are
    /// never returned.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<StoredItem>, BookmarkError> {
        let tags_root = self.tags_root_id()?;
        let mut tail = String::from(
            "WHERE b.parent <> ?1 AND IFNULL(p.parent, 0) <> ?1 AND b.guid <> ?2",
        );
        let mut args: Vec<rusqlite::types::Value> = vec![tags_root.into(), ROOT_GUID.to_string().into()];
        if let Some(title) = &query.title {
            args.push(title.clone().into());
            tail.push_str(&format!(" AND b.title = ?{}", args.len()));
        }
        if let Some(url) = &query.url {
            args.push(url.clone().into());
            tail.push_str(&format!(" AND h.url = ?{}", args.len()));
        }
        if let Some(q) = query.query.as_deref().filter(|q| !q.is_empty()) {
            args.push(q.to_lowercase().into());
            let n = args.len();
            tail.push_str(&format!(
                " AND (instr(lower(IFNULL(h.url, '')), ?{n}) > 0 OR instr(lower(IFNULL(b.title, '')), ?{n}) > 0)"
            ));
        }
        tail.push_str(" ORDER BY b.date_added DESC, b.id DESC");

        let sql = format!("{} {}", ITEM_SELECT, tail);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), StoredItem::from_row)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Path from the top-level folder down to `guid`, root excluded.
    pub fn full_path(&self, guid: &str) -> Result<Vec<PathEntry>, BookmarkError> {
        let mut stmt = self.conn.prepare_cached(
            "WITH RECURSIVE parents(guid, id, parent, title, depth) AS (
                 SELECT guid, id, parent, IFNULL(title, ''), 0 FROM bookmarks WHERE guid = ?1
                 UNION ALL
                 SELECT b.guid, b.id, b.parent, IFNULL(b.title, ''), parents.depth + 1
                 FROM bookmarks b JOIN parents ON b.id = parents.parent
             )
             SELECT guid, title FROM parents WHERE guid <> ?2 ORDER BY depth DESC",
        )?;
        let rows = stmt.query_map(params![guid, ROOT_GUID], |row| {
            Ok(PathEntry {
                guid: row.get(0)?,
                title: row.get(1)?,
            })
        })?;
        let mut path = Vec::new();
        for row in rows {
            path.push(row?);
        }
        Ok(path)
    }

    pub fn child_count(&self, parent_id: i64) -> Result<i64, BookmarkError> {
        Ok(self.conn.query_row(
            "SELECT count(*) FROM bookmarks WHERE parent = ?1",
            params![parent_id],
            |row| row.get(0),
        )?)
    }

    /// True when `candidate_id` is `folder_id` or one of its descendants.
    pub fn is_self_or_descendant(&self, folder_id: i64, candidate_id: i64) -> Result<bool, BookmarkError> {
        if folder_id == candidate_id {
            return Ok(true);
        }
        let found: Option<i64> = self
            .conn
            .query_row(
                "WITH RECURSIVE descendants(did) AS (
                     SELECT id FROM bookmarks WHERE parent = ?1
                     UNION ALL
                     SELECT id FROM bookmarks JOIN descendants ON parent = did
                 )
                 SELECT did FROM descendants WHERE did = ?2 LIMIT 1",
                params![folder_id, candidate_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All descendants of a folder, each parent listed before its children.
    pub fn descendants(&self, folder_id: i64) -> Result<Vec<StoredItem>, BookmarkError> {
        let sql = format!(
            "WITH RECURSIVE descendants(did, depth) AS (
                 SELECT id, 0 FROM bookmarks WHERE parent = ?1
                 UNION ALL
                 SELECT id, depth + 1 FROM bookmarks JOIN descendants ON parent = did
             )
             {} JOIN descendants d ON d.did = b.id ORDER BY d.depth, b.parent, b.position",
            ITEM_SELECT
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![folder_id], StoredItem::from_row)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    // === Urls ===

    pub fn url_id(&self, url: &str) -> Result<Option<i64>, BookmarkError> {
        Ok(self
            .conn
            .query_row("SELECT id FROM urls WHERE url = ?1", params![url], |row| row.get(0))
            .optional()?)
    }

    pub fn get_or_insert_url(&self, url: &str) -> Result<i64, BookmarkError> {
        self.conn
            .execute("INSERT OR IGNORE INTO urls (url) VALUES (?1)", params![url])?;
        self.url_id(url)?
            .ok_or_else(|| BookmarkError::TransactionFailure(format!("Failed to store url {}", url)))
    }

    /// Number of real bookmarks (tag entries excluded) pointing at `url_id`.
    pub fn bookmark_count_for_url(&self, url_id: i64) -> Result<i64, BookmarkError> {
        let tags_root = self.tags_root_id()?;
        Ok(self.conn.query_row(
            "SELECT count(*) FROM bookmarks b
             JOIN bookmarks p ON p.id = b.parent
             WHERE b.fk = ?1 AND IFNULL(p.parent, 0) <> ?2",
            params![url_id, tags_root],
            |row| row.get(0),
        )?)
    }

    /// Tag names of `url_id`, sorted case-insensitively.
    pub fn tags_for_url(&self, url_id: i64) -> Result<Vec<String>, BookmarkError> {
        let tags_root = self.tags_root_id()?;
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT IFNULL(p.title, '') FROM bookmarks b
             JOIN bookmarks p ON p.id = b.parent
             WHERE b.fk = ?1 AND p.parent = ?2",
        )?;
        let rows = stmt.query_map(params![url_id, tags_root], |row| row.get::<_, String>(0))?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        tags.sort_by_key(|t| t.to_lowercase());
        Ok(tags)
    }

    // === Writes ===

    /// Inserts a row at `row.index`, shifting later siblings up by one.
    pub fn insert_row(&self, row: &NewRow) -> Result<i64, BookmarkError> {
        self.conn.execute(
            "UPDATE bookmarks SET position = position + 1 WHERE parent = ?1 AND position >= ?2",
            params![row.parent_id, row.index],
        )?;
        self.conn.execute(
            "INSERT INTO bookmarks
                 (guid, parent, position, type, fk, title, date_added, last_modified,
                  sync_status, sync_change_counter)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.guid,
                row.parent_id,
                row.index,
                row.item_type.as_i64(),
                row.url_id,
                row.title,
                row.date_added,
                row.last_modified,
                row.sync_status.as_i64(),
                row.sync_change_counter,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Moves `item` to `new_index` under `new_parent_id`. `new_index` must
    /// already be clamped to the target's valid range.
    pub fn move_row(&self, item: &StoredItem, new_parent_id: i64, new_index: i64) -> Result<(), BookmarkError> {
        if item.is_folder() && self.is_self_or_descendant(item.id, new_parent_id)? {
            return Err(BookmarkError::Cycle(item.guid.clone()));
        }
        let old_parent_id = item
            .parent_id
            .ok_or_else(|| BookmarkError::ProtectedRoot(item.guid.clone()))?;

        if old_parent_id == new_parent_id {
            let sign = if new_index < item.index { 1 } else { -1 };
            self.conn.execute(
                "UPDATE bookmarks SET position = position + ?1
                 WHERE parent = ?2 AND position BETWEEN ?3 AND ?4",
                params![
                    sign,
                    new_parent_id,
                    item.index.min(new_index),
                    item.index.max(new_index)
                ],
            )?;
        } else {
            self.conn.execute(
                "UPDATE bookmarks SET position = position - 1 WHERE parent = ?1 AND position >= ?2",
                params![old_parent_id, item.index],
            )?;
            self.conn.execute(
                "UPDATE bookmarks SET position = position + 1 WHERE parent = ?1 AND position >= ?2",
                params![new_parent_id, new_index],
            )?;
        }
        self.conn.execute(
            "UPDATE bookmarks SET parent = ?1, position = ?2 WHERE id = ?3",
            params![new_parent_id, new_index, item.id],
        )?;
        Ok(())
    }

    pub fn delete_row(&self, id: i64) -> Result<(), BookmarkError> {
        self.conn.execute("DELETE FROM bookmarks WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Deletes every descendant of `folder_id`, returning them parent-first.
    pub fn delete_descendants(&self, folder_id: i64) -> Result<Vec<StoredItem>, BookmarkError> {
        let removed = self.descendants(folder_id)?;
        self.conn.execute(
            "WITH RECURSIVE descendants(did) AS (
                 SELECT id FROM bookmarks WHERE parent = ?1
                 UNION ALL
                 SELECT id FROM bookmarks JOIN descendants ON parent = did
             )
             DELETE FROM bookmarks WHERE id IN descendants",
            params![folder_id],
        )?;
        Ok(removed)
    }

    /// Renumbers the children of `parent_id` to `0..n` keeping their order.
    pub fn recompute_positions(&self, parent_id: i64) -> Result<(), BookmarkError> {
        self.conn.execute(
            "WITH ordered(oid, pos) AS (
                 SELECT id, row_number() OVER (ORDER BY position, id) - 1
                 FROM bookmarks WHERE parent = ?1
             )
             UPDATE bookmarks
             SET position = (SELECT pos FROM ordered WHERE oid = bookmarks.id)
             WHERE parent = ?1
               AND position <> (SELECT pos FROM ordered WHERE oid = bookmarks.id)",
            params![parent_id],
        )?;
        Ok(())
    }

    /// Writes `index` for each `(id, index)` pair.
    pub fn set_positions(&self, positions: &[(i64, i64)]) -> Result<(), BookmarkError> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE bookmarks SET position = ?2 WHERE id = ?1")?;
        for (id, index) in positions {
            stmt.execute(params![id, index])?;
        }
        Ok(())
    }

    /// Sets `last_modified` on each of `ids`, never below its `date_added`.
    pub fn stamp_last_modified(&self, ids: &[i64], time: i64) -> Result<(), BookmarkError> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE bookmarks SET last_modified = MAX(date_added, ?2) WHERE id = ?1")?;
        for id in ids {
            stmt.execute(params![id, time])?;
        }
        Ok(())
    }
}

/// Position changes that put the `requested` children first, in the given
/// order, followed by the others in their current relative order.
///
/// `children` must be sorted by position. Guids that are not children are
/// ignored. Returns `(slot in children, new index)` for the children that
/// actually move, so an already satisfied order yields nothing.
pub fn reorder_plan(children: &[StoredItem], requested: &[String]) -> Vec<(usize, i64)> {
    let mut listed = HashSet::new();
    let mut order = Vec::with_capacity(children.len());
    for guid in requested {
        if let Some(slot) = children.iter().position(|c| &c.guid == guid) {
            if listed.insert(slot) {
                order.push(slot);
            }
        }
    }
    order.extend((0..children.len()).filter(|slot| !listed.contains(slot)));

    order
        .into_iter()
        .enumerate()
        .map(|(new_index, slot)| (slot, new_index as i64))
        .filter(|(slot, new_index)| children[*slot].index != *new_index)
        .collect()
}
