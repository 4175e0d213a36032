//! Tagging Manager for placestore.
//!
//! A tag is a folder under the tags root; tagging a url inserts a bookmark
//! entry for it inside that folder. Tag folders are matched
//! case-insensitively and dropped once their last entry is gone.

use rusqlite::{params, Connection};
use std::collections::BTreeSet;

use super::bookmark_store::{BookmarkStore, NewRow, StoredItem};
use super::StoreContext;
use crate::database::UnitOfWork;
use crate::services::sync_tracker;
use crate::services::validator::normalize_url;
use crate::types::bookmark::{make_guid, now_ms, BookmarkType, TagCount, MAX_TAG_LENGTH, TAGS_GUID};
use crate::types::errors::{BookmarkError, ValidationError};
use crate::types::notification::Notification;
use crate::types::source::ChangeSource;

/// Trims tags, rejects empty or over-long ones, and dedupes them
/// case-insensitively keeping the first spelling.
pub fn normalize_tags(operation: &str, tags: &[String]) -> Result<Vec<String>, BookmarkError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_TAG_LENGTH {
            return Err(ValidationError::new(operation, "tags", format!("Invalid tag: {:?}", tag)).into());
        }
        if seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed.to_string());
        }
    }
    Ok(out)
}

fn find_tag_folder(store: &BookmarkStore<'_>, tags_root_id: i64, tag: &str) -> Result<Option<StoredItem>, BookmarkError> {
    let wanted = tag.to_lowercase();
    Ok(store
        .fetch_children(tags_root_id)?
        .into_iter()
        .find(|f| f.is_folder() && f.title.to_lowercase() == wanted))
}

/// One `TagsChanged` per real bookmark of `url`, carrying its current tags.
pub fn tags_changed_notifications(
    conn: &Connection,
    url: &str,
    source: ChangeSource,
) -> Result<Vec<Notification>, BookmarkError> {
    let store = BookmarkStore::new(conn);
    let tags_root = store.tags_root_id()?;
    let Some(url_id) = store.url_id(url)? else {
        return Ok(Vec::new());
    };
    let tags = store.tags_for_url(url_id)?;
    Ok(store
        .fetch_by_url(url)?
        .into_iter()
        .map(|b| Notification::TagsChanged {
            item: b.item_ref(source, tags_root),
            tags: tags.clone(),
            last_modified: b.last_modified,
        })
        .collect())
}

// === Unit-of-work operations ===

/// Adds `tags` to `url`. Existing associations are left alone.
pub fn tag_in(
    uow: &UnitOfWork<'_>,
    url: &str,
    tags: &[String],
    source: ChangeSource,
) -> Result<Vec<Notification>, BookmarkError> {
    let store = BookmarkStore::new(uow);
    let tags_root = store.tags_root_id()?;
    let url_id = store.get_or_insert_url(url)?;
    let delta = sync_tracker::determine_sync_change_delta(source);
    let status = sync_tracker::determine_initial_sync_status(source);
    let now = now_ms();

    let mut notifications = Vec::new();
    let mut changed = false;
    for tag in tags {
        let folder = match find_tag_folder(&store, tags_root, tag)? {
            Some(folder) => folder,
            None => {
                let index = store.child_count(tags_root)?;
                let id = store.insert_row(&NewRow {
                    guid: make_guid()?,
                    parent_id: tags_root,
                    index,
                    item_type: BookmarkType::Folder,
                    url_id: None,
                    title: tag.clone(),
                    date_added: now,
                    last_modified: now,
                    sync_status: status,
                    sync_change_counter: delta,
                })?;
                sync_tracker::set_ancestors_last_modified(uow, TAGS_GUID, now, delta)?;
                let folder = store
                    .fetch_by_id(id)?
                    .ok_or_else(|| BookmarkError::NotFound(format!("tag folder {}", tag)))?;
                notifications.push(Notification::Added {
                    item: folder.item_ref(source, tags_root),
                    index: folder.index,
                    title: folder.title.clone(),
                    date_added: folder.date_added,
                });
                folder
            }
        };

        let already_tagged = store
            .fetch_children(folder.id)?
            .iter()
            .any(|entry| entry.url_id == Some(url_id));
        if already_tagged {
            continue;
        }

        let index = store.child_count(folder.id)?;
        let id = store.insert_row(&NewRow {
            guid: make_guid()?,
            parent_id: folder.id,
            index,
            item_type: BookmarkType::Bookmark,
            url_id: Some(url_id),
            title: String::new(),
            date_added: now,
            last_modified: now,
            sync_status: status,
            sync_change_counter: delta,
        })?;
        sync_tracker::add_sync_changes_for_bookmarks_with_url(uow, Some(url_id), delta)?;
        sync_tracker::set_ancestors_last_modified(uow, &folder.guid, now, delta)?;
        if let Some(entry) = store.fetch_by_id(id)? {
            notifications.push(Notification::Added {
                item: entry.item_ref(source, tags_root),
                index: entry.index,
                title: entry.title.clone(),
                date_added: entry.date_added,
            });
        }
        changed = true;
    }

    if changed {
        notifications.extend(tags_changed_notifications(uow, url, source)?);
    }
    Ok(notifications)
}

/// Removes `tags` (or every tag, for `None`) from `url`, dropping tag folders
/// left empty.
pub fn untag_in(
    uow: &UnitOfWork<'_>,
    url: &str,
    tags: Option<&[String]>,
    source: ChangeSource,
) -> Result<Vec<Notification>, BookmarkError> {
    let store = BookmarkStore::new(uow);
    let Some(url_id) = store.url_id(url)? else {
        return Ok(Vec::new());
    };
    let tags_root = store.tags_root_id()?;
    let delta = sync_tracker::determine_sync_change_delta(source);
    let now = now_ms();
    let wanted: Option<BTreeSet<String>> =
        tags.map(|t| t.iter().map(|tag| tag.trim().to_lowercase()).collect());

    let folders: Vec<StoredItem> = store
        .fetch_children(tags_root)?
        .into_iter()
        .filter(|f| f.is_folder())
        .filter(|f| wanted.as_ref().map(|w| w.contains(&f.title.to_lowercase())).unwrap_or(true))
        .collect();

    let mut notifications = Vec::new();
    let mut removed = Vec::new();
    let mut emptied_root = false;
    for folder in folders {
        let entries: Vec<StoredItem> = store
            .fetch_children(folder.id)?
            .into_iter()
            .filter(|entry| entry.url_id == Some(url_id))
            .collect();
        if entries.is_empty() {
            continue;
        }
        // Highest position first so the indices we report are the ones the
        // entries had when removed.
        for entry in entries.iter().rev() {
            store.delete_row(entry.id)?;
            notifications.push(Notification::Removed {
                item: entry.item_ref(source, tags_root),
                index: entry.index,
                title: entry.title.clone(),
                is_descendant_removal: false,
            });
        }
        store.recompute_positions(folder.id)?;
        sync_tracker::set_ancestors_last_modified(uow, &folder.guid, now, delta)?;
        removed.extend(entries);

        if store.child_count(folder.id)? == 0 {
            store.delete_row(folder.id)?;
            emptied_root = true;
            notifications.push(Notification::Removed {
                item: folder.item_ref(source, tags_root),
                index: folder.index,
                title: folder.title.clone(),
                is_descendant_removal: false,
            });
            removed.push(folder);
        }
    }

    if removed.is_empty() {
        return Ok(Vec::new());
    }
    if emptied_root {
        store.recompute_positions(tags_root)?;
        sync_tracker::set_ancestors_last_modified(uow, TAGS_GUID, now, delta)?;
    }
    sync_tracker::insert_tombstones(uow, &removed, delta)?;
    sync_tracker::add_sync_changes_for_bookmarks_with_url(uow, Some(url_id), delta)?;
    notifications.extend(tags_changed_notifications(uow, url, source)?);
    Ok(notifications)
}

/// Drops every tag of each url that no longer has a real bookmark.
pub fn remove_orphan_tags_in(
    uow: &UnitOfWork<'_>,
    urls: &[String],
    source: ChangeSource,
) -> Result<Vec<Notification>, BookmarkError> {
    let mut notifications = Vec::new();
    for url in urls {
        let store = BookmarkStore::new(uow);
        let Some(url_id) = store.url_id(url)? else {
            continue;
        };
        if store.bookmark_count_for_url(url_id)? == 0 {
            notifications.extend(untag_in(uow, url, None, source)?);
        }
    }
    Ok(notifications)
}

/// Tag names with the number of urls carrying each, sorted by name.
pub fn all_tags(conn: &Connection) -> Result<Vec<TagCount>, BookmarkError> {
    let mut stmt = conn.prepare_cached(
        "SELECT b.title AS name, count(*) AS count
         FROM bookmarks b
         JOIN bookmarks p ON b.parent = p.id
         JOIN bookmarks c ON c.parent = b.id
         WHERE p.guid = ?1
         GROUP BY name
         ORDER BY name COLLATE NOCASE ASC",
    )?;
    let rows = stmt.query_map(params![TAGS_GUID], |row| {
        Ok(TagCount {
            name: row.get(0)?,
            count: row.get(1)?,
        })
    })?;
    let mut tags = Vec::new();
    for row in rows {
        tags.push(row?);
    }
    Ok(tags)
}

// === Manager ===

/// Trait defining tagging operations.
pub trait TaggingManagerTrait {
    fn tag(&self, url: &str, tags: &[String], source: ChangeSource) -> Result<(), BookmarkError>;
    /// `None` removes every tag of `url`.
    fn untag(&self, url: &str, tags: Option<&[String]>, source: ChangeSource) -> Result<(), BookmarkError>;
    fn tags_for_url(&self, url: &str) -> Result<Vec<String>, BookmarkError>;
    fn all_tags(&self) -> Result<Vec<TagCount>, BookmarkError>;
}

pub struct TaggingManager<'a> {
    ctx: StoreContext<'a>,
}

impl<'a> TaggingManager<'a> {
    pub fn new(ctx: StoreContext<'a>) -> Self {
        Self { ctx }
    }

    fn parse_url(operation: &str, url: &str) -> Result<String, BookmarkError> {
        normalize_url(url).ok_or_else(|| {
            BookmarkError::Validation(ValidationError::new(operation, "url", format!("{} is not a valid URL", url)))
        })
    }
}

impl<'a> TaggingManagerTrait for TaggingManager<'a> {
    fn tag(&self, url: &str, tags: &[String], source: ChangeSource) -> Result<(), BookmarkError> {
        let url = Self::parse_url("PlacesTagging.tag", url)?;
        let tags = normalize_tags("PlacesTagging.tag", tags)?;
        if tags.is_empty() {
            return Err(ValidationError::new("PlacesTagging.tag", "tags", "At least one tag is required").into());
        }
        self.ctx
            .write(|_| Ok(()), |uow, ()| Ok(((), tag_in(uow, &url, &tags, source)?)))
    }

    fn untag(&self, url: &str, tags: Option<&[String]>, source: ChangeSource) -> Result<(), BookmarkError> {
        let url = Self::parse_url("PlacesTagging.untag", url)?;
        let tags = match tags {
            Some(t) => Some(normalize_tags("PlacesTagging.untag", t)?),
            None => None,
        };
        self.ctx.write(
            |_| Ok(()),
            |uow, ()| Ok(((), untag_in(uow, &url, tags.as_deref(), source)?)),
        )
    }

    fn tags_for_url(&self, url: &str) -> Result<Vec<String>, BookmarkError> {
        let url = Self::parse_url("PlacesTagging.tagsForUrl", url)?;
        self.ctx.read(true, |conn| {
            let store = BookmarkStore::new(conn);
            match store.url_id(&url)? {
                Some(url_id) => store.tags_for_url(url_id),
                None => Ok(Vec::new()),
            }
        })
    }

    fn all_tags(&self) -> Result<Vec<TagCount>, BookmarkError> {
        self.ctx.read(true, all_tags)
    }
}
