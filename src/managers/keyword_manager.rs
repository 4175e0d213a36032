//! Keyword Manager for placestore.
//!
//! Keywords are a flat map from a lowercase, trimmed keyword to one
//! `(url, postData)` pair. The map is mirrored by [`KeywordCache`], which the
//! store owns and injects; mutations edit a working copy held by the unit of
//! work and the cache only sees it after commit.

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::RwLock;

use super::bookmark_store::BookmarkStore;
use super::StoreContext;
use crate::database::UnitOfWork;
use crate::services::sync_tracker;
use crate::services::validator::normalize_url;
use crate::types::errors::{BookmarkError, ValidationError};
use crate::types::keyword::{KeywordEntry, KeywordInsert, KeywordQuery};
use crate::types::notification::Notification;
use crate::types::source::ChangeSource;

pub type KeywordMap = HashMap<String, KeywordEntry>;

/// Shared in-memory mirror of the keywords table. `None` means "not loaded";
/// the next access repopulates it from the database.
#[derive(Default)]
pub struct KeywordCache {
    entries: RwLock<Option<KeywordMap>>,
}

impl KeywordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current map, loading it through `conn` if the cache was invalidated.
    pub fn snapshot(&self, conn: &Connection) -> Result<KeywordMap, BookmarkError> {
        if let Some(map) = self.entries.read().unwrap_or_else(|p| p.into_inner()).as_ref() {
            return Ok(map.clone());
        }
        let map = load_keywords(conn)?;
        *self.entries.write().unwrap_or_else(|p| p.into_inner()) = Some(map.clone());
        Ok(map)
    }

    /// Replaces the cached map. Called right after a commit.
    pub fn publish(&self, map: KeywordMap) {
        *self.entries.write().unwrap_or_else(|p| p.into_inner()) = Some(map);
    }

    /// Drops the cached map; the next lookup reloads it.
    pub fn invalidate(&self) {
        *self.entries.write().unwrap_or_else(|p| p.into_inner()) = None;
        log::debug!("keyword cache invalidated");
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Lookup without touching the database. `None` when not loaded.
    pub fn get(&self, keyword: &str) -> Option<KeywordEntry> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .and_then(|map| map.get(&normalize_keyword(keyword)).cloned())
    }
}

fn load_keywords(conn: &Connection) -> Result<KeywordMap, BookmarkError> {
    let mut stmt = conn.prepare_cached(
        "SELECT k.keyword, h.url, k.post_data FROM keywords k JOIN urls h ON h.id = k.url_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(KeywordEntry {
            keyword: row.get(0)?,
            url: row.get(1)?,
            post_data: row.get(2)?,
        })
    })?;
    let mut map = KeywordMap::new();
    for row in rows {
        let entry = row?;
        map.insert(entry.keyword.clone(), entry);
    }
    log::debug!("loaded {} keywords", map.len());
    Ok(map)
}

pub fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

fn same_post_data(a: &Option<String>, b: &Option<String>) -> bool {
    a.as_deref().unwrap_or("") == b.as_deref().unwrap_or("")
}

/// Empty POST data is stored as none.
fn normalize_post_data(post_data: Option<&str>) -> Option<String> {
    post_data.filter(|p| !p.is_empty()).map(str::to_string)
}

/// One `KeywordChanged` per real bookmark of `url`. `keyword` is empty for
/// a removal.
pub fn keyword_notifications(
    conn: &Connection,
    url: &str,
    keyword: &str,
    source: ChangeSource,
) -> Result<Vec<Notification>, BookmarkError> {
    let store = BookmarkStore::new(conn);
    let tags_root = store.tags_root_id()?;
    Ok(store
        .fetch_by_url(url)?
        .into_iter()
        .map(|b| Notification::KeywordChanged {
            item: b.item_ref(source, tags_root),
            keyword: keyword.to_string(),
            last_modified: b.last_modified,
        })
        .collect())
}

// === Unit-of-work operations ===
// Shared with the bookmarks engine so url changes and removals keep keywords
// consistent inside the same transaction.

/// Inserts or reassigns a keyword. `entry` must already be normalized.
pub fn insert_in(
    uow: &mut UnitOfWork<'_>,
    cache: &KeywordCache,
    entry: &KeywordEntry,
    source: ChangeSource,
) -> Result<Vec<Notification>, BookmarkError> {
    let existing = uow.keywords_mut(cache)?.get(&entry.keyword).cloned();
    if let Some(old) = &existing {
        if old.url == entry.url && same_post_data(&old.post_data, &entry.post_data) {
            return Ok(Vec::new());
        }
    }

    let url_id = BookmarkStore::new(uow).get_or_insert_url(&entry.url)?;
    let mut notifications = Vec::new();

    match &existing {
        Some(old) => {
            uow.execute(
                "UPDATE keywords SET url_id = ?1, post_data = ?2 WHERE keyword = ?3",
                params![url_id, entry.post_data, entry.keyword],
            )?;
            notifications.extend(keyword_notifications(uow, &old.url, "", source)?);
        }
        None => {
            // A url keeps one keyword per POST data; the new one replaces it.
            let replaced: Vec<String> = uow
                .keywords_mut(cache)?
                .values()
                .filter(|e| e.url == entry.url && same_post_data(&e.post_data, &entry.post_data))
                .map(|e| e.keyword.clone())
                .collect();
            for old_keyword in &replaced {
                uow.execute("DELETE FROM keywords WHERE keyword = ?1", params![old_keyword])?;
                uow.keywords_mut(cache)?.remove(old_keyword);
            }
            uow.execute(
                "INSERT INTO keywords (keyword, url_id, post_data) VALUES (?1, ?2, ?3)",
                params![entry.keyword, url_id, entry.post_data],
            )?;
            sync_tracker::add_sync_changes_for_bookmarks_with_url(
                uow,
                Some(url_id),
                sync_tracker::determine_sync_change_delta(source),
            )?;
        }
    }

    uow.keywords_mut(cache)?
        .insert(entry.keyword.clone(), entry.clone());
    notifications.extend(keyword_notifications(uow, &entry.url, &entry.keyword, source)?);
    Ok(notifications)
}

/// Removes `keyword`. Returns no notifications if it did not exist.
pub fn remove_in(
    uow: &mut UnitOfWork<'_>,
    cache: &KeywordCache,
    keyword: &str,
    source: ChangeSource,
) -> Result<Vec<Notification>, BookmarkError> {
    let Some(old) = uow.keywords_mut(cache)?.remove(keyword) else {
        return Ok(Vec::new());
    };
    uow.execute("DELETE FROM keywords WHERE keyword = ?1", params![keyword])?;
    let url_id = BookmarkStore::new(uow).url_id(&old.url)?;
    sync_tracker::add_sync_changes_for_bookmarks_with_url(
        uow,
        url_id,
        sync_tracker::determine_sync_change_delta(source),
    )?;
    keyword_notifications(uow, &old.url, "", source)
}

/// Moves every keyword of `old_url` to `new_url`, dropping keywords the new
/// url already had.
pub fn reassign_in(
    uow: &mut UnitOfWork<'_>,
    cache: &KeywordCache,
    old_url: &str,
    new_url: &str,
    source: ChangeSource,
) -> Result<Vec<Notification>, BookmarkError> {
    let map = uow.keywords_mut(cache)?;
    let to_reassign: Vec<String> = map.values().filter(|e| e.url == old_url).map(|e| e.keyword.clone()).collect();
    let to_remove: Vec<String> = map.values().filter(|e| e.url == new_url).map(|e| e.keyword.clone()).collect();
    if to_reassign.is_empty() {
        return Ok(Vec::new());
    }

    let new_url_id = BookmarkStore::new(uow).get_or_insert_url(new_url)?;
    for keyword in &to_remove {
        uow.execute("DELETE FROM keywords WHERE keyword = ?1", params![keyword])?;
    }
    for keyword in &to_reassign {
        uow.execute(
            "UPDATE keywords SET url_id = ?1 WHERE keyword = ?2",
            params![new_url_id, keyword],
        )?;
    }

    let map = uow.keywords_mut(cache)?;
    for keyword in &to_remove {
        map.remove(keyword);
    }
    for keyword in &to_reassign {
        if let Some(entry) = map.get_mut(keyword) {
            entry.url = new_url.to_string();
        }
    }

    let mut notifications = keyword_notifications(uow, old_url, "", source)?;
    notifications.extend(keyword_notifications(uow, new_url, "", source)?);
    for keyword in &to_reassign {
        notifications.extend(keyword_notifications(uow, new_url, keyword, source)?);
    }
    Ok(notifications)
}

/// Removes the keywords of each url in `urls` that no longer has a real
/// bookmark.
pub fn remove_from_urls_if_not_bookmarked_in(
    uow: &mut UnitOfWork<'_>,
    cache: &KeywordCache,
    urls: &[String],
) -> Result<(), BookmarkError> {
    if urls.is_empty() {
        return Ok(());
    }
    let candidates: Vec<KeywordEntry> = uow
        .keywords_mut(cache)?
        .values()
        .filter(|e| urls.contains(&e.url))
        .cloned()
        .collect();

    let mut orphaned = Vec::new();
    {
        let store = BookmarkStore::new(uow);
        for entry in candidates {
            let still_bookmarked = match store.url_id(&entry.url)? {
                Some(url_id) => store.bookmark_count_for_url(url_id)? > 0,
                None => false,
            };
            if !still_bookmarked {
                orphaned.push(entry.keyword);
            }
        }
    }

    for keyword in &orphaned {
        uow.execute("DELETE FROM keywords WHERE keyword = ?1", params![keyword])?;
        uow.keywords_mut(cache)?.remove(keyword);
    }
    if !orphaned.is_empty() {
        log::debug!("removed {} orphaned keywords", orphaned.len());
    }
    Ok(())
}

pub fn erase_everything_in(uow: &mut UnitOfWork<'_>, cache: &KeywordCache) -> Result<(), BookmarkError> {
    uow.execute("DELETE FROM keywords", [])?;
    uow.keywords_mut(cache)?.clear();
    Ok(())
}

// === Manager ===

/// Trait defining keyword operations.
pub trait KeywordManagerTrait {
    /// Entries matching the query; both filters intersect.
    fn fetch(&self, query: &KeywordQuery) -> Result<Vec<KeywordEntry>, BookmarkError>;
    fn insert(&self, entry: &KeywordInsert) -> Result<(), BookmarkError>;
    fn remove(&self, keyword: &str, source: ChangeSource) -> Result<(), BookmarkError>;
    fn reassign(&self, old_url: &str, new_url: &str, source: ChangeSource) -> Result<(), BookmarkError>;
    fn remove_from_urls_if_not_bookmarked(&self, urls: &[String]) -> Result<(), BookmarkError>;
    fn erase_everything(&self) -> Result<(), BookmarkError>;
    fn invalidate_cache(&self);
}

pub struct KeywordManager<'a> {
    ctx: StoreContext<'a>,
}

impl<'a> KeywordManager<'a> {
    pub fn new(ctx: StoreContext<'a>) -> Self {
        Self { ctx }
    }

    fn parse_url(operation: &str, url: &str) -> Result<String, BookmarkError> {
        normalize_url(url).ok_or_else(|| {
            BookmarkError::Validation(ValidationError::new(operation, "url", format!("{} is not a valid URL", url)))
        })
    }
}

impl<'a> KeywordManagerTrait for KeywordManager<'a> {
    fn fetch(&self, query: &KeywordQuery) -> Result<Vec<KeywordEntry>, BookmarkError> {
        if query.keyword.is_none() && query.url.is_none() {
            return Err(ValidationError::general(
                "PlacesKeywords.fetch",
                "At least keyword or url must be provided",
            )
            .into());
        }
        let keyword = query.keyword.as_deref().map(normalize_keyword);
        let url = match &query.url {
            Some(u) => Some(Self::parse_url("PlacesKeywords.fetch", u)?),
            None => None,
        };

        let map = self.ctx.read(false, |conn| self.ctx.keywords.snapshot(conn))?;
        let mut entries: Vec<KeywordEntry> = map
            .into_values()
            .filter(|e| keyword.as_ref().map(|k| &e.keyword == k).unwrap_or(true))
            .filter(|e| url.as_ref().map(|u| &e.url == u).unwrap_or(true))
            .collect();
        entries.sort_by(|a, b| a.keyword.cmp(&b.keyword));
        Ok(entries)
    }

    fn insert(&self, input: &KeywordInsert) -> Result<(), BookmarkError> {
        const OP: &str = "PlacesKeywords.insert";
        let keyword = normalize_keyword(&input.keyword);
        if keyword.is_empty() {
            return Err(ValidationError::new(OP, "keyword", "Invalid keyword").into());
        }
        let entry = KeywordEntry {
            keyword,
            url: Self::parse_url(OP, &input.url)?,
            post_data: normalize_post_data(input.post_data.as_deref()),
        };
        let keywords = self.ctx.keywords;
        let source = input.source;
        self.ctx.write(
            |_| Ok(()),
            |uow, ()| Ok(((), insert_in(uow, keywords, &entry, source)?)),
        )
    }

    fn remove(&self, keyword: &str, source: ChangeSource) -> Result<(), BookmarkError> {
        let keyword = normalize_keyword(keyword);
        if keyword.is_empty() {
            return Err(ValidationError::new("PlacesKeywords.remove", "keyword", "Invalid keyword").into());
        }
        let keywords = self.ctx.keywords;
        self.ctx.write(
            |_| Ok(()),
            |uow, ()| Ok(((), remove_in(uow, keywords, &keyword, source)?)),
        )
    }

    fn reassign(&self, old_url: &str, new_url: &str, source: ChangeSource) -> Result<(), BookmarkError> {
        let old_url = Self::parse_url("PlacesKeywords.reassign", old_url)?;
        let new_url = Self::parse_url("PlacesKeywords.reassign", new_url)?;
        let keywords = self.ctx.keywords;
        self.ctx.write(
            |_| Ok(()),
            |uow, ()| Ok(((), reassign_in(uow, keywords, &old_url, &new_url, source)?)),
        )
    }

    fn remove_from_urls_if_not_bookmarked(&self, urls: &[String]) -> Result<(), BookmarkError> {
        let mut normalized = Vec::with_capacity(urls.len());
        for url in urls {
            normalized.push(Self::parse_url("PlacesKeywords.removeFromURLsIfNotBookmarked", url)?);
        }
        let keywords = self.ctx.keywords;
        self.ctx.write(
            |_| Ok(()),
            |uow, ()| {
                remove_from_urls_if_not_bookmarked_in(uow, keywords, &normalized)?;
                Ok(((), Vec::new()))
            },
        )
    }

    fn erase_everything(&self) -> Result<(), BookmarkError> {
        let keywords = self.ctx.keywords;
        self.ctx.write(
            |_| Ok(()),
            |uow, ()| {
                erase_everything_in(uow, keywords)?;
                Ok(((), Vec::new()))
            },
        )
    }

    fn invalidate_cache(&self) {
        self.ctx.keywords.invalidate();
    }
}
