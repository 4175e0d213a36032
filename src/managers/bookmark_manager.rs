//! Bookmark Manager for placestore.
//!
//! Implements `BookmarkManagerTrait`: the mutation engine over the bookmarks
//! tree plus the read queries. Every mutation validates its input, resolves
//! and checks the rows it touches on the locked writer, then applies tree,
//! tag, keyword and sync-metadata changes in one unit of work. The
//! notification batch is delivered after commit.

use rusqlite::params;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::bookmark_store::{reorder_plan, BookmarkStore, NewRow, StoredItem};
use super::keyword_manager::{
    erase_everything_in, reassign_in, remove_from_urls_if_not_bookmarked_in, KeywordManager,
    KeywordManagerTrait,
};
use super::tagging_manager::{
    self, remove_orphan_tags_in, tags_changed_notifications, TaggingManager, TaggingManagerTrait,
};
use super::StoreContext;
use crate::services::sync_tracker;
use crate::services::validator::{
    bag_i64, bag_str, bag_type, from_bag, normalize_url, to_bag, validate, validate_info,
    FieldBehavior, PropertyBag, Schema,
};
use crate::types::bookmark::{
    is_root_guid, is_valid_guid, is_valid_guid_prefix, make_guid, now_ms, BookmarkInfo,
    BookmarkItem, BookmarkTree, BookmarkType, FetchOptions, FetchQuery, InsertTreeOptions,
    RemoveOptions, ReorderOptions, SearchQuery, TagCount, DEFAULT_INDEX, ROOT_GUID, TAGS_GUID,
    USER_CONTENT_ROOTS,
};
use crate::types::errors::{BookmarkError, ValidationError};
use crate::types::keyword::KeywordInsert;
use crate::types::notification::Notification;
use crate::types::source::ChangeSource;

const OP_INSERT: &str = "Bookmarks.insert";
const OP_INSERT_TREE: &str = "Bookmarks.insertTree";
const OP_UPDATE: &str = "Bookmarks.update";
const OP_MOVE: &str = "Bookmarks.moveToFolder";
const OP_REMOVE: &str = "Bookmarks.remove";
const OP_REORDER: &str = "Bookmarks.reorder";
const OP_FETCH: &str = "Bookmarks.fetch";

/// Trait defining bookmark tree operations.
pub trait BookmarkManagerTrait {
    /// Inserts one item and returns it as stored.
    fn insert(&self, info: &BookmarkInfo) -> Result<BookmarkItem, BookmarkError>;
    /// Inserts a whole subtree under an existing folder, parents before
    /// children.
    fn insert_tree(&self, tree: &BookmarkTree, options: &InsertTreeOptions) -> Result<Vec<BookmarkItem>, BookmarkError>;
    fn update(&self, info: &BookmarkInfo) -> Result<BookmarkItem, BookmarkError>;
    /// Moves `guids` to `parent_guid` starting at `index`. Without a parent
    /// the items are reordered inside the folder they share.
    fn move_to_folder(
        &self,
        guids: &[String],
        parent_guid: Option<&str>,
        index: i64,
        source: ChangeSource,
    ) -> Result<Vec<BookmarkItem>, BookmarkError>;
    fn remove(&self, guids: &[String], options: &RemoveOptions) -> Result<(), BookmarkError>;
    fn reorder(&self, parent_guid: &str, ordered_guids: &[String], options: &ReorderOptions) -> Result<(), BookmarkError>;
    /// Clears every user content root and the tags root. Roots survive.
    fn erase_everything(&self, source: ChangeSource) -> Result<(), BookmarkError>;
    fn fetch(&self, query: &FetchQuery, options: &FetchOptions) -> Result<Vec<BookmarkItem>, BookmarkError>;
    fn fetch_one(&self, guid: &str) -> Result<Option<BookmarkItem>, BookmarkError>;
    fn fetch_tags(&self) -> Result<Vec<TagCount>, BookmarkError>;
    fn get_recent(&self, limit: i64) -> Result<Vec<BookmarkItem>, BookmarkError>;
    fn search(&self, query: &SearchQuery) -> Result<Vec<BookmarkItem>, BookmarkError>;
}

/// Bookmark manager over a shared store context.
pub struct BookmarkManager<'a> {
    ctx: StoreContext<'a>,
}

// === Helpers ===

fn invalid(operation: &str, field: &str, message: impl Into<String>) -> BookmarkError {
    ValidationError::new(operation, field, message).into()
}

fn require_guid(operation: &str, field: &str, guid: &str) -> Result<(), BookmarkError> {
    if is_valid_guid(guid) {
        Ok(())
    } else {
        Err(invalid(operation, field, format!("{:?} is not a valid guid", guid)))
    }
}

fn is_bookmark(bag: &PropertyBag) -> bool {
    bag_type(bag) == Some(BookmarkType::Bookmark)
}

fn is_folder(bag: &PropertyBag) -> bool {
    bag_type(bag) == Some(BookmarkType::Folder)
}

fn title_allowed(bag: &PropertyBag) -> bool {
    matches!(bag_type(bag), Some(BookmarkType::Bookmark | BookmarkType::Folder))
        || bag_str(bag, "title") == Some("")
}

fn added(item: &StoredItem, source: ChangeSource, tags_root: i64) -> Notification {
    Notification::Added {
        item: item.item_ref(source, tags_root),
        index: item.index,
        title: item.title.clone(),
        date_added: item.date_added,
    }
}

fn removed(item: &StoredItem, source: ChangeSource, tags_root: i64, is_descendant_removal: bool) -> Notification {
    Notification::Removed {
        item: item.item_ref(source, tags_root),
        index: item.index,
        title: item.title.clone(),
        is_descendant_removal,
    }
}

fn fetch_required(store: &BookmarkStore<'_>, guid: &str) -> Result<StoredItem, BookmarkError> {
    store
        .fetch_by_guid(guid)?
        .ok_or_else(|| BookmarkError::NotFound(guid.to_string()))
}

fn fetch_id_required(store: &BookmarkStore<'_>, id: i64) -> Result<StoredItem, BookmarkError> {
    store
        .fetch_by_id(id)?
        .ok_or_else(|| BookmarkError::NotFound(format!("item {}", id)))
}

fn require_folder(operation: &str, field: &str, item: &StoredItem) -> Result<(), BookmarkError> {
    if item.is_folder() {
        Ok(())
    } else {
        Err(invalid(operation, field, format!("{} is not a folder", item.guid)))
    }
}

/// Deletes everything below `folder`: tombstones, tag counter bumps and the
/// removal notifications, deepest first. Returns the urls of removed real
/// bookmarks and of removed tag entries.
fn remove_folder_contents(
    store: &BookmarkStore<'_>,
    folder: &StoredItem,
    source: ChangeSource,
    tags_root: i64,
    notifications: &mut Vec<Notification>,
) -> Result<(Vec<String>, Vec<String>), BookmarkError> {
    let delta = sync_tracker::determine_sync_change_delta(source);
    let descendants = store.delete_descendants(folder.id)?;
    sync_tracker::insert_tombstones(store.connection(), &descendants, delta)?;
    sync_tracker::add_sync_changes_for_removed_tag_entries(store.connection(), &descendants, tags_root, delta)?;

    let mut bookmark_urls = Vec::new();
    let mut tagged_urls = Vec::new();
    for item in descendants.iter().rev() {
        notifications.push(removed(
            item,
            source,
            tags_root,
            !USER_CONTENT_ROOTS.contains(&item.parent_guid.as_str()),
        ));
        if let Some(url) = &item.url {
            if item.is_tag_entry(tags_root) {
                tagged_urls.push(url.clone());
            } else {
                bookmark_urls.push(url.clone());
            }
        }
    }
    Ok((bookmark_urls, tagged_urls))
}

fn dedup(urls: &mut Vec<String>) {
    let mut seen = HashSet::new();
    urls.retain(|u| seen.insert(u.clone()));
}

/// Property keys an update can actually change.
const UPDATABLE: [&str; 6] = ["title", "url", "dateAdded", "lastModified", "index", "parentGuid"];

/// Drops properties equal to the stored value.
fn remove_same_value_properties(bag: &mut PropertyBag, item: &StoredItem) {
    let same = |key: &str, value: &Value| match key {
        "title" => value.as_str() == Some(item.title.as_str()),
        "url" => value.as_str().is_some() && value.as_str() == item.url.as_deref(),
        "dateAdded" => value.as_i64() == Some(item.date_added),
        "lastModified" => value.as_i64() == Some(item.last_modified),
        "index" => value.as_i64() == Some(item.index),
        "parentGuid" => value.as_str() == Some(item.parent_guid.as_str()),
        "type" => bag_type_value(value) == Some(item.item_type),
        _ => false,
    };
    let keys: Vec<String> = bag
        .iter()
        .filter(|(k, v)| same(k, v))
        .map(|(k, _)| k.clone())
        .collect();
    for key in keys {
        bag.remove(&key);
    }
}

fn bag_type_value(value: &Value) -> Option<BookmarkType> {
    let mut probe = PropertyBag::new();
    probe.insert("type".to_string(), value.clone());
    bag_type(&probe)
}

fn has_updates(bag: &PropertyBag) -> bool {
    UPDATABLE.iter().any(|k| bag.contains_key(*k))
}

enum UpdatePlan {
    Unchanged(StoredItem),
    Apply {
        item: StoredItem,
        changes: BookmarkInfo,
        /// Set whenever the position may change, even within the same folder.
        parent: Option<StoredItem>,
        /// The caller set a time explicitly and it differs from the stored one.
        time_changed: bool,
    },
}

/// One validated entry of a tree import.
struct PendingInsert {
    info: BookmarkInfo,
    /// Direct child of the tree root: its index is resolved at insert time.
    top_level: bool,
}

struct TreeImport {
    source: ChangeSource,
    fallback: i64,
    lenient: bool,
}

impl TreeImport {
    fn schema(&self, parent_guid: &str, index: i64, time: i64) -> Result<Schema, BookmarkError> {
        let fallback = self.fallback;

        let mut guid = FieldBehavior::new().default_value(make_guid()?);
        let mut date_added = FieldBehavior::new().default_value(time).valid_if(|b| {
            match (bag_i64(b, "dateAdded"), bag_i64(b, "lastModified")) {
                (Some(added), Some(modified)) => added <= modified,
                _ => true,
            }
        });
        let mut last_modified = FieldBehavior::new().default_value(time).valid_if(move |b| {
            let modified = bag_i64(b, "lastModified").unwrap_or(i64::MIN);
            match bag_i64(b, "dateAdded") {
                Some(added) => modified >= added,
                None => modified >= time,
            }
        });
        if self.lenient {
            guid = guid.fixup(|b| {
                if let Ok(fresh) = make_guid() {
                    b.insert("guid".to_string(), Value::from(fresh));
                }
            });
            let reset_times = move |b: &mut PropertyBag| {
                b.insert("dateAdded".to_string(), Value::from(fallback));
                b.insert("lastModified".to_string(), Value::from(fallback));
            };
            date_added = date_added.fixup(reset_times);
            last_modified = last_modified.fixup(reset_times);
        }

        Ok(Schema::new()
            .field("guid", guid)
            .field("type", FieldBehavior::new().default_value(BookmarkType::Bookmark.as_str()))
            .field("url", FieldBehavior::new().required_if(is_bookmark).valid_if(is_bookmark))
            .field("parentGuid", FieldBehavior::new().replace_with(parent_guid))
            .field("title", FieldBehavior::new().default_value("").valid_if(title_allowed))
            .field("dateAdded", date_added)
            .field("lastModified", last_modified)
            .field("index", FieldBehavior::new().replace_with(index))
            .field("source", FieldBehavior::new().replace_with(self.source.as_str()))
            .field("keyword", FieldBehavior::new().valid_if(is_bookmark))
            .field("postData", FieldBehavior::new().valid_if(is_bookmark))
            .field("tags", FieldBehavior::new().valid_if(is_bookmark))
            .field(
                "children",
                FieldBehavior::new().valid_if(|b| is_folder(b) && b.get("children").map(Value::is_array).unwrap_or(false)),
            ))
    }

    /// Validates `infos` depth-first into `out`, parents before children.
    /// Returns the latest `dateAdded` seen, which the parent's
    /// `lastModified` must reach.
    fn flatten(
        &self,
        infos: &[BookmarkInfo],
        parent_guid: &str,
        top_level: bool,
        out: &mut Vec<PendingInsert>,
    ) -> Result<i64, BookmarkError> {
        let mut index_to_use = 0;
        let mut last_added = 0;
        for info in infos {
            let time = info.date_added.unwrap_or(self.fallback);
            let schema = self.schema(parent_guid, index_to_use, time)?;
            let outcome = to_bag(OP_INSERT_TREE, info)
                .and_then(|bag| validate(OP_INSERT_TREE, &bag, &schema))
                .and_then(|bag| from_bag(OP_INSERT_TREE, bag));
            let mut validated = match outcome {
                Ok(validated) => validated,
                Err(err) if self.lenient => {
                    log::debug!("skipping invalid tree entry: {}", err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            index_to_use += 1;
            validated.children = None;
            let guid = validated.guid.clone().unwrap_or_default();
            let date_added = validated.date_added.unwrap_or(time);

            let slot = out.len();
            out.push(PendingInsert {
                info: validated,
                top_level,
            });
            if let Some(children) = info.children.as_deref() {
                let children_last = self.flatten(children, &guid, false, out)?;
                let entry = &mut out[slot].info;
                if children_last > entry.last_modified.unwrap_or(0) {
                    entry.last_modified = Some(children_last);
                }
                last_added = last_added.max(children_last);
            }
            last_added = last_added.max(date_added);
        }
        Ok(last_added)
    }
}

fn insert_schema(added: i64, now: i64) -> Schema {
    Schema::new()
        .field("type", FieldBehavior::new().default_value(BookmarkType::Bookmark.as_str()))
        .field("index", FieldBehavior::new().default_value(DEFAULT_INDEX))
        .field("url", FieldBehavior::new().required_if(is_bookmark).valid_if(is_bookmark))
        .field(
            "parentGuid",
            FieldBehavior::new()
                .required()
                .valid_if(|b| bag_str(b, "parentGuid") != Some(ROOT_GUID)),
        )
        .field("title", FieldBehavior::new().default_value("").valid_if(title_allowed))
        .field("dateAdded", FieldBehavior::new().default_value(added))
        .field(
            "lastModified",
            FieldBehavior::new().default_value(added).valid_if(move |b| {
                let modified = bag_i64(b, "lastModified").unwrap_or(i64::MIN);
                modified >= now || bag_i64(b, "dateAdded").map(|d| modified >= d).unwrap_or(false)
            }),
        )
        .field("source", FieldBehavior::new().default_value(ChangeSource::Default.as_str()))
}

fn update_entry_schema() -> Schema {
    Schema::new()
        .field("guid", FieldBehavior::new().required())
        .field(
            "index",
            FieldBehavior::new()
                .required_if(|b| b.contains_key("parentGuid"))
                .valid_if(|b| bag_i64(b, "index").map(|i| i >= 0 || i == DEFAULT_INDEX).unwrap_or(false)),
        )
        .field(
            "parentGuid",
            FieldBehavior::new().valid_if(|b| bag_str(b, "parentGuid") != Some(ROOT_GUID)),
        )
        .field("source", FieldBehavior::new().default_value(ChangeSource::Default.as_str()))
}

fn update_item_schema(item: &StoredItem, last_modified_default: i64, now: i64) -> Schema {
    let item_type = item.item_type;
    let item_added = item.date_added;
    Schema::new()
        .field("url", FieldBehavior::new().valid_if(move |_| item_type == BookmarkType::Bookmark))
        .field(
            "title",
            FieldBehavior::new()
                .valid_if(move |_| matches!(item_type, BookmarkType::Bookmark | BookmarkType::Folder)),
        )
        .field(
            "lastModified",
            FieldBehavior::new().default_value(last_modified_default).valid_if(move |b| {
                let modified = bag_i64(b, "lastModified").unwrap_or(i64::MIN);
                modified >= now || modified >= bag_i64(b, "dateAdded").unwrap_or(item_added)
            }),
        )
        .field("dateAdded", FieldBehavior::new().default_value(item_added))
}

impl<'a> BookmarkManager<'a> {
    pub fn new(ctx: StoreContext<'a>) -> Self {
        Self { ctx }
    }

    fn decorate(
        store: &BookmarkStore<'_>,
        stored: &StoredItem,
        options: &FetchOptions,
        with_tags: bool,
    ) -> Result<BookmarkItem, BookmarkError> {
        let mut item = stored.to_item();
        if options.include_item_ids {
            item.item_id = Some(stored.id);
            item.parent_id = stored.parent_id;
        }
        if options.include_path {
            item.path = Some(store.full_path(&stored.parent_guid)?);
        }
        if with_tags {
            if let Some(url_id) = stored.url_id {
                item.tags = Some(store.tags_for_url(url_id)?);
            }
        }
        Ok(item)
    }

    fn normalize_query(query: &FetchQuery) -> Result<FetchQuery, BookmarkError> {
        Ok(match query {
            FetchQuery::Guid(guid) => {
                require_guid(OP_FETCH, "guid", guid)?;
                query.clone()
            }
            FetchQuery::Parent(guid) => {
                require_guid(OP_FETCH, "parentGuid", guid)?;
                query.clone()
            }
            FetchQuery::Position { parent_guid, index } => {
                require_guid(OP_FETCH, "parentGuid", parent_guid)?;
                if *index < DEFAULT_INDEX {
                    return Err(invalid(OP_FETCH, "index", index.to_string()));
                }
                query.clone()
            }
            FetchQuery::Url(url) => FetchQuery::Url(
                normalize_url(url).ok_or_else(|| invalid(OP_FETCH, "url", format!("{} is not a valid URL", url)))?,
            ),
            FetchQuery::GuidPrefix(prefix) => {
                if !is_valid_guid_prefix(prefix) {
                    return Err(invalid(OP_FETCH, "guidPrefix", format!("{:?}", prefix)));
                }
                query.clone()
            }
            FetchQuery::Tags(tags) => {
                if tags.is_empty() || tags.iter().any(|t| t.trim().is_empty()) {
                    return Err(invalid(OP_FETCH, "tags", format!("{:?}", tags)));
                }
                query.clone()
            }
        })
    }

    /// Keywords and tags of imported bookmarks. Failures are logged and do
    /// not undo the import.
    fn apply_special_data(&self, pending: &[PendingInsert], source: ChangeSource) {
        let keywords = KeywordManager::new(self.ctx);
        let tagging = TaggingManager::new(self.ctx);
        for entry in pending {
            let info = &entry.info;
            let Some(url) = info.url.as_deref() else {
                continue;
            };
            if let Some(keyword) = &info.keyword {
                let insert = KeywordInsert {
                    keyword: keyword.clone(),
                    url: url.to_string(),
                    post_data: info.post_data.clone(),
                    source,
                };
                if let Err(err) = keywords.insert(&insert) {
                    log::error!("failed to set keyword {:?} for {}: {}", keyword, url, err);
                }
            }
            if let Some(tags) = info.tags.as_deref() {
                if let Err(err) = tagging.tag(url, tags, source) {
                    log::error!("failed to tag {}: {}", url, err);
                }
            }
        }
    }
}

impl<'a> BookmarkManagerTrait for BookmarkManager<'a> {
    fn insert(&self, info: &BookmarkInfo) -> Result<BookmarkItem, BookmarkError> {
        let now = now_ms();
        let schema = insert_schema(info.date_added.unwrap_or(now), now);
        let info = validate_info(OP_INSERT, info, &schema)?;
        let parent_guid = info.parent_guid.clone().unwrap_or_default();
        let source = info.source.unwrap_or_default();
        let item_type = info.item_type.unwrap_or(BookmarkType::Bookmark);

        self.ctx.write(
            |conn| {
                let store = BookmarkStore::new(conn);
                let parent = fetch_required(&store, &parent_guid)?;
                require_folder(OP_INSERT, "parentGuid", &parent)?;
                if let Some(guid) = &info.guid {
                    if store.fetch_by_guid(guid)?.is_some() {
                        return Err(invalid(OP_INSERT, "guid", format!("{} already exists", guid)));
                    }
                }
                let requested = info.index.unwrap_or(DEFAULT_INDEX);
                let index = if requested == DEFAULT_INDEX || requested > parent.child_count {
                    parent.child_count
                } else {
                    requested
                };
                Ok((parent, index))
            },
            |uow, (parent, index)| {
                let store = BookmarkStore::new(uow);
                let tags_root = store.tags_root_id()?;
                let delta = sync_tracker::determine_sync_change_delta(source);
                let url_id = match &info.url {
                    Some(url) => Some(store.get_or_insert_url(url)?),
                    None => None,
                };
                let guid = match &info.guid {
                    Some(guid) => guid.clone(),
                    None => make_guid()?,
                };
                let date_added = info.date_added.unwrap_or(now);
                let id = store.insert_row(&NewRow {
                    guid: guid.clone(),
                    parent_id: parent.id,
                    index,
                    item_type,
                    url_id,
                    title: info.title.clone().unwrap_or_default(),
                    date_added,
                    last_modified: info.last_modified.unwrap_or(date_added),
                    sync_status: sync_tracker::determine_initial_sync_status(source),
                    sync_change_counter: delta,
                })?;
                sync_tracker::adjust_separators_sync_counter(uow, parent.id, index + 1, delta)?;
                if info.guid.is_some() {
                    sync_tracker::remove_tombstone(uow, &guid)?;
                }
                if parent.is_tag_folder(tags_root) {
                    sync_tracker::add_sync_changes_for_bookmarks_with_url(uow, url_id, delta)?;
                }
                sync_tracker::set_ancestors_last_modified(uow, &parent.guid, date_added, delta)?;

                let stored = fetch_id_required(&store, id)?;
                let mut notifications = vec![added(&stored, source, tags_root)];
                if stored.is_tag_entry(tags_root) {
                    if let Some(url) = &stored.url {
                        notifications.extend(tags_changed_notifications(uow, url, source)?);
                    }
                }
                log::debug!("inserted {} under {}", stored.guid, parent.guid);
                Ok((stored.to_item(), notifications))
            },
        )
    }

    fn insert_tree(&self, tree: &BookmarkTree, options: &InsertTreeOptions) -> Result<Vec<BookmarkItem>, BookmarkError> {
        if tree.children.is_empty() {
            return Err(ValidationError::general(OP_INSERT_TREE, "Should have a non-zero number of children to insert").into());
        }
        require_guid(OP_INSERT_TREE, "guid", &tree.guid)?;
        if tree.guid == ROOT_GUID {
            return Err(invalid(OP_INSERT_TREE, "guid", "Can't insert into the root"));
        }
        if tree.guid == TAGS_GUID {
            return Err(invalid(OP_INSERT_TREE, "guid", "Can't use insertTree to insert tags"));
        }

        let source = tree.source.unwrap_or_default();
        let import = TreeImport {
            source,
            fallback: now_ms(),
            lenient: options.fixup_or_skip_invalid_entries,
        };
        let mut pending = Vec::new();
        let last_added = import.flatten(&tree.children, &tree.guid, true, &mut pending)?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let items = self.ctx.write(
            |conn| {
                let store = BookmarkStore::new(conn);
                let parent = fetch_required(&store, &tree.guid)?;
                require_folder(OP_INSERT_TREE, "guid", &parent)?;
                if parent.is_tag_folder(store.tags_root_id()?) {
                    return Err(invalid(OP_INSERT_TREE, "guid", "Can't use insertTree to insert tags"));
                }
                let mut seen = HashSet::new();
                for entry in &pending {
                    let guid = entry.info.guid.as_deref().unwrap_or_default();
                    if !seen.insert(guid) || store.fetch_by_guid(guid)?.is_some() {
                        return Err(invalid(OP_INSERT_TREE, "guid", format!("{} already exists", guid)));
                    }
                }
                Ok(parent)
            },
            |uow, parent| {
                let store = BookmarkStore::new(uow);
                let tags_root = store.tags_root_id()?;
                let delta = sync_tracker::determine_sync_change_delta(source);
                let status = sync_tracker::determine_initial_sync_status(source);

                let mut ids: HashMap<String, i64> = HashMap::new();
                ids.insert(parent.guid.clone(), parent.id);
                let mut inserted = Vec::with_capacity(pending.len());
                for entry in &pending {
                    let info = &entry.info;
                    let parent_guid = info.parent_guid.as_deref().unwrap_or(&parent.guid);
                    let parent_id = *ids
                        .get(parent_guid)
                        .ok_or_else(|| BookmarkError::NotFound(parent_guid.to_string()))?;
                    let index = if entry.top_level {
                        store.child_count(parent_id)?
                    } else {
                        info.index.unwrap_or(0)
                    };
                    let url_id = match &info.url {
                        Some(url) => Some(store.get_or_insert_url(url)?),
                        None => None,
                    };
                    let guid = info.guid.clone().unwrap_or_default();
                    let id = store.insert_row(&NewRow {
                        guid: guid.clone(),
                        parent_id,
                        index,
                        item_type: info.item_type.unwrap_or(BookmarkType::Bookmark),
                        url_id,
                        title: info.title.clone().unwrap_or_default(),
                        date_added: info.date_added.unwrap_or(import.fallback),
                        last_modified: info.last_modified.unwrap_or(import.fallback),
                        sync_status: status,
                        sync_change_counter: delta,
                    })?;
                    sync_tracker::remove_tombstone(uow, &guid)?;
                    ids.insert(guid, id);
                    inserted.push(id);
                }
                sync_tracker::set_ancestors_last_modified(uow, &parent.guid, last_added, delta)?;

                let mut items = Vec::with_capacity(inserted.len());
                let mut notifications = Vec::with_capacity(inserted.len());
                for id in inserted {
                    let stored = fetch_id_required(&store, id)?;
                    notifications.push(added(&stored, source, tags_root));
                    items.push(stored.to_item());
                }
                log::info!("imported {} items under {}", items.len(), parent.guid);
                Ok((items, notifications))
            },
        )?;

        self.apply_special_data(&pending, source);
        Ok(items)
    }

    fn update(&self, info: &BookmarkInfo) -> Result<BookmarkItem, BookmarkError> {
        let bag = validate(OP_UPDATE, &to_bag(OP_UPDATE, info)?, &update_entry_schema())?;
        if !has_updates(&bag) {
            return Err(ValidationError::general(OP_UPDATE, "Not enough properties to update").into());
        }
        let guid = bag_str(&bag, "guid").unwrap_or_default().to_string();
        let source = bag_str(&bag, "source").and_then(ChangeSource::parse).unwrap_or_default();
        let keywords = self.ctx.keywords;

        self.ctx.write(
            |conn| {
                let store = BookmarkStore::new(conn);
                let item = fetch_required(&store, &guid)?;
                if let Some(requested) = bag.get("type").and_then(bag_type_value) {
                    if requested != item.item_type {
                        return Err(invalid(OP_UPDATE, "type", "The bookmark type cannot be changed"));
                    }
                }

                let mut bag = bag.clone();
                remove_same_value_properties(&mut bag, &item);
                if !has_updates(&bag) {
                    return Ok(UpdatePlan::Unchanged(item));
                }

                let now = now_ms();
                let mut last_modified_default = now;
                if !bag.contains_key("lastModified") {
                    if let Some(added) = bag_i64(&bag, "dateAdded") {
                        last_modified_default = item.last_modified.max(added);
                    }
                }
                let time_changed = (info.last_modified.is_some() && bag.contains_key("lastModified"))
                    || (info.date_added.is_some() && bag.contains_key("dateAdded"));
                let bag = validate(OP_UPDATE, &bag, &update_item_schema(&item, last_modified_default, now))?;
                let changes = from_bag(OP_UPDATE, bag)?;

                let mut parent = None;
                if let Some(parent_guid) = &changes.parent_guid {
                    if is_root_guid(&item.guid) {
                        return Err(BookmarkError::ProtectedRoot(item.guid.clone()));
                    }
                    let target = fetch_required(&store, parent_guid)?;
                    require_folder(OP_UPDATE, "parentGuid", &target)?;
                    if item.is_folder() && store.is_self_or_descendant(item.id, target.id)? {
                        return Err(BookmarkError::Cycle(item.guid.clone()));
                    }
                    parent = Some(target);
                }
                if changes.index.is_some() {
                    if is_root_guid(&item.guid) {
                        return Err(BookmarkError::ProtectedRoot(item.guid.clone()));
                    }
                    if parent.is_none() {
                        parent = Some(fetch_required(&store, &item.parent_guid)?);
                    }
                }
                Ok(UpdatePlan::Apply {
                    item,
                    changes,
                    parent,
                    time_changed,
                })
            },
            |uow, plan| {
                let (item, mut changes, parent, time_changed) = match plan {
                    UpdatePlan::Unchanged(item) => return Ok((item.to_item(), Vec::new())),
                    UpdatePlan::Apply {
                        item,
                        changes,
                        parent,
                        time_changed,
                    } => (item, changes, parent, time_changed),
                };
                let store = BookmarkStore::new(uow);
                let tags_root = store.tags_root_id()?;
                let delta = sync_tracker::determine_sync_change_delta(source);
                let last_modified = changes.last_modified.unwrap_or(item.last_modified);
                let date_added = changes.date_added.unwrap_or(item.date_added);

                // Columns written besides position: the counter is bumped only
                // when more than the implicit ones change.
                let mut tuples = 1;
                if changes.title.is_some() {
                    tuples += 1;
                }
                if changes.date_added.is_some() {
                    tuples += 1;
                }
                let new_url_id = match &changes.url {
                    Some(url) => {
                        tuples += 1;
                        Some(store.get_or_insert_url(url)?)
                    }
                    None => None,
                };

                let mut new_index = changes.index.unwrap_or(item.index);
                let mut moved_across = false;
                if let Some(parent) = &parent {
                    let same_parent = item.parent_id == Some(parent.id);
                    if new_index == DEFAULT_INDEX || new_index >= parent.child_count {
                        new_index = if same_parent { parent.child_count - 1 } else { parent.child_count };
                    }
                    changes.index = Some(new_index);
                    tuples += 1;
                    if !same_parent {
                        tuples += 1;
                        moved_across = true;
                    }
                    store.move_row(&item, parent.id, new_index)?;
                    if moved_across {
                        sync_tracker::set_ancestors_last_modified(uow, &item.parent_guid, last_modified, delta)?;
                    }
                }

                let mut threshold = 1;
                if new_index != item.index {
                    threshold += 1;
                }
                if changes.date_added.is_some() {
                    threshold += 1;
                }
                let counter_delta = if delta != 0 && tuples > threshold { delta } else { 0 };
                uow.execute(
                    "UPDATE bookmarks
                     SET title = ?1, fk = ?2, date_added = ?3, last_modified = ?4,
                         sync_change_counter = sync_change_counter + ?5
                     WHERE id = ?6",
                    params![
                        changes.title.as_deref().unwrap_or(&item.title),
                        new_url_id.or(item.url_id),
                        date_added,
                        last_modified,
                        counter_delta,
                        item.id
                    ],
                )?;

                if item.is_tag_entry(tags_root) {
                    sync_tracker::add_sync_changes_for_bookmarks_with_url(uow, item.url_id, delta)?;
                    if new_url_id.is_some() {
                        sync_tracker::add_sync_changes_for_bookmarks_with_url(uow, new_url_id, delta)?;
                    }
                }
                if item.is_tag_folder(tags_root) && delta != 0 {
                    uow.execute(
                        "UPDATE bookmarks SET sync_change_counter = sync_change_counter + ?1
                         WHERE type = ?2 AND fk IN (SELECT fk FROM bookmarks WHERE parent = ?3)",
                        params![delta, BookmarkType::Bookmark.as_i64(), item.id],
                    )?;
                }

                if let Some(parent) = &parent {
                    if moved_across {
                        sync_tracker::adjust_separators_sync_counter(uow, item.parent_id.unwrap_or_default(), item.index, delta)?;
                        sync_tracker::adjust_separators_sync_counter(uow, parent.id, new_index, delta)?;
                    } else {
                        sync_tracker::adjust_separators_sync_counter(uow, parent.id, new_index.min(item.index), delta)?;
                    }
                    sync_tracker::set_ancestors_last_modified(uow, &parent.guid, last_modified, delta)?;
                }

                let updated = fetch_id_required(&store, item.id)?;
                let mut notifications = Vec::new();
                if time_changed {
                    notifications.push(Notification::TimeChanged {
                        item: updated.item_ref(source, tags_root),
                        date_added: updated.date_added,
                        last_modified: updated.last_modified,
                    });
                }
                if changes.title.is_some() {
                    notifications.push(Notification::TitleChanged {
                        item: updated.item_ref(source, tags_root),
                        title: updated.title.clone(),
                        last_modified: updated.last_modified,
                    });
                    if updated.is_tag_folder(tags_root) {
                        for entry in store.fetch_by_tags(std::slice::from_ref(&updated.title))? {
                            let tags = match entry.url_id {
                                Some(url_id) => store.tags_for_url(url_id)?,
                                None => Vec::new(),
                            };
                            notifications.push(Notification::TagsChanged {
                                item: entry.item_ref(source, tags_root),
                                tags,
                                last_modified: entry.last_modified,
                            });
                        }
                    }
                }
                if let (Some(new_url), Some(old_url)) = (&changes.url, &item.url) {
                    notifications.push(Notification::UrlChanged {
                        item: updated.item_ref(source, tags_root),
                        last_modified: updated.last_modified,
                    });
                    if !item.is_tag_entry(tags_root) {
                        notifications.extend(reassign_in(uow, keywords, old_url, new_url, source)?);
                        notifications.extend(remove_orphan_tags_in(uow, std::slice::from_ref(old_url), source)?);
                    }
                }
                if updated.parent_id != item.parent_id || updated.index != item.index {
                    notifications.push(Notification::Moved {
                        item: updated.item_ref(source, tags_root),
                        index: updated.index,
                        old_parent_guid: item.parent_guid.clone(),
                        old_index: item.index,
                    });
                }
                Ok((updated.to_item(), notifications))
            },
        )
    }

    fn move_to_folder(
        &self,
        guids: &[String],
        parent_guid: Option<&str>,
        index: i64,
        source: ChangeSource,
    ) -> Result<Vec<BookmarkItem>, BookmarkError> {
        if guids.is_empty() {
            return Err(invalid(OP_MOVE, "guids", "guids should be an array of at least one item"));
        }
        for guid in guids {
            require_guid(OP_MOVE, "guids", guid)?;
        }
        if let Some(parent_guid) = parent_guid {
            require_guid(OP_MOVE, "parentGuid", parent_guid)?;
            if parent_guid == ROOT_GUID {
                return Err(invalid(OP_MOVE, "parentGuid", "Cannot move bookmarks into root"));
            }
        }
        if index < DEFAULT_INDEX {
            return Err(invalid(OP_MOVE, "index", index.to_string()));
        }

        self.ctx.write(
            |conn| {
                let store = BookmarkStore::new(conn);
                let tags_root = store.tags_root_id()?;
                let explicit_parent = match parent_guid {
                    Some(guid) => Some(fetch_required(&store, guid)?),
                    None => None,
                };

                let mut items = Vec::with_capacity(guids.len());
                let mut shared_parent: Option<String> = None;
                for guid in guids {
                    let item = fetch_required(&store, guid)?;
                    if is_root_guid(&item.guid) {
                        return Err(BookmarkError::ProtectedRoot(item.guid));
                    }
                    match &explicit_parent {
                        Some(target) => {
                            if item.is_folder() && store.is_self_or_descendant(item.id, target.id)? {
                                return Err(BookmarkError::Cycle(item.guid));
                            }
                        }
                        None => {
                            let shared = shared_parent.get_or_insert_with(|| item.parent_guid.clone());
                            if *shared != item.parent_guid {
                                return Err(ValidationError::general(
                                    OP_MOVE,
                                    "All bookmarks should be in the same folder if no parent is specified",
                                )
                                .into());
                            }
                        }
                    }
                    items.push(item);
                }

                let parent = match explicit_parent {
                    Some(parent) => parent,
                    None => fetch_required(&store, shared_parent.as_deref().unwrap_or_default())?,
                };
                require_folder(OP_MOVE, "parentGuid", &parent)?;
                if parent.id == tags_root || parent.is_tag_folder(tags_root) {
                    return Err(invalid(OP_MOVE, "parentGuid", "Can't move to a tags folder"));
                }
                Ok((items, parent))
            },
            |uow, (items, parent)| {
                let store = BookmarkStore::new(uow);
                let tags_root = store.tags_root_id()?;
                let delta = sync_tracker::determine_sync_change_delta(source);
                let last_modified = now_ms();

                let mut index = index;
                let mut child_count = parent.child_count;
                for original in &items {
                    // Earlier moves in this batch may have shifted the item.
                    let current = fetch_id_required(&store, original.id)?;
                    let same_parent = current.parent_id == Some(parent.id);
                    if index != DEFAULT_INDEX && same_parent {
                        if index > current.index {
                            index -= 1;
                        } else if index == current.index {
                            index += 1;
                            continue;
                        }
                    }
                    if index == DEFAULT_INDEX || index >= child_count {
                        index = child_count;
                        if same_parent {
                            index -= 1;
                        }
                    }

                    store.move_row(&current, parent.id, index)?;
                    let counter_delta = if same_parent { 0 } else { delta };
                    uow.execute(
                        "UPDATE bookmarks SET last_modified = ?1,
                             sync_change_counter = sync_change_counter + ?2
                         WHERE id = ?3",
                        params![last_modified, counter_delta, current.id],
                    )?;
                    if same_parent {
                        sync_tracker::adjust_separators_sync_counter(uow, parent.id, index.min(current.index), delta)?;
                    } else {
                        sync_tracker::set_ancestors_last_modified(uow, &current.parent_guid, last_modified, delta)?;
                        sync_tracker::adjust_separators_sync_counter(
                            uow,
                            current.parent_id.unwrap_or_default(),
                            current.index,
                            delta,
                        )?;
                        sync_tracker::adjust_separators_sync_counter(uow, parent.id, index, delta)?;
                        child_count += 1;
                    }
                    index += 1;
                }
                sync_tracker::set_ancestors_last_modified(uow, &parent.guid, last_modified, delta)?;

                let mut results = Vec::with_capacity(items.len());
                let mut notifications = Vec::new();
                for original in &items {
                    let updated = fetch_id_required(&store, original.id)?;
                    if updated.parent_id != original.parent_id || updated.index != original.index {
                        notifications.push(Notification::Moved {
                            item: updated.item_ref(source, tags_root),
                            index: updated.index,
                            old_parent_guid: original.parent_guid.clone(),
                            old_index: original.index,
                        });
                    }
                    results.push(updated.to_item());
                }
                Ok((results, notifications))
            },
        )
    }

    fn remove(&self, guids: &[String], options: &RemoveOptions) -> Result<(), BookmarkError> {
        if guids.is_empty() {
            return Err(invalid(OP_REMOVE, "guid", "At least one guid is required"));
        }
        for guid in guids {
            require_guid(OP_REMOVE, "guid", guid)?;
        }
        let source = options.source;
        let keywords = self.ctx.keywords;

        self.ctx.write(
            |conn| {
                let store = BookmarkStore::new(conn);
                let mut items = Vec::with_capacity(guids.len());
                let mut seen = HashSet::new();
                for guid in guids {
                    if !seen.insert(guid.as_str()) {
                        continue;
                    }
                    let item = fetch_required(&store, guid)?;
                    if is_root_guid(&item.guid) {
                        return Err(BookmarkError::ProtectedRoot(item.guid));
                    }
                    if options.prevent_removal_of_non_empty_folders && item.is_folder() && item.child_count > 0 {
                        return Err(BookmarkError::FolderNotEmpty(item.guid));
                    }
                    items.push(item);
                }
                Ok(items)
            },
            |uow, items| {
                let delta = sync_tracker::determine_sync_change_delta(source);
                let now = now_ms();
                let mut notifications = Vec::new();
                let mut bookmark_urls = Vec::new();
                let mut tagged_urls = Vec::new();
                {
                    let store = BookmarkStore::new(uow);
                    let tags_root = store.tags_root_id()?;
                    for item in &items {
                        // Gone already if an earlier item was its ancestor.
                        let Some(current) = store.fetch_by_id(item.id)? else {
                            continue;
                        };
                        let parent_id = current.parent_id.unwrap_or_default();
                        if current.is_folder() {
                            let (urls, tags) =
                                remove_folder_contents(&store, &current, source, tags_root, &mut notifications)?;
                            bookmark_urls.extend(urls);
                            tagged_urls.extend(tags);
                        }
                        store.delete_row(current.id)?;
                        store.recompute_positions(parent_id)?;
                        sync_tracker::insert_tombstones(uow, std::slice::from_ref(&current), delta)?;
                        sync_tracker::set_ancestors_last_modified(uow, &current.parent_guid, now, delta)?;
                        sync_tracker::adjust_separators_sync_counter(uow, parent_id, current.index, delta)?;
                        notifications.push(removed(&current, source, tags_root, false));

                        if let Some(url) = &current.url {
                            if current.is_tag_entry(tags_root) {
                                sync_tracker::add_sync_changes_for_bookmarks_with_url(uow, current.url_id, delta)?;
                                tagged_urls.push(url.clone());
                            } else {
                                bookmark_urls.push(url.clone());
                            }
                        }
                    }
                }

                dedup(&mut bookmark_urls);
                dedup(&mut tagged_urls);
                for url in &tagged_urls {
                    notifications.extend(tags_changed_notifications(uow, url, source)?);
                }
                notifications.extend(remove_orphan_tags_in(uow, &bookmark_urls, source)?);
                remove_from_urls_if_not_bookmarked_in(uow, keywords, &bookmark_urls)?;
                log::debug!("removed {} items", items.len());
                Ok(((), notifications))
            },
        )
    }

    fn reorder(&self, parent_guid: &str, ordered_guids: &[String], options: &ReorderOptions) -> Result<(), BookmarkError> {
        require_guid(OP_REORDER, "parentGuid", parent_guid)?;
        if ordered_guids.is_empty() {
            return Err(invalid(OP_REORDER, "orderedChildrenGuids", "Must provide a sorted array of children GUIDs"));
        }
        for guid in ordered_guids {
            require_guid(OP_REORDER, "orderedChildrenGuids", guid)?;
        }
        let source = options.source;

        self.ctx.write(
            |conn| {
                let store = BookmarkStore::new(conn);
                let parent = fetch_required(&store, parent_guid)?;
                require_folder(OP_REORDER, "parentGuid", &parent)?;
                let children = store.fetch_children(parent.id)?;
                let plan = reorder_plan(&children, ordered_guids);
                Ok((parent, children, plan))
            },
            |uow, (parent, children, plan)| {
                if plan.is_empty() {
                    return Ok(((), Vec::new()));
                }
                let store = BookmarkStore::new(uow);
                let tags_root = store.tags_root_id()?;
                let delta = sync_tracker::determine_sync_change_delta(source);
                let positions: Vec<(i64, i64)> =
                    plan.iter().map(|(slot, index)| (children[*slot].id, *index)).collect();
                let time = options.last_modified.unwrap_or_else(now_ms);
                store.set_positions(&positions)?;
                let moved: Vec<i64> = positions.iter().map(|(id, _)| *id).collect();
                store.stamp_last_modified(&moved, time)?;
                sync_tracker::set_ancestors_last_modified(uow, &parent.guid, time, delta)?;
                sync_tracker::adjust_separators_sync_counter(uow, parent.id, 0, delta)?;

                let notifications = plan
                    .iter()
                    .map(|(slot, index)| {
                        let child = &children[*slot];
                        Notification::Moved {
                            item: child.item_ref(source, tags_root),
                            index: *index,
                            old_parent_guid: parent.guid.clone(),
                            old_index: child.index,
                        }
                    })
                    .collect();
                Ok(((), notifications))
            },
        )
    }

    fn erase_everything(&self, source: ChangeSource) -> Result<(), BookmarkError> {
        let keywords = self.ctx.keywords;
        self.ctx.write(
            |_| Ok(()),
            |uow, ()| {
                let delta = sync_tracker::determine_sync_change_delta(source);
                let now = now_ms();
                let mut notifications = Vec::new();
                {
                    let store = BookmarkStore::new(uow);
                    let tags_root = store.tags_root_id()?;
                    for root_guid in USER_CONTENT_ROOTS.iter().chain(std::iter::once(&TAGS_GUID)) {
                        let root = fetch_required(&store, root_guid)?;
                        remove_folder_contents(&store, &root, source, tags_root, &mut notifications)?;
                        sync_tracker::set_ancestors_last_modified(uow, root_guid, now, delta)?;
                    }
                }
                erase_everything_in(uow, keywords)?;
                sync_tracker::reset_sync_metadata(uow, source)?;
                log::info!("erased all bookmarks ({} removals)", notifications.len());
                Ok(((), notifications))
            },
        )
    }

    fn fetch(&self, query: &FetchQuery, options: &FetchOptions) -> Result<Vec<BookmarkItem>, BookmarkError> {
        let query = Self::normalize_query(query)?;
        self.ctx.read(options.concurrent, |conn| {
            let store = BookmarkStore::new(conn);
            let (stored, with_tags) = match &query {
                FetchQuery::Guid(guid) => (store.fetch_by_guid(guid)?.into_iter().collect(), false),
                FetchQuery::Position { parent_guid, index } => {
                    (store.fetch_by_position(parent_guid, *index)?.into_iter().collect(), false)
                }
                FetchQuery::Parent(guid) => match store.fetch_by_guid(guid)? {
                    Some(parent) => (store.fetch_children(parent.id)?, false),
                    None => (Vec::new(), false),
                },
                FetchQuery::Url(url) => (store.fetch_by_url(url)?, true),
                FetchQuery::GuidPrefix(prefix) => (store.fetch_by_guid_prefix(prefix)?, false),
                FetchQuery::Tags(tags) => (store.fetch_by_tags(tags)?, true),
            };
            stored
                .iter()
                .map(|item| Self::decorate(&store, item, options, with_tags))
                .collect()
        })
    }

    fn fetch_one(&self, guid: &str) -> Result<Option<BookmarkItem>, BookmarkError> {
        Ok(self
            .fetch(&FetchQuery::Guid(guid.to_string()), &FetchOptions::default())?
            .into_iter()
            .next())
    }

    fn fetch_tags(&self) -> Result<Vec<TagCount>, BookmarkError> {
        self.ctx.read(true, tagging_manager::all_tags)
    }

    fn get_recent(&self, limit: i64) -> Result<Vec<BookmarkItem>, BookmarkError> {
        if limit <= 0 {
            return Err(invalid("Bookmarks.getRecent", "numberOfItems", limit.to_string()));
        }
        self.ctx.read(true, |conn| {
            Ok(BookmarkStore::new(conn)
                .fetch_recent(limit)?
                .iter()
                .map(StoredItem::to_item)
                .collect())
        })
    }

    fn search(&self, query: &SearchQuery) -> Result<Vec<BookmarkItem>, BookmarkError> {
        const OP: &str = "Bookmarks.search";
        let has_text = query.query.as_deref().map(|q| !q.is_empty()).unwrap_or(false);
        if !has_text && query.title.is_none() && query.url.is_none() {
            return Err(ValidationError::general(OP, "Query object must have at least one property").into());
        }
        let mut query = query.clone();
        if let Some(url) = &query.url {
            query.url = Some(normalize_url(url).ok_or_else(|| invalid(OP, "url", format!("{} is not a valid URL", url)))?);
        }
        self.ctx.read(true, |conn| {
            Ok(BookmarkStore::new(conn)
                .search(&query)?
                .iter()
                .map(StoredItem::to_item)
                .collect())
        })
    }
}
