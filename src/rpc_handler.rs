//! RPC method handler for the placestore JSON-RPC protocol.
//!
//! Extracted from `rpc_server.rs` so it can be unit-tested independently.
//! `handle_method` dispatches one call to the managers of an open `Places`.
//! Errors come back as `"<Kind>: <message>"`, e.g.
//! `"ProtectedRootError: Cannot modify a protected root folder: menu________"`.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::app::Places;
use crate::managers::bookmark_manager::BookmarkManagerTrait;
use crate::managers::keyword_manager::KeywordManagerTrait;
use crate::managers::tagging_manager::TaggingManagerTrait;
use crate::services::sync_tracker::{SyncChange, SyncTrackerTrait};
use crate::types::bookmark::{
    BookmarkInfo, BookmarkTree, FetchOptions, FetchQuery, InsertTreeOptions, RemoveOptions, ReorderOptions,
    SearchQuery, DEFAULT_INDEX,
};
use crate::types::errors::BookmarkError;
use crate::types::keyword::{KeywordInsert, KeywordQuery};
use crate::types::source::ChangeSource;

fn fail(err: BookmarkError) -> String {
    format!("{}: {}", err.kind(), err)
}

fn parse<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T, String> {
    serde_json::from_value(value.clone()).map_err(|e| format!("invalid {}: {}", what, e))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn str_param<'v>(params: &'v Value, key: &str) -> Option<&'v str> {
    params.get(key).and_then(|v| v.as_str())
}

fn string_list(params: &Value, key: &str) -> Result<Option<Vec<String>>, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse(v, key).map(Some),
    }
}

/// `source` defaults to `default`; an unknown name is an error.
fn source_param(params: &Value) -> Result<ChangeSource, String> {
    match str_param(params, "source") {
        None => Ok(ChangeSource::Default),
        Some(name) => ChangeSource::parse(name).ok_or_else(|| format!("unknown source: {}", name)),
    }
}

/// Exactly one of `guid`, `parentGuid` (with optional `index`), `url`,
/// `guidPrefix` or `tags`.
fn fetch_query(params: &Value) -> Result<FetchQuery, String> {
    let mut queries = Vec::new();
    if let Some(guid) = str_param(params, "guid") {
        queries.push(FetchQuery::Guid(guid.to_string()));
    }
    if let Some(parent) = str_param(params, "parentGuid") {
        match params.get("index").and_then(|v| v.as_i64()) {
            Some(index) => queries.push(FetchQuery::Position {
                parent_guid: parent.to_string(),
                index,
            }),
            None => queries.push(FetchQuery::Parent(parent.to_string())),
        }
    }
    if let Some(url) = str_param(params, "url") {
        queries.push(FetchQuery::Url(url.to_string()));
    }
    if let Some(prefix) = str_param(params, "guidPrefix") {
        queries.push(FetchQuery::GuidPrefix(prefix.to_string()));
    }
    if let Some(tags) = string_list(params, "tags")? {
        queries.push(FetchQuery::Tags(tags));
    }
    match queries.len() {
        1 => Ok(queries.remove(0)),
        0 => Err("missing fetch condition".to_string()),
        _ => Err("fetch takes exactly one condition".to_string()),
    }
}

/// Dispatch a JSON-RPC method call to the appropriate manager.
///
/// Returns `Ok(Value)` on success or `Err(String)` with an error message.
pub fn handle_method(places: &Places, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        "ping" => Ok(json!({"pong": true, "version": env!("CARGO_PKG_VERSION")})),

        // ─── Bookmarks ───
        "bookmarks.insert" => {
            let info: BookmarkInfo = parse(params, "bookmark")?;
            let item = places.bookmarks().insert(&info).map_err(fail)?;
            to_json(&item)
        }
        "bookmarks.insertTree" => {
            let tree: BookmarkTree = parse(params, "tree")?;
            let options: InsertTreeOptions = parse(params, "options")?;
            let items = places.bookmarks().insert_tree(&tree, &options).map_err(fail)?;
            to_json(&items)
        }
        "bookmarks.update" => {
            let info: BookmarkInfo = parse(params, "bookmark")?;
            let item = places.bookmarks().update(&info).map_err(fail)?;
            to_json(&item)
        }
        "bookmarks.moveToFolder" => {
            let guids = string_list(params, "guids")?.ok_or("missing guids")?;
            let parent = str_param(params, "parentGuid");
            let index = params.get("index").and_then(|v| v.as_i64()).unwrap_or(DEFAULT_INDEX);
            let source = source_param(params)?;
            let items = places
                .bookmarks()
                .move_to_folder(&guids, parent, index, source)
                .map_err(fail)?;
            to_json(&items)
        }
        "bookmarks.remove" => {
            let guids = match string_list(params, "guids")? {
                Some(guids) => guids,
                None => vec![str_param(params, "guid").ok_or("missing guids")?.to_string()],
            };
            let options: RemoveOptions = parse(params, "options")?;
            places.bookmarks().remove(&guids, &options).map_err(fail)?;
            Ok(json!({"ok": true}))
        }
        "bookmarks.reorder" => {
            let parent = str_param(params, "parentGuid").ok_or("missing parentGuid")?;
            let ordered = string_list(params, "orderedGuids")?.ok_or("missing orderedGuids")?;
            let options: ReorderOptions = parse(params, "options")?;
            places.bookmarks().reorder(parent, &ordered, &options).map_err(fail)?;
            Ok(json!({"ok": true}))
        }
        "bookmarks.eraseEverything" => {
            let source = source_param(params)?;
            places.bookmarks().erase_everything(source).map_err(fail)?;
            Ok(json!({"ok": true}))
        }
        "bookmarks.fetch" => {
            let query = fetch_query(params)?;
            let options: FetchOptions = parse(params, "options")?;
            let items = places.bookmarks().fetch(&query, &options).map_err(fail)?;
            to_json(&items)
        }
        "bookmarks.fetchTags" => {
            let tags = places.bookmarks().fetch_tags().map_err(fail)?;
            to_json(&tags)
        }
        "bookmarks.getRecent" => {
            let limit = params.get("limit").and_then(|v| v.as_i64()).ok_or("missing limit")?;
            let items = places.bookmarks().get_recent(limit).map_err(fail)?;
            to_json(&items)
        }
        "bookmarks.search" => {
            let query: SearchQuery = parse(params, "search")?;
            let items = places.bookmarks().search(&query).map_err(fail)?;
            to_json(&items)
        }

        // ─── Keywords ───
        "keywords.insert" => {
            let entry: KeywordInsert = parse(params, "keyword")?;
            places.keywords().insert(&entry).map_err(fail)?;
            Ok(json!({"ok": true}))
        }
        "keywords.fetch" => {
            let query: KeywordQuery = parse(params, "query")?;
            let entries = places.keywords().fetch(&query).map_err(fail)?;
            to_json(&entries)
        }
        "keywords.remove" => {
            let keyword = str_param(params, "keyword").ok_or("missing keyword")?;
            let source = source_param(params)?;
            places.keywords().remove(keyword, source).map_err(fail)?;
            Ok(json!({"ok": true}))
        }

        // ─── Tags ───
        "tags.tag" => {
            let url = str_param(params, "url").ok_or("missing url")?;
            let tags = string_list(params, "tags")?.ok_or("missing tags")?;
            let source = source_param(params)?;
            places.tags().tag(url, &tags, source).map_err(fail)?;
            Ok(json!({"ok": true}))
        }
        "tags.untag" => {
            let url = str_param(params, "url").ok_or("missing url")?;
            let tags = string_list(params, "tags")?;
            let source = source_param(params)?;
            places.tags().untag(url, tags.as_deref(), source).map_err(fail)?;
            Ok(json!({"ok": true}))
        }
        "tags.forUrl" => {
            let url = str_param(params, "url").ok_or("missing url")?;
            let tags = places.tags().tags_for_url(url).map_err(fail)?;
            Ok(json!(tags))
        }

        // ─── Sync ───
        "sync.pullChanges" => {
            let changes = places.sync().pull_changes().map_err(fail)?;
            to_json(&changes)
        }
        "sync.acknowledge" => {
            let changes: Vec<SyncChange> = parse(params.get("changes").ok_or("missing changes")?, "changes")?;
            places.sync().acknowledge(&changes).map_err(fail)?;
            Ok(json!({"ok": true, "acknowledged": changes.len()}))
        }
        "sync.tombstones" => {
            let guids = places.sync().tombstones().map_err(fail)?;
            Ok(json!(guids))
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}
