use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use super::errors::BookmarkError;
use super::source::ChangeSource;

// === Reserved roots ===

pub const ROOT_GUID: &str = "root________";
pub const MENU_GUID: &str = "menu________";
pub const TOOLBAR_GUID: &str = "toolbar_____";
pub const UNFILED_GUID: &str = "unfiled_____";
pub const MOBILE_GUID: &str = "mobile______";
pub const TAGS_GUID: &str = "tags________";

/// Roots holding user content, in the order they are cleared on erase.
pub const USER_CONTENT_ROOTS: [&str; 4] = [TOOLBAR_GUID, MENU_GUID, UNFILED_GUID, MOBILE_GUID];

/// Every reserved root, including the tags root and the top-level root.
pub const ALL_ROOTS: [&str; 6] = [
    ROOT_GUID,
    MENU_GUID,
    TOOLBAR_GUID,
    TAGS_GUID,
    UNFILED_GUID,
    MOBILE_GUID,
];

/// Index meaning "append at the end of the folder".
pub const DEFAULT_INDEX: i64 = -1;

pub const MAX_TAG_LENGTH: usize = 100;
pub const DB_URL_LENGTH_MAX: usize = 65536;
pub const DB_TITLE_LENGTH_MAX: usize = 4096;

/// Returns true for any of the reserved root guids.
pub fn is_root_guid(guid: &str) -> bool {
    ALL_ROOTS.contains(&guid)
}

fn is_guid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// A guid is exactly 12 characters of `[A-Za-z0-9_-]`.
pub fn is_valid_guid(guid: &str) -> bool {
    guid.len() == 12 && guid.chars().all(is_guid_char)
}

/// A guid prefix is 1 to 11 guid characters.
pub fn is_valid_guid_prefix(prefix: &str) -> bool {
    (1..=11).contains(&prefix.len()) && prefix.chars().all(is_guid_char)
}

/// Generates a fresh 12-character guid from 9 random bytes.
pub fn make_guid() -> Result<String, BookmarkError> {
    let mut bytes = [0u8; 9];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| BookmarkError::TransactionFailure("Failed to generate guid".to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Current time in milliseconds since the UNIX epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// === Item kinds ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookmarkType {
    Bookmark,
    Folder,
    Separator,
}

impl BookmarkType {
    pub fn as_i64(&self) -> i64 {
        match self {
            BookmarkType::Bookmark => 1,
            BookmarkType::Folder => 2,
            BookmarkType::Separator => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(BookmarkType::Bookmark),
            2 => Some(BookmarkType::Folder),
            3 => Some(BookmarkType::Separator),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookmarkType::Bookmark => "bookmark",
            BookmarkType::Folder => "folder",
            BookmarkType::Separator => "separator",
        }
    }
}

/// Whether an item has been uploaded. Only `Normal` items leave a tombstone
/// behind when removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Unknown,
    New,
    Normal,
}

impl SyncStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            SyncStatus::Unknown => 0,
            SyncStatus::New => 1,
            SyncStatus::Normal => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => SyncStatus::New,
            2 => SyncStatus::Normal,
            _ => SyncStatus::Unknown,
        }
    }
}

// === Read model ===

/// One `{guid, title}` step of a folder path, ordered from root to leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub guid: String,
    pub title: String,
}

/// A bookmark-item as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkItem {
    pub guid: String,
    pub parent_guid: String,
    pub index: i64,
    #[serde(rename = "type")]
    pub item_type: BookmarkType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub date_added: i64,
    pub last_modified: i64,
    pub sync_status: SyncStatus,
    pub sync_change_counter: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

// === Inputs ===

/// Property bag for insert, update and tree import.
///
/// Absent fields are "undefined": defaults apply only to them. Fields the
/// store does not know about are carried in `extra` and survive validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<BookmarkType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ChangeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<BookmarkInfo>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BookmarkInfo {
    /// A bookmark for `url` under `parent_guid`, appended.
    pub fn bookmark(parent_guid: &str, url: &str, title: &str) -> Self {
        Self {
            parent_guid: Some(parent_guid.to_string()),
            item_type: Some(BookmarkType::Bookmark),
            url: Some(url.to_string()),
            title: Some(title.to_string()),
            ..Self::default()
        }
    }

    /// A folder titled `title` under `parent_guid`, appended.
    pub fn folder(parent_guid: &str, title: &str) -> Self {
        Self {
            parent_guid: Some(parent_guid.to_string()),
            item_type: Some(BookmarkType::Folder),
            title: Some(title.to_string()),
            ..Self::default()
        }
    }

    pub fn separator(parent_guid: &str) -> Self {
        Self {
            parent_guid: Some(parent_guid.to_string()),
            item_type: Some(BookmarkType::Separator),
            ..Self::default()
        }
    }

    pub fn at_index(mut self, index: i64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_guid(mut self, guid: &str) -> Self {
        self.guid = Some(guid.to_string());
        self
    }

    pub fn with_source(mut self, source: ChangeSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_children(mut self, children: Vec<BookmarkInfo>) -> Self {
        self.children = Some(children);
        self
    }
}

/// Root of a bulk import: children are appended under the existing `guid`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkTree {
    pub guid: String,
    #[serde(default)]
    pub source: Option<ChangeSource>,
    #[serde(default)]
    pub children: Vec<BookmarkInfo>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertTreeOptions {
    /// Fix what can be fixed in malformed entries and skip the rest.
    #[serde(default)]
    pub fixup_or_skip_invalid_entries: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveOptions {
    #[serde(default)]
    pub prevent_removal_of_non_empty_folders: bool,
    #[serde(default)]
    pub source: ChangeSource,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderOptions {
    #[serde(default)]
    pub last_modified: Option<i64>,
    #[serde(default)]
    pub source: ChangeSource,
}

/// Exactly one lookup condition for `fetch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchQuery {
    Guid(String),
    Position { parent_guid: String, index: i64 },
    Parent(String),
    Url(String),
    GuidPrefix(String),
    Tags(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOptions {
    /// Read from the read-only connection; may miss an in-flight write.
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default)]
    pub include_path: bool,
    #[serde(default)]
    pub include_item_ids: bool,
}

/// Free-form search over bookmarks, tag entries excluded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Case-insensitive substring of the url or the title.
    #[serde(default)]
    pub query: Option<String>,
    /// Exact title.
    #[serde(default)]
    pub title: Option<String>,
    /// Exact url.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub name: String,
    pub count: i64,
}
