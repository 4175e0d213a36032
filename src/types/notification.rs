use serde::Serialize;

use super::bookmark::BookmarkType;
use super::source::ChangeSource;

/// Fields every bookmark notification carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRef {
    pub id: i64,
    pub guid: String,
    pub parent_id: i64,
    pub parent_guid: String,
    pub item_type: BookmarkType,
    pub url: Option<String>,
    pub source: ChangeSource,
    /// The item is an entry under a tag folder rather than a real bookmark.
    pub is_tagging: bool,
}

/// One change record. A mutation produces an ordered batch of these, primary
/// change first, derived changes (tags, keywords) after.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notification {
    #[serde(rename = "bookmark-added", rename_all = "camelCase")]
    Added {
        #[serde(flatten)]
        item: ItemRef,
        index: i64,
        title: String,
        date_added: i64,
    },
    #[serde(rename = "bookmark-removed", rename_all = "camelCase")]
    Removed {
        #[serde(flatten)]
        item: ItemRef,
        index: i64,
        title: String,
        /// Removed because an ancestor folder was removed.
        is_descendant_removal: bool,
    },
    #[serde(rename = "bookmark-moved", rename_all = "camelCase")]
    Moved {
        #[serde(flatten)]
        item: ItemRef,
        index: i64,
        old_parent_guid: String,
        old_index: i64,
    },
    #[serde(rename = "bookmark-title-changed", rename_all = "camelCase")]
    TitleChanged {
        #[serde(flatten)]
        item: ItemRef,
        title: String,
        last_modified: i64,
    },
    #[serde(rename = "bookmark-url-changed", rename_all = "camelCase")]
    UrlChanged {
        #[serde(flatten)]
        item: ItemRef,
        last_modified: i64,
    },
    #[serde(rename = "bookmark-time-changed", rename_all = "camelCase")]
    TimeChanged {
        #[serde(flatten)]
        item: ItemRef,
        date_added: i64,
        last_modified: i64,
    },
    #[serde(rename = "bookmark-tags-changed", rename_all = "camelCase")]
    TagsChanged {
        #[serde(flatten)]
        item: ItemRef,
        tags: Vec<String>,
        last_modified: i64,
    },
    #[serde(rename = "bookmark-keyword-changed", rename_all = "camelCase")]
    KeywordChanged {
        #[serde(flatten)]
        item: ItemRef,
        /// Empty when the keyword was removed.
        keyword: String,
        last_modified: i64,
    },
}

impl Notification {
    pub fn item(&self) -> &ItemRef {
        match self {
            Notification::Added { item, .. }
            | Notification::Removed { item, .. }
            | Notification::Moved { item, .. }
            | Notification::TitleChanged { item, .. }
            | Notification::UrlChanged { item, .. }
            | Notification::TimeChanged { item, .. }
            | Notification::TagsChanged { item, .. }
            | Notification::KeywordChanged { item, .. } => item,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Added { .. } => "bookmark-added",
            Notification::Removed { .. } => "bookmark-removed",
            Notification::Moved { .. } => "bookmark-moved",
            Notification::TitleChanged { .. } => "bookmark-title-changed",
            Notification::UrlChanged { .. } => "bookmark-url-changed",
            Notification::TimeChanged { .. } => "bookmark-time-changed",
            Notification::TagsChanged { .. } => "bookmark-tags-changed",
            Notification::KeywordChanged { .. } => "bookmark-keyword-changed",
        }
    }
}
