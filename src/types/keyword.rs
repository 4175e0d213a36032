use serde::{Deserialize, Serialize};

use super::source::ChangeSource;

/// One keyword association. A keyword points at exactly one url; a url can
/// carry several keywords as long as their POST data differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordEntry {
    pub keyword: String,
    pub url: String,
    pub post_data: Option<String>,
}

/// Input for `KeywordManagerTrait::insert`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordInsert {
    pub keyword: String,
    pub url: String,
    #[serde(default)]
    pub post_data: Option<String>,
    #[serde(default)]
    pub source: ChangeSource,
}

/// Lookup filter for keywords. When both fields are set the result is their
/// intersection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordQuery {
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}
