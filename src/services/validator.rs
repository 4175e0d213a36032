// Placestore Validator
// Normalizes and type-checks a property bag against a schema before any mutation.
// A schema is plain data: an ordered list of (field, behavior) pairs, so callers can
// rebuild it per recursion level (tree import swaps in a different parentGuid).

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::types::bookmark::{
    is_valid_guid, is_valid_guid_prefix, BookmarkInfo, BookmarkType, DB_TITLE_LENGTH_MAX,
    DB_URL_LENGTH_MAX,
};
use crate::types::errors::ValidationError;
use crate::types::source::ChangeSource;

pub type PropertyBag = Map<String, Value>;

type Predicate = Arc<dyn Fn(&PropertyBag) -> bool + Send + Sync>;
type Fixup = Arc<dyn Fn(&mut PropertyBag) + Send + Sync>;

/// How the validator treats one field.
#[derive(Clone, Default)]
pub struct FieldBehavior {
    required: bool,
    required_if: Option<Predicate>,
    valid_if: Option<Predicate>,
    fixup: Option<Fixup>,
    default_value: Option<Value>,
    replace_with: Option<Value>,
}

impl FieldBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn required_if(mut self, pred: impl Fn(&PropertyBag) -> bool + Send + Sync + 'static) -> Self {
        self.required_if = Some(Arc::new(pred));
        self
    }

    /// Checked only when the field is present. Without a fixup a failing
    /// predicate rejects the input.
    pub fn valid_if(mut self, pred: impl Fn(&PropertyBag) -> bool + Send + Sync + 'static) -> Self {
        self.valid_if = Some(Arc::new(pred));
        self
    }

    /// Repairs the bag instead of failing, both for `valid_if` and for the
    /// field's value validator.
    pub fn fixup(mut self, fix: impl Fn(&mut PropertyBag) + Send + Sync + 'static) -> Self {
        self.fixup = Some(Arc::new(fix));
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn replace_with(mut self, value: impl Into<Value>) -> Self {
        self.replace_with = Some(value.into());
        self
    }
}

/// Ordered field behaviors. Order matters: predicates see the defaults that
/// earlier fields already filled in.
#[derive(Clone, Default)]
pub struct Schema {
    fields: Vec<(String, FieldBehavior)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, behavior: FieldBehavior) -> Self {
        self.set(name, behavior);
        self
    }

    /// Replaces the behavior of `name` in place, or appends it.
    pub fn set(&mut self, name: &str, behavior: FieldBehavior) {
        match self.fields.iter_mut().find(|(field, _)| field == name) {
            Some(entry) => entry.1 = behavior,
            None => self.fields.push((name.to_string(), behavior)),
        }
    }
}

/// Validates `props` against `schema`, returning the normalized bag.
///
/// Defaults and replacements are filled in, known fields are normalized by
/// their value validator, and unknown fields pass through untouched.
pub fn validate(operation: &str, props: &PropertyBag, schema: &Schema) -> Result<PropertyBag, ValidationError> {
    let mut input = props.clone();
    let mut required: Vec<String> = Vec::new();

    for (name, behavior) in &schema.fields {
        let is_required = behavior.required
            || behavior.required_if.as_ref().map(|p| p(&input)).unwrap_or(false);
        if is_required && !required.contains(name) {
            required.push(name.clone());
        }

        if let Some(valid_if) = &behavior.valid_if {
            if input.contains_key(name) && !valid_if(&input) {
                match &behavior.fixup {
                    Some(fix) => fix(&mut input),
                    None => return Err(invalid(operation, name, input.get(name))),
                }
            }
        }

        if let Some(default) = &behavior.default_value {
            if !input.contains_key(name) {
                input.insert(name.clone(), default.clone());
            }
        }

        if let Some(replacement) = &behavior.replace_with {
            input.insert(name.clone(), replacement.clone());
        }
    }

    let mut normalized = PropertyBag::new();
    let keys: Vec<String> = input.keys().cloned().collect();
    for key in keys {
        required.retain(|r| r != &key);
        let Some(value) = input.get(&key).cloned() else {
            continue;
        };
        if !has_validator(&key) {
            normalized.insert(key, value);
            continue;
        }
        match validate_value(&key, &value) {
            Ok(v) => {
                normalized.insert(key, v);
            }
            Err(()) => {
                let fixup = schema
                    .fields
                    .iter()
                    .find(|(field, _)| field == &key)
                    .and_then(|(_, b)| b.fixup.clone());
                match fixup {
                    Some(fix) => {
                        fix(&mut input);
                        if let Some(fixed) = input.get(&key) {
                            normalized.insert(key, fixed.clone());
                        }
                    }
                    None => return Err(invalid(operation, &key, Some(&value))),
                }
            }
        }
    }

    if !required.is_empty() {
        return Err(ValidationError::general(
            operation,
            format!("The following properties were expected: {}", required.join(", ")),
        ));
    }
    Ok(normalized)
}

fn invalid(operation: &str, field: &str, value: Option<&Value>) -> ValidationError {
    let shown = value.map(|v| v.to_string()).unwrap_or_else(|| "undefined".to_string());
    ValidationError::new(operation, field, shown)
}

const VALIDATED_FIELDS: [&str; 13] = [
    "guid",
    "parentGuid",
    "guidPrefix",
    "index",
    "dateAdded",
    "lastModified",
    "type",
    "title",
    "url",
    "source",
    "keyword",
    "postData",
    "tags",
];

pub fn has_validator(field: &str) -> bool {
    VALIDATED_FIELDS.contains(&field)
}

/// Per-field value validator. Returns the normalized value.
pub fn validate_value(field: &str, value: &Value) -> Result<Value, ()> {
    match field {
        "guid" | "parentGuid" => match value.as_str() {
            Some(s) if is_valid_guid(s) => Ok(value.clone()),
            _ => Err(()),
        },
        "guidPrefix" => match value.as_str() {
            Some(s) if is_valid_guid_prefix(s) => Ok(value.clone()),
            _ => Err(()),
        },
        "index" => match value.as_i64() {
            Some(i) if i >= -1 => Ok(Value::from(i)),
            _ => Err(()),
        },
        "dateAdded" | "lastModified" => match value.as_i64() {
            Some(t) if t >= 0 => Ok(Value::from(t)),
            _ => Err(()),
        },
        "type" => parse_type(value)
            .map(|t| Value::from(t.as_str()))
            .ok_or(()),
        "title" => match value {
            Value::Null => Ok(Value::from("")),
            Value::String(s) => Ok(Value::from(truncate_chars(s, DB_TITLE_LENGTH_MAX))),
            _ => Err(()),
        },
        "url" => match value.as_str() {
            Some(s) if s.chars().count() <= DB_URL_LENGTH_MAX => {
                normalize_url(s).map(Value::from).ok_or(())
            }
            _ => Err(()),
        },
        "source" => match value.as_str().and_then(ChangeSource::parse) {
            Some(_) => Ok(value.clone()),
            None => Err(()),
        },
        "keyword" | "postData" => match value.as_str() {
            Some(s) if !s.is_empty() => Ok(value.clone()),
            _ => Err(()),
        },
        "tags" => match value.as_array() {
            Some(tags)
                if !tags.is_empty()
                    && tags.iter().all(|t| t.as_str().map(|s| !s.is_empty()).unwrap_or(false)) =>
            {
                Ok(value.clone())
            }
            _ => Err(()),
        },
        _ => Ok(value.clone()),
    }
}

/// Parses and normalizes a url. `None` when it is not a valid absolute url.
pub fn normalize_url(raw: &str) -> Option<String> {
    url::Url::parse(raw).ok().map(|u| u.to_string())
}

fn parse_type(value: &Value) -> Option<BookmarkType> {
    match value {
        Value::String(s) => match s.as_str() {
            "bookmark" => Some(BookmarkType::Bookmark),
            "folder" => Some(BookmarkType::Folder),
            "separator" => Some(BookmarkType::Separator),
            _ => None,
        },
        Value::Number(n) => n.as_i64().and_then(BookmarkType::from_i64),
        _ => None,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

// === Bag accessors for predicates ===

/// The bag's `type`, accepting both the string and numeric forms.
pub fn bag_type(bag: &PropertyBag) -> Option<BookmarkType> {
    bag.get("type").and_then(parse_type)
}

pub fn bag_i64(bag: &PropertyBag, field: &str) -> Option<i64> {
    bag.get(field).and_then(Value::as_i64)
}

pub fn bag_str<'a>(bag: &'a PropertyBag, field: &str) -> Option<&'a str> {
    bag.get(field).and_then(Value::as_str)
}

// === Typed conversion ===

pub fn to_bag(operation: &str, info: &BookmarkInfo) -> Result<PropertyBag, ValidationError> {
    match serde_json::to_value(info) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ValidationError::general(operation, "Input should be a valid object")),
        Err(e) => Err(ValidationError::general(operation, e.to_string())),
    }
}

pub fn from_bag(operation: &str, bag: PropertyBag) -> Result<BookmarkInfo, ValidationError> {
    serde_json::from_value(Value::Object(bag))
        .map_err(|e| ValidationError::general(operation, e.to_string()))
}

/// Validates a typed input: converts to a bag, validates, converts back.
pub fn validate_info(operation: &str, info: &BookmarkInfo, schema: &Schema) -> Result<BookmarkInfo, ValidationError> {
    let bag = to_bag(operation, info)?;
    let normalized = validate(operation, &bag, schema)?;
    from_bag(operation, normalized)
}
