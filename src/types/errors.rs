use std::fmt;

// === ValidationError ===

/// Input rejected by the validator, naming the offending field when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Operation whose input was being validated (e.g. `Bookmarks.insert`).
    pub operation: String,
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(operation: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            operation: operation.to_string(),
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    /// An error that is not attributable to a single field.
    pub fn general(operation: &str, message: impl Into<String>) -> Self {
        Self {
            operation: operation.to_string(),
            field: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(
                f,
                "{}: Invalid value for property '{}': {}",
                self.operation, field, self.message
            ),
            None => write!(f, "{}: {}", self.operation, self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

// === BookmarkError ===

/// Errors surfaced by bookmark, tag and keyword operations.
#[derive(Debug)]
pub enum BookmarkError {
    /// Malformed input; raised before any I/O.
    Validation(ValidationError),
    /// A referenced guid, parent or keyword does not exist.
    NotFound(String),
    /// The move would make a folder its own ancestor.
    Cycle(String),
    /// Attempt to remove, reparent or move a reserved root.
    ProtectedRoot(String),
    /// Removal of a non-empty folder was explicitly refused.
    FolderNotEmpty(String),
    /// The storage transaction could not complete and was rolled back.
    TransactionFailure(String),
    /// The store is closed or shutting down.
    ShuttingDown,
}

impl fmt::Display for BookmarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookmarkError::Validation(err) => write!(f, "Validation failed: {}", err),
            BookmarkError::NotFound(what) => write!(f, "Not found: {}", what),
            BookmarkError::Cycle(guid) => {
                write!(f, "Cannot insert a folder into itself or one of its descendants: {}", guid)
            }
            BookmarkError::ProtectedRoot(guid) => {
                write!(f, "Cannot modify a protected root folder: {}", guid)
            }
            BookmarkError::FolderNotEmpty(guid) => {
                write!(f, "Cannot remove a non-empty folder: {}", guid)
            }
            BookmarkError::TransactionFailure(msg) => write!(f, "Transaction failed: {}", msg),
            BookmarkError::ShuttingDown => write!(f, "The bookmarks store is shutting down"),
        }
    }
}

impl std::error::Error for BookmarkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookmarkError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for BookmarkError {
    fn from(err: ValidationError) -> Self {
        BookmarkError::Validation(err)
    }
}

impl From<rusqlite::Error> for BookmarkError {
    fn from(err: rusqlite::Error) -> Self {
        BookmarkError::TransactionFailure(err.to_string())
    }
}

impl BookmarkError {
    /// Short machine-readable name, used by the RPC surface.
    pub fn kind(&self) -> &'static str {
        match self {
            BookmarkError::Validation(_) => "ValidationError",
            BookmarkError::NotFound(_) => "NotFoundError",
            BookmarkError::Cycle(_) => "CycleError",
            BookmarkError::ProtectedRoot(_) => "ProtectedRootError",
            BookmarkError::FolderNotEmpty(_) => "FolderNotEmptyError",
            BookmarkError::TransactionFailure(_) => "TransactionFailure",
            BookmarkError::ShuttingDown => "ShuttingDown",
        }
    }
}

// === NotificationError ===

/// A listener failed while handling a notification batch. Logged, never
/// propagated to the mutating caller.
#[derive(Debug)]
pub enum NotificationError {
    /// The listener returned an error.
    ListenerFailed { listener: String, message: String },
    /// The listener panicked.
    ListenerPanicked { listener: String, message: String },
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationError::ListenerFailed { listener, message } => {
                write!(f, "Listener '{}' failed: {}", listener, message)
            }
            NotificationError::ListenerPanicked { listener, message } => {
                write!(f, "Listener '{}' panicked: {}", listener, message)
            }
        }
    }
}

impl std::error::Error for NotificationError {}

// === SettingsError ===

/// Errors related to configuration management.
#[derive(Debug)]
pub enum SettingsError {
    /// An I/O error occurred while reading or writing the config file.
    IoError(String),
    /// Failed to serialize or deserialize the config.
    SerializationError(String),
    /// The provided config key is unknown.
    InvalidKey(String),
    /// The provided config value has the wrong shape.
    InvalidValue(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::IoError(msg) => write!(f, "Settings I/O error: {}", msg),
            SettingsError::SerializationError(msg) => {
                write!(f, "Settings serialization error: {}", msg)
            }
            SettingsError::InvalidKey(key) => write!(f, "Invalid settings key: {}", key),
            SettingsError::InvalidValue(msg) => {
                write!(f, "Invalid settings value: {}", msg)
            }
        }
    }
}

impl std::error::Error for SettingsError {}
