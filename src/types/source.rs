use serde::{Deserialize, Serialize};

/// Origin of a change, forwarded verbatim into every notification.
///
/// Sync-sourced writes do not bump change counters, so the sync engine never
/// re-uploads what it just downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeSource {
    #[default]
    Default,
    Sync,
    Import,
    Restore,
    RestoreOnStartup,
    SyncReparentRemovedFolderChildren,
}

impl ChangeSource {
    /// All known sources, in declaration order.
    pub const ALL: [ChangeSource; 6] = [
        ChangeSource::Default,
        ChangeSource::Sync,
        ChangeSource::Import,
        ChangeSource::Restore,
        ChangeSource::RestoreOnStartup,
        ChangeSource::SyncReparentRemovedFolderChildren,
    ];

    /// The serialized name, e.g. `"restoreOnStartup"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSource::Default => "default",
            ChangeSource::Sync => "sync",
            ChangeSource::Import => "import",
            ChangeSource::Restore => "restore",
            ChangeSource::RestoreOnStartup => "restoreOnStartup",
            ChangeSource::SyncReparentRemovedFolderChildren => {
                "syncReparentRemovedFolderChildren"
            }
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}
