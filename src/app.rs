//! Store facade for placestore.
//!
//! `Places` owns the database, the keyword cache and the observer registry and
//! hands out managers borrowing them. `AsyncPlaces` runs the same operations
//! on tokio's blocking pool behind a shutdown barrier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use crate::database::Database;
use crate::managers::bookmark_manager::{BookmarkManager, BookmarkManagerTrait};
use crate::managers::keyword_manager::{KeywordCache, KeywordManager};
use crate::managers::tagging_manager::TaggingManager;
use crate::managers::StoreContext;
use crate::services::observers::{ListenerId, ObserverRegistry, PlacesObserver};
use crate::services::sync_tracker::SyncTracker;
use crate::types::bookmark::{BookmarkInfo, BookmarkItem, FetchOptions, FetchQuery, RemoveOptions};
use crate::types::errors::BookmarkError;
use crate::types::settings::PlacesConfig;

/// An open bookmarks store.
///
/// Managers are created on demand because they borrow the store:
/// `places.bookmarks().insert(&info)`.
pub struct Places {
    db: Arc<Database>,
    keywords: Arc<KeywordCache>,
    observers: Arc<ObserverRegistry>,
    closed: AtomicBool,
    config: PlacesConfig,
}

impl Places {
    pub fn open(config: PlacesConfig) -> Result<Self, BookmarkError> {
        Self::open_with_cache(config, Arc::new(KeywordCache::new()))
    }

    /// Opens the store around an existing keyword cache.
    pub fn open_with_cache(config: PlacesConfig, keywords: Arc<KeywordCache>) -> Result<Self, BookmarkError> {
        let db = Database::open_with_config(&config)?;
        // A cache loaded from another database would be stale.
        keywords.invalidate();
        Ok(Self {
            db: Arc::new(db),
            keywords,
            observers: Arc::new(ObserverRegistry::new()),
            closed: AtomicBool::new(false),
            config,
        })
    }

    pub fn open_in_memory() -> Result<Self, BookmarkError> {
        Self::open(PlacesConfig::in_memory())
    }

    pub fn ctx(&self) -> StoreContext<'_> {
        StoreContext {
            db: &self.db,
            keywords: &self.keywords,
            observers: &self.observers,
            closed: &self.closed,
        }
    }

    pub fn bookmarks(&self) -> BookmarkManager<'_> {
        BookmarkManager::new(self.ctx())
    }

    pub fn keywords(&self) -> KeywordManager<'_> {
        KeywordManager::new(self.ctx())
    }

    pub fn tags(&self) -> TaggingManager<'_> {
        TaggingManager::new(self.ctx())
    }

    pub fn sync(&self) -> SyncTracker<'_> {
        SyncTracker::new(self.ctx())
    }

    pub fn keyword_cache(&self) -> &Arc<KeywordCache> {
        &self.keywords
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn config(&self) -> &PlacesConfig {
        &self.config
    }

    pub fn register_observer(&self, observer: Arc<dyn PlacesObserver>) -> ListenerId {
        self.observers.register(observer)
    }

    pub fn unregister_observer(&self, id: ListenerId) -> bool {
        self.observers.unregister(id)
    }

    /// Refuses every later operation with `ShuttingDown`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Async front for `Places`.
///
/// Each operation holds a read guard on the gate while it runs on the
/// blocking pool; `shutdown` takes the write guard, so it waits for in-flight
/// work and every later call fails with `ShuttingDown`.
#[derive(Clone)]
pub struct AsyncPlaces {
    places: Arc<Places>,
    gate: Arc<RwLock<bool>>,
    hooks: Arc<Mutex<Vec<ShutdownHook>>>,
}

impl AsyncPlaces {
    pub fn new(places: Places) -> Self {
        Self {
            places: Arc::new(places),
            gate: Arc::new(RwLock::new(false)),
            hooks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn places(&self) -> &Arc<Places> {
        &self.places
    }

    /// Runs `op` against the store on the blocking pool.
    pub async fn run<T, F>(&self, op: F) -> Result<T, BookmarkError>
    where
        F: FnOnce(&Places) -> Result<T, BookmarkError> + Send + 'static,
        T: Send + 'static,
    {
        let gate = Arc::clone(&self.gate).read_owned().await;
        if *gate {
            return Err(BookmarkError::ShuttingDown);
        }
        let places = Arc::clone(&self.places);
        // The guard lives in the blocking task, so dropping this future does
        // not release the barrier while `op` is still running.
        tokio::task::spawn_blocking(move || {
            let _gate = gate;
            op(&places)
        })
        .await
        .map_err(|e| BookmarkError::TransactionFailure(format!("store task failed: {}", e)))?
    }

    pub async fn insert(&self, info: BookmarkInfo) -> Result<BookmarkItem, BookmarkError> {
        self.run(move |places| places.bookmarks().insert(&info)).await
    }

    pub async fn update(&self, info: BookmarkInfo) -> Result<BookmarkItem, BookmarkError> {
        self.run(move |places| places.bookmarks().update(&info)).await
    }

    pub async fn remove(&self, guids: Vec<String>, options: RemoveOptions) -> Result<(), BookmarkError> {
        self.run(move |places| places.bookmarks().remove(&guids, &options)).await
    }

    pub async fn fetch(&self, query: FetchQuery, options: FetchOptions) -> Result<Vec<BookmarkItem>, BookmarkError> {
        self.run(move |places| places.bookmarks().fetch(&query, &options)).await
    }

    /// Runs once, after in-flight operations finish and before `shutdown`
    /// returns.
    pub fn register_shutdown_hook(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Box::new(hook));
    }

    /// Waits for in-flight operations, closes the store and runs the
    /// shutdown hooks. Later calls are no-ops.
    pub async fn shutdown(&self) {
        let mut gate = self.gate.write().await;
        if *gate {
            return;
        }
        *gate = true;
        self.places.close();
        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(|p| p.into_inner()));
        for hook in hooks {
            hook();
        }
        log::info!("placestore shut down");
    }

    pub async fn is_shut_down(&self) -> bool {
        *self.gate.read().await
    }
}
