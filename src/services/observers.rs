// Placestore Observer fan-out
// Synchronous delivery of notification batches to registered listeners. Each listener
// is isolated: an error or a panic is logged and delivery continues with the next one.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::types::errors::NotificationError;
use crate::types::notification::Notification;

/// A consumer of change notifications.
///
/// Listeners run on the mutating thread, after commit. They may read from the
/// store but must not start a mutation synchronously: delivery holds the
/// ordering lock the next mutation's delivery waits on.
pub trait PlacesObserver: Send + Sync {
    fn name(&self) -> &str {
        "observer"
    }

    fn on_notifications(&self, batch: &[Notification]) -> Result<(), NotificationError>;
}

/// Adapts a closure into an observer.
pub struct CallbackObserver<F> {
    name: String,
    callback: F,
}

impl<F> CallbackObserver<F>
where
    F: Fn(&[Notification]) -> Result<(), NotificationError> + Send + Sync,
{
    pub fn new(name: &str, callback: F) -> Self {
        Self {
            name: name.to_string(),
            callback,
        }
    }
}

impl<F> PlacesObserver for CallbackObserver<F>
where
    F: Fn(&[Notification]) -> Result<(), NotificationError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_notifications(&self, batch: &[Notification]) -> Result<(), NotificationError> {
        (self.callback)(batch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ObserverRegistry {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn PlacesObserver>)>>,
    next_id: AtomicU64,
    delivery: Mutex<()>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn PlacesObserver>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::debug!("registered observer '{}'", observer.name());
        self.listeners
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, observer));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|p| p.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the delivery lock. Acquiring it before releasing the writer
    /// connection keeps delivery in commit order across threads.
    pub fn begin_delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Delivers `batch` to every listener, in registration order. Returns the
    /// failures, which have already been logged.
    pub fn notify(&self, batch: &[Notification]) -> Vec<NotificationError> {
        if batch.is_empty() {
            return Vec::new();
        }
        let listeners: Vec<Arc<dyn PlacesObserver>> = self
            .listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        let mut failures = Vec::new();
        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_notifications(batch)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(payload) => Some(NotificationError::ListenerPanicked {
                    listener: listener.name().to_string(),
                    message: panic_message(payload.as_ref()),
                }),
            };
            if let Some(err) = failure {
                log::error!("notification delivery failed: {}", err);
                failures.push(err);
            }
        }
        failures
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
