// Placestore state managers
// Managers handle stateful operations: the bookmarks tree, tags and keywords. They share
// one `StoreContext` and run every mutation through `StoreContext::write`.

pub mod bookmark_manager;
pub mod bookmark_store;
pub mod keyword_manager;
pub mod tagging_manager;

use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::database::{Database, UnitOfWork};
use crate::services::observers::ObserverRegistry;
use crate::types::errors::BookmarkError;
use crate::types::notification::Notification;
use keyword_manager::KeywordCache;

/// Borrowed handles every manager works with.
#[derive(Clone, Copy)]
pub struct StoreContext<'a> {
    pub db: &'a Database,
    pub keywords: &'a KeywordCache,
    pub observers: &'a ObserverRegistry,
    pub closed: &'a AtomicBool,
}

impl<'a> StoreContext<'a> {
    pub(crate) fn ensure_open(&self) -> Result<(), BookmarkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BookmarkError::ShuttingDown);
        }
        Ok(())
    }

    /// Runs one mutation.
    ///
    /// `resolve` sees the locked writer before any transaction is opened and
    /// performs every check that can fail for a foreseeable reason. `apply`
    /// then runs inside a single unit of work and returns the value plus the
    /// notification batch, which is delivered after commit.
    pub fn write<P, T>(
        &self,
        resolve: impl FnOnce(&Connection) -> Result<P, BookmarkError>,
        apply: impl FnOnce(&mut UnitOfWork<'_>, P) -> Result<(T, Vec<Notification>), BookmarkError>,
    ) -> Result<T, BookmarkError> {
        self.ensure_open()?;
        let mut conn = self.db.writer();
        let plan = resolve(&conn)?;

        let mut uow = UnitOfWork::begin(&mut conn)?;
        let (value, notifications) = match apply(&mut uow, plan) {
            Ok(out) => out,
            Err(err) => {
                log::warn!("transaction rolled back: {}", err);
                return Err(err);
            }
        };
        uow.commit(self.keywords)?;

        let delivery = self.observers.begin_delivery();
        drop(conn);
        self.observers.notify(&notifications);
        drop(delivery);
        Ok(value)
    }

    /// Runs a read on the writer, or on the read-only connection when
    /// `concurrent` is set and one exists.
    pub fn read<T>(
        &self,
        concurrent: bool,
        query: impl FnOnce(&Connection) -> Result<T, BookmarkError>,
    ) -> Result<T, BookmarkError> {
        self.ensure_open()?;
        let conn = self.db.reader(concurrent);
        query(&conn)
    }
}
