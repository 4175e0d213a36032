//! Unit of work: one SQLite transaction plus the keyword cache edits made
//! under it.
//!
//! Every helper that touches the tree, the side-tables or the sync metadata
//! takes `&UnitOfWork` (or `&mut` for keyword edits). Dropping a unit of work
//! without calling [`UnitOfWork::commit`] rolls everything back, cache edits
//! included.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::ops::Deref;

use crate::managers::keyword_manager::{KeywordCache, KeywordMap};
use crate::types::errors::BookmarkError;

pub struct UnitOfWork<'c> {
    tx: Transaction<'c>,
    keyword_edits: Option<KeywordMap>,
}

impl<'c> UnitOfWork<'c> {
    /// Opens an immediate transaction so the write lock is taken up front.
    pub fn begin(conn: &'c mut Connection) -> Result<Self, BookmarkError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self {
            tx,
            keyword_edits: None,
        })
    }

    /// Working copy of the keyword map, seeded from the shared cache (loading
    /// it from this transaction if it was invalidated).
    pub fn keywords_mut(&mut self, cache: &KeywordCache) -> Result<&mut KeywordMap, BookmarkError> {
        if self.keyword_edits.is_none() {
            self.keyword_edits = Some(cache.snapshot(&self.tx)?);
        }
        Ok(self.keyword_edits.get_or_insert_with(KeywordMap::new))
    }

    pub fn has_keyword_edits(&self) -> bool {
        self.keyword_edits.is_some()
    }

    /// Commits the transaction, then publishes the keyword working copy.
    pub fn commit(self, cache: &KeywordCache) -> Result<(), BookmarkError> {
        let UnitOfWork { tx, keyword_edits } = self;
        tx.commit()?;
        if let Some(map) = keyword_edits {
            cache.publish(map);
        }
        Ok(())
    }
}

impl Deref for UnitOfWork<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}
