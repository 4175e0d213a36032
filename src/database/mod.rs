//! Placestore database layer.
//!
//! Provides SQLite connection management, schema migrations and the unit of
//! work every mutation runs in.
//!
//! # Usage
//!
//! ```no_run
//! use placestore::database::Database;
//!
//! // Open a persistent database
//! let db = Database::open("places.sqlite").expect("failed to open database");
//!
//! // Or use an in-memory database for testing
//! let db = Database::open_in_memory().expect("failed to open in-memory database");
//!
//! // Lock the writer for queries
//! let conn = db.writer();
//! ```

pub mod connection;
pub mod migrations;
pub mod transaction;

pub use connection::Database;
pub use transaction::UnitOfWork;
