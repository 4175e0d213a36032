//! placestore: a bookmarks tree store with tags, keywords and sync metadata.
//!
//! This library crate exposes all modules for use by the RPC binary and
//! integration tests.

pub mod app;
pub mod database;
pub mod managers;
pub mod services;
pub mod rpc_handler;
pub mod types;
