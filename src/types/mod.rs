// Placestore shared type definitions
// Each submodule defines types used across the store, its managers and the RPC surface.

pub mod bookmark;
pub mod errors;
pub mod keyword;
pub mod notification;
pub mod settings;
pub mod source;
