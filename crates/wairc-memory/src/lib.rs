//! # wairc-memory
//!
//! Per-nickname session persistence (SQLite) and the on-disk file host for
//! downloaded media and login QR codes.

pub mod files;
pub mod store;

pub use files::{media_extension, FileServer};
pub use store::Store;
