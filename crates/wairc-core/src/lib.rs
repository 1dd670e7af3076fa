//! # wairc-core
//!
//! Core types, traits, configuration, and error handling for the WhatsApp to
//! IRC bridge.

pub mod config;
pub mod error;
pub mod listen;
pub mod sanitize;
pub mod signal;
pub mod traits;
pub mod whatsapp;

pub use config::shellexpand;
pub use signal::Signal;
