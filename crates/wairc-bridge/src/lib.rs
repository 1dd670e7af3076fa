//! # wairc-bridge
//!
//! Client for the browser-automation sidecar that drives WhatsApp Web, and
//! rendering of login codes as QR images.

pub mod client;
pub mod qr;
mod types;

pub use client::{HttpConnector, HttpWhatsApp};
pub use qr::generate_qr_image;
