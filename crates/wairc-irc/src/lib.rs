//! # wairc-irc
//!
//! The IRC side of the bridge: line parsing and formatting, IRCv3
//! capability negotiation, and the per-client line connection.

pub mod caps;
pub mod connection;
pub mod message;

pub use caps::{Capabilities, Negotiation};
pub use connection::IrcConnection;
pub use message::Message;
