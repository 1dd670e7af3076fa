use thiserror::Error;

/// Top-level error type for wairc.
#[derive(Debug, Error)]
pub enum WaircError {
    /// Error on the IRC side (socket write, protocol violation).
    #[error("irc error: {0}")]
    Irc(String),

    /// Error from the WhatsApp automation bridge.
    #[error("bridge error: {0}")]
    Bridge(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Session persistence error.
    #[error("memory error: {0}")]
    Memory(String),

    /// File hosting error.
    #[error("files error: {0}")]
    Files(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
