use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Socket fault or a peer that hung up mid-field.
    #[error("Transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// True when the fault came from the connection rather than the disk.
    pub fn is_transport(&self) -> bool {
        matches!(self, CacheError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
