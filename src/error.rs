//! Error types for logkv

use std::io;
use thiserror::Error;

/// Result type alias for logkv operations
pub type Result<T> = std::result::Result<T, LogKvError>;

/// Custom error types for logkv
#[derive(Error, Debug)]
pub enum LogKvError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol parse error: {0}")]
    Protocol(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Corrupt record at line {line}")]
    CorruptRecord { line: usize },

    #[error("Connection deadline expired")]
    Timeout,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),
}

impl LogKvError {
    /// True for failures of the backing file rather than of the request.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            LogKvError::Io(_) | LogKvError::InvalidRecord(_) | LogKvError::CorruptRecord { .. }
        )
    }
}
