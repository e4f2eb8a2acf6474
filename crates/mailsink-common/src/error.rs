//! Error types for Mailsink

use thiserror::Error;

/// Result type alias for Mailsink operations
pub type Result<T> = std::result::Result<T, MailError>;

/// Main error type for Mailsink
#[derive(Error, Debug)]
pub enum MailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Index store error: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl MailError {
    /// Build an index-store error from anything displayable
    pub fn index(msg: impl std::fmt::Display) -> Self {
        MailError::Index(msg.to_string())
    }

    /// Build a configuration error from anything displayable
    pub fn config(msg: impl std::fmt::Display) -> Self {
        MailError::Config(msg.to_string())
    }

    /// Build a parse error from anything displayable
    pub fn parse(msg: impl std::fmt::Display) -> Self {
        MailError::Parse(msg.to_string())
    }
}
