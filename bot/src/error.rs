//! Common error types for the bot.

use thiserror::Error;

/// Common result type for bot operations.
pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Error, Debug)]
pub enum BotError {
    /// Durable storage failure (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Snapshot or bridge I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON document (snapshot file, bridge line)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid value handed in from the outside
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
