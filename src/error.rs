//! Error types for query-stream.

use thiserror::Error;

/// Error type for query-stream operations.
///
/// Variants fall on either side of the response commit point. `InvalidBody`,
/// `Connection` and `Query` happen before any response byte is written and
/// map to an HTTP status. `Database`, `Decode`, `Encode` and `Io` can happen
/// after the headers went out and are only ever logged.
#[derive(Error, Debug)]
pub enum Error {
    /// Request body is not a valid query request.
    #[error("Invalid request body: {0}")]
    InvalidBody(serde_json::Error),

    /// No pooled connection could be acquired.
    #[error("Database connection failed: {0}")]
    Connection(sqlx::Error),

    /// The database rejected the query before any row was produced.
    #[error("Query error: {0}")]
    Query(sqlx::Error),

    /// Fetching the next row failed.
    #[error("Row fetch failed: {0}")]
    Database(sqlx::Error),

    /// A column value could not be decoded.
    #[error("Failed to decode column '{column}': {source}")]
    Decode {
        /// Name of the column being decoded.
        column: String,
        /// Underlying driver error.
        source: sqlx::Error,
    },

    /// Failed to serialize a record to JSON.
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// I/O error in the compression writer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for query-stream operations.
pub type Result<T> = std::result::Result<T, Error>;
