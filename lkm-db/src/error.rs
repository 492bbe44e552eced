//! Database error types.

/// Cache database operation errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// SQL error from sqlx
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON column could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config directory not found
    #[error("Config/data directory not found")]
    NoConfigDir,

    /// A stored row could not be mapped back to a domain value
    #[error("Corrupt cache row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    /// Neither a URL nor a content hash was given
    #[error("Invalidation needs a URL or a content hash")]
    NothingToInvalidate,
}

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;
