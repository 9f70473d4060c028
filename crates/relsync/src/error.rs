//! Error types for the runtime.

/// Errors raised while talking to a database.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The model or a builder rejected the request before any I/O.
    #[error(transparent)]
    Model(#[from] relsync_core::Error),

    /// Database error outside statement execution (connect, acquire).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A statement failed. `sql` is the logged rendering, parameters
    /// included and size-capped.
    #[error("Statement failed: {source}\n{sql}")]
    Statement {
        /// The failing statement as logged.
        sql: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A bounded retry loop stopped making progress, or the database
    /// reports objects in error after synchronization.
    #[error("Cannot converge {object}: {message}")]
    Convergence {
        /// Object that could not be brought up to date.
        object: String,
        /// Last failure.
        message: String,
    },

    /// IO error (reading model files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// The driver error behind a failed statement, if any.
    #[must_use]
    pub const fn database_error(&self) -> Option<&sqlx::Error> {
        match self {
            Self::Database(e) | Self::Statement { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, SyncError>;
