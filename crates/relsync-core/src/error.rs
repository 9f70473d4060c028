//! Error types for model compilation and statement building.

/// Errors raised while compiling a model or building a statement.
///
/// These are programmer errors: they are detected before anything is sent
/// to the database and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The model does not contain the requested table.
    #[error("Table not found by name: {0}")]
    UnknownTable(String),

    /// The table does not contain the requested column.
    #[error("Column '{column}' not found in {table}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A reference column points at a table that is not registered.
    #[error("Reference {table}.{column} points to unknown table {target}")]
    UnresolvedReference {
        /// Table owning the reference.
        table: String,
        /// Reference column.
        column: String,
        /// Target table name.
        target: String,
    },

    /// An operation that needs a single-column primary key met a vector one.
    #[error("Vector primary keys are not supported here: {0}")]
    VectorPrimaryKey(String),

    /// A filter string does not start with a column name.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The operator tail of a filter is malformed.
    #[error("Invalid predicate '{text}': {message}")]
    InvalidPredicate {
        /// The offending text.
        text: String,
        /// What is wrong with it.
        message: String,
    },

    /// A join condition cannot be inferred from references.
    #[error("Cannot join {table}: {message}")]
    JoinResolution {
        /// The table being joined.
        table: String,
        /// What went wrong.
        message: String,
    },

    /// UPDATE requested but the record has nothing besides key columns.
    #[error("Nothing to update in {0}: no non-key columns")]
    EmptyUpdate(String),

    /// A record lacks a value for one of the key columns.
    #[error("Key column {table}.{column} is missing")]
    MissingKey {
        /// Table name.
        table: String,
        /// Key column name.
        column: String,
    },

    /// A record holds NULL where a non-null key value is needed.
    #[error("Key column {table}.{column} is NULL")]
    NullKey {
        /// Table name.
        table: String,
        /// Key column name.
        column: String,
    },

    /// A column is made NOT NULL but has no default to backfill existing rows.
    #[error("When setting NOT NULL, a DEFAULT must be provided: {table}.{column}")]
    NotNullWithoutDefault {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A buffer was configured with an unusable capacity.
    #[error("Invalid buffer capacity: {0}")]
    InvalidCapacity(String),

    /// The dialect cannot express the requested construct.
    #[error("Not supported by {dialect}: {what}")]
    Unsupported {
        /// Dialect name.
        dialect: &'static str,
        /// The construct.
        what: String,
    },

    /// Structural problem in the model definition.
    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

/// Result type for model and builder operations.
pub type Result<T> = std::result::Result<T, Error>;
