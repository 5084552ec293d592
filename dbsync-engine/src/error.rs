use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The table has never been registered or its schema could not be loaded.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Diffing requires at least one primary-key column.
    #[error("table '{0}' declares no primary key")]
    NoPrimaryKey(String),

    /// The stored creation statement is missing or could not be reused.
    #[error("schema unavailable for table '{table}': {reason}")]
    SchemaUnavailable { table: String, reason: String },

    /// Declared but unsupported functionality (BLOB columns).
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// A value could not be bound to its declared column type.
    #[error("failed to bind column '{column}': {reason}")]
    BindFailure { column: String, reason: String },

    /// Commit or rollback of a bulk operation failed.
    #[error("transaction failed: {0}")]
    TransactionFailure(String),

    /// Factory-level: the requested engine backend does not exist.
    #[error("unknown engine type")]
    UnknownEngineType,

    /// The insert would push the table past its configured row ceiling.
    #[error("row ceiling exceeded for table '{table}': {current} present, {incoming} incoming, ceiling {ceiling}")]
    MaxRowsExceeded {
        table: String,
        current: u64,
        incoming: u64,
        ceiling: u64,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
