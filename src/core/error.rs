use crate::core::Value;
use crate::sql::StatementKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrmError {
    /// Bad mapping configuration: missing/duplicate key, duplicate
    /// registration, relationship to an unregistered entity, and so on.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A conditional UPDATE or DELETE affected zero rows: another session
    /// changed or removed the row after this session read it.
    #[error(
        "Concurrency conflict: {operation} of '{entity}' with key {key} affected no rows \
         ({applied} statement(s) applied earlier in the batch)"
    )]
    ConcurrencyConflict {
        entity: String,
        key: Value,
        operation: StatementKind,
        /// Number of statements that succeeded before the conflict.
        applied: usize,
    },

    /// The query translator cannot express the given construct.
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    /// Engine-reported FK/unique/NOT NULL violation, with the engine
    /// diagnostic attached.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Transport, resolver, or closed-handle failure.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
}

pub type Result<T> = std::result::Result<T, OrmError>;

impl OrmError {
    /// Whether the error is a stale-write conflict the caller may resolve
    /// by reloading and retrying.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}
