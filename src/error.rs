//! Error types for CairnDB
//!
//! This module defines all error types used throughout the database engine.

use thiserror::Error;

use crate::catalog::DataType;

/// The main error type for CairnDB
#[derive(Error, Debug)]
pub enum Error {
    // ========== Catalog Errors ==========
    #[error("Catalog error: table '{0}' not found")]
    TableNotFound(String),

    #[error("Catalog error: table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("Catalog error: column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Catalog error: unknown column type '{0}'")]
    UnknownType(String),

    // ========== Type Errors ==========
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Cast error: cannot convert '{value}' to {to}")]
    CastError { value: String, to: DataType },

    #[error("Constraint error: value '{key}' already exists in primary key of table '{table}'")]
    PrimaryKeyViolation { table: String, key: String },

    // ========== Condition Errors ==========
    #[error("Condition error: unknown operator in '{0}'")]
    UnknownOperator(String),

    #[error("Condition error: {0}")]
    InvalidCondition(String),

    // ========== Lock Errors ==========
    #[error("Lock error: table '{table}' is locked by process with pid={holder}")]
    TableLocked { table: String, holder: u32 },

    #[error("Lock error: table '{table}' is locked by the process with pid={holder}")]
    NotOwner { table: String, holder: u32 },

    // ========== Index Errors ==========
    #[error("Index error: cannot create index, table '{0}' has no primary key")]
    NoPrimaryKey(String),

    #[error("Index error: another index named '{0}' already exists")]
    DuplicateIndex(String),

    #[error("Index error: table '{table}' is already indexed by '{index}'")]
    TableAlreadyIndexed { table: String, index: String },

    #[error("Index error: index '{0}' not found")]
    IndexNotFound(String),

    // ========== Execution Errors ==========
    #[error("Execution error: table '{0}' can not be modified")]
    ProtectedTable(String),

    #[error("Execution error: join mode '{0}' is not implemented")]
    UnimplementedJoinMode(String),

    #[error("Execution error: invalid trigger - {0}")]
    InvalidTrigger(String),

    // ========== Storage Errors ==========
    #[error("Storage error: corrupted unit - {0}")]
    Corrupted(String),

    #[error("Storage error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // ========== Configuration Errors ==========
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for CairnDB operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TableNotFound("users".to_string());
        assert_eq!(err.to_string(), "Catalog error: table 'users' not found");

        let err = Error::TableLocked {
            table: "people".to_string(),
            holder: 42,
        };
        assert_eq!(
            err.to_string(),
            "Lock error: table 'people' is locked by process with pid=42"
        );

        let err = Error::CastError {
            value: "abc".to_string(),
            to: DataType::Int,
        };
        assert_eq!(err.to_string(), "Cast error: cannot convert 'abc' to int");
    }
}
