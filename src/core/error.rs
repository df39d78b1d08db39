/// Error Module
///
/// This module defines the error types for the rowcast library.
/// It provides structured error handling with proper error propagation and
/// user-friendly error messages.
use thiserror::Error;

/// Error type covering every failure mode of the library:
/// - Native driver failures (SQLite, registered custom drivers)
/// - Configuration loading and named-connection resolution
/// - Cell value conversion and row-to-object mapping
/// - Argument validation for windowed reads
#[derive(Error, Debug)]
pub enum RowcastError {
    /// Native SQLite errors from the bundled server-SQL driver
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failures reported by a driver (unsupported command kind, unknown
    /// parameter, closed cursor, connector-specific faults)
    #[error("Driver error: {0}")]
    Driver(String),

    /// Configuration loading and named-connection resolution errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Argument validation errors, rejected before any cursor interaction
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A cell value whose representation cannot be interpreted as the
    /// requested target kind
    #[error("Conversion error: cannot convert {from} value to {target}")]
    Conversion {
        from: &'static str,
        target: &'static str,
    },

    /// A column-to-field conversion failure during row mapping; carries the
    /// column name to aid diagnosis
    #[error("Mapping error: column '{column}' could not be converted: {source}")]
    Mapping {
        column: String,
        source: Box<RowcastError>,
    },

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON export errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Result to use RowcastError as the error type.
///
/// This provides a consistent error type across the entire library
/// instead of using `Result<T, String>` or mixed error types.
pub type Result<T> = std::result::Result<T, RowcastError>;
