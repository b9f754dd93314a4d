//! Value expressions for change-data-capture ingestion.
//!
//! A CDC source may declare computed columns that are not derived from any
//! source field ("no-field" expressions), such as the physical table name or
//! the operation timestamp. Each expression is selected by name and carries a
//! default value supplied by the job definition.

#![warn(missing_docs)]

use thiserror::Error;

pub mod expression;

pub use expression::{DataType, NoFieldExpression, SUPPORTED_EXPRESSIONS};

/// Result type for expression operations.
pub type Result<T> = std::result::Result<T, ExpressionError>;

/// Errors that can occur while building expressions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpressionError {
    /// The expression name is not one of [`SUPPORTED_EXPRESSIONS`].
    #[error("Unsupported expression: {name}. Supported expressions are: {supported}")]
    UnsupportedVariant {
        /// Name as given.
        name: String,
        /// Comma separated list of accepted names.
        supported: String,
    },
}
