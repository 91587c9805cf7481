//! Custom error types for the router.
//!
//! This module defines the crate-level error type, `RouterError`. Using the
//! `thiserror` crate, it gathers the per-area error enums into one type so
//! callers can use `?` across the whole API.
//!
//! ## Error Hierarchy
//!
//! - **`MalformedDocument`** / **`UnknownDocumentType`**: the only conditions that
//!   abort routing of a single document. Router state is left untouched.
//! - **`DuplicateStart`**: a `start` arrived for a run that is still open.
//! - **`Decode`**: a transport payload could not be parsed as JSON.
//! - **`Dataflow`**: wiring errors from the combinator graph (unknown slots,
//!   backward edges).
//! - **`Correlation`**: a query function failed while looking for auxiliary runs.
//! - **`Config`**: configuration could not be loaded or failed validation.
//! - **`Logging`**: the tracing subscriber could not be installed.
//!
//! Handler and factory failures are deliberately absent: the router recovers
//! from them locally and reports them through `RouteOutcome`.

use crate::config::ConfigError;
use crate::correlation::CorrelationError;
use crate::dataflow::DataflowError;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type RouterResult<T> = std::result::Result<T, RouterError>;

/// Errors returned by the router API.
#[derive(Error, Debug)]
pub enum RouterError {
    /// A document is missing or has an empty identity field
    #[error("Malformed {doc_type} document: {reason}")]
    MalformedDocument {
        /// Wire name of the document
        doc_type: String,
        /// What was wrong
        reason: String,
    },

    /// Wire name is not a known document type
    #[error("Unknown document type '{0}'")]
    UnknownDocumentType(String),

    /// Start for a run that is still open
    #[error("Run '{0}' is already open")]
    DuplicateStart(String),

    /// Transport payload is not valid JSON
    #[error("Failed to decode document payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Combinator wiring error
    #[error("Dataflow error: {0}")]
    Dataflow(#[from] DataflowError),

    /// Correlation query failed
    #[error("Correlation error: {0}")]
    Correlation(#[from] CorrelationError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Subscriber installation failed
    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}
