//! Custom error types for woscite.
//!
//! This module defines all error types used throughout the application.
//! All functions return `Result<T, WosError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for woscite operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum WosError {
    /// Browser automation error (Chrome DevTools protocol)
    #[error("Browser error: {0}")]
    Browser(String),

    /// A page element was not found within its wait timeout
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// A page transition did not happen in time
    #[error("Navigation timed out at {0}")]
    Navigation(String),

    /// The server-side export did not produce a download
    #[error("Export failed: {0}")]
    Export(String),

    /// Export payload or page-content parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Tabular read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using `WosError`
pub type Result<T> = std::result::Result<T, WosError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| WosError::Parse(msg.to_string()))
    }
}
