//! Error types for the catalog

use std::fmt;
use thiserror::Error;

/// Catalog error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed bbox/time/paging or mutually exclusive parameters
    CallerInput,
    /// Backend could not be reached or created
    BackendUnavailable,
    /// Backend rejected or failed to execute a query
    Query,
    /// Record could not be encoded or decoded
    Serialization,
    /// Reserved operation without defined semantics
    NotImplemented,
    /// Configuration errors
    Config,
    /// I/O errors
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CallerInput => "caller_input",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::Query => "query",
            ErrorKind::Serialization => "serialization",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Catalog error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct CatalogError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl CatalogError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn caller_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CallerInput, message)
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Query, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn not_implemented(operation: &str) -> Self {
        Self::new(
            ErrorKind::NotImplemented,
            format!("{} is not implemented by any backend", operation),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn poisoned() -> Self {
        Self::backend_unavailable("Poisoned Lock")
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::new(ErrorKind::Io, format!("I/O error: {}", err)).with_source(err)
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<serde_yaml::Error> for CatalogError {
    fn from(err: serde_yaml::Error) -> Self {
        CatalogError::config(format!("YAML error: {}", err)).with_source(err)
    }
}

// Transport failures mean the engine is unreachable; status failures are
// mapped by the backend itself before they get here.
impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        CatalogError::backend_unavailable(format!("HTTP error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CatalogError>;
