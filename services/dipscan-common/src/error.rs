//! Error types for the dipscan services.

use thiserror::Error;

/// Result type alias using the dipscan error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for settings, input and plumbing failures.
///
/// Quote pipeline failures have their own type in the service crate; this one
/// covers everything around it.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Settings store error
    #[error("Settings store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this error was caused by caller input.
    pub fn is_invalid_input(&self) -> bool {
        match self {
            Self::InvalidInput(_) => true,
            Self::WithContext { source, .. } => source.is_invalid_input(),
            _ => false,
        }
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::WithContext { source, .. } => source.status_code(),
            _ => 500,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
