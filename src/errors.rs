//! Error types for irpipe
//!
//! Every fallible public operation returns [`Result`], whose error type
//! groups the four failure families: configuration, templating, execution
//! and I/O. The pipeline-specific payloads live in
//! [`crate::pipeline::errors`] and [`crate::template`].

use std::path::Path;

use thiserror::Error;

use crate::pipeline::errors::{ConfigError, ExecutionError};
use crate::template::TemplateError;

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for irpipe
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown capability, missing co-required field, bad variant or option.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed directive, missing include, bad positional argument.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Failure reported by the external execution engine.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Reading the specification, a qrels/scores file, or writing an output.
    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl Error {
    /// Create an I/O error annotated with the path involved.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            context: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// The topic an execution error was scoped to, if any.
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Execution(e) => e.topic.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Extension for attaching a path to `std::io::Result`.
pub(crate) trait IoContext<T> {
    fn with_path(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_path(self, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
