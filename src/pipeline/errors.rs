//! Pipeline error types for compilation and execution failures.
//!
//! Two error types cover the pipeline lifecycle:
//!
//! - [`ConfigError`] — problems found while validating or compiling a
//!   specification (unknown capability names, missing co-required fields,
//!   unrecognized variants, missing option keys).
//! - [`ExecutionError`] — failures reported by the external execution engine,
//!   optionally scoped to a topic.
//!
//! Both carry a stable [`ErrorCode`] for programmatic matching and a
//! human-readable message. Config errors also carry a JSON pointer `path` into
//! the specification and, for resolution failures, the offending
//! [`CapabilityRef`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error_code::ErrorCode;
use crate::registry::Category;

/// A (category, name) pair identifying one registry lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRef {
    pub category: Category,
    pub name: String,
}

impl fmt::Display for CapabilityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.name)
    }
}

// ─── Compile-time errors ────────────────────────────────────────────────────

/// An invalid reference or missing dependency found in a specification.
///
/// # Display format
///
/// ```text
/// [unknown_capability] /measurements/1: "sum_idf" is not a known measurement
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("[{code}] {path}: {message}")]
pub struct ConfigError {
    /// Stable error code for programmatic matching.
    pub code: ErrorCode,

    /// JSON pointer into the specification, e.g. `"/output/measurements"`.
    pub path: String,

    /// Human-readable description of the problem.
    pub message: String,

    /// Optional suggestion for how to fix the problem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    /// The registry lookup that failed, for `unknown_capability` errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<CapabilityRef>,
}

impl ConfigError {
    /// Create a new config error.
    pub fn new(code: ErrorCode, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            path: path.into(),
            message: message.into(),
            hint: None,
            capability: None,
        }
    }

    /// An `unknown_capability` error for a failed registry lookup.
    pub fn unknown_capability(category: Category, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: ErrorCode::UnknownCapability,
            path: String::new(),
            message: format!("\"{name}\" is not a known {}", category.description()),
            hint: None,
            capability: Some(CapabilityRef { category, name }),
        }
    }

    /// A `missing_option` error for a required key of a chosen variant.
    pub fn missing_option(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MissingOption, path, message)
    }

    /// An `unknown_variant` error listing the accepted values.
    pub fn unknown_variant(path: impl Into<String>, value: &str, expected: &[&str]) -> Self {
        Self::new(
            ErrorCode::UnknownVariant,
            path,
            format!("\"{value}\" is not a recognized variant"),
        )
        .with_hint(format!("Expected one of: {}", expected.join(", ")))
    }

    /// Attach a hint suggesting how to fix the problem.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Relocate the error to `path` (used when a registry error is raised
    /// for a specific list entry).
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

// ─── Run-time errors ────────────────────────────────────────────────────────

/// A failure surfaced by the external execution engine.
///
/// # Display format
///
/// ```text
/// [stage_failed] topic 42: statistics backend timed out
/// [stage_failed] (global): index not found
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("[{code}] {}: {message}", topic_label(.topic))]
pub struct ExecutionError {
    /// Stable error code for programmatic matching.
    pub code: ErrorCode,

    /// The topic being processed, absent for global failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Human-readable description of the failure.
    pub message: String,

    /// Optional suggestion for how to fix or work around the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

fn topic_label(topic: &Option<String>) -> String {
    match topic {
        Some(t) => format!("topic {t}"),
        None => "(global)".to_string(),
    }
}

impl ExecutionError {
    /// Create a global (topic-less) execution error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            topic: None,
            message: message.into(),
            hint: None,
        }
    }

    /// Shorthand for a `stage_failed` error, the usual engine failure.
    pub fn stage_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StageFailed, message)
    }

    /// Scope the error to a topic.
    pub fn for_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Attach a hint suggesting how to fix or work around the failure.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
