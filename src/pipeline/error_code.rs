//! Stable error codes shared by compile-time and run-time pipeline errors.
//!
//! Codes serialize as `snake_case` strings and never change meaning once
//! published, so callers can match on them instead of parsing messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A name could not be resolved in its registry category.
    UnknownCapability,
    /// One configured field requires another that is absent.
    MissingDependency,
    /// A closed set of variants (model kind, sampler, strategy...) got an unknown value.
    UnknownVariant,
    /// A variant was chosen but one of its required option keys is missing.
    MissingOption,
    /// An option key is present but holds a value of the wrong shape.
    InvalidOption,
    /// The statistics source could not answer a compile-time query.
    StatisticsUnavailable,
    /// A field in the specification is not part of the schema.
    UnknownField,
    /// The external execution engine reported a failure.
    StageFailed,
    /// A topic's row lacks a declared column under a strict missing-value policy.
    MissingValue,
    /// Catch-all for a specification that failed validation.
    ValidationFailed,
}

impl ErrorCode {
    /// The serialized form of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownCapability => "unknown_capability",
            Self::MissingDependency => "missing_dependency",
            Self::UnknownVariant => "unknown_variant",
            Self::MissingOption => "missing_option",
            Self::InvalidOption => "invalid_option",
            Self::StatisticsUnavailable => "statistics_unavailable",
            Self::UnknownField => "unknown_field",
            Self::StageFailed => "stage_failed",
            Self::MissingValue => "missing_value",
            Self::ValidationFailed => "validation_failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde() {
        for code in [
            ErrorCode::UnknownCapability,
            ErrorCode::MissingDependency,
            ErrorCode::UnknownVariant,
            ErrorCode::MissingOption,
            ErrorCode::InvalidOption,
            ErrorCode::StatisticsUnavailable,
            ErrorCode::UnknownField,
            ErrorCode::StageFailed,
            ErrorCode::MissingValue,
            ErrorCode::ValidationFailed,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{code}\""));
        }
    }
}
