//! Structural checks run before a specification is compiled.
//!
//! Each [`ValidationRule`] looks at one cross-section constraint of a
//! [`Specification`]: a measurement list needs a statistic source and a
//! measurement formatter, evaluators and evaluation formats come together,
//! learning sections need a model. None of them touch the registry; unknown
//! names are reported later by the compiler.
//!
//! [`PipelineCompiler`](super::compiler::PipelineCompiler) logs every
//! warning and refuses the specification on the first error.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use super::error_code::ErrorCode;
use super::errors::ConfigError;
use super::spec::*;

// ─── Diagnostics ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The specification cannot be compiled.
    Error,
    /// Compiled anyway; the compiler logs it.
    Warning,
}

/// One finding, serialized as the [`ConfigError`] fields plus `severity`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationDiagnostic {
    pub severity: Severity,
    #[serde(flatten)]
    pub error: ConfigError,
}

impl ValidationDiagnostic {
    pub fn error(err: ConfigError) -> Self {
        Self {
            severity: Severity::Error,
            error: err,
        }
    }

    pub fn warning(err: ConfigError) -> Self {
        Self {
            severity: Severity::Warning,
            error: err,
        }
    }
}

/// Findings for one specification, in rule order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub diagnostics: Vec<ValidationDiagnostic>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ConfigError> {
        self.by_severity(Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ConfigError> {
        self.by_severity(Severity::Warning)
    }

    /// Compilable: warnings only, or nothing at all.
    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    /// The error the compiler reports.
    pub fn first_error(&self) -> Option<&ConfigError> {
        self.errors().next()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    fn by_severity(&self, severity: Severity) -> impl Iterator<Item = &ConfigError> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
            .map(|d| &d.error)
    }
}

// ─── Rules ──────────────────────────────────────────────────────────────────

pub trait ValidationRule: Send + Sync {
    /// Identifier used in trace output, e.g. `"measurement_output"`.
    fn name(&self) -> &str;

    fn validate(&self, spec: &Specification) -> Vec<ValidationDiagnostic>;
}

/// The ordered rule set applied by the compiler.
pub struct ValidationEngine {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Pairing rules first, unknown-field warnings last.
    pub fn with_defaults() -> Self {
        let mut engine = Self::new();
        engine.add_rule(Box::new(StatisticsForMeasurementsRule));
        engine.add_rule(Box::new(MeasurementOutputRule));
        engine.add_rule(Box::new(EvaluationOutputRule));
        engine.add_rule(Box::new(LearningModelRule));
        engine.add_rule(Box::new(UnknownFieldsRule));
        engine
    }

    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    pub fn validate(&self, spec: &Specification) -> ValidationReport {
        let mut report = ValidationReport::default();
        for rule in &self.rules {
            let found = rule.validate(spec);
            if !found.is_empty() {
                trace!(rule = rule.name(), count = found.len(), "rule reported");
            }
            report.diagnostics.extend(found);
        }
        report
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Concrete rules
// ═══════════════════════════════════════════════════════════════════════════

// ─── 1. measurements require a statistics source ────────────────────────────

struct StatisticsForMeasurementsRule;

impl ValidationRule for StatisticsForMeasurementsRule {
    fn name(&self) -> &str {
        "statistics_for_measurements"
    }

    fn validate(&self, spec: &Specification) -> Vec<ValidationDiagnostic> {
        if !spec.measurements.is_empty() && !spec.statistic.is_configured() {
            vec![ValidationDiagnostic::error(
                ConfigError::new(
                    ErrorCode::MissingDependency,
                    "/statistic/source",
                    "a statistic source is required for measurements",
                )
                .with_hint("Add a statistic section: {\"source\": \"<name>\"}"),
            )]
        } else {
            vec![]
        }
    }
}

// ─── 2. measurements ⇔ measurement output formatters ───────────────────────

struct MeasurementOutputRule;

impl ValidationRule for MeasurementOutputRule {
    fn name(&self) -> &str {
        "measurement_output"
    }

    fn validate(&self, spec: &Specification) -> Vec<ValidationDiagnostic> {
        match (spec.measurements.is_empty(), spec.output.measurements.is_empty()) {
            (false, true) => vec![ValidationDiagnostic::error(
                ConfigError::new(
                    ErrorCode::MissingDependency,
                    "/output/measurements",
                    "at least one output format must be supplied when using measurements",
                )
                .with_hint("Add {\"format\": \"csv\", \"filename\": \"...\"} to output.measurements"),
            )],
            (true, false) => vec![ValidationDiagnostic::error(ConfigError::new(
                ErrorCode::MissingDependency,
                "/measurements",
                "at least one measurement must be supplied for the output formats",
            ))],
            _ => vec![],
        }
    }
}

// ─── 3. evaluators ⇔ evaluation output formatters ──────────────────────────

struct EvaluationOutputRule;

impl ValidationRule for EvaluationOutputRule {
    fn name(&self) -> &str {
        "evaluation_output"
    }

    fn validate(&self, spec: &Specification) -> Vec<ValidationDiagnostic> {
        match (
            spec.evaluation.is_empty(),
            spec.output.evaluations.formats.is_empty(),
        ) {
            (false, true) => vec![ValidationDiagnostic::error(
                ConfigError::new(
                    ErrorCode::MissingDependency,
                    "/output/evaluations/formats",
                    "at least one output format must be supplied when using evaluation measures",
                )
                .with_hint("Add {\"format\": \"json\", \"filename\": \"...\"} to output.evaluations.formats"),
            )],
            (true, false) => vec![ValidationDiagnostic::error(ConfigError::new(
                ErrorCode::MissingDependency,
                "/evaluation",
                "at least one evaluation measure must be supplied for the output formats",
            ))],
            _ => vec![],
        }
    }
}

// ─── 4. learning sections need a model ──────────────────────────────────────

struct LearningModelRule;

impl ValidationRule for LearningModelRule {
    fn name(&self) -> &str {
        "learning_model"
    }

    fn validate(&self, spec: &Specification) -> Vec<ValidationDiagnostic> {
        let learning = &spec.learning;
        if !learning.model.is_empty() {
            return vec![];
        }

        [
            ("train", learning.train.is_some()),
            ("test", learning.test.is_some()),
            ("generate", learning.generate.is_some()),
        ]
        .into_iter()
        .filter(|(_, present)| *present)
        .map(|(section, _)| {
            ValidationDiagnostic::error(ConfigError::new(
                ErrorCode::MissingDependency,
                "/learning/model",
                format!("learning.{section} requires a learning model"),
            ))
        })
        .collect()
    }
}

// ─── 5. unknown fields are warnings ─────────────────────────────────────────

struct UnknownFieldsRule;

impl UnknownFieldsRule {
    fn check_unknowns(path: &str, unknowns: &HashMap<String, Value>) -> Vec<ValidationDiagnostic> {
        let mut keys: Vec<&String> = unknowns.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| {
                ValidationDiagnostic::warning(
                    ConfigError::new(
                        ErrorCode::UnknownField,
                        format!("{path}/{key}"),
                        format!("unrecognized field \"{key}\""),
                    )
                    .with_hint("Check spelling or remove this field"),
                )
            })
            .collect()
    }
}

impl ValidationRule for UnknownFieldsRule {
    fn name(&self) -> &str {
        "unknown_fields"
    }

    fn validate(&self, spec: &Specification) -> Vec<ValidationDiagnostic> {
        let mut out = Vec::new();
        out.extend(Self::check_unknowns("", &spec.unknown_fields));
        out.extend(Self::check_unknowns("/query", &spec.query.unknown_fields));
        match &spec.statistic {
            StatisticSpec::One(s) => {
                out.extend(Self::check_unknowns("/statistic", &s.unknown_fields));
            }
            StatisticSpec::Many(list) => {
                for (i, s) in list.iter().enumerate() {
                    out.extend(Self::check_unknowns(&format!("/statistic/{i}"), &s.unknown_fields));
                }
            }
        }
        out.extend(Self::check_unknowns(
            "/transformations",
            &spec.transformations.unknown_fields,
        ));
        out.extend(Self::check_unknowns("/learning", &spec.learning.unknown_fields));
        out.extend(Self::check_unknowns("/output", &spec.output.unknown_fields));
        out.extend(Self::check_unknowns(
            "/output/evaluations",
            &spec.output.evaluations.unknown_fields,
        ));
        out
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(json: &str) -> Specification {
        serde_json::from_str(json).unwrap()
    }

    fn engine() -> ValidationEngine {
        ValidationEngine::with_defaults()
    }

    // ─── Valid specs ────────────────────────────────────────────────────

    #[test]
    fn test_empty_spec_is_valid() {
        let report = engine().validate(&spec("{}"));
        assert!(report.is_valid());
        assert!(report.is_empty());
    }

    #[test]
    fn test_complete_measurement_spec_is_valid() {
        let report = engine().validate(&spec(
            r#"{
                "statistic": { "source": "es" },
                "measurements": ["sum_idf"],
                "output": { "measurements": [{ "format": "csv", "filename": "m.csv" }] }
            }"#,
        ));
        assert!(report.is_valid());
    }

    // ─── Rule: statistics_for_measurements ──────────────────────────────

    #[test]
    fn test_measurements_without_statistic_fail() {
        let report = engine().validate(&spec(
            r#"{
                "measurements": ["sum_idf"],
                "output": { "measurements": [{ "format": "csv", "filename": "m.csv" }] }
            }"#,
        ));
        let errs: Vec<_> = report.errors().collect();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].code, ErrorCode::MissingDependency);
        assert_eq!(errs[0].path, "/statistic/source");
    }

    // ─── Rule: measurement_output ───────────────────────────────────────

    #[test]
    fn test_measurements_without_formatter_fail() {
        let report = engine().validate(&spec(
            r#"{ "statistic": { "source": "es" }, "measurements": ["sum_idf"] }"#,
        ));
        let errs: Vec<_> = report.errors().collect();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "/output/measurements");
    }

    #[test]
    fn test_formatter_without_measurements_fails() {
        let report = engine().validate(&spec(
            r#"{ "output": { "measurements": [{ "format": "csv", "filename": "m.csv" }] } }"#,
        ));
        let errs: Vec<_> = report.errors().collect();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "/measurements");
    }

    // ─── Rule: evaluation_output ────────────────────────────────────────

    #[test]
    fn test_evaluation_and_formats_are_co_required() {
        let report = engine().validate(&spec(r#"{ "evaluation": ["precision"] }"#));
        assert_eq!(report.first_error().unwrap().path, "/output/evaluations/formats");

        let report = engine().validate(&spec(
            r#"{ "output": { "evaluations": { "formats": [{ "format": "json", "filename": "e.json" }] } } }"#,
        ));
        assert_eq!(report.first_error().unwrap().path, "/evaluation");
    }

    // ─── Rule: learning_model ───────────────────────────────────────────

    #[test]
    fn test_generate_without_model_fails() {
        let report = engine().validate(&spec(r#"{ "learning": { "generate": {} } }"#));
        let errs: Vec<_> = report.errors().collect();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, "/learning/model");
    }

    // ─── Rule: unknown_fields ───────────────────────────────────────────

    #[test]
    fn test_unknown_fields_are_warnings() {
        let report = engine().validate(&spec(
            r#"{ "bogus": 1, "statistic": [{ "source": "es", "extra": true }] }"#,
        ));
        assert!(report.is_valid());
        let paths: Vec<&str> = report.warnings().map(|w| w.path.as_str()).collect();
        assert_eq!(paths, vec!["/bogus", "/statistic/0/extra"]);
        assert!(report.warnings().all(|w| w.code == ErrorCode::UnknownField));
    }

    #[test]
    fn test_formulation_section_is_unknown() {
        let report = engine().validate(&spec(
            r#"{ "formulation": { "method": "conceptual", "options": {} } }"#,
        ));
        assert!(report.is_valid());
        let paths: Vec<&str> = report.warnings().map(|w| w.path.as_str()).collect();
        assert_eq!(paths, vec!["/formulation"]);
    }

    #[test]
    fn test_report_serializes_flat() {
        let report = engine().validate(&spec(r#"{ "bogus": 1 }"#));
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["diagnostics"][0]["severity"], "warning");
        assert_eq!(value["diagnostics"][0]["code"], "unknown_field");
    }
}
