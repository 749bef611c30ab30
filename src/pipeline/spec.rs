//! Pipeline specification types.
//!
//! A [`Specification`] names, by string, the capability to use for every
//! pipeline stage. It holds no behavior: every name is resolved later by the
//! [`PipelineCompiler`](super::compiler::PipelineCompiler).
//!
//! # JSON shape
//!
//! ```json
//! {
//!   "query": { "format": "pubmed", "path": "topics/" },
//!   "statistic": { "source": "elasticsearch", "options": { "index": "med" } },
//!   "measurements": ["sum_idf", "avg_idf"],
//!   "evaluation": ["precision", "recall"],
//!   "output": {
//!     "measurements": [{ "format": "csv", "filename": "qpp.csv" }],
//!     "trec_results": { "output": "run.res" },
//!     "evaluations": {
//!       "qrels": "qrels.txt",
//!       "formats": [{ "format": "json", "filename": "eval.json" }]
//!     }
//!   }
//! }
//! ```
//!
//! Every section is optional. Fields outside the schema are kept in
//! `unknown_fields` and reported as warnings by the validation engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Options;

/// Root configuration of one experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    #[serde(default)]
    pub query: QuerySpec,

    /// One statistics source, or several; the first is the primary source.
    #[serde(default)]
    pub statistic: StatisticSpec,

    #[serde(default)]
    pub preprocess: Vec<String>,

    #[serde(default)]
    pub measurements: Vec<String>,

    /// Evaluation metric names.
    #[serde(default)]
    pub evaluation: Vec<String>,

    #[serde(default)]
    pub transformations: TransformationSpec,

    #[serde(default)]
    pub learning: LearningSpec,

    #[serde(default)]
    pub rewrite: Vec<String>,

    #[serde(default)]
    pub output: OutputSpec,

    #[serde(default)]
    pub cache: Vec<CacheSpec>,

    /// Captures any fields not recognized by the schema.
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, Value>,
}

// ─── Sources ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Query source name; empty means no query source.
    #[serde(default)]
    pub format: String,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub options: Options,

    /// Options forwarded to the search backend at run time.
    #[serde(default, skip_serializing_if = "Options::is_empty")]
    pub search: Options,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticSourceSpec {
    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub options: Options,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, Value>,
}

/// `statistic` accepts a single source object or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatisticSpec {
    One(StatisticSourceSpec),
    Many(Vec<StatisticSourceSpec>),
}

impl Default for StatisticSpec {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl StatisticSpec {
    /// Configured sources with a non-empty name, in declared order, each
    /// paired with its position in the declared list.
    pub fn sources(&self) -> Vec<(usize, &StatisticSourceSpec)> {
        let all: Vec<&StatisticSourceSpec> = match self {
            Self::One(s) => vec![s],
            Self::Many(list) => list.iter().collect(),
        };
        all.into_iter()
            .enumerate()
            .filter(|(_, s)| !s.source.is_empty())
            .collect()
    }

    /// The primary source: the first configured one.
    pub fn primary(&self) -> Option<&StatisticSourceSpec> {
        self.sources().into_iter().next().map(|(_, s)| s)
    }

    pub fn is_configured(&self) -> bool {
        self.primary().is_some()
    }

    /// JSON pointer of the source at `index` in the declared list.
    pub fn pointer(&self, index: usize) -> String {
        match self {
            Self::One(_) => "/statistic/source".to_string(),
            Self::Many(_) => format!("/statistic/{index}/source"),
        }
    }
}

// ─── Transformations / learning ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformationSpec {
    /// Directory receiving one transformed-query file per event.
    #[serde(default)]
    pub output: String,

    #[serde(default)]
    pub operations: Vec<String>,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningSpec {
    /// Learning model name; empty means no model.
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub options: Options,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train: Option<Options>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<Options>,

    /// Generation settings; see [`crate::learning::Explorer`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<Options>,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, Value>,
}

// ─── Output ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(default)]
    pub measurements: Vec<FormatterSpec>,

    #[serde(default)]
    pub trec_results: TrecOutputSpec,

    #[serde(default)]
    pub evaluations: EvaluationOutputSpec,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, Value>,
}

/// One formatter and the file it writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatterSpec {
    pub format: String,
    pub filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrecOutputSpec {
    /// Run-file path; empty disables the run file.
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutputSpec {
    /// Qrels file path; empty means no judgments are loaded.
    #[serde(default)]
    pub qrels: String,

    /// Relevance threshold: a judged document is relevant when its grade
    /// exceeds this value.
    #[serde(default)]
    pub grade: i64,

    #[serde(default)]
    pub formats: Vec<FormatterSpec>,

    #[serde(flatten)]
    pub unknown_fields: HashMap<String, Value>,
}

// ─── Cache ──────────────────────────────────────────────────────────────────

/// A cache layer, carried through to the execution engine unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSpec {
    #[serde(rename = "type")]
    pub cache_type: String,

    #[serde(default)]
    pub options: Options,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_object_is_a_valid_spec() {
        let spec: Specification = serde_json::from_str("{}").unwrap();
        assert_eq!(spec, Specification::default());
        assert!(!spec.statistic.is_configured());
    }

    #[test]
    fn test_full_spec_roundtrip() {
        let value = json!({
            "query": { "format": "pubmed", "path": "topics", "options": { "x": 1 } },
            "statistic": { "source": "es", "options": { "index": "med" } },
            "preprocess": ["lowercase"],
            "measurements": ["sum_idf"],
            "evaluation": ["precision"],
            "transformations": { "output": "out", "operations": ["simplify"] },
            "learning": { "model": "qc", "options": { "depth": "3" }, "generate": { "traversal": "depth_first" } },
            "rewrite": ["clause_removal"],
            "output": {
                "measurements": [{ "format": "csv", "filename": "m.csv" }],
                "trec_results": { "output": "run.res" },
                "evaluations": { "qrels": "q.txt", "grade": 1, "formats": [{ "format": "json", "filename": "e.json" }] }
            },
            "cache": [{ "type": "file", "options": { "path": "cache" } }]
        });
        let spec: Specification = serde_json::from_value(value).unwrap();
        assert_eq!(spec.query.format, "pubmed");
        assert_eq!(spec.statistic.primary().unwrap().source, "es");
        assert_eq!(spec.output.evaluations.grade, 1);
        assert_eq!(spec.cache[0].cache_type, "file");
        assert!(spec.learning.generate.is_some());
        assert!(spec.learning.train.is_none());
        assert!(spec.unknown_fields.is_empty());

        let back: Specification = serde_json::from_value(serde_json::to_value(&spec).unwrap()).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_statistic_list_primary_is_first() {
        let spec: Specification = serde_json::from_value(json!({
            "statistic": [{ "source": "a" }, { "source": "b" }]
        }))
        .unwrap();
        let names: Vec<&str> = spec.statistic.sources().iter().map(|(_, s)| s.source.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(spec.statistic.primary().unwrap().source, "a");
        assert_eq!(spec.statistic.pointer(1), "/statistic/1/source");
    }

    #[test]
    fn test_statistic_sources_keep_declared_positions() {
        let spec: Specification = serde_json::from_value(json!({
            "statistic": [{ "source": "" }, { "source": "a" }, { "source": "b" }]
        }))
        .unwrap();
        let indexed: Vec<(usize, &str)> = spec
            .statistic
            .sources()
            .into_iter()
            .map(|(i, s)| (i, s.source.as_str()))
            .collect();
        assert_eq!(indexed, vec![(1, "a"), (2, "b")]);
        assert_eq!(spec.statistic.primary().unwrap().source, "a");
    }

    #[test]
    fn test_empty_statistic_source_is_unconfigured() {
        let spec: Specification = serde_json::from_value(json!({
            "statistic": { "source": "" }
        }))
        .unwrap();
        assert!(!spec.statistic.is_configured());
    }

    #[test]
    fn test_unknown_fields_are_captured() {
        let spec: Specification = serde_json::from_value(json!({
            "measurements": [],
            "metawrap": "http://localhost:8080",
            "output": { "sideways": true }
        }))
        .unwrap();
        assert!(spec.unknown_fields.contains_key("metawrap"));
        assert!(spec.output.unknown_fields.contains_key("sideways"));
    }
}
