//! Core data types shared across the crate.
//!
//! - [`Options`] — the free-form option mapping attached to capabilities
//! - [`OptionsExt`] — typed, path-aware accessors over [`Options`]
//! - [`TrecResult`] — one line of a TREC run file
//! - [`Qrels`] — relevance judgments keyed by topic and document
//! - [`ScoreFile`] — precomputed per-topic scores used by samplers

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Error, IoContext, Result};
use crate::pipeline::error_code::ErrorCode;
use crate::pipeline::errors::ConfigError;

/// Free-form options passed to capability constructors.
pub type Options = serde_json::Map<String, Value>;

// ============================================================================
// Option accessors
// ============================================================================

/// Typed lookups over an [`Options`] map.
///
/// Every accessor takes the JSON pointer of the map itself so that a value of
/// the wrong shape is reported at `"{base}/{key}"`. Numbers may also be given
/// as numeric strings, since learning options are commonly written that way.
pub trait OptionsExt {
    fn str_opt(&self, base: &str, key: &str) -> std::result::Result<Option<&str>, ConfigError>;
    fn usize_opt(&self, base: &str, key: &str) -> std::result::Result<Option<usize>, ConfigError>;
    fn f64_opt(&self, base: &str, key: &str) -> std::result::Result<Option<f64>, ConfigError>;
}

fn invalid(base: &str, key: &str, expected: &str, got: &Value) -> ConfigError {
    ConfigError::new(
        ErrorCode::InvalidOption,
        format!("{base}/{key}"),
        format!("expected {expected} for \"{key}\", got {got}"),
    )
}

/// `f` as an integer, if it is whole, non-negative and exactly representable.
fn exact_u64(f: f64) -> Option<u64> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    (f.fract() == 0.0 && (0.0..=MAX_EXACT).contains(&f)).then_some(f as u64)
}

impl OptionsExt for Options {
    fn str_opt(&self, base: &str, key: &str) -> std::result::Result<Option<&str>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(invalid(base, key, "a string", other)),
        }
    }

    fn usize_opt(&self, base: &str, key: &str) -> std::result::Result<Option<usize>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v @ Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().and_then(exact_u64))
                .and_then(|n| usize::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| invalid(base, key, "a non-negative integer", v)),
            Some(v @ Value::String(s)) => s
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|_| invalid(base, key, "a non-negative integer", v)),
            Some(other) => Err(invalid(base, key, "a non-negative integer", other)),
        }
    }

    fn f64_opt(&self, base: &str, key: &str) -> std::result::Result<Option<f64>, ConfigError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v @ Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| invalid(base, key, "a number", v)),
            Some(v @ Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| invalid(base, key, "a number", v)),
            Some(other) => Err(invalid(base, key, "a number", other)),
        }
    }
}

// ============================================================================
// TrecResult — one run-file line
// ============================================================================

/// A single ranked result, rendered as a whitespace-delimited TREC run line:
///
/// ```text
/// <topic> <iteration> <doc_id> <rank> <score> <run_name>
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrecResult {
    pub topic: String,
    /// Almost always `"Q0"`.
    pub iteration: String,
    pub doc_id: String,
    pub rank: usize,
    pub score: f64,
    pub run_name: String,
}

impl TrecResult {
    pub fn new(
        topic: impl Into<String>,
        doc_id: impl Into<String>,
        rank: usize,
        score: f64,
        run_name: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            iteration: "Q0".to_string(),
            doc_id: doc_id.into(),
            rank,
            score,
            run_name: run_name.into(),
        }
    }
}

impl fmt::Display for TrecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.topic, self.iteration, self.doc_id, self.rank, self.score, self.run_name
        )
    }
}

// ============================================================================
// Qrels — relevance judgments
// ============================================================================

/// Relevance judgments: `topic → doc_id → grade`.
///
/// Parsed from the standard four-column format
/// (`<topic> <iteration> <doc_id> <grade>`). Blank lines are skipped.
#[derive(Debug, Clone, Default)]
pub struct Qrels {
    judgments: FxHashMap<String, FxHashMap<String, i64>>,
}

impl Qrels {
    /// Parse qrels from any buffered reader.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut qrels = Qrels::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::io("qrels", e))?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() != 4 {
                return Err(Error::serialization(format!(
                    "qrels line {}: expected 4 fields, found {}",
                    idx + 1,
                    fields.len()
                )));
            }
            let grade: i64 = fields[3].parse().map_err(|_| {
                Error::serialization(format!(
                    "qrels line {}: invalid grade \"{}\"",
                    idx + 1,
                    fields[3]
                ))
            })?;
            qrels.insert(fields[0], fields[2], grade);
        }
        Ok(qrels)
    }

    /// Read and parse a qrels file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Record a judgment, replacing any earlier grade for the same pair.
    pub fn insert(&mut self, topic: &str, doc_id: &str, grade: i64) {
        self.judgments
            .entry(topic.to_string())
            .or_default()
            .insert(doc_id.to_string(), grade);
    }

    /// Grade of `doc_id` for `topic`, if judged.
    pub fn grade(&self, topic: &str, doc_id: &str) -> Option<i64> {
        self.judgments.get(topic)?.get(doc_id).copied()
    }

    /// Number of judged topics.
    pub fn num_topics(&self) -> usize {
        self.judgments.len()
    }

}

// ============================================================================
// ScoreFile — precomputed scores for sampling
// ============================================================================

/// Precomputed scores, `topic → query id → score`, loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ScoreFile {
    pub scores: FxHashMap<String, FxHashMap<String, f64>>,
}

impl ScoreFile {
    /// Read and parse a JSON score file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        let scores = serde_json::from_reader(BufReader::new(file))?;
        Ok(scores)
    }

    /// Score of `query` within `topic`, if present.
    pub fn get(&self, topic: &str, query: &str) -> Option<f64> {
        self.scores.get(topic)?.get(query).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Options {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    // ─── OptionsExt ─────────────────────────────────────────────────────

    #[test]
    fn test_usize_opt_accepts_numbers_and_strings() {
        let opts = options(json!({ "a": 5, "b": "7", "c": 3.0 }));
        assert_eq!(opts.usize_opt("/o", "a").unwrap(), Some(5));
        assert_eq!(opts.usize_opt("/o", "b").unwrap(), Some(7));
        assert_eq!(opts.usize_opt("/o", "c").unwrap(), Some(3));
        assert_eq!(opts.usize_opt("/o", "missing").unwrap(), None);
    }

    #[test]
    fn test_usize_opt_rejects_negative() {
        let opts = options(json!({ "n": -1 }));
        let err = opts.usize_opt("/learning/generate", "n").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOption);
        assert_eq!(err.path, "/learning/generate/n");
    }

    #[test]
    fn test_usize_opt_rejects_fractional_and_huge_numbers() {
        let opts = options(json!({ "half": 2.5, "neg": -3.0, "huge": 1e300 }));
        for key in ["half", "neg", "huge"] {
            let err = opts.usize_opt("/o", key).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidOption);
            assert_eq!(err.path, format!("/o/{key}"));
        }
    }

    #[test]
    fn test_str_opt_rejects_non_string() {
        let opts = options(json!({ "measure": 3 }));
        let err = opts.str_opt("/g", "measure").unwrap_err();
        assert_eq!(err.path, "/g/measure");
    }

    #[test]
    fn test_f64_opt() {
        let opts = options(json!({ "delta": 0.25, "s": "0.5", "bad": true }));
        assert_eq!(opts.f64_opt("/g", "delta").unwrap(), Some(0.25));
        assert_eq!(opts.f64_opt("/g", "s").unwrap(), Some(0.5));
        assert!(opts.f64_opt("/g", "bad").is_err());
    }

    // ─── TrecResult ─────────────────────────────────────────────────────

    #[test]
    fn test_trec_result_line_format() {
        let r = TrecResult::new("CD001", "12345", 1, 0.75, "bm25");
        assert_eq!(r.to_string(), "CD001 Q0 12345 1 0.75 bm25");
    }

    // ─── Qrels ──────────────────────────────────────────────────────────

    #[test]
    fn test_qrels_parse() {
        let text = "1 0 d1 1\n1 0 d2 0\n\n2 0 d9 2\n";
        let qrels = Qrels::from_reader(text.as_bytes()).unwrap();
        assert_eq!(qrels.num_topics(), 2);
        assert_eq!(qrels.grade("1", "d1"), Some(1));
        assert_eq!(qrels.grade("2", "d9"), Some(2));
        assert_eq!(qrels.grade("2", "d1"), None);
        assert_eq!(qrels.grade("1", "d2"), Some(0));
    }

    #[test]
    fn test_qrels_rejects_short_line() {
        let err = Qrels::from_reader("1 0 d1\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_qrels_rejects_bad_grade() {
        let err = Qrels::from_reader("1 0 d1 x\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("invalid grade"));
    }

    // ─── ScoreFile ──────────────────────────────────────────────────────

    #[test]
    fn test_score_file_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.json");
        std::fs::write(&path, r#"{"1": {"q1": 0.5, "q2": 0.25}}"#).unwrap();
        let scores = ScoreFile::from_path(&path).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores.get("1", "q2"), Some(0.25));
        assert_eq!(scores.get("2", "q1"), None);
    }

    #[test]
    fn test_score_file_missing_is_io_error() {
        let err = ScoreFile::from_path(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
