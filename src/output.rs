//! Built-in output formatters and the dense measurement matrix.
//!
//! - [`MeasurementMatrix`] — topic × measurement scores, densified from a
//!   [`ResultTable`] under a [`MissingValuePolicy`]
//! - [`CsvMeasurementFormatter`] / [`JsonMeasurementFormatter`] — `csv` and
//!   `json` measurement formatters
//! - [`JsonEvaluationFormatter`] — `json` evaluation formatter

use serde_json::{Map, Value};

use crate::errors::{Error, Result};
use crate::pipeline::error_code::ErrorCode;
use crate::pipeline::errors::ExecutionError;
use crate::pipeline::artifacts::ResultTable;
use crate::pipeline::traits::{EvaluationFormatter, MeasurementFormatter};

// ─── Missing values ─────────────────────────────────────────────────────────

/// What to do when a topic's row lacks a declared measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingValuePolicy {
    /// Fill the cell with `0.0`.
    #[default]
    Zero,
    /// Fail finalization with a `missing_value` error naming the topic.
    Error,
}

// ─── Matrix ─────────────────────────────────────────────────────────────────

/// Dense scores: one row per topic (first-seen order), one column per
/// declared measurement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementMatrix {
    pub topics: Vec<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl MeasurementMatrix {
    /// Densify `table` using its declared columns as headers.
    pub fn from_table(table: &ResultTable, policy: MissingValuePolicy) -> Result<Self> {
        let headers = table.columns().to_vec();
        let mut topics = Vec::with_capacity(table.len());
        let mut rows = Vec::with_capacity(table.len());

        for (topic, scores) in table.iter() {
            let mut row = Vec::with_capacity(headers.len());
            for header in &headers {
                let value = match (scores.get(header), policy) {
                    (Some(v), _) => *v,
                    (None, MissingValuePolicy::Zero) => 0.0,
                    (None, MissingValuePolicy::Error) => {
                        return Err(ExecutionError::new(
                            ErrorCode::MissingValue,
                            format!("no value for \"{header}\""),
                        )
                        .for_topic(topic)
                        .into())
                    }
                };
                row.push(value);
            }
            topics.push(topic.to_string());
            rows.push(row);
        }

        Ok(Self {
            topics,
            headers,
            rows,
        })
    }

    /// Iterate `(topic, row)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.topics
            .iter()
            .map(String::as_str)
            .zip(self.rows.iter().map(Vec::as_slice))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ─── CSV ────────────────────────────────────────────────────────────────────

/// Header of measurement names, then one line of scores per topic.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvMeasurementFormatter;

impl MeasurementFormatter for CsvMeasurementFormatter {
    fn name(&self) -> &str {
        "csv"
    }

    fn format(&self, matrix: &MeasurementMatrix) -> Result<String> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&matrix.headers).map_err(csv_error)?;
        for (_, row) in matrix.iter() {
            writer
                .write_record(row.iter().map(|v| v.to_string()))
                .map_err(csv_error)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::serialization(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| Error::serialization(e.to_string()))
    }
}

fn csv_error(err: csv::Error) -> Error {
    Error::serialization(err.to_string())
}

// ─── JSON ───────────────────────────────────────────────────────────────────

/// `{ topic: { measurement: score, ... }, ... }` in matrix order.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMeasurementFormatter;

impl MeasurementFormatter for JsonMeasurementFormatter {
    fn name(&self) -> &str {
        "json"
    }

    fn format(&self, matrix: &MeasurementMatrix) -> Result<String> {
        let mut root = Map::new();
        for (topic, row) in matrix.iter() {
            let scores: Map<String, Value> = matrix
                .headers
                .iter()
                .zip(row)
                .map(|(h, v)| (h.clone(), Value::from(*v)))
                .collect();
            root.insert(topic.to_string(), Value::Object(scores));
        }
        Ok(serde_json::to_string_pretty(&Value::Object(root))?)
    }
}

/// `{ topic: { evaluator: score, ... }, ... }` with declared evaluators
/// first and any other names the row carried after them, sorted.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEvaluationFormatter;

impl EvaluationFormatter for JsonEvaluationFormatter {
    fn name(&self) -> &str {
        "json"
    }

    fn format(&self, table: &ResultTable) -> Result<String> {
        let mut root = Map::new();
        for (topic, scores) in table.iter() {
            let mut row = Map::new();
            for column in table.columns() {
                if let Some(v) = scores.get(column) {
                    row.insert(column.clone(), Value::from(*v));
                }
            }
            let mut extra: Vec<(&String, &f64)> = scores
                .iter()
                .filter(|(name, _)| !row.contains_key(name.as_str()))
                .collect();
            extra.sort_by(|a, b| a.0.cmp(b.0));
            for (name, v) in extra {
                row.insert(name.clone(), Value::from(*v));
            }
            root.insert(topic.to_string(), Value::Object(row));
        }
        Ok(serde_json::to_string_pretty(&Value::Object(root))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::pipeline::artifacts::ScoreMap;

    fn scores(pairs: &[(&str, f64)]) -> ScoreMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn table() -> ResultTable {
        let mut t = ResultTable::new(vec!["precision".into(), "recall".into()]);
        t.insert("T1", scores(&[("precision", 0.5)]));
        t.insert("T2", scores(&[("precision", 0.25), ("recall", 1.0)]));
        t
    }

    #[test]
    fn test_missing_value_defaults_to_zero() {
        let m = MeasurementMatrix::from_table(&table(), MissingValuePolicy::default()).unwrap();
        assert_eq!(m.topics, vec!["T1", "T2"]);
        assert_eq!(m.rows[0], vec![0.5, 0.0]);
        assert_eq!(m.rows[1], vec![0.25, 1.0]);
    }

    #[test]
    fn test_missing_value_error_policy() {
        let err = MeasurementMatrix::from_table(&table(), MissingValuePolicy::Error).unwrap_err();
        match err {
            Error::Execution(e) => {
                assert_eq!(e.code, ErrorCode::MissingValue);
                assert_eq!(e.topic.as_deref(), Some("T1"));
                assert!(e.message.contains("recall"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_csv_format() {
        let m = MeasurementMatrix::from_table(&table(), MissingValuePolicy::Zero).unwrap();
        let csv = CsvMeasurementFormatter.format(&m).unwrap();
        assert_eq!(csv, "precision,recall\n0.5,0\n0.25,1\n");
    }

    #[test]
    fn test_csv_quotes_awkward_headers() {
        let m = MeasurementMatrix {
            topics: vec!["T1".into()],
            headers: vec!["a,b".into(), "say \"x\"".into()],
            rows: vec![vec![1.0, 2.0]],
        };
        let csv = CsvMeasurementFormatter.format(&m).unwrap();
        assert_eq!(csv, "\"a,b\",\"say \"\"x\"\"\"\n1,2\n");
    }

    #[test]
    fn test_json_measurement_format_preserves_order() {
        let m = MeasurementMatrix::from_table(&table(), MissingValuePolicy::Zero).unwrap();
        let text = JsonMeasurementFormatter.format(&m).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        let topics: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(topics, vec!["T1", "T2"]);
        assert_eq!(value["T1"]["recall"], 0.0);
        assert_eq!(value["T2"]["recall"], 1.0);
    }

    #[test]
    fn test_json_evaluation_format_keeps_sparse_rows() {
        let mut t = table();
        t.insert("T3", scores(&[("recall", 0.75), ("f1", 0.1)]));
        let text = JsonEvaluationFormatter.format(&t).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert!(value["T1"].get("recall").is_none());
        let t3: Vec<&String> = value["T3"].as_object().unwrap().keys().collect();
        assert_eq!(t3, vec!["recall", "f1"]);
    }
}
