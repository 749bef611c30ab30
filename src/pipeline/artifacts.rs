//! Result events and the tables the aggregator builds from them.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::errors::ExecutionError;
use super::traits::NativeQuery;
use crate::types::TrecResult;

/// Per-topic scores keyed by measurement or evaluator name.
pub type ScoreMap = FxHashMap<String, f64>;

// ============================================================================
// ResultEvent
// ============================================================================

/// A transformed query, named by the file it should be written to.
#[derive(Debug, Clone)]
pub struct TransformedQuery {
    pub name: String,
    pub query: Arc<dyn NativeQuery>,
}

impl TransformedQuery {
    pub fn new(name: impl Into<String>, query: Arc<dyn NativeQuery>) -> Self {
        Self {
            name: name.into(),
            query,
        }
    }
}

/// One message emitted by the execution engine.
#[derive(Debug, Clone)]
pub enum ResultEvent {
    Measurement { topic: String, scores: ScoreMap },
    Evaluation { topic: String, scores: ScoreMap },
    Transformation { topic: String, transformation: TransformedQuery },
    TrecResults { topic: String, results: Vec<TrecResult> },
    /// Carries its topic, if any, inside the error.
    Error(ExecutionError),
    Done,
}

impl ResultEvent {
    /// The topic the event belongs to; `None` for `Done` and global errors.
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Measurement { topic, .. }
            | Self::Evaluation { topic, .. }
            | Self::Transformation { topic, .. }
            | Self::TrecResults { topic, .. } => Some(topic),
            Self::Error(e) => e.topic.as_deref(),
            Self::Done => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Measurement { .. } => "measurement",
            Self::Evaluation { .. } => "evaluation",
            Self::Transformation { .. } => "transformation",
            Self::TrecResults { .. } => "trec_results",
            Self::Error(_) => "error",
            Self::Done => "done",
        }
    }

    pub fn measurement<I, K>(topic: impl Into<String>, scores: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self::Measurement {
            topic: topic.into(),
            scores: collect_scores(scores),
        }
    }

    pub fn evaluation<I, K>(topic: impl Into<String>, scores: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self::Evaluation {
            topic: topic.into(),
            scores: collect_scores(scores),
        }
    }
}

fn collect_scores<I, K>(scores: I) -> ScoreMap
where
    I: IntoIterator<Item = (K, f64)>,
    K: Into<String>,
{
    scores.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

// ============================================================================
// ResultTable
// ============================================================================

/// Per-topic rows in first-seen order, with columns in declared order.
///
/// Rows are stored sparsely: a row holds whatever names its event carried.
/// Densifying (and the missing-value policy) happens when the table is
/// turned into a [`MeasurementMatrix`](crate::output::MeasurementMatrix).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    columns: Vec<String>,
    topics: Vec<String>,
    rows: FxHashMap<String, ScoreMap>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            topics: Vec::new(),
            rows: FxHashMap::default(),
        }
    }

    /// Store `scores` as the row of `topic`.
    ///
    /// Returns `true` when an earlier row for the topic was replaced; the
    /// topic keeps its original position.
    pub fn insert(&mut self, topic: &str, scores: ScoreMap) -> bool {
        match self.rows.insert(topic.to_string(), scores) {
            Some(_) => true,
            None => {
                self.topics.push(topic.to_string());
                false
            }
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Topics in first-seen order.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn row(&self, topic: &str) -> Option<&ScoreMap> {
        self.rows.get(topic)
    }

    /// Rows in first-seen topic order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScoreMap)> {
        self.topics
            .iter()
            .filter_map(|t| self.rows.get(t).map(|row| (t.as_str(), row)))
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl fmt::Display for ResultTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} topics x {} columns", self.len(), self.columns.len())
    }
}
