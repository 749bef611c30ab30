//! Capability contracts for every pipeline stage.
//!
//! The compiler never looks inside a capability: it resolves a name to one of
//! these trait objects, wires the ones that depend on each other, and hands
//! the result to an [`ExecutionEngine`]. Concrete retrieval, statistics,
//! evaluation and learning algorithms live behind these traits and are
//! supplied by whoever populates the [`Registry`](crate::registry::Registry).
//!
//! All contracts are `Send + Sync` so a compiled pipeline can be shared with
//! the engine thread.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::errors::Result;
use crate::learning::Explorer;
use crate::output::MeasurementMatrix;
use crate::pipeline::artifacts::{ResultEvent, ResultTable, TransformedQuery};
use crate::pipeline::compiler::ExecutablePipeline;
use crate::pipeline::errors::ConfigError;
use crate::types::{Options, Qrels, TrecResult};

// ============================================================================
// Sources
// ============================================================================

/// Supplies the topics and their queries.
pub trait QuerySource: Send + Sync {
    fn name(&self) -> &str;
}

/// A relevance-statistics backend (an index, a search service...).
pub trait StatisticsSource: Send + Sync {
    fn name(&self) -> &str;

    /// Number of documents in the whole collection.
    ///
    /// Queried once at compile time for evaluators that need it.
    fn collection_size(&self) -> Result<f64>;
}

// ============================================================================
// Query processing stages
// ============================================================================

/// Normalizes query text before it is parsed.
pub trait Preprocessor: Send + Sync {
    fn name(&self) -> &str;
}

/// Rewrites the boolean structure of a query.
pub trait BooleanTransformation: Send + Sync {
    fn name(&self) -> &str;
}

/// Rewrites the fields a query searches.
pub trait FieldTransformation: Send + Sync {
    fn name(&self) -> &str;
}

/// A candidate rewrite applied while exploring query variations.
pub trait RewriteTransformation: Send + Sync {
    fn name(&self) -> &str;
}

/// Chooses which rewritten candidate a query chain continues from.
pub trait CandidateSelector: Send + Sync {
    fn name(&self) -> &str;
}

// ============================================================================
// Scoring
// ============================================================================

/// A query-performance predictor or other per-topic measurement.
///
/// `name()` is the column header of the measurement table and the key the
/// engine uses in [`ResultEvent::Measurement`] score maps.
pub trait Measurement: Send + Sync {
    fn name(&self) -> &str;

    /// Predict how well `query` will perform, from collection statistics
    /// alone.
    fn measure(&self, query: &str, statistics: &dyn StatisticsSource) -> Result<f64>;
}

/// Scores a topic's retrieved set against the qrels.
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    /// Score `results`, ranked best first, for `topic`.
    fn score(&self, results: &[TrecResult], qrels: &Qrels, topic: &str) -> f64;

    /// Whether this evaluator must be told the collection size before use.
    fn needs_collection_size(&self) -> bool {
        false
    }

    /// A copy of this evaluator parameterized with the collection size.
    ///
    /// Returns `None` when the evaluator takes no such parameter, in which
    /// case the original instance is used unchanged.
    fn with_collection_size(&self, _collection_size: f64) -> Option<Arc<dyn Evaluator>> {
        None
    }
}

// ============================================================================
// Formatters
// ============================================================================

/// Renders the dense measurement matrix to text.
pub trait MeasurementFormatter: Send + Sync {
    fn name(&self) -> &str;
    fn format(&self, matrix: &MeasurementMatrix) -> Result<String>;
}

/// Renders the per-topic evaluation table to text.
pub trait EvaluationFormatter: Send + Sync {
    fn name(&self) -> &str;
    fn format(&self, table: &ResultTable) -> Result<String>;
}

// ============================================================================
// Transformed queries
// ============================================================================

/// A transformed query that can be compiled to its backend's query syntax.
pub trait NativeQuery: fmt::Debug + Send + Sync {
    fn to_native(&self) -> Result<String>;
}

// ============================================================================
// Learning
// ============================================================================

/// Everything a `query_chain` model is wired with at compile time.
#[derive(Clone)]
pub struct QueryChainWiring {
    pub evaluators: Vec<Arc<dyn Evaluator>>,
    pub measurements: Vec<Arc<dyn Measurement>>,
    pub statistics: Option<Arc<dyn StatisticsSource>>,
    pub transformations: Vec<Arc<dyn RewriteTransformation>>,
    pub qrels: Option<Arc<Qrels>>,
    pub candidate_selector: Option<Arc<dyn CandidateSelector>>,
    /// Maximum chain length.
    pub depth: usize,
    /// Present only when a `generate` section is configured.
    pub explorer: Option<Explorer>,
    pub generation_output: Option<PathBuf>,
    pub train: bool,
    pub test: bool,
    pub generate: bool,
    /// The model's free-form options, for keys the model reads itself.
    pub options: Options,
}

impl fmt::Debug for QueryChainWiring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryChainWiring")
            .field("evaluators", &self.evaluators.len())
            .field("measurements", &self.measurements.len())
            .field("statistics", &self.statistics.as_ref().map(|s| s.name().to_string()))
            .field("transformations", &self.transformations.len())
            .field("qrels", &self.qrels.is_some())
            .field("candidate_selector", &self.candidate_selector.as_ref().map(|c| c.name().to_string()))
            .field("depth", &self.depth)
            .field("explorer", &self.explorer)
            .field("generation_output", &self.generation_output)
            .field("train", &self.train)
            .field("test", &self.test)
            .field("generate", &self.generate)
            .finish()
    }
}

/// A learning model, constructed from its options and then wired by kind.
pub trait LearningModel: Send + Sync {
    /// Declared model kind, e.g. `"query_chain"`.
    fn kind(&self) -> &str;

    /// Receive the resolved collaborators of a `query_chain` model.
    fn wire_query_chain(&mut self, wiring: QueryChainWiring) -> std::result::Result<(), ConfigError>;

    /// Take one generated query while the pipeline runs.
    ///
    /// Called from the aggregator thread only.
    fn accumulate(&self, _topic: &str, _query: &TransformedQuery) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Execution
// ============================================================================

/// The external engine that runs a compiled pipeline.
///
/// It is the only producer of result events. Sending [`ResultEvent::Done`]
/// or dropping the sender both end the stream.
pub trait ExecutionEngine: Send {
    fn execute(&mut self, pipeline: &ExecutablePipeline, events: Sender<ResultEvent>) -> Result<()>;
}
