//! Pipeline specification, validation, compilation, and execution.
//!
//! ## Submodules
//!
//! - [`spec`] — Serde model of the declarative specification
//! - [`error_code`] / [`errors`] — Stable codes and structured pipeline errors
//! - [`validation`] — Cross-field rules run before compilation
//! - [`traits`] — Capability contracts and the execution engine seam
//! - [`compiler`] — Specification → [`ExecutablePipeline`]
//! - [`artifacts`] — Result events and per-topic tables
//! - [`aggregator`] — Streaming consumer that writes the outputs
//! - [`runner`] — Engine thread + aggregator orchestration

pub mod aggregator;
pub mod artifacts;
pub mod compiler;
pub mod error_code;
pub mod errors;
pub mod runner;
pub mod spec;
pub mod traits;
pub mod validation;

pub use aggregator::{AggregationSummary, Aggregator, AggregatorOptions, AggregatorState};
pub use artifacts::{ResultEvent, ResultTable, ScoreMap, TransformedQuery};
pub use compiler::{
    ExecutablePipeline, FormatterBinding, LearningSetup, OutputPlan, PipelineCompiler,
    QueryTransformation,
};
pub use runner::{run, spawn_engine, ChannelCapacity, EngineHandle, RunOptions};

// Re-export capability contracts.
pub use traits::{
    BooleanTransformation, CandidateSelector, EvaluationFormatter, Evaluator, ExecutionEngine,
    FieldTransformation, LearningModel, Measurement, MeasurementFormatter, NativeQuery,
    Preprocessor, QueryChainWiring, QuerySource, RewriteTransformation, StatisticsSource,
};
