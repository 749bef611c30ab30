//! # irpipe
//!
//! Declarative information-retrieval evaluation pipelines.
//!
//! A user-authored JSON specification, optionally expanded from a macro
//! template, names the capabilities a run needs: query sources, statistics
//! backends, query-performance measurements, evaluators, query
//! transformations and learning models. This crate
//!
//! - expands templates ([`template`]),
//! - resolves every name against a [`Registry`] of pluggable capabilities,
//! - checks cross-field rules and compiles an [`ExecutablePipeline`],
//! - drains the execution engine's result stream and writes the measurement,
//!   evaluation, transformed-query and TREC run files.
//!
//! The retrieval, statistics and learning algorithms themselves are external;
//! they plug in through the traits in [`pipeline::traits`].
//!
//! ## Example
//!
//! ```ignore
//! use irpipe::{template, PipelineCompiler, Registry, RunOptions};
//!
//! let registry = Registry::with_defaults(); // plus your capabilities
//! let spec = template::load_specification(std::io::stdin(), &args)?;
//! let pipeline = PipelineCompiler::new(&registry).compile(&spec)?;
//! let summary = pipeline.execute(my_engine, RunOptions::default())?;
//! ```

pub mod errors;
pub mod learning;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod template;
pub mod types;

// Re-export commonly used types
pub use errors::{Error, Result};
pub use learning::{Explorer, Generation, ModelKind};
pub use output::{MeasurementMatrix, MissingValuePolicy};
pub use pipeline::error_code::ErrorCode;
pub use pipeline::errors::{ConfigError, ExecutionError};
pub use pipeline::spec::Specification;
pub use pipeline::validation::{ValidationEngine, ValidationReport};
pub use pipeline::{
    AggregationSummary, Aggregator, AggregatorOptions, ChannelCapacity, ExecutablePipeline,
    ExecutionEngine, PipelineCompiler, ResultEvent, RunOptions,
};
pub use registry::{Capability, Category, Registry};
pub use template::TemplateError;
pub use types::{Options, Qrels, TrecResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
