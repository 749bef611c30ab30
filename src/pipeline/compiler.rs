//! Pipeline compiler: maps a [`Specification`] to an [`ExecutablePipeline`].
//!
//! The [`PipelineCompiler`] bridges the declarative specification and the
//! capabilities in a [`Registry`]. Compilation is fail-fast: the first
//! validation error or unresolved name is returned and no pipeline is built.
//!
//! # Order
//!
//! 1. **Validate** — run the [`ValidationEngine`] rules; warnings are logged.
//! 2. **Statistics** — construct every statistics source. The first one is
//!    the primary source, queried for the collection size when an evaluator
//!    needs it.
//! 3. **Query source**, **measurements**, **evaluators** (re-bound with the
//!    collection size where required), **qrels**.
//! 4. **Formatters**, **preprocessors**, **transformations**, **rewrite**.
//! 5. **Learning** — construct the model and wire it by its declared kind.
//!
//! # Usage
//!
//! ```ignore
//! let registry = Registry::with_defaults();
//! let pipeline = PipelineCompiler::new(&registry).compile(&spec)?;
//! ```

use std::cell::Cell;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use super::error_code::ErrorCode;
use super::errors::ConfigError;
use super::spec::{CacheSpec, Specification};
use super::traits::*;
use super::validation::ValidationEngine;
use crate::errors::Result;
use crate::learning::{Generation, ModelKind, DEFAULT_CHAIN_DEPTH};
use crate::registry::{Category, Registry};
use crate::types::{Options, OptionsExt, Qrels};

// ─── Compiled pieces ────────────────────────────────────────────────────────

/// A formatter and the file it writes.
pub struct FormatterBinding<F: ?Sized> {
    pub formatter: Arc<F>,
    pub filename: PathBuf,
}

impl<F: ?Sized> Clone for FormatterBinding<F> {
    fn clone(&self) -> Self {
        Self {
            formatter: Arc::clone(&self.formatter),
            filename: self.filename.clone(),
        }
    }
}

impl<F: ?Sized> fmt::Debug for FormatterBinding<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterBinding")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Everything the aggregator needs to turn events into files.
#[derive(Debug, Clone, Default)]
pub struct OutputPlan {
    /// Measurement column headers, in declared order.
    pub measurement_columns: Vec<String>,
    /// Evaluation column headers, in declared order.
    pub evaluation_columns: Vec<String>,
    pub measurement_formatters: Vec<FormatterBinding<dyn MeasurementFormatter>>,
    pub evaluation_formatters: Vec<FormatterBinding<dyn EvaluationFormatter>>,
    /// Run file, created on the first TREC batch.
    pub trec_output: Option<PathBuf>,
    /// Directory receiving transformed queries.
    pub transformation_output: Option<PathBuf>,
}

/// One entry of `transformations.operations`, in declared order.
#[derive(Clone)]
pub enum QueryTransformation {
    Boolean(Arc<dyn BooleanTransformation>),
    Field(Arc<dyn FieldTransformation>),
}

impl QueryTransformation {
    pub fn name(&self) -> &str {
        match self {
            Self::Boolean(t) => t.name(),
            Self::Field(t) => t.name(),
        }
    }
}

impl fmt::Debug for QueryTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(t) => write!(f, "Boolean({})", t.name()),
            Self::Field(t) => write!(f, "Field({})", t.name()),
        }
    }
}

/// A constructed and wired learning model.
#[derive(Clone)]
pub struct LearningSetup {
    pub kind: ModelKind,
    pub model: Arc<dyn LearningModel>,
    pub train: bool,
    pub test: bool,
    pub generate: bool,
}

impl fmt::Debug for LearningSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearningSetup")
            .field("kind", &self.kind)
            .field("train", &self.train)
            .field("test", &self.test)
            .field("generate", &self.generate)
            .finish()
    }
}

/// A fully resolved pipeline, ready to hand to an [`ExecutionEngine`].
#[derive(Clone)]
pub struct ExecutablePipeline {
    pub query_source: Option<Arc<dyn QuerySource>>,
    pub query_path: String,
    pub search_options: Options,
    /// Primary source first.
    pub statistics: Vec<Arc<dyn StatisticsSource>>,
    /// Set when an evaluator was parameterized with it.
    pub collection_size: Option<f64>,
    pub preprocessors: Vec<Arc<dyn Preprocessor>>,
    pub measurements: Vec<Arc<dyn Measurement>>,
    pub evaluators: Vec<Arc<dyn Evaluator>>,
    pub transformations: Vec<QueryTransformation>,
    pub rewrite: Vec<Arc<dyn RewriteTransformation>>,
    pub qrels: Option<Arc<Qrels>>,
    /// Relevance threshold for the qrels.
    pub relevance_grade: i64,
    pub learning: Option<LearningSetup>,
    pub cache: Vec<CacheSpec>,
    pub output: Arc<OutputPlan>,
}

impl ExecutablePipeline {
    /// The primary statistics source.
    pub fn statistics_source(&self) -> Option<&Arc<dyn StatisticsSource>> {
        self.statistics.first()
    }

    /// The model fed with transformed queries, when one is generating.
    pub fn generation_sink(&self) -> Option<&Arc<dyn LearningModel>> {
        self.learning
            .as_ref()
            .filter(|l| l.generate)
            .map(|l| &l.model)
    }
}

impl fmt::Debug for ExecutablePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |items: Vec<&str>| items.join(",");
        f.debug_struct("ExecutablePipeline")
            .field("query_source", &self.query_source.as_ref().map(|q| q.name().to_string()))
            .field("statistics", &names(self.statistics.iter().map(|s| s.name()).collect()))
            .field("collection_size", &self.collection_size)
            .field("preprocessors", &names(self.preprocessors.iter().map(|p| p.name()).collect()))
            .field("measurements", &names(self.measurements.iter().map(|m| m.name()).collect()))
            .field("evaluators", &names(self.evaluators.iter().map(|e| e.name()).collect()))
            .field("transformations", &self.transformations)
            .field("rewrite", &names(self.rewrite.iter().map(|r| r.name()).collect()))
            .field("qrels", &self.qrels.is_some())
            .field("learning", &self.learning)
            .field("output", &self.output)
            .finish()
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Attach `path` to errors raised without one (registry lookups, factories
/// that do not know where their options came from).
fn located(path: impl Into<String>) -> impl FnOnce(ConfigError) -> ConfigError {
    let path = path.into();
    move |err| {
        if err.path.is_empty() {
            err.at(path)
        } else {
            err
        }
    }
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| PathBuf::from(value))
}

/// The primary source's collection size, queried at most once.
struct CollectionSize<'a> {
    source: Option<&'a Arc<dyn StatisticsSource>>,
    value: Cell<Option<f64>>,
}

impl<'a> CollectionSize<'a> {
    fn new(source: Option<&'a Arc<dyn StatisticsSource>>) -> Self {
        Self {
            source,
            value: Cell::new(None),
        }
    }

    fn get(&self, path: &str, evaluator: &str) -> std::result::Result<f64, ConfigError> {
        if let Some(n) = self.value.get() {
            return Ok(n);
        }
        let source = self.source.ok_or_else(|| {
            ConfigError::new(
                ErrorCode::MissingDependency,
                path,
                format!("\"{evaluator}\" needs the collection size, which requires a statistic source"),
            )
            .with_hint("Add a statistic section")
        })?;
        let n = source.collection_size().map_err(|e| {
            ConfigError::new(
                ErrorCode::StatisticsUnavailable,
                path,
                format!("could not read the collection size from \"{}\": {e}", source.name()),
            )
        })?;
        debug!(statistics = source.name(), collection_size = n, "queried collection size");
        self.value.set(Some(n));
        Ok(n)
    }

    fn queried(&self) -> Option<f64> {
        self.value.get()
    }
}

// ─── PipelineCompiler ───────────────────────────────────────────────────────

/// Compiles specifications against one registry.
pub struct PipelineCompiler<'r> {
    registry: &'r Registry,
    validation: ValidationEngine,
}

impl<'r> PipelineCompiler<'r> {
    /// A compiler using the default validation rules.
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            validation: ValidationEngine::with_defaults(),
        }
    }

    /// Replace the validation engine.
    pub fn with_validation(mut self, validation: ValidationEngine) -> Self {
        self.validation = validation;
        self
    }

    /// Compile `spec`, returning the first error encountered.
    pub fn compile(&self, spec: &Specification) -> Result<ExecutablePipeline> {
        let _span = info_span!("compile").entered();
        let registry = self.registry;

        // 1. Validate.
        let report = self.validation.validate(spec);
        for warning in report.warnings() {
            warn!(code = %warning.code, path = %warning.path, "{}", warning.message);
        }
        if let Some(err) = report.first_error() {
            return Err(err.clone().into());
        }

        // 2. Statistics sources.
        let mut statistics = Vec::new();
        for (index, source) in spec.statistic.sources() {
            let resolved = registry
                .statistics_source(&source.source, &source.options)
                .map_err(located(spec.statistic.pointer(index)))?;
            debug!(name = %source.source, primary = statistics.is_empty(), "resolved statistics source");
            statistics.push(resolved);
        }
        let size = CollectionSize::new(statistics.first());

        // 3. Query source.
        let query_source = if spec.query.format.is_empty() {
            None
        } else {
            let mut options = spec.query.options.clone();
            if !spec.query.path.is_empty() && !options.contains_key("path") {
                options.insert("path".to_string(), spec.query.path.clone().into());
            }
            let source = registry
                .query_source(&spec.query.format, &options)
                .map_err(located("/query/format"))?;
            debug!(format = %spec.query.format, "resolved query source");
            Some(source)
        };

        // 4. Measurements.
        let mut measurements = Vec::with_capacity(spec.measurements.len());
        for (i, name) in spec.measurements.iter().enumerate() {
            let m = registry
                .measurement(name)
                .map_err(located(format!("/measurements/{i}")))?;
            measurements.push(m);
        }

        // 5. Evaluators.
        let mut evaluators = Vec::with_capacity(spec.evaluation.len());
        for (i, name) in spec.evaluation.iter().enumerate() {
            let path = format!("/evaluation/{i}");
            let e = registry.evaluator(name).map_err(located(path.as_str()))?;
            evaluators.push(bind_collection_size(e, &size, &path)?);
        }

        // 6. Qrels.
        let qrels = match non_empty_path(&spec.output.evaluations.qrels) {
            Some(path) => {
                let qrels = Qrels::from_path(&path)?;
                debug!(path = %path.display(), topics = qrels.num_topics(), "loaded qrels");
                Some(Arc::new(qrels))
            }
            None => None,
        };

        // 7. Output formatters.
        let mut measurement_formatters = Vec::with_capacity(spec.output.measurements.len());
        for (i, f) in spec.output.measurements.iter().enumerate() {
            let formatter = registry
                .measurement_formatter(&f.format)
                .map_err(located(format!("/output/measurements/{i}/format")))?;
            measurement_formatters.push(FormatterBinding {
                formatter,
                filename: PathBuf::from(&f.filename),
            });
        }
        let mut evaluation_formatters = Vec::with_capacity(spec.output.evaluations.formats.len());
        for (i, f) in spec.output.evaluations.formats.iter().enumerate() {
            let formatter = registry
                .evaluation_formatter(&f.format)
                .map_err(located(format!("/output/evaluations/formats/{i}/format")))?;
            evaluation_formatters.push(FormatterBinding {
                formatter,
                filename: PathBuf::from(&f.filename),
            });
        }

        // 8. Preprocessors.
        let mut preprocessors = Vec::with_capacity(spec.preprocess.len());
        for (i, name) in spec.preprocess.iter().enumerate() {
            let p = registry
                .preprocessor(name)
                .map_err(located(format!("/preprocess/{i}")))?;
            preprocessors.push(p);
        }

        // 9. Transformations: boolean first, then field.
        let mut transformations = Vec::with_capacity(spec.transformations.operations.len());
        for (i, name) in spec.transformations.operations.iter().enumerate() {
            transformations.push(resolve_transformation(registry, name, i)?);
        }

        // 10. Rewrite transformations.
        let mut rewrite = Vec::with_capacity(spec.rewrite.len());
        for (i, name) in spec.rewrite.iter().enumerate() {
            let r = registry
                .rewrite_transformation(name)
                .map_err(located(format!("/rewrite/{i}")))?;
            rewrite.push(r);
        }

        // 11. Learning model.
        let learning = if spec.learning.model.is_empty() {
            None
        } else {
            let wiring = ChainInputs {
                evaluators: &evaluators,
                measurements: &measurements,
                statistics: statistics.first(),
                rewrite: &rewrite,
                qrels: qrels.as_ref(),
                size: &size,
            };
            Some(self.wire_learning(spec, wiring)?)
        };

        let collection_size = size.queried();
        let output = OutputPlan {
            measurement_columns: measurements.iter().map(|m| m.name().to_string()).collect(),
            evaluation_columns: evaluators.iter().map(|e| e.name().to_string()).collect(),
            measurement_formatters,
            evaluation_formatters,
            trec_output: non_empty_path(&spec.output.trec_results.output),
            transformation_output: non_empty_path(&spec.transformations.output),
        };

        let pipeline = ExecutablePipeline {
            query_source,
            query_path: spec.query.path.clone(),
            search_options: spec.query.search.clone(),
            statistics,
            collection_size,
            preprocessors,
            measurements,
            evaluators,
            transformations,
            rewrite,
            qrels,
            relevance_grade: spec.output.evaluations.grade,
            learning,
            cache: spec.cache.clone(),
            output: Arc::new(output),
        };

        info!(
            measurements = pipeline.measurements.len(),
            evaluators = pipeline.evaluators.len(),
            transformations = pipeline.transformations.len(),
            learning = pipeline.learning.is_some(),
            "compiled pipeline"
        );
        Ok(pipeline)
    }

    fn wire_learning(&self, spec: &Specification, inputs: ChainInputs<'_>) -> Result<LearningSetup> {
        let registry = self.registry;
        let learning = &spec.learning;

        let mut model = registry
            .learning_model(&learning.model, &learning.options)
            .map_err(located("/learning/model"))?;
        let kind = ModelKind::parse(model.kind())?;

        match kind {
            ModelKind::QueryChain => {
                const OPTIONS: &str = "/learning/options";
                let depth = learning
                    .options
                    .usize_opt(OPTIONS, "depth")?
                    .unwrap_or(DEFAULT_CHAIN_DEPTH);
                let candidate_selector = match learning.options.str_opt(OPTIONS, "candidate_selector")? {
                    Some(name) => Some(
                        registry
                            .candidate_selector(name)
                            .map_err(located(format!("{OPTIONS}/candidate_selector")))?,
                    ),
                    None => None,
                };

                let generation = match &learning.generate {
                    Some(generate) => Some(Generation::from_options(generate, |name| {
                        let e = registry.evaluator(name)?;
                        bind_collection_size(e, inputs.size, "/learning/generate/measure")
                    })?),
                    None => None,
                };

                let (explorer, generation_output) = match generation {
                    Some(g) => (Some(g.explorer), Some(g.output)),
                    None => (None, None),
                };

                model.wire_query_chain(QueryChainWiring {
                    evaluators: inputs.evaluators.to_vec(),
                    measurements: inputs.measurements.to_vec(),
                    statistics: inputs.statistics.cloned(),
                    transformations: inputs.rewrite.to_vec(),
                    qrels: inputs.qrels.cloned(),
                    candidate_selector,
                    depth,
                    explorer,
                    generation_output,
                    train: learning.train.is_some(),
                    test: learning.test.is_some(),
                    generate: learning.generate.is_some(),
                    options: learning.options.clone(),
                })?;
                debug!(model = %learning.model, depth, "wired query chain");
            }
        }

        Ok(LearningSetup {
            kind,
            model: Arc::from(model),
            train: learning.train.is_some(),
            test: learning.test.is_some(),
            generate: learning.generate.is_some(),
        })
    }
}

/// Already-resolved collaborators handed to a learning model.
struct ChainInputs<'a> {
    evaluators: &'a [Arc<dyn Evaluator>],
    measurements: &'a [Arc<dyn Measurement>],
    statistics: Option<&'a Arc<dyn StatisticsSource>>,
    rewrite: &'a [Arc<dyn RewriteTransformation>],
    qrels: Option<&'a Arc<Qrels>>,
    size: &'a CollectionSize<'a>,
}

fn bind_collection_size(
    evaluator: Arc<dyn Evaluator>,
    size: &CollectionSize<'_>,
    path: &str,
) -> std::result::Result<Arc<dyn Evaluator>, ConfigError> {
    if !evaluator.needs_collection_size() {
        return Ok(evaluator);
    }
    let n = size.get(path, evaluator.name())?;
    let bound = evaluator.with_collection_size(n).ok_or_else(|| {
        ConfigError::new(
            ErrorCode::InvalidOption,
            path,
            format!(
                "\"{}\" needs the collection size but cannot be bound to it",
                evaluator.name()
            ),
        )
    })?;
    debug!(evaluator = evaluator.name(), collection_size = n, "bound collection size");
    Ok(bound)
}

fn resolve_transformation(
    registry: &Registry,
    name: &str,
    index: usize,
) -> std::result::Result<QueryTransformation, ConfigError> {
    if let Ok(t) = registry.boolean_transformation(name) {
        return Ok(QueryTransformation::Boolean(t));
    }
    if let Ok(t) = registry.field_transformation(name) {
        return Ok(QueryTransformation::Field(t));
    }
    let mut err = ConfigError::unknown_capability(Category::BooleanTransformation, name)
        .at(format!("/transformations/operations/{index}"))
        .with_hint("Register it as a boolean or a field transformation");
    err.message = format!(
        "\"{name}\" is neither a known {} nor a known {}",
        Category::BooleanTransformation.description(),
        Category::FieldTransformation.description()
    );
    Err(err)
}
