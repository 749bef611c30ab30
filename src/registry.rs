//! Capability registry: per-category name → implementation tables.
//!
//! A [`Registry`] is populated once (single writer) and then only read by
//! the compiler. Registering a name that is already bound in the same
//! category replaces the earlier binding.
//!
//! Sources and learning models are registered as factories because they are
//! constructed from the options given in the specification. Every other
//! category holds a ready-made shared instance.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::output::{CsvMeasurementFormatter, JsonEvaluationFormatter, JsonMeasurementFormatter};
use crate::pipeline::errors::ConfigError;
use crate::pipeline::traits::*;
use crate::types::Options;

// ─── Categories ─────────────────────────────────────────────────────────────

/// The twelve capability categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    QuerySource,
    StatisticsSource,
    Preprocessor,
    BooleanTransformation,
    FieldTransformation,
    Measurement,
    MeasurementFormatter,
    Evaluator,
    EvaluationFormatter,
    RewriteTransformation,
    CandidateSelector,
    LearningModel,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::QuerySource,
        Category::StatisticsSource,
        Category::Preprocessor,
        Category::BooleanTransformation,
        Category::FieldTransformation,
        Category::Measurement,
        Category::MeasurementFormatter,
        Category::Evaluator,
        Category::EvaluationFormatter,
        Category::RewriteTransformation,
        Category::CandidateSelector,
        Category::LearningModel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuerySource => "query_source",
            Self::StatisticsSource => "statistics_source",
            Self::Preprocessor => "preprocessor",
            Self::BooleanTransformation => "boolean_transformation",
            Self::FieldTransformation => "field_transformation",
            Self::Measurement => "measurement",
            Self::MeasurementFormatter => "measurement_formatter",
            Self::Evaluator => "evaluator",
            Self::EvaluationFormatter => "evaluation_formatter",
            Self::RewriteTransformation => "rewrite_transformation",
            Self::CandidateSelector => "candidate_selector",
            Self::LearningModel => "learning_model",
        }
    }

    /// Human-readable noun used in error messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::QuerySource => "query source",
            Self::StatisticsSource => "statistics source",
            Self::Preprocessor => "preprocessor",
            Self::BooleanTransformation => "boolean transformation",
            Self::FieldTransformation => "field transformation",
            Self::Measurement => "measurement",
            Self::MeasurementFormatter => "measurement formatter",
            Self::Evaluator => "evaluator",
            Self::EvaluationFormatter => "evaluation formatter",
            Self::RewriteTransformation => "rewrite transformation",
            Self::CandidateSelector => "candidate selector",
            Self::LearningModel => "learning model",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Capabilities ───────────────────────────────────────────────────────────

pub type QuerySourceFactory =
    Arc<dyn Fn(&Options) -> Result<Arc<dyn QuerySource>, ConfigError> + Send + Sync>;
pub type StatisticsSourceFactory =
    Arc<dyn Fn(&Options) -> Result<Arc<dyn StatisticsSource>, ConfigError> + Send + Sync>;
pub type LearningModelFactory =
    Arc<dyn Fn(&Options) -> Result<Box<dyn LearningModel>, ConfigError> + Send + Sync>;

/// One registered implementation, tagged with its category.
#[derive(Clone)]
pub enum Capability {
    QuerySource(QuerySourceFactory),
    StatisticsSource(StatisticsSourceFactory),
    Preprocessor(Arc<dyn Preprocessor>),
    BooleanTransformation(Arc<dyn BooleanTransformation>),
    FieldTransformation(Arc<dyn FieldTransformation>),
    Measurement(Arc<dyn Measurement>),
    MeasurementFormatter(Arc<dyn MeasurementFormatter>),
    Evaluator(Arc<dyn Evaluator>),
    EvaluationFormatter(Arc<dyn EvaluationFormatter>),
    RewriteTransformation(Arc<dyn RewriteTransformation>),
    CandidateSelector(Arc<dyn CandidateSelector>),
    LearningModel(LearningModelFactory),
}

impl Capability {
    pub fn category(&self) -> Category {
        match self {
            Self::QuerySource(_) => Category::QuerySource,
            Self::StatisticsSource(_) => Category::StatisticsSource,
            Self::Preprocessor(_) => Category::Preprocessor,
            Self::BooleanTransformation(_) => Category::BooleanTransformation,
            Self::FieldTransformation(_) => Category::FieldTransformation,
            Self::Measurement(_) => Category::Measurement,
            Self::MeasurementFormatter(_) => Category::MeasurementFormatter,
            Self::Evaluator(_) => Category::Evaluator,
            Self::EvaluationFormatter(_) => Category::EvaluationFormatter,
            Self::RewriteTransformation(_) => Category::RewriteTransformation,
            Self::CandidateSelector(_) => Category::CandidateSelector,
            Self::LearningModel(_) => Category::LearningModel,
        }
    }

    /// Wrap a query-source constructor.
    pub fn query_source<F>(factory: F) -> Self
    where
        F: Fn(&Options) -> Result<Arc<dyn QuerySource>, ConfigError> + Send + Sync + 'static,
    {
        Self::QuerySource(Arc::new(factory))
    }

    /// Wrap a statistics-source constructor.
    pub fn statistics_source<F>(factory: F) -> Self
    where
        F: Fn(&Options) -> Result<Arc<dyn StatisticsSource>, ConfigError> + Send + Sync + 'static,
    {
        Self::StatisticsSource(Arc::new(factory))
    }

    /// Wrap a learning-model constructor.
    pub fn learning_model<F>(factory: F) -> Self
    where
        F: Fn(&Options) -> Result<Box<dyn LearningModel>, ConfigError> + Send + Sync + 'static,
    {
        Self::LearningModel(Arc::new(factory))
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({})", self.category())
    }
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// Name-keyed tables of capabilities, one per [`Category`].
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tables: FxHashMap<Category, FxHashMap<String, Capability>>,
}

/// Generates a typed resolver for a category that stores shared instances.
macro_rules! instance_resolver {
    ($(#[$doc:meta])* $fn_name:ident, $variant:ident, $trait_name:ident) => {
        $(#[$doc])*
        pub fn $fn_name(&self, name: &str) -> Result<Arc<dyn $trait_name>, ConfigError> {
            match self.resolve(Category::$variant, name)? {
                Capability::$variant(inner) => Ok(Arc::clone(inner)),
                _ => Err(ConfigError::unknown_capability(Category::$variant, name)),
            }
        }
    };
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the built-in formatters
    /// (`csv`/`json` measurement formatters, `json` evaluation formatter).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("csv", Capability::MeasurementFormatter(Arc::new(CsvMeasurementFormatter)));
        registry.register("json", Capability::MeasurementFormatter(Arc::new(JsonMeasurementFormatter)));
        registry.register("json", Capability::EvaluationFormatter(Arc::new(JsonEvaluationFormatter)));
        registry
    }

    /// Bind `name` to `capability` in the capability's category.
    ///
    /// Returns the previous binding, if any. Never fails.
    pub fn register(&mut self, name: impl Into<String>, capability: Capability) -> Option<Capability> {
        let name = name.into();
        let category = capability.category();
        debug!(%category, %name, "registering capability");
        self.tables.entry(category).or_default().insert(name, capability)
    }

    /// Look up `name` in `category`.
    pub fn resolve(&self, category: Category, name: &str) -> Result<&Capability, ConfigError> {
        self.tables
            .get(&category)
            .and_then(|table| table.get(name))
            .ok_or_else(|| ConfigError::unknown_capability(category, name))
    }

    // ─── Typed resolvers ────────────────────────────────────────────────

    /// Construct the query source `name` with `options`.
    pub fn query_source(&self, name: &str, options: &Options) -> Result<Arc<dyn QuerySource>, ConfigError> {
        match self.resolve(Category::QuerySource, name)? {
            Capability::QuerySource(factory) => factory(options),
            _ => Err(ConfigError::unknown_capability(Category::QuerySource, name)),
        }
    }

    /// Construct the statistics source `name` with `options`.
    pub fn statistics_source(
        &self,
        name: &str,
        options: &Options,
    ) -> Result<Arc<dyn StatisticsSource>, ConfigError> {
        match self.resolve(Category::StatisticsSource, name)? {
            Capability::StatisticsSource(factory) => factory(options),
            _ => Err(ConfigError::unknown_capability(Category::StatisticsSource, name)),
        }
    }

    /// Construct the learning model `name` with `options`.
    pub fn learning_model(&self, name: &str, options: &Options) -> Result<Box<dyn LearningModel>, ConfigError> {
        match self.resolve(Category::LearningModel, name)? {
            Capability::LearningModel(factory) => factory(options),
            _ => Err(ConfigError::unknown_capability(Category::LearningModel, name)),
        }
    }

    instance_resolver!(preprocessor, Preprocessor, Preprocessor);
    instance_resolver!(boolean_transformation, BooleanTransformation, BooleanTransformation);
    instance_resolver!(field_transformation, FieldTransformation, FieldTransformation);
    instance_resolver!(measurement, Measurement, Measurement);
    instance_resolver!(measurement_formatter, MeasurementFormatter, MeasurementFormatter);
    instance_resolver!(evaluator, Evaluator, Evaluator);
    instance_resolver!(evaluation_formatter, EvaluationFormatter, EvaluationFormatter);
    instance_resolver!(rewrite_transformation, RewriteTransformation, RewriteTransformation);
    instance_resolver!(candidate_selector, CandidateSelector, CandidateSelector);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error_code::ErrorCode;

    struct Named(&'static str);

    impl Measurement for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn measure(&self, _query: &str, statistics: &dyn StatisticsSource) -> crate::errors::Result<f64> {
            statistics.collection_size()
        }
    }

    struct Stats(f64);

    impl StatisticsSource for Stats {
        fn name(&self) -> &str {
            "stats"
        }
        fn collection_size(&self) -> crate::errors::Result<f64> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_unregistered_name_reports_category_and_name() {
        let registry = Registry::new();
        for category in Category::ALL {
            let err = registry.resolve(category, "nope").unwrap_err();
            assert_eq!(err.code, ErrorCode::UnknownCapability);
            let cap = err.capability.unwrap();
            assert_eq!(cap.category, category);
            assert_eq!(cap.name, "nope");
        }
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = Registry::new();
        assert!(registry
            .register("qpp", Capability::Measurement(Arc::new(Named("first"))))
            .is_none());
        let previous = registry.register("qpp", Capability::Measurement(Arc::new(Named("second"))));
        assert!(previous.is_some());

        let m = registry.measurement("qpp").unwrap();
        assert_eq!(m.name(), "second");
    }

    #[test]
    fn test_same_name_in_different_categories_is_independent() {
        let registry = Registry::with_defaults();
        assert!(registry.measurement_formatter("json").is_ok());
        assert!(registry.evaluation_formatter("json").is_ok());
        assert!(registry.evaluation_formatter("csv").is_err());
        assert!(registry.measurement_formatter("csv").is_ok());
    }

    #[test]
    fn test_factory_receives_options() {
        let mut registry = Registry::new();
        registry.register(
            "fixed",
            Capability::statistics_source(|opts: &Options| {
                let size = opts.get("size").and_then(|v| v.as_f64()).unwrap_or(0.0);
                Ok(Arc::new(Stats(size)) as Arc<dyn StatisticsSource>)
            }),
        );

        let mut opts = Options::new();
        opts.insert("size".into(), serde_json::json!(1000.0));
        let source = registry.statistics_source("fixed", &opts).unwrap();
        assert_eq!(source.collection_size().unwrap(), 1000.0);
    }

    #[test]
    fn test_category_display_matches_serde() {
        for category in Category::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{category}\""));
        }
    }
}
