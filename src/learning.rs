//! Learning-model configuration: model kinds and generation explorers.
//!
//! A learning model declares its kind, and the compiler wires it according to
//! that kind. A `query_chain` model may also generate training data, in which
//! case `learning.generate` selects an [`Explorer`]: a traversal strategy
//! paired with a sampler that only makes sense for that traversal.
//!
//! | traversal       | samplers                                                   |
//! |-----------------|------------------------------------------------------------|
//! | `depth_first`   | `evaluation`, `transformation`, `random`                   |
//! | `breadth_first` | `greedy`, `evaluation`, `transformation`, `random`, `cluster` |
//!
//! Every option problem is reported at `/learning/generate/<key>`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::errors::Result;
use crate::pipeline::errors::ConfigError;
use crate::pipeline::traits::Evaluator;
use crate::types::{Options, OptionsExt, ScoreFile};

const GENERATE: &str = "/learning/generate";

/// Probability used by the depth-first random sampler.
pub const RANDOM_SAMPLING_PROBABILITY: f64 = 0.65;

/// Relevance/diversity trade-off of the diversified strategies.
pub const DIVERSIFICATION_LAMBDA: f64 = 0.3;

/// Breadth-first exploration stops at this chain depth unless `depth` is set.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Query-chain length when `learning.options.depth` is absent.
pub const DEFAULT_CHAIN_DEPTH: usize = 5;

// ─── Model kind ─────────────────────────────────────────────────────────────

/// The kinds of learning model the compiler knows how to wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    QueryChain,
}

impl ModelKind {
    pub const NAMES: &'static [&'static str] = &["query_chain"];

    pub fn parse(kind: &str) -> std::result::Result<Self, ConfigError> {
        match kind {
            "query_chain" => Ok(Self::QueryChain),
            other => Err(ConfigError::unknown_variant("/learning/model", other, Self::NAMES)),
        }
    }
}

// ─── Strategies ─────────────────────────────────────────────────────────────

/// Bias of the depth-first evaluation sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationBias {
    Positive,
    Negative,
    Balanced,
}

/// Strategy of the depth-first transformation sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationBias {
    Balanced,
    Biased,
}

/// Strategy of the breadth-first greedy sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GreedyStrategy {
    /// Keep the top-ranked candidates.
    Naive,
    /// Maximal marginal relevance with the given λ.
    Diversified { lambda: f64 },
}

/// Strategy of the breadth-first evaluation sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoredStrategy {
    PositiveBiased,
    NegativeBiased,
    Balanced,
    Stratified,
    Diversified { lambda: f64 },
}

/// Strategy of the breadth-first transformation sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationStrategy {
    Stratified,
    Balanced,
}

/// The evaluator a sampler ranks candidates with, and the precomputed scores
/// it compares against.
#[derive(Clone)]
pub struct Scoring {
    pub measure: Arc<dyn Evaluator>,
    pub scores: Arc<ScoreFile>,
}

impl fmt::Debug for Scoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoring")
            .field("measure", &self.measure.name())
            .field("topics", &self.scores.len())
            .finish()
    }
}

// ─── Samplers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum DepthFirstSampler {
    Evaluation { bias: EvaluationBias, scoring: Scoring },
    Transformation(TransformationBias),
    Random { probability: f64 },
}

#[derive(Debug, Clone)]
pub enum BreadthFirstSampler {
    Greedy { strategy: GreedyStrategy, scoring: Scoring },
    Evaluation { strategy: ScoredStrategy, scoring: Scoring },
    Transformation(TransformationStrategy),
    Random,
    Cluster { k: usize },
}

// ─── Explorer ───────────────────────────────────────────────────────────────

/// How a query chain explores candidate rewrites when generating data.
#[derive(Debug, Clone)]
pub enum Explorer {
    DepthFirst {
        budget: usize,
        sampler: DepthFirstSampler,
    },
    BreadthFirst {
        /// Candidates kept per level.
        n: usize,
        /// Score tolerance between levels.
        delta: f64,
        max_depth: usize,
        sampler: BreadthFirstSampler,
    },
}

impl Explorer {
    pub fn traversal_name(&self) -> &'static str {
        match self {
            Self::DepthFirst { .. } => "depth_first",
            Self::BreadthFirst { .. } => "breadth_first",
        }
    }

    pub fn sampler_name(&self) -> &'static str {
        match self {
            Self::DepthFirst { sampler, .. } => match sampler {
                DepthFirstSampler::Evaluation { .. } => "evaluation",
                DepthFirstSampler::Transformation(_) => "transformation",
                DepthFirstSampler::Random { .. } => "random",
            },
            Self::BreadthFirst { sampler, .. } => match sampler {
                BreadthFirstSampler::Greedy { .. } => "greedy",
                BreadthFirstSampler::Evaluation { .. } => "evaluation",
                BreadthFirstSampler::Transformation(_) => "transformation",
                BreadthFirstSampler::Random => "random",
                BreadthFirstSampler::Cluster { .. } => "cluster",
            },
        }
    }
}

/// A parsed `learning.generate` section.
#[derive(Debug, Clone)]
pub struct Generation {
    /// File the generated training data is written to.
    pub output: PathBuf,
    pub explorer: Explorer,
}

impl Generation {
    /// Parse `learning.generate`.
    ///
    /// `resolve_measure` turns a `measure` name into an evaluator; it is only
    /// called for samplers that score candidates.
    pub fn from_options<F>(generate: &Options, resolve_measure: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<Arc<dyn Evaluator>, ConfigError>,
    {
        let output = required_str(generate, "output")?;
        let traversal = required_str(generate, "traversal")?;
        let sampler = required_str(generate, "sampler")?;
        let parser = GenerateOptions {
            options: generate,
            resolve_measure: &resolve_measure,
        };

        let explorer = match traversal {
            "depth_first" => parser.depth_first(sampler)?,
            "breadth_first" => parser.breadth_first(sampler)?,
            other => {
                return Err(ConfigError::unknown_variant(
                    format!("{GENERATE}/traversal"),
                    other,
                    &["depth_first", "breadth_first"],
                )
                .into())
            }
        };

        debug!(
            traversal = explorer.traversal_name(),
            sampler = explorer.sampler_name(),
            "configured generation explorer"
        );
        Ok(Self {
            output: PathBuf::from(output),
            explorer,
        })
    }
}

fn required_str<'o>(options: &'o Options, key: &str) -> std::result::Result<&'o str, ConfigError> {
    options
        .str_opt(GENERATE, key)?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing(key))
}

fn missing(key: &str) -> ConfigError {
    ConfigError::missing_option(
        format!("{GENERATE}/{key}"),
        format!("\"{key}\" is required for this generation setup"),
    )
}

struct GenerateOptions<'a> {
    options: &'a Options,
    resolve_measure: &'a dyn Fn(&str) -> std::result::Result<Arc<dyn Evaluator>, ConfigError>,
}

impl GenerateOptions<'_> {
    fn strategy(&self) -> std::result::Result<&str, ConfigError> {
        required_str(self.options, "strategy")
    }

    fn unknown_strategy(&self, value: &str, expected: &[&str]) -> ConfigError {
        ConfigError::unknown_variant(format!("{GENERATE}/strategy"), value, expected)
    }

    fn unknown_sampler(&self, value: &str, expected: &[&str]) -> ConfigError {
        ConfigError::unknown_variant(format!("{GENERATE}/sampler"), value, expected)
    }

    fn scoring(&self) -> Result<Scoring> {
        let measure_name = required_str(self.options, "measure")?;
        let measure = (self.resolve_measure)(measure_name)
            .map_err(|e| e.at(format!("{GENERATE}/measure")))?;
        let scores_path = required_str(self.options, "scores")?;
        let scores = ScoreFile::from_path(Path::new(scores_path))?;
        Ok(Scoring {
            measure,
            scores: Arc::new(scores),
        })
    }

    fn depth_first(&self, sampler: &str) -> Result<Explorer> {
        let budget = self
            .options
            .usize_opt(GENERATE, "budget")?
            .ok_or_else(|| missing("budget"))?;

        let sampler = match sampler {
            "evaluation" => {
                const CHOICES: &[&str] = &["positive", "negative", "balanced"];
                let bias = match self.strategy()? {
                    "positive" => EvaluationBias::Positive,
                    "negative" => EvaluationBias::Negative,
                    "balanced" => EvaluationBias::Balanced,
                    other => return Err(self.unknown_strategy(other, CHOICES).into()),
                };
                DepthFirstSampler::Evaluation {
                    bias,
                    scoring: self.scoring()?,
                }
            }
            "transformation" => {
                const CHOICES: &[&str] = &["balanced", "biased"];
                match self.strategy()? {
                    "balanced" => DepthFirstSampler::Transformation(TransformationBias::Balanced),
                    "biased" => DepthFirstSampler::Transformation(TransformationBias::Biased),
                    other => return Err(self.unknown_strategy(other, CHOICES).into()),
                }
            }
            "random" => DepthFirstSampler::Random {
                probability: RANDOM_SAMPLING_PROBABILITY,
            },
            other => {
                return Err(self
                    .unknown_sampler(other, &["evaluation", "transformation", "random"])
                    .into())
            }
        };

        Ok(Explorer::DepthFirst { budget, sampler })
    }

    fn breadth_first(&self, sampler: &str) -> Result<Explorer> {
        let n = self
            .options
            .usize_opt(GENERATE, "n")?
            .ok_or_else(|| missing("n"))?;
        let delta = self.options.f64_opt(GENERATE, "delta")?.unwrap_or(0.0);
        let max_depth = self
            .options
            .usize_opt(GENERATE, "depth")?
            .unwrap_or(DEFAULT_MAX_DEPTH);

        let sampler = match sampler {
            "greedy" => {
                const CHOICES: &[&str] = &["naive", "diversified"];
                let strategy = match self.strategy()? {
                    "naive" => GreedyStrategy::Naive,
                    "diversified" => GreedyStrategy::Diversified {
                        lambda: DIVERSIFICATION_LAMBDA,
                    },
                    other => return Err(self.unknown_strategy(other, CHOICES).into()),
                };
                BreadthFirstSampler::Greedy {
                    strategy,
                    scoring: self.scoring()?,
                }
            }
            "evaluation" => {
                const CHOICES: &[&str] = &[
                    "positive_biased",
                    "negative_biased",
                    "balanced",
                    "stratified",
                    "diversified",
                ];
                let strategy = match self.strategy()? {
                    "positive_biased" => ScoredStrategy::PositiveBiased,
                    "negative_biased" => ScoredStrategy::NegativeBiased,
                    "balanced" => ScoredStrategy::Balanced,
                    "stratified" => ScoredStrategy::Stratified,
                    "diversified" => ScoredStrategy::Diversified {
                        lambda: DIVERSIFICATION_LAMBDA,
                    },
                    other => return Err(self.unknown_strategy(other, CHOICES).into()),
                };
                BreadthFirstSampler::Evaluation {
                    strategy,
                    scoring: self.scoring()?,
                }
            }
            "transformation" => {
                const CHOICES: &[&str] = &["stratified", "balanced"];
                match self.strategy()? {
                    "stratified" => BreadthFirstSampler::Transformation(TransformationStrategy::Stratified),
                    "balanced" => BreadthFirstSampler::Transformation(TransformationStrategy::Balanced),
                    other => return Err(self.unknown_strategy(other, CHOICES).into()),
                }
            }
            "random" => BreadthFirstSampler::Random,
            "cluster" => {
                let k = self
                    .options
                    .usize_opt(GENERATE, "k")?
                    .ok_or_else(|| missing("k"))?;
                BreadthFirstSampler::Cluster { k }
            }
            other => {
                return Err(self
                    .unknown_sampler(
                        other,
                        &["greedy", "evaluation", "transformation", "random", "cluster"],
                    )
                    .into())
            }
        };

        Ok(Explorer::BreadthFirst {
            n,
            delta,
            max_depth,
            sampler,
        })
    }
}
