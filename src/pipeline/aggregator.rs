//! Streaming result aggregator.
//!
//! Consumes [`ResultEvent`]s one at a time, in arrival order, and turns them
//! into the output artifacts described by an [`OutputPlan`]:
//!
//! | Event            | Effect                                                   |
//! |------------------|----------------------------------------------------------|
//! | `Measurement`    | stored as the topic's row of the measurement table       |
//! | `Evaluation`     | stored as the topic's row of the evaluation table        |
//! | `Transformation` | written to `<dir>/<name>`, handed to a generating model  |
//! | `TrecResults`    | appended to the run file, which is never truncated       |
//! | `Error`          | aggregation fails; nothing more is drained               |
//! | `Done`           | finalization: formatters write their files               |
//!
//! The aggregator is the only writer of its tables, so nothing here locks.
//! Files written before a failure stay on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn};

use super::artifacts::{ResultEvent, ResultTable, ScoreMap, TransformedQuery};
use super::compiler::{ExecutablePipeline, OutputPlan};
use super::traits::LearningModel;
use crate::errors::{Error, IoContext, Result};
use crate::output::{MeasurementMatrix, MissingValuePolicy};
use crate::types::TrecResult;

/// Aggregation policy knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorOptions {
    pub missing_values: MissingValuePolicy,
}

/// Lifecycle of one aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Running,
    Finalizing,
    Done,
    Failed,
}

/// What a finished aggregation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationSummary {
    pub measured_topics: usize,
    pub evaluated_topics: usize,
    pub transformations: usize,
    pub trec_results: usize,
    /// Formatter outputs, evaluations first.
    pub files: Vec<PathBuf>,
}

pub struct Aggregator {
    plan: Arc<OutputPlan>,
    options: AggregatorOptions,
    state: AggregatorState,
    measurements: ResultTable,
    evaluations: ResultTable,
    trec: Option<BufWriter<File>>,
    generation_sink: Option<Arc<dyn LearningModel>>,
    transformations: usize,
    trec_results: usize,
    files: Vec<PathBuf>,
}

impl Aggregator {
    pub fn new(plan: Arc<OutputPlan>) -> Self {
        Self {
            measurements: ResultTable::new(plan.measurement_columns.clone()),
            evaluations: ResultTable::new(plan.evaluation_columns.clone()),
            plan,
            options: AggregatorOptions::default(),
            state: AggregatorState::Running,
            trec: None,
            generation_sink: None,
            transformations: 0,
            trec_results: 0,
            files: Vec::new(),
        }
    }

    /// An aggregator for `pipeline`'s outputs, feeding its generating model.
    pub fn for_pipeline(pipeline: &ExecutablePipeline) -> Self {
        let aggregator = Self::new(Arc::clone(&pipeline.output));
        match pipeline.generation_sink() {
            Some(model) => aggregator.with_generation_sink(Arc::clone(model)),
            None => aggregator,
        }
    }

    pub fn with_options(mut self, options: AggregatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Hand every transformed query to `model` as well.
    pub fn with_generation_sink(mut self, model: Arc<dyn LearningModel>) -> Self {
        self.generation_sink = Some(model);
        self
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn measurements(&self) -> &ResultTable {
        &self.measurements
    }

    pub fn evaluations(&self) -> &ResultTable {
        &self.evaluations
    }

    /// Drain `events` until `Done`, an error, or the end of the stream, then
    /// finalize.
    pub fn run<I>(mut self, events: I) -> Result<AggregationSummary>
    where
        I: IntoIterator<Item = ResultEvent>,
    {
        let _span = info_span!("aggregate").entered();
        for event in events {
            self.handle(event)?;
            if self.state != AggregatorState::Running {
                break;
            }
        }
        if self.state == AggregatorState::Running {
            debug!("event stream closed");
            self.finalize()?;
        }
        Ok(self.summary())
    }

    /// Apply one event.
    ///
    /// `Done` finalizes. An `Error` event moves the aggregator to
    /// [`AggregatorState::Failed`] and is returned as [`Error::Execution`].
    pub fn handle(&mut self, event: ResultEvent) -> Result<()> {
        if self.state != AggregatorState::Running {
            warn!(kind = event.kind(), state = ?self.state, "ignoring event after aggregation ended");
            return Ok(());
        }

        let outcome = match event {
            ResultEvent::Measurement { topic, scores } => {
                Self::store(&mut self.measurements, "measurement", &topic, scores);
                Ok(())
            }
            ResultEvent::Evaluation { topic, scores } => {
                Self::store(&mut self.evaluations, "evaluation", &topic, scores);
                Ok(())
            }
            ResultEvent::Transformation {
                topic,
                transformation,
            } => self.transformation(&topic, &transformation),
            ResultEvent::TrecResults { topic, results } => self.trec_results(&topic, &results),
            ResultEvent::Error(err) => {
                error!(topic = err.topic.as_deref(), code = %err.code, "{}", err.message);
                Err(Error::Execution(err))
            }
            ResultEvent::Done => return self.finalize(),
        };

        if outcome.is_err() {
            self.state = AggregatorState::Failed;
        }
        outcome
    }

    /// Write the formatter outputs. Runs once; later calls are no-ops.
    pub fn finalize(&mut self) -> Result<()> {
        if self.state != AggregatorState::Running {
            return Ok(());
        }
        self.state = AggregatorState::Finalizing;
        info!(
            measured = self.measurements.len(),
            evaluated = self.evaluations.len(),
            "finalizing"
        );

        match self.write_outputs() {
            Ok(()) => {
                self.state = AggregatorState::Done;
                Ok(())
            }
            Err(e) => {
                self.state = AggregatorState::Failed;
                Err(e)
            }
        }
    }

    pub fn summary(&self) -> AggregationSummary {
        AggregationSummary {
            measured_topics: self.measurements.len(),
            evaluated_topics: self.evaluations.len(),
            transformations: self.transformations,
            trec_results: self.trec_results,
            files: self.files.clone(),
        }
    }

    // ─── Event handlers ─────────────────────────────────────────────────

    fn store(table: &mut ResultTable, kind: &str, topic: &str, scores: ScoreMap) {
        if table.insert(topic, scores) {
            warn!(topic, kind, "duplicate event; keeping the latest scores");
        } else {
            debug!(topic, kind, "stored row");
        }
    }

    fn transformation(&mut self, topic: &str, transformation: &TransformedQuery) -> Result<()> {
        self.transformations += 1;

        if let Some(dir) = &self.plan.transformation_output {
            fs::create_dir_all(dir).with_path(dir)?;
            let path = dir.join(&transformation.name);
            let text = transformation.query.to_native()?;
            fs::write(&path, text).with_path(&path)?;
            debug!(topic, path = %path.display(), "wrote transformed query");
        }

        if let Some(model) = &self.generation_sink {
            model.accumulate(topic, transformation)?;
        }
        Ok(())
    }

    fn trec_results(&mut self, topic: &str, results: &[TrecResult]) -> Result<()> {
        let Some(path) = &self.plan.trec_output else {
            debug!(topic, "no run file configured; dropping TREC results");
            return Ok(());
        };

        let writer = match self.trec.as_mut() {
            Some(writer) => writer,
            None => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_path(path)?;
                info!(path = %path.display(), "opened run file");
                self.trec.insert(BufWriter::new(file))
            }
        };

        for result in results {
            writeln!(writer, "{result}").with_path(path)?;
        }
        writer.flush().with_path(path)?;
        self.trec_results += results.len();
        Ok(())
    }

    // ─── Finalization ───────────────────────────────────────────────────

    fn write_outputs(&mut self) -> Result<()> {
        if let Some(mut writer) = self.trec.take() {
            if let Some(path) = &self.plan.trec_output {
                writer.flush().with_path(path)?;
            }
        }

        let plan = Arc::clone(&self.plan);

        if !self.evaluations.is_empty() {
            for binding in &plan.evaluation_formatters {
                let text = binding.formatter.format(&self.evaluations)?;
                self.write_file(&binding.filename, &text, binding.formatter.name())?;
            }
        }

        if !self.measurements.is_empty() {
            let matrix = MeasurementMatrix::from_table(&self.measurements, self.options.missing_values)?;
            for binding in &plan.measurement_formatters {
                let text = binding.formatter.format(&matrix)?;
                self.write_file(&binding.filename, &text, binding.formatter.name())?;
            }
        }
        Ok(())
    }

    fn write_file(&mut self, path: &Path, text: &str, format: &str) -> Result<()> {
        fs::write(path, text).with_path(path)?;
        info!(path = %path.display(), format, "wrote output");
        self.files.push(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{CsvMeasurementFormatter, JsonEvaluationFormatter};
    use crate::pipeline::compiler::FormatterBinding;
    use crate::pipeline::error_code::ErrorCode;
    use crate::pipeline::errors::ExecutionError;
    use crate::pipeline::traits::{EvaluationFormatter, MeasurementFormatter, NativeQuery, QueryChainWiring};
    use crate::pipeline::errors::ConfigError;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct Text(&'static str);

    impl NativeQuery for Text {
        fn to_native(&self) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct Collector {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl LearningModel for Collector {
        fn kind(&self) -> &str {
            "query_chain"
        }
        fn wire_query_chain(&mut self, _wiring: QueryChainWiring) -> std::result::Result<(), ConfigError> {
            Ok(())
        }
        fn accumulate(&self, topic: &str, query: &TransformedQuery) -> Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push((topic.to_string(), query.name.clone()));
            Ok(())
        }
    }

    fn plan(dir: &TempDir) -> OutputPlan {
        OutputPlan {
            measurement_columns: vec!["precision".into(), "recall".into()],
            evaluation_columns: vec!["ndcg".into()],
            measurement_formatters: vec![FormatterBinding {
                formatter: Arc::new(CsvMeasurementFormatter) as Arc<dyn MeasurementFormatter>,
                filename: dir.path().join("m.csv"),
            }],
            evaluation_formatters: vec![FormatterBinding {
                formatter: Arc::new(JsonEvaluationFormatter) as Arc<dyn EvaluationFormatter>,
                filename: dir.path().join("e.json"),
            }],
            trec_output: Some(dir.path().join("run.res")),
            transformation_output: Some(dir.path().join("queries")),
        }
    }

    #[test]
    fn test_missing_measurement_defaults_to_zero() {
        let dir = TempDir::new().unwrap();
        let summary = Aggregator::new(Arc::new(plan(&dir)))
            .run([
                ResultEvent::measurement("T1", [("precision", 0.5)]),
                ResultEvent::Done,
            ])
            .unwrap();
        assert_eq!(summary.measured_topics, 1);
        let csv = fs::read_to_string(dir.path().join("m.csv")).unwrap();
        assert_eq!(csv, "precision,recall\n0.5,0\n");
    }

    #[test]
    fn test_missing_measurement_error_policy() {
        let dir = TempDir::new().unwrap();
        let err = Aggregator::new(Arc::new(plan(&dir)))
            .with_options(AggregatorOptions {
                missing_values: MissingValuePolicy::Error,
            })
            .run([ResultEvent::measurement("T1", [("precision", 0.5)])])
            .unwrap_err();
        assert_eq!(err.topic(), Some("T1"));
        assert!(!dir.path().join("m.csv").exists());
    }

    #[test]
    fn test_error_event_stops_before_measurement_output() {
        let dir = TempDir::new().unwrap();
        let events = vec![
            ResultEvent::measurement("T1", [("precision", 0.5), ("recall", 0.1)]),
            ResultEvent::measurement("T2", [("precision", 0.3), ("recall", 0.2)]),
            ResultEvent::Error(ExecutionError::stage_failed("index offline").for_topic("T3")),
            ResultEvent::measurement("T4", [("precision", 1.0)]),
            ResultEvent::Done,
        ];

        let mut aggregator = Aggregator::new(Arc::new(plan(&dir)));
        let mut outcome = Ok(());
        for event in events {
            outcome = aggregator.handle(event);
            if outcome.is_err() {
                break;
            }
        }

        match outcome {
            Err(Error::Execution(e)) => {
                assert_eq!(e.code, ErrorCode::StageFailed);
                assert_eq!(e.topic.as_deref(), Some("T3"));
            }
            other => panic!("expected an execution error, got {other:?}"),
        }
        assert_eq!(aggregator.state(), AggregatorState::Failed);
        assert_eq!(aggregator.measurements().len(), 2);
        assert!(!dir.path().join("m.csv").exists());
    }

    #[test]
    fn test_run_does_not_drain_after_error() {
        let dir = TempDir::new().unwrap();
        let err = Aggregator::new(Arc::new(plan(&dir)))
            .run([
                ResultEvent::measurement("T1", [("precision", 0.5)]),
                ResultEvent::Error(ExecutionError::stage_failed("boom")),
                ResultEvent::Done,
            ])
            .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert!(!dir.path().join("m.csv").exists());
        assert!(!dir.path().join("e.json").exists());
    }

    #[test]
    fn test_duplicate_topic_keeps_latest_row_in_place() {
        let dir = TempDir::new().unwrap();
        let mut aggregator = Aggregator::new(Arc::new(plan(&dir)));
        aggregator
            .handle(ResultEvent::measurement("T1", [("precision", 0.1)]))
            .unwrap();
        aggregator
            .handle(ResultEvent::measurement("T2", [("precision", 0.2)]))
            .unwrap();
        aggregator
            .handle(ResultEvent::measurement("T1", [("precision", 0.9)]))
            .unwrap();
        aggregator.handle(ResultEvent::Done).unwrap();

        let csv = fs::read_to_string(dir.path().join("m.csv")).unwrap();
        assert_eq!(csv, "precision,recall\n0.9,0\n0.2,0\n");
    }

    #[test]
    fn test_trec_results_appended_across_topics() {
        let dir = TempDir::new().unwrap();
        let run = dir.path().join("run.res");
        fs::write(&run, "stale\n").unwrap();

        let summary = Aggregator::new(Arc::new(plan(&dir)))
            .run([
                ResultEvent::TrecResults {
                    topic: "1".into(),
                    results: vec![
                        TrecResult::new("1", "d1", 1, 2.5, "bm25"),
                        TrecResult::new("1", "d2", 2, 1.5, "bm25"),
                    ],
                },
                ResultEvent::TrecResults {
                    topic: "2".into(),
                    results: vec![TrecResult::new("2", "d9", 1, 0.5, "bm25")],
                },
            ])
            .unwrap();

        assert_eq!(summary.trec_results, 3);
        let text = fs::read_to_string(&run).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "stale");
        assert_eq!(lines[1], "1 Q0 d1 1 2.5 bm25");
        assert_eq!(lines[3], "2 Q0 d9 1 0.5 bm25");
    }

    #[test]
    fn test_transformations_written_and_accumulated() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(Collector::default());
        let summary = Aggregator::new(Arc::new(plan(&dir)))
            .with_generation_sink(Arc::clone(&sink) as Arc<dyn LearningModel>)
            .run([
                ResultEvent::Transformation {
                    topic: "T1".into(),
                    transformation: TransformedQuery::new("T1.query", Arc::new(Text("a AND b"))),
                },
                ResultEvent::Done,
            ])
            .unwrap();

        assert_eq!(summary.transformations, 1);
        let written = fs::read_to_string(dir.path().join("queries").join("T1.query")).unwrap();
        assert_eq!(written, "a AND b");
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("T1".to_string(), "T1.query".to_string())]);
    }

    #[test]
    fn test_empty_tables_write_nothing() {
        let dir = TempDir::new().unwrap();
        let summary = Aggregator::new(Arc::new(plan(&dir)))
            .run([ResultEvent::Done])
            .unwrap();
        assert!(summary.files.is_empty());
        assert!(!dir.path().join("e.json").exists());
        assert!(!dir.path().join("run.res").exists());
    }

    #[test]
    fn test_evaluations_written_before_measurements() {
        let dir = TempDir::new().unwrap();
        let summary = Aggregator::new(Arc::new(plan(&dir)))
            .run([
                ResultEvent::measurement("T1", [("precision", 1.0), ("recall", 1.0)]),
                ResultEvent::evaluation("T1", [("ndcg", 0.75)]),
            ])
            .unwrap();
        assert_eq!(
            summary.files,
            vec![dir.path().join("e.json"), dir.path().join("m.csv")]
        );
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("e.json")).unwrap()).unwrap();
        assert_eq!(json["T1"]["ndcg"], 0.75);
    }

    #[test]
    fn test_events_after_done_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut aggregator = Aggregator::new(Arc::new(plan(&dir)));
        aggregator.handle(ResultEvent::Done).unwrap();
        assert_eq!(aggregator.state(), AggregatorState::Done);
        aggregator
            .handle(ResultEvent::measurement("T1", [("precision", 1.0)]))
            .unwrap();
        assert!(aggregator.measurements().is_empty());
    }
}
