//! Run loop: one engine thread producing, the calling thread aggregating.
//!
//! ```text
//!   engine thread                          caller
//!   ─────────────                          ──────
//!   ExecutionEngine::execute ──events──▶  Aggregator::run ──▶ files
//!         │                                  │
//!         └──────────── join ◀───────────────┘
//! ```
//!
//! The receiver is dropped as soon as aggregation stops, so an engine still
//! sending after an `Error` event sees a closed channel instead of blocking
//! on a full bounded buffer.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use super::aggregator::{AggregationSummary, Aggregator, AggregatorOptions};
use super::artifacts::ResultEvent;
use super::compiler::ExecutablePipeline;
use super::errors::ExecutionError;
use super::traits::ExecutionEngine;
use crate::errors::{Error, Result};

const ENGINE_THREAD: &str = "irpipe-engine";

/// Buffering between the engine and the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelCapacity {
    #[default]
    Unbounded,
    /// The engine blocks once this many events are waiting.
    Bounded(usize),
}

impl ChannelCapacity {
    fn channel(self) -> (Sender<ResultEvent>, Receiver<ResultEvent>) {
        match self {
            Self::Unbounded => unbounded(),
            Self::Bounded(n) => bounded(n),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub capacity: ChannelCapacity,
    pub aggregator: AggregatorOptions,
}

/// A running engine: its event stream and its thread.
pub struct EngineHandle {
    pub events: Receiver<ResultEvent>,
    thread: JoinHandle<Result<()>>,
}

impl EngineHandle {
    /// Wait for the engine thread. A panic becomes a `stage_failed` error.
    pub fn join(self) -> Result<()> {
        join_engine(self.thread)
    }
}

/// Start `engine` on its own thread.
///
/// If the engine returns an error or panics, an `Error` event is sent down
/// the stream, so the consumer stops without finalizing partial tables.
pub fn spawn_engine<E>(
    pipeline: Arc<ExecutablePipeline>,
    mut engine: E,
    capacity: ChannelCapacity,
) -> Result<EngineHandle>
where
    E: ExecutionEngine + 'static,
{
    let (sender, events) = capacity.channel();
    debug!(?capacity, "spawning engine");

    let thread = thread::Builder::new()
        .name(ENGINE_THREAD.to_string())
        .spawn(move || {
            let execute = AssertUnwindSafe(|| engine.execute(&pipeline, sender.clone()));
            let result = panic::catch_unwind(execute).unwrap_or_else(|payload| {
                Err(ExecutionError::stage_failed(format!(
                    "engine thread panicked: {}",
                    panic_message(payload.as_ref())
                ))
                .into())
            });
            if let Err(e) = &result {
                // The consumer may already be gone.
                let _ = sender.send(ResultEvent::Error(as_execution_error(e)));
            }
            result
        })
        .map_err(|source| Error::Io {
            context: format!("spawning {ENGINE_THREAD} thread"),
            source,
        })?;

    Ok(EngineHandle { events, thread })
}

/// Execute `pipeline` with `engine` and aggregate its events.
///
/// An aggregation failure takes precedence over the engine's own result.
pub fn run<E>(pipeline: ExecutablePipeline, engine: E, options: RunOptions) -> Result<AggregationSummary>
where
    E: ExecutionEngine + 'static,
{
    let pipeline = Arc::new(pipeline);
    let aggregator = Aggregator::for_pipeline(&pipeline).with_options(options.aggregator);
    let EngineHandle { events, thread } = spawn_engine(Arc::clone(&pipeline), engine, options.capacity)?;

    // Consumes the receiver; it is dropped when aggregation returns.
    let aggregated = aggregator.run(events);
    let engine_result = join_engine(thread);

    match (aggregated, engine_result) {
        (Err(e), engine_result) => {
            if let Err(engine_err) = engine_result {
                warn!(error = %engine_err, "engine also failed");
            }
            Err(e)
        }
        (Ok(_), Err(e)) => Err(e),
        (Ok(summary), Ok(())) => {
            info!(
                measured = summary.measured_topics,
                evaluated = summary.evaluated_topics,
                files = summary.files.len(),
                "run complete"
            );
            Ok(summary)
        }
    }
}

impl ExecutablePipeline {
    /// Run this pipeline on `engine`; see [`run`].
    pub fn execute<E>(self, engine: E, options: RunOptions) -> Result<AggregationSummary>
    where
        E: ExecutionEngine + 'static,
    {
        run(self, engine, options)
    }
}

fn join_engine(thread: JoinHandle<Result<()>>) -> Result<()> {
    match thread.join() {
        Ok(result) => result,
        Err(payload) => Err(ExecutionError::stage_failed(format!(
            "engine thread panicked: {}",
            panic_message(payload.as_ref())
        ))
        .into()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn as_execution_error(err: &Error) -> ExecutionError {
    match err {
        Error::Execution(e) => e.clone(),
        other => ExecutionError::stage_failed(other.to_string()),
    }
}
