//! A task binds one source, one analyzer and any number of sinks. The
//! [`TaskEngine`] runs tasks and keeps every run it has seen.

pub mod engine;
pub mod run;

use crate::analyzer::Analyzer;
use crate::config::types::TaskConfig;
use crate::llm::{LlmBackend, LlmError};
use crate::sink::{build_sink, Sink, SinkError};
use crate::source::timestamp::TimestampError;
use crate::source::{build_source, Source};
use crate::window::WindowSpec;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use engine::{EngineError, ReportFilter, TaskEngine};
pub use run::{Run, RunProgress, RunStage, RunStatus};

const DEFAULT_DEADLINE: Duration = Duration::from_secs(30 * 60);
const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("llm backend: {0}")]
    Llm(#[from] LlmError),

    #[error("task '{task}': {source}")]
    Source {
        task: String,
        #[source]
        source: TimestampError,
    },

    #[error("task '{task}': {source}")]
    Sink {
        task: String,
        #[source]
        source: SinkError,
    },
}

pub struct Task {
    name: String,
    description: Option<String>,
    source: Arc<dyn Source>,
    analyzer: Analyzer,
    sinks: Vec<Arc<dyn Sink>>,
    default_window: WindowSpec,
    deadline: Duration,
    sink_timeout: Duration,
    /// Held for the whole of a run so a task never runs twice at once.
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Task {
    pub fn new(name: impl Into<String>, source: Arc<dyn Source>, analyzer: Analyzer) -> Self {
        Self {
            name: name.into(),
            description: None,
            source,
            analyzer,
            sinks: Vec::new(),
            default_window: WindowSpec::hours(24),
            deadline: DEFAULT_DEADLINE,
            sink_timeout: DEFAULT_SINK_TIMEOUT,
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn from_config(config: &TaskConfig, backend: Arc<dyn LlmBackend>) -> Result<Self, BuildError> {
        let source = build_source(&config.source).map_err(|source| BuildError::Source {
            task: config.name.clone(),
            source,
        })?;
        let sinks = config
            .sinks
            .iter()
            .map(build_sink)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| BuildError::Sink {
                task: config.name.clone(),
                source,
            })?;

        let mut task = Task::new(
            config.name.clone(),
            source,
            Analyzer::new(backend, config.analyzer.clone()),
        )
        .with_sinks(sinks)
        .with_window(config.window.clone())
        .with_deadline(config.deadline)
        .with_sink_timeout(config.sink_timeout);
        task.description = config.description.clone();
        Ok(task)
    }

    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn Sink>>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_window(mut self, window: WindowSpec) -> Self {
        self.default_window = window;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn default_window(&self) -> &WindowSpec {
        &self.default_window
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }
}
