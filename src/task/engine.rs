use super::run::{Run, RunProgress, RunStage};
use super::{BuildError, Task};
use crate::analyzer::{AnalysisProgress, ProgressFn};
use crate::chunker;
use crate::config::types::Config;
use crate::llm::{ChatCompletionsClient, LlmBackend};
use crate::report::{Report, ReportSummary};
use crate::scheduler::clock::{Clock, SystemClock};
use crate::sink::save_all;
use crate::window::{TimeWindow, WindowError, WindowSpec};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::task::{AbortHandle, JoinError};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task '{0}' is already running")]
    Conflict(String),

    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("invalid window: {0}")]
    InvalidWindow(#[from] WindowError),
}

/// Filter for [`TaskEngine::list_reports`]. Time bounds apply to
/// `generated_at` and are inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportFilter {
    pub task: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Runs tasks and remembers every run and report.
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<Inner>,
}

struct Inner {
    tasks: BTreeMap<String, Arc<Task>>,
    runs: RwLock<HashMap<Uuid, Run>>,
    reports: RwLock<HashMap<Uuid, Arc<Report>>>,
    clock: Arc<dyn Clock>,
    host: String,
}

impl TaskEngine {
    pub fn new(tasks: impl IntoIterator<Item = Task>, clock: Arc<dyn Clock>) -> Self {
        let tasks = tasks
            .into_iter()
            .map(|task| (task.name.clone(), Arc::new(task)))
            .collect();
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            inner: Arc::new(Inner {
                tasks,
                runs: RwLock::new(HashMap::new()),
                reports: RwLock::new(HashMap::new()),
                clock,
                host,
            }),
        }
    }

    /// Builds every configured task against the configured chat-completions
    /// backend, on system time.
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        let backend: Arc<dyn LlmBackend> = Arc::new(ChatCompletionsClient::new(&config.llm)?);
        Self::from_config_with(config, backend, Arc::new(SystemClock))
    }

    pub fn from_config_with(
        config: &Config,
        backend: Arc<dyn LlmBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BuildError> {
        let tasks = config
            .tasks
            .iter()
            .map(|task| Task::from_config(task, backend.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(tasks, clock))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn task_names(&self) -> Vec<String> {
        self.inner.tasks.keys().cloned().collect()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.inner.tasks.values().map(|t| t.as_ref())
    }

    /// Starts a run in the background and returns it while still pending.
    ///
    /// Fails right away if the task is unknown or already running. `window`
    /// falls back to the task's default when absent or empty.
    pub fn trigger(&self, task_name: &str, window: Option<WindowSpec>) -> Result<Run, EngineError> {
        let (task, run, guard) = self.prepare(task_name, window)?;
        let engine = self.clone();
        let pending = run.clone();
        tokio::spawn(async move {
            engine.execute(task, run, guard).await;
        });
        Ok(pending)
    }

    /// Like [`TaskEngine::trigger`] but waits for the run to finish.
    pub async fn run(&self, task_name: &str, window: Option<WindowSpec>) -> Result<Run, EngineError> {
        let (task, run, guard) = self.prepare(task_name, window)?;
        Ok(self.execute(task, run, guard).await)
    }

    pub fn run_status(&self, id: Uuid) -> Option<Run> {
        self.runs().get(&id).cloned()
    }

    pub fn report(&self, id: Uuid) -> Option<Arc<Report>> {
        self.reports().get(&id).cloned()
    }

    /// Newest first.
    pub fn list_runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.runs().values().cloned().collect();
        runs.sort_by(|a, b| b.queued_at.cmp(&a.queued_at).then(a.id.cmp(&b.id)));
        runs
    }

    /// Newest first, truncated to `filter.limit`.
    pub fn list_reports(&self, filter: &ReportFilter) -> Vec<ReportSummary> {
        let mut summaries: Vec<ReportSummary> = self
            .reports()
            .values()
            .filter(|r| filter.task.as_deref().map_or(true, |t| r.task_name == t))
            .filter(|r| filter.start.map_or(true, |s| r.generated_at >= s))
            .filter(|r| filter.end.map_or(true, |e| r.generated_at <= e))
            .map(|r| r.summary())
            .collect();
        summaries.sort_by(|a, b| b.generated_at.cmp(&a.generated_at).then(a.run_id.cmp(&b.run_id)));
        if let Some(limit) = filter.limit {
            summaries.truncate(limit);
        }
        summaries
    }

    fn prepare(
        &self,
        task_name: &str,
        window: Option<WindowSpec>,
    ) -> Result<(Arc<Task>, Run, OwnedMutexGuard<()>), EngineError> {
        let task = self
            .inner
            .tasks
            .get(task_name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTask(task_name.to_string()))?;

        let spec = window
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| task.default_window.clone());
        spec.validate()?;

        let guard = task
            .lock
            .clone()
            .try_lock_owned()
            .map_err(|_| EngineError::Conflict(task_name.to_string()))?;

        let run = Run::pending(task_name, spec, self.inner.clock.now_utc());
        self.runs_mut().insert(run.id, run.clone());
        info!(task = %task_name, run_id = %run.id, "run queued");

        Ok((task, run, guard))
    }

    async fn execute(&self, task: Arc<Task>, mut run: Run, _guard: OwnedMutexGuard<()>) -> Run {
        let run_id = run.id;
        let outcome = match run.window_spec.resolve(self.inner.clock.now_utc()) {
            Ok(window) => {
                self.update(run_id, |r| r.start(window, self.inner.clock.now_utc()));
                info!(task = %task.name, run_id = %run_id, window = %window, "run started");
                self.supervise(task.clone(), run_id, window).await
            }
            Err(e) => Err(e.to_string()),
        };

        match &outcome {
            Ok(()) => info!(task = %task.name, run_id = %run_id, "run succeeded"),
            Err(e) => error!(task = %task.name, run_id = %run_id, error = %e, "run failed"),
        }

        let now = self.inner.clock.now_utc();
        match self.update(run_id, |r| r.finish(outcome.clone(), now)) {
            Some(finished) => finished,
            None => {
                run.finish(outcome, now);
                run
            }
        }
    }

    /// Runs the pipeline on its own tokio task under the task deadline. A
    /// panic becomes a failed outcome, and the pipeline is aborted when the
    /// deadline passes or this future is dropped.
    async fn supervise(&self, task: Arc<Task>, run_id: Uuid, window: TimeWindow) -> Result<(), String> {
        let deadline = task.deadline;
        let engine = self.clone();
        let mut handle = tokio::spawn(async move { engine.pipeline(&task, run_id, window).await });
        let _abort = AbortOnDrop(handle.abort_handle());

        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_panic() => Err(format!("run panicked: {}", panic_message(e))),
            Ok(Err(e)) => Err(format!("run aborted: {}", e)),
            Err(_) => Err(format!("deadline of {:?} exceeded", deadline)),
        }
    }

    /// Collect, chunk, analyze, save. Warnings are recorded on the run as
    /// they occur so they survive a deadline.
    async fn pipeline(&self, task: &Task, run_id: Uuid, window: TimeWindow) -> Result<(), String> {
        let collection = task.source.collect(&window).await.map_err(|e| e.to_string())?;
        for failure in &collection.failures {
            warn!(run_id = %run_id, source = %failure.source_label, cause = %failure.cause, "partial collection failure");
            self.add_warning(
                run_id,
                format!("source '{}' failed: {}", failure.source_label, failure.cause),
            );
        }

        let settings = task.analyzer.config();
        let chunks = chunker::split(
            &collection.records,
            settings.max_chunk_chars,
            settings.max_chunk_records,
        );
        info!(
            run_id = %run_id,
            records = collection.records.len(),
            chunks = chunks.len(),
            "collection complete"
        );
        let total = chunks.len();
        self.update(run_id, |r| {
            r.stage = RunStage::Analyzing;
            r.progress = RunProgress::new(total, 0);
        });

        let progress: ProgressFn = {
            let engine = self.clone();
            Arc::new(move |event: AnalysisProgress| engine.on_progress(run_id, event))
        };
        let analysis = task
            .analyzer
            .analyze(chunks, task.source.call_chain(), Some(progress))
            .await;
        for warning in &analysis.warnings {
            self.add_warning(run_id, warning.clone());
        }

        let report = Arc::new(Report {
            run_id,
            task_name: task.name.clone(),
            window,
            findings: analysis.findings,
            causal_links: analysis.causal_links,
            narrative: analysis.narrative,
            source_failures: collection.failures,
            host: self.inner.host.clone(),
            generated_at: self.inner.clock.now_utc(),
        });
        self.reports_mut().insert(run_id, report.clone());

        self.update(run_id, |r| r.stage = RunStage::Saving);
        let saved = save_all(&task.sinks, &report, task.sink_timeout).await;
        for failure in &saved.failures {
            self.add_warning(run_id, failure.to_string());
        }
        if saved.all_failed() {
            return Err(format!("all {} sinks failed", saved.failures.len()));
        }
        Ok(())
    }

    fn on_progress(&self, run_id: Uuid, event: AnalysisProgress) {
        self.update(run_id, |r| match event {
            AnalysisProgress::Chunks { total, processed } => {
                r.progress = RunProgress::new(total, processed);
            }
            AnalysisProgress::Summarizing => r.stage = RunStage::Summarizing,
        });
    }

    fn add_warning(&self, run_id: Uuid, warning: String) {
        self.update(run_id, |r| r.warnings.push(warning));
    }

    fn update(&self, run_id: Uuid, f: impl FnOnce(&mut Run)) -> Option<Run> {
        let mut runs = self.runs_mut();
        let run = runs.get_mut(&run_id)?;
        f(run);
        Some(run.clone())
    }

    fn runs(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Run>> {
        self.inner.runs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn runs_mut(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Run>> {
        self.inner.runs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn reports(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Arc<Report>>> {
        self.inner.reports.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn reports_mut(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Arc<Report>>> {
        self.inner.reports.write().unwrap_or_else(PoisonError::into_inner)
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(error: JoinError) -> String {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
