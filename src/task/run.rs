use crate::window::{TimeWindow, WindowSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Queued,
    Collecting,
    Analyzing,
    Summarizing,
    Saving,
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub percentage: f64,
}

impl RunProgress {
    pub fn new(total_chunks: usize, processed_chunks: usize) -> Self {
        let percentage = if total_chunks == 0 {
            0.0
        } else {
            (processed_chunks as f64 / total_chunks as f64 * 100.0).min(100.0)
        };
        Self {
            total_chunks,
            processed_chunks,
            percentage,
        }
    }
}

/// One invocation of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub task_name: String,
    pub window_spec: WindowSpec,
    /// Absolute window, known once the run starts.
    pub window: Option<TimeWindow>,
    pub status: RunStatus,
    pub stage: RunStage,
    pub progress: RunProgress,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl Run {
    pub fn pending(task_name: impl Into<String>, window_spec: WindowSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_name: task_name.into(),
            window_spec,
            window: None,
            status: RunStatus::Pending,
            stage: RunStage::Queued,
            progress: RunProgress::default(),
            queued_at: now,
            started_at: None,
            finished_at: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn start(&mut self, window: TimeWindow, now: DateTime<Utc>) {
        self.status = RunStatus::Running;
        self.stage = RunStage::Collecting;
        self.window = Some(window);
        self.started_at = Some(now);
    }

    /// Records the outcome. Only the first call has any effect.
    pub(crate) fn finish(&mut self, outcome: Result<(), String>, now: DateTime<Utc>) {
        if self.status.is_finished() {
            return;
        }
        match outcome {
            Ok(()) => self.status = RunStatus::Succeeded,
            Err(e) => {
                self.status = RunStatus::Failed;
                self.error = Some(e);
            }
        }
        self.stage = RunStage::Finished;
        self.finished_at = Some(now);
    }
}
