//! Daily unattended runs.
//!
//! Once a day at `fire_hour` the scheduler runs each configured task, one
//! after another, over its lookback window. A failed run is not retried
//! until the next cycle.

pub mod clock;

use crate::config::types::MonitoringConfig;
use crate::task::{EngineError, TaskEngine};
use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use clock::{Clock, SystemClock, TokioClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Waiting,
    Firing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub state: SchedulerState,
    pub fire_hour: u32,
    pub next_fire_time: Option<DateTime<FixedOffset>>,
    pub tasks: Vec<String>,
}

/// First `fire_hour:00:00` strictly after `now`, in `now`'s offset.
pub fn next_fire_time(now: DateTime<FixedOffset>, fire_hour: u32) -> DateTime<FixedOffset> {
    let at = NaiveTime::from_hms_opt(fire_hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at);
    let candidate = now.offset().from_local_datetime(&today).single().unwrap_or(now);
    if candidate > now {
        candidate
    } else {
        candidate + chrono::Duration::days(1)
    }
}

pub struct Scheduler {
    shared: Arc<Shared>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

struct Shared {
    engine: TaskEngine,
    config: MonitoringConfig,
    clock: Arc<dyn Clock>,
    state: watch::Sender<SchedulerState>,
    next_fire: watch::Sender<Option<DateTime<FixedOffset>>>,
}

impl Scheduler {
    /// Uses the engine's clock.
    pub fn new(engine: TaskEngine, config: MonitoringConfig) -> Self {
        let clock = engine.clock().clone();
        Self {
            shared: Arc::new(Shared {
                engine,
                config,
                clock,
                state: watch::Sender::new(SchedulerState::Idle),
                next_fire: watch::Sender::new(None),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn enabled(&self) -> bool {
        self.shared.config.enabled
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.shared.state.subscribe()
    }

    pub fn next_fire_time(&self) -> Option<DateTime<FixedOffset>> {
        *self.shared.next_fire.borrow()
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            enabled: self.enabled(),
            state: self.state(),
            fire_hour: self.shared.config.fire_hour,
            next_fire_time: self.next_fire_time(),
            tasks: self.shared.config.tasks.iter().map(|t| t.name.clone()).collect(),
        }
    }

    /// Spawns the scheduling loop. Does nothing when disabled or already
    /// started.
    pub fn start(&self) {
        if !self.enabled() {
            info!("scheduler disabled");
            return;
        }
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(self.shared.clone(), token.clone()));
        *running = Some((token, handle));
        info!(
            fire_hour = self.shared.config.fire_hour,
            tasks = self.shared.config.tasks.len(),
            "scheduler started"
        );
    }

    /// Stops the loop. A task that is already executing is allowed to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some((token, handle)) = running {
            token.cancel();
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler loop panicked");
            }
            info!("scheduler stopped");
        }
        self.shared.state.send_replace(SchedulerState::Idle);
        self.shared.next_fire.send_replace(None);
    }
}

async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let next = next_fire_time(shared.clock.now(), shared.config.fire_hour);
        shared.next_fire.send_replace(Some(next));
        shared.state.send_replace(SchedulerState::Waiting);
        info!(next_fire = %next, "scheduler waiting");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shared.clock.sleep_until(next) => {}
        }

        shared.state.send_replace(SchedulerState::Firing);
        shared.fire(&cancel).await;
        if cancel.is_cancelled() {
            break;
        }
    }

    shared.state.send_replace(SchedulerState::Idle);
    shared.next_fire.send_replace(None);
}

impl Shared {
    async fn fire(&self, cancel: &CancellationToken) {
        info!(tasks = self.config.tasks.len(), "scheduler firing");
        for scheduled in &self.config.tasks {
            if cancel.is_cancelled() {
                return;
            }
            let window = scheduled
                .window
                .clone()
                .unwrap_or_else(|| self.config.lookback.clone());

            match self.engine.run(&scheduled.name, Some(window)).await {
                Ok(run) => info!(
                    task = %scheduled.name,
                    run_id = %run.id,
                    status = ?run.status,
                    "scheduled run finished"
                ),
                Err(EngineError::Conflict(_)) => {
                    warn!(task = %scheduled.name, "task already running, skipping this cycle")
                }
                Err(e) => error!(task = %scheduled.name, error = %e, "scheduled run not started"),
            }
        }
    }
}
