use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use std::time::Duration;

/// Source of wall-clock time. The engine resolves windows with it and the
/// scheduler sleeps on it, so tests can drive both from tokio's paused clock.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn now_utc(&self) -> DateTime<Utc> {
        self.now().with_timezone(&Utc)
    }

    /// Returns once `now() >= deadline`.
    async fn sleep_until(&self, deadline: DateTime<FixedOffset>);
}

/// Local system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

// Wall time can jump (suspend, NTP), so long sleeps wake up periodically
// and re-check.
const MAX_SLEEP_SLICE: Duration = Duration::from_secs(60);

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }

    async fn sleep_until(&self, deadline: DateTime<FixedOffset>) {
        loop {
            let remaining = match (deadline - self.now()).to_std() {
                Ok(d) if !d.is_zero() => d,
                _ => return,
            };
            tokio::time::sleep(remaining.min(MAX_SLEEP_SLICE)).await;
        }
    }
}

/// Wall time derived from tokio's clock: `origin` plus the tokio time
/// elapsed since construction. With a paused runtime, time only moves when
/// the test advances it.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: DateTime<FixedOffset>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(origin: DateTime<FixedOffset>) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or(chrono::Duration::zero());
        self.origin + elapsed
    }

    async fn sleep_until(&self, deadline: DateTime<FixedOffset>) {
        if let Ok(remaining) = (deadline - self.now()).to_std() {
            tokio::time::sleep(remaining).await;
        }
    }
}
