pub mod duckdb;
pub mod file;
pub mod object_store;

use crate::config::types::SinkConfig;
use crate::report::Report;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub use self::duckdb::DuckDbSink;
pub use self::file::FileSink;
pub use self::object_store::ObjectStoreSink;

#[derive(Debug, Clone, Error)]
#[error("sink '{sink_name}' failed: {cause}")]
pub struct SinkError {
    pub sink_name: String,
    pub cause: String,
}

impl SinkError {
    pub fn new(sink_name: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            sink_name: sink_name.into(),
            cause: cause.to_string(),
        }
    }
}

/// Persists reports. Saving the same report twice must leave the same
/// result as saving it once.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn save(&self, report: &Report) -> Result<(), SinkError>;
}

pub fn build_sink(config: &SinkConfig) -> Result<Arc<dyn Sink>, SinkError> {
    let sink: Arc<dyn Sink> = match config {
        SinkConfig::File(c) => Arc::new(FileSink::new(c.path.clone(), c.format)),
        SinkConfig::Duckdb(c) => Arc::new(DuckDbSink::new(&c.path)?),
        SinkConfig::ObjectStore(c) => Arc::new(ObjectStoreSink::new(c)?),
    };
    Ok(sink)
}

#[derive(Debug, Default)]
pub struct SaveOutcome {
    pub saved: Vec<String>,
    pub failures: Vec<SinkError>,
}

impl SaveOutcome {
    /// No sinks at all counts as success.
    pub fn all_failed(&self) -> bool {
        self.saved.is_empty() && !self.failures.is_empty()
    }
}

/// Saves to every sink concurrently, each under `timeout`.
pub async fn save_all(sinks: &[Arc<dyn Sink>], report: &Report, timeout: Duration) -> SaveOutcome {
    let saves = sinks.iter().map(|sink| async move {
        let result = match tokio::time::timeout(timeout, sink.save(report)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::new(sink.name(), format!("timed out after {:?}", timeout))),
        };
        (sink.name().to_string(), result)
    });

    let mut outcome = SaveOutcome::default();
    for (name, result) in join_all(saves).await {
        match result {
            Ok(()) => {
                info!(sink = %name, run_id = %report.run_id, "report saved");
                outcome.saved.push(name);
            }
            Err(e) => {
                warn!(sink = %name, run_id = %report.run_id, error = %e.cause, "sink failed");
                outcome.failures.push(e);
            }
        }
    }
    outcome
}
