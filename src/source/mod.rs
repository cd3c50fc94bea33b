pub mod docker;
pub mod file;
pub mod multi;
pub mod query;
pub mod timestamp;

use crate::config::types::SourceConfig;
use crate::window::TimeWindow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use docker::DockerSource;
pub use file::FileSource;
pub use multi::MultiSource;
pub use query::QuerySource;
pub use timestamp::{TimestampError, TimestampExtractor};

/// One log line (or multi-line entry) as collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub source_label: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl LogRecord {
    pub fn new(source_label: impl Into<String>, timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            source_label: source_label.into(),
            timestamp,
            text: text.into(),
        }
    }
}

/// Declared request flow between two labelled sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallEdge {
    pub from: String,
    pub to: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "unknown".to_string()
}

/// A child that failed while its siblings succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub source_label: String,
    pub cause: String,
}

#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub records: Vec<LogRecord>,
    pub failures: Vec<PartialFailure>,
}

impl Collection {
    pub fn complete(records: Vec<LogRecord>) -> Self {
        Self {
            records,
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("source '{source_label}' failed: {cause}")]
pub struct CollectionError {
    pub source_label: String,
    pub cause: String,
}

impl CollectionError {
    pub fn new(source_label: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            source_label: source_label.into(),
            cause: cause.to_string(),
        }
    }
}

#[async_trait]
pub trait Source: Send + Sync {
    fn label(&self) -> &str;

    /// Request flow between child labels, if this source declares one.
    fn call_chain(&self) -> &[CallEdge] {
        &[]
    }

    async fn collect(&self, window: &TimeWindow) -> Result<Collection, CollectionError>;
}

/// Builds the source tree described by `config`.
pub fn build_source(config: &SourceConfig) -> Result<Arc<dyn Source>, TimestampError> {
    let label = config.label();
    let source: Arc<dyn Source> = match config {
        SourceConfig::Docker(c) => Arc::new(DockerSource::new(label, c.clone())),
        SourceConfig::File(c) => Arc::new(FileSource::new(label, c)?),
        SourceConfig::Query(c) => Arc::new(QuerySource::new(label, c.database.clone(), c.query.clone())),
        SourceConfig::Multi(c) => {
            let children = c
                .sources
                .iter()
                .map(build_source)
                .collect::<Result<Vec<_>, _>>()?;
            Arc::new(MultiSource::new(label, children, c.call_chain.clone(), c.child_timeout))
        }
    };
    Ok(source)
}
