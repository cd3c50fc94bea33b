use super::{CallEdge, Collection, CollectionError, PartialFailure, Source};
use crate::window::TimeWindow;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Fans out to child sources concurrently and merges their records by
/// timestamp. Fails only when every child fails.
pub struct MultiSource {
    label: String,
    children: Vec<Arc<dyn Source>>,
    call_chain: Vec<CallEdge>,
    child_timeout: Duration,
}

impl MultiSource {
    pub fn new(
        label: String,
        children: Vec<Arc<dyn Source>>,
        call_chain: Vec<CallEdge>,
        child_timeout: Duration,
    ) -> Self {
        Self {
            label,
            children,
            call_chain,
            child_timeout,
        }
    }
}

#[async_trait]
impl Source for MultiSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn call_chain(&self) -> &[CallEdge] {
        &self.call_chain
    }

    async fn collect(&self, window: &TimeWindow) -> Result<Collection, CollectionError> {
        let attempts = self.children.iter().map(|child| async move {
            let label = child.label().to_string();
            match tokio::time::timeout(self.child_timeout, child.collect(window)).await {
                Ok(result) => result,
                Err(_) => Err(CollectionError::new(
                    label,
                    format!("timed out after {:?}", self.child_timeout),
                )),
            }
        });
        let results = join_all(attempts).await;

        let mut merged = Collection::default();
        let mut succeeded = 0usize;
        for result in results {
            match result {
                Ok(collection) => {
                    succeeded += 1;
                    merged.records.extend(collection.records);
                    merged.failures.extend(collection.failures);
                }
                Err(e) => {
                    warn!(source = %self.label, child = %e.source_label, cause = %e.cause, "child source failed");
                    merged.failures.push(PartialFailure {
                        source_label: e.source_label,
                        cause: e.cause,
                    });
                }
            }
        }

        if succeeded == 0 && !self.children.is_empty() {
            let causes: Vec<String> = merged
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.source_label, f.cause))
                .collect();
            return Err(CollectionError::new(
                &self.label,
                format!("all child sources failed ({})", causes.join("; ")),
            ));
        }

        // Stable, so each child's own order survives ties.
        merged.records.sort_by_key(|r| r.timestamp);

        info!(
            source = %self.label,
            children = self.children.len(),
            failed = merged.failures.len(),
            records = merged.records.len(),
            "multi source collected"
        );
        Ok(merged)
    }
}
