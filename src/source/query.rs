use super::{Collection, CollectionError, LogRecord, Source};
use crate::window::TimeWindow;
use async_trait::async_trait;
use chrono::DateTime;
use duckdb::Connection;
use std::path::PathBuf;
use tracing::debug;

/// Runs a SQL query against a DuckDB file. The first two result columns
/// must be `(epoch_us BIGINT, text VARCHAR)`; `{start_us}` and `{end_us}`
/// in the query are replaced with the window bounds.
pub struct QuerySource {
    label: String,
    database: PathBuf,
    query: String,
}

impl QuerySource {
    pub fn new(label: String, database: PathBuf, query: String) -> Self {
        Self {
            label,
            database,
            query,
        }
    }

    fn render_query(&self, window: &TimeWindow) -> String {
        let start_us = window.start.map_or(0, |s| s.timestamp_micros());
        let end_us = window.end.map_or(i64::MAX, |e| e.timestamp_micros());
        self.query
            .replace("{start_us}", &start_us.to_string())
            .replace("{end_us}", &end_us.to_string())
    }
}

#[async_trait]
impl Source for QuerySource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn collect(&self, window: &TimeWindow) -> Result<Collection, CollectionError> {
        // Connection::open would create a missing file.
        if !self.database.exists() {
            return Err(CollectionError::new(
                &self.label,
                format!("database '{}' does not exist", self.database.display()),
            ));
        }

        let sql = self.render_query(window);
        let database = self.database.clone();
        let label = self.label.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&database)?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<_, duckdb::Error>(out)
        })
        .await
        .map_err(|e| CollectionError::new(&self.label, format!("task join error: {}", e)))?
        .map_err(|e| CollectionError::new(&self.label, e))?;

        let mut records = Vec::with_capacity(rows.len());
        for (micros, text) in rows {
            let Some(timestamp) = DateTime::from_timestamp_micros(micros) else {
                return Err(CollectionError::new(
                    &label,
                    format!("row timestamp {} is out of range", micros),
                ));
            };
            records.push(LogRecord::new(&label, timestamp, text));
        }
        records.retain(|r| window.contains(r.timestamp));

        debug!(source = %label, records = records.len(), "query source collected");
        Ok(Collection::complete(records))
    }
}
