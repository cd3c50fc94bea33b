use super::{Sink, SinkError};
use crate::report::Report;
use async_trait::async_trait;
use ::duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Stores reports in a `reports` table keyed by run id.
pub struct DuckDbSink {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbSink {
    pub fn new(path: &Path) -> Result<Self, SinkError> {
        let name = format!("duckdb:{}", path.display());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SinkError::new(&name, e))?;
        }
        let conn = Connection::open(path).map_err(|e| SinkError::new(&name, e))?;
        Self::with_connection(name, conn)
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory().map_err(|e| SinkError::new("duckdb:memory", e))?;
        Self::with_connection("duckdb:memory".to_string(), conn)
    }

    fn with_connection(name: String, conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS reports (
                run_id VARCHAR PRIMARY KEY,
                task_name VARCHAR NOT NULL,
                generated_at TIMESTAMPTZ NOT NULL,
                finding_count INTEGER NOT NULL,
                narrative VARCHAR NOT NULL,
                digest VARCHAR NOT NULL,
                report_json VARCHAR NOT NULL
            );",
        )
        .map_err(|e| SinkError::new(&name, e))?;

        Ok(Self {
            name,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Stored JSON for a run, exactly as saved.
    pub async fn load_json(&self, run_id: uuid::Uuid) -> Result<Option<String>, SinkError> {
        let conn = self.conn.clone();
        let name = self.name.clone();
        let run_id = run_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| SinkError::new(&name, "connection lock poisoned"))?;
            let mut stmt = conn
                .prepare("SELECT report_json FROM reports WHERE run_id = ?")
                .map_err(|e| SinkError::new(&name, e))?;
            let mut rows = stmt
                .query(::duckdb::params![run_id])
                .map_err(|e| SinkError::new(&name, e))?;

            let json = match rows.next().map_err(|e| SinkError::new(&name, e))? {
                Some(row) => Some(row.get::<_, String>(0).map_err(|e| SinkError::new(&name, e))?),
                None => None,
            };
            Ok(json)
        })
        .await
        .map_err(|e| SinkError::new(&self.name, format!("task join error: {}", e)))?
    }

    pub async fn count(&self) -> Result<i64, SinkError> {
        let conn = self.conn.clone();
        let name = self.name.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| SinkError::new(&name, "connection lock poisoned"))?;
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))
                .map_err(|e| SinkError::new(&name, e))?;
            Ok(count)
        })
        .await
        .map_err(|e| SinkError::new(&self.name, format!("task join error: {}", e)))?
    }
}

#[async_trait]
impl Sink for DuckDbSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, report: &Report) -> Result<(), SinkError> {
        let bytes = report.to_json_bytes().map_err(|e| SinkError::new(&self.name, e))?;
        let json = String::from_utf8(bytes).map_err(|e| SinkError::new(&self.name, e))?;
        let digest = crate::report::sha256_hex(json.as_bytes());

        let conn = self.conn.clone();
        let name = self.name.clone();
        let run_id = report.run_id.to_string();
        let task_name = report.task_name.clone();
        let generated_at = report.generated_at.timestamp_micros();
        let finding_count = report.findings.len() as i64;
        let narrative = report.narrative.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| SinkError::new(&name, "connection lock poisoned"))?;
            conn.execute(
                "INSERT OR REPLACE INTO reports
                    (run_id, task_name, generated_at, finding_count, narrative, digest, report_json)
                 VALUES (?, ?, to_timestamp(? / 1000000.0), ?, ?, ?, ?)",
                ::duckdb::params![run_id, task_name, generated_at, finding_count, narrative, digest, json],
            )
            .map_err(|e| SinkError::new(&name, e))?;
            Ok::<(), SinkError>(())
        })
        .await
        .map_err(|e| SinkError::new(&self.name, format!("task join error: {}", e)))?
    }
}
