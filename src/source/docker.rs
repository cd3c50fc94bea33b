use super::{Collection, CollectionError, LogRecord, Source};
use crate::config::types::DockerSourceConfig;
use crate::window::TimeWindow;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::process::Command;
use tracing::{debug, info};

/// Hard ceiling on `--tail`, whatever the config asks for.
pub const MAX_TAIL: usize = 50_000;

const PREFILTER_KEYWORDS: &[&str] = &[
    "error",
    "exception",
    "failed",
    "fatal",
    "critical",
    "warning",
    "err",
    "fail",
    "traceback",
    "stack",
];

/// Collects a container's output through `docker logs --timestamps`.
pub struct DockerSource {
    label: String,
    config: DockerSourceConfig,
}

impl DockerSource {
    pub fn new(label: String, config: DockerSourceConfig) -> Self {
        Self { label, config }
    }

    fn command_args(&self, window: &TimeWindow) -> Vec<String> {
        let mut args = vec!["logs".to_string(), "--timestamps".to_string()];
        if let Some(start) = window.start {
            args.push("--since".to_string());
            args.push(start.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        if let Some(end) = window.end {
            args.push("--until".to_string());
            args.push(end.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        args.push("--tail".to_string());
        args.push(self.config.tail.min(MAX_TAIL).to_string());
        args.push(self.config.container.clone());
        args
    }
}

#[async_trait]
impl Source for DockerSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn collect(&self, window: &TimeWindow) -> Result<Collection, CollectionError> {
        let args = self.command_args(window);
        debug!(source = %self.label, ?args, "running docker logs");

        let output = Command::new(&self.config.docker_bin)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                CollectionError::new(&self.label, format!("failed to run {}: {}", self.config.docker_bin, e))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(CollectionError::new(
                &self.label,
                format!("docker logs exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let fallback = window.start.unwrap_or_else(Utc::now);
        let mut records = parse_docker_output(&self.label, &stdout, &stderr, fallback);
        records.retain(|r| window.contains(r.timestamp));

        let fetched = records.len();
        let records = apply_limits(records, &self.config);
        info!(
            source = %self.label,
            fetched,
            kept = records.len(),
            "collected container logs"
        );

        Ok(Collection::complete(records))
    }
}

/// Parses both streams of `docker logs --timestamps` and merges them in
/// timestamp order. Lines without a timestamp prefix continue the previous
/// record of the same stream.
pub fn parse_docker_output(
    label: &str,
    stdout: &str,
    stderr: &str,
    fallback: DateTime<Utc>,
) -> Vec<LogRecord> {
    let mut records = parse_stream(label, stdout, fallback);
    records.extend(parse_stream(label, stderr, fallback));
    records.sort_by_key(|r| r.timestamp);
    records
}

fn parse_stream(label: &str, text: &str, fallback: DateTime<Utc>) -> Vec<LogRecord> {
    let mut records: Vec<LogRecord> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let parsed = line.split_once(' ').and_then(|(prefix, rest)| {
            DateTime::parse_from_rfc3339(prefix)
                .ok()
                .map(|ts| (ts.with_timezone(&Utc), rest))
        });

        match (parsed, records.last_mut()) {
            (Some((timestamp, rest)), _) => records.push(LogRecord::new(label, timestamp, rest)),
            (None, Some(previous)) => {
                previous.text.push('\n');
                previous.text.push_str(line);
            }
            (None, None) => records.push(LogRecord::new(label, fallback, line)),
        }
    }

    records
}

/// Keyword pre-filter, then `max_lines` (newest N), then `max_bytes`
/// (newest records that fit).
pub fn apply_limits(records: Vec<LogRecord>, config: &DockerSourceConfig) -> Vec<LogRecord> {
    let mut records = if config.prefilter {
        prefilter(records)
    } else {
        records
    };

    if let Some(max_lines) = config.max_lines {
        if records.len() > max_lines {
            records.drain(..records.len() - max_lines);
        }
    }

    if let Some(max_bytes) = config.max_bytes {
        let mut used = 0usize;
        let mut keep_from = records.len();
        for (i, record) in records.iter().enumerate().rev() {
            let size = record.text.len() + 1;
            if used + size > max_bytes {
                break;
            }
            used += size;
            keep_from = i;
        }
        records.drain(..keep_from);
    }

    records
}

fn prefilter(records: Vec<LogRecord>) -> Vec<LogRecord> {
    let matching: Vec<LogRecord> = records
        .iter()
        .filter(|r| {
            let lower = r.text.to_lowercase();
            PREFILTER_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .cloned()
        .collect();

    if matching.is_empty() {
        records
    } else {
        matching
    }
}
