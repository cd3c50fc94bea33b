use super::timestamp::{TimestampError, TimestampExtractor};
use super::{Collection, CollectionError, LogRecord, Source};
use crate::config::types::FileSourceConfig;
use crate::window::TimeWindow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, warn};

const DEFAULT_PATTERN: &str =
    r"^(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2}))";

/// Reads a whole log file and keeps the records inside the window.
pub struct FileSource {
    label: String,
    path: PathBuf,
    extractor: TimestampExtractor,
}

impl FileSource {
    pub fn new(label: String, config: &FileSourceConfig) -> Result<Self, TimestampError> {
        let extractor = match &config.timestamp {
            Some(ts) => TimestampExtractor::new(&ts.pattern, &ts.format)?,
            None => TimestampExtractor::new(DEFAULT_PATTERN, "iso8601")?,
        };

        Ok(Self {
            label,
            path: config.path.clone(),
            extractor,
        })
    }

    /// Splits file contents into records.
    ///
    /// A line without a timestamp that starts with whitespace continues the
    /// previous record; any other untimestamped line inherits the previous
    /// timestamp, or `fallback` when it is the first.
    pub fn parse(&self, contents: &str, fallback: DateTime<Utc>) -> Vec<LogRecord> {
        let mut records: Vec<LogRecord> = Vec::new();
        let mut parse_errors = 0usize;

        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }

            let timestamp = match self.extractor.extract(line) {
                Ok(ts) => ts,
                Err(e) => {
                    parse_errors += 1;
                    debug!(source = %self.label, error = %e, "unparseable timestamp");
                    None
                }
            };

            match timestamp {
                Some(ts) => records.push(LogRecord::new(&self.label, ts, line)),
                None => match records.last_mut() {
                    Some(previous) if line.starts_with(char::is_whitespace) => {
                        previous.text.push('\n');
                        previous.text.push_str(line);
                    }
                    Some(previous) => {
                        let ts = previous.timestamp;
                        records.push(LogRecord::new(&self.label, ts, line));
                    }
                    None => records.push(LogRecord::new(&self.label, fallback, line)),
                },
            }
        }

        if parse_errors > 0 {
            warn!(
                source = %self.label,
                parse_errors,
                "some timestamps could not be parsed"
            );
        }

        records
    }
}

#[async_trait]
impl Source for FileSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn collect(&self, window: &TimeWindow) -> Result<Collection, CollectionError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CollectionError::new(&self.label, format!("failed to read '{}': {}", self.path.display(), e))
        })?;

        let fallback = window.start.unwrap_or_else(Utc::now);
        let mut records = self.parse(&contents, fallback);
        records.retain(|r| window.contains(r.timestamp));

        debug!(source = %self.label, path = %self.path.display(), records = records.len(), "read log file");
        Ok(Collection::complete(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::TimestampConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn source_for(path: PathBuf) -> FileSource {
        FileSource::new(
            "payments".to_string(),
            &FileSourceConfig {
                path,
                label: None,
                timestamp: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_multiline_and_window() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "2025-01-01T09:59:00Z stale entry").unwrap();
        writeln!(file, "2025-01-01T10:00:01Z ERROR charge failed").unwrap();
        writeln!(file, "    at Gateway.charge(gateway.rs:41)").unwrap();
        writeln!(file, "retrying").unwrap();
        writeln!(file, "2025-01-01T10:00:05Z charge ok").unwrap();
        file.flush().unwrap();

        let source = source_for(file.path().to_path_buf());
        let window = TimeWindow::new(
            "2025-01-01T10:00:00Z".parse().unwrap(),
            "2025-01-01T11:00:00Z".parse().unwrap(),
        );
        let collection = source.collect(&window).await.unwrap();
        let records = collection.records;

        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0].text,
            "2025-01-01T10:00:01Z ERROR charge failed\n    at Gateway.charge(gateway.rs:41)"
        );
        assert_eq!(records[1].text, "retrying");
        assert_eq!(records[1].timestamp, records[0].timestamp);
        assert_eq!(records[2].text, "2025-01-01T10:00:05Z charge ok");
    }

    #[tokio::test]
    async fn test_custom_format() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1735725601 worker crashed").unwrap();
        file.flush().unwrap();

        let source = FileSource::new(
            "worker".to_string(),
            &FileSourceConfig {
                path: file.path().to_path_buf(),
                label: Some("worker".to_string()),
                timestamp: Some(TimestampConfig {
                    pattern: r"^(?P<ts>\d{10})".to_string(),
                    format: "epoch".to_string(),
                }),
            },
        )
        .unwrap();

        let collection = source.collect(&TimeWindow::unbounded()).await.unwrap();
        assert_eq!(collection.records.len(), 1);
        assert_eq!(collection.records[0].timestamp.timestamp(), 1735725601);
    }

    #[tokio::test]
    async fn test_missing_file_is_collection_error() {
        let source = source_for(PathBuf::from("/nonexistent/logsift/app.log"));
        let err = source.collect(&TimeWindow::unbounded()).await.unwrap_err();
        assert_eq!(err.source_label, "payments");
        assert!(err.cause.contains("failed to read"));
    }
}
