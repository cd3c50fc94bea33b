//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logsift::analyzer::prompt::SUMMARY_SYSTEM_PROMPT;
use logsift::llm::{LlmBackend, LlmError, LlmRequest};
use logsift::report::Report;
use logsift::sink::{Sink, SinkError};
use logsift::source::{CallEdge, Collection, CollectionError, LogRecord, Source};
use logsift::window::TimeWindow;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn base_time() -> DateTime<Utc> {
    "2025-03-01T10:00:00Z".parse().unwrap()
}

pub fn at(offset_secs: i64) -> DateTime<Utc> {
    base_time() + chrono::Duration::seconds(offset_secs)
}

pub fn record(label: &str, offset_secs: i64, text: &str) -> LogRecord {
    LogRecord::new(label, at(offset_secs), text)
}

pub fn edge(from: &str, to: &str) -> CallEdge {
    CallEdge {
        from: from.to_string(),
        to: to.to_string(),
        protocol: "http".to_string(),
    }
}

/// Classifies each record line of a chunk prompt by keyword: "error" or
/// "refused" is an error, "warn" a warning, anything else is ignored.
/// Summary requests get a fixed narrative unless told to fail.
pub struct ScriptedBackend {
    pub analysis_calls: AtomicUsize,
    pub summary_calls: AtomicUsize,
    fail_analysis: bool,
    fail_summary: bool,
    proposed_links: serde_json::Value,
    latency: Duration,
}

pub const SUMMARY_NARRATIVE: &str = "Connections to the database were refused.";

impl ScriptedBackend {
    pub fn keyword() -> Self {
        Self {
            analysis_calls: AtomicUsize::new(0),
            summary_calls: AtomicUsize::new(0),
            fail_analysis: false,
            fail_summary: false,
            proposed_links: json!([]),
            latency: Duration::ZERO,
        }
    }

    /// Every call takes `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing_analysis() -> Self {
        Self {
            fail_analysis: true,
            ..Self::keyword()
        }
    }

    pub fn failing_summary() -> Self {
        Self {
            fail_summary: true,
            ..Self::keyword()
        }
    }

    /// Proposes a link for every given edge, as a model that over-reaches would.
    pub fn proposing(edges: &[CallEdge]) -> Self {
        let links = edges
            .iter()
            .map(|e| json!({"from": e.from, "to": e.to, "hypothesis": format!("{} broke {}", e.to, e.from)}))
            .collect::<Vec<_>>();
        Self {
            proposed_links: json!(links),
            ..Self::keyword()
        }
    }

    fn classify(prompt: &str) -> serde_json::Value {
        let findings: Vec<serde_json::Value> = prompt
            .lines()
            .filter_map(parse_record_line)
            .filter_map(|(ts, text)| {
                let lower = text.to_lowercase();
                let category = if lower.contains("error") || lower.contains("refused") {
                    "error"
                } else if lower.contains("warn") {
                    "warning"
                } else {
                    return None;
                };
                Some(json!({
                    "category": category,
                    "description": text,
                    "first_seen": ts,
                    "last_seen": ts,
                }))
            })
            .collect();
        json!({ "findings": findings })
    }
}

/// Splits `[ts] [label] text` into `(ts, text)`.
fn parse_record_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix('[')?;
    let (ts, rest) = rest.split_once("] [")?;
    DateTime::parse_from_rfc3339(ts).ok()?;
    let (_label, text) = rest.split_once("] ")?;
    Some((ts.to_string(), text.to_string()))
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let summary = request.system == SUMMARY_SYSTEM_PROMPT;
        let counter = if summary {
            &self.summary_calls
        } else {
            &self.analysis_calls
        };
        counter.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if summary {
            if self.fail_summary {
                return Err(LlmError::Status {
                    status: 503,
                    message: "overloaded".to_string(),
                });
            }
            return Ok(json!({
                "narrative": SUMMARY_NARRATIVE,
                "causal_links": self.proposed_links,
            })
            .to_string());
        }

        if self.fail_analysis {
            return Err(LlmError::Status {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        Ok(format!("```json\n{}\n```", Self::classify(&request.prompt)))
    }
}

/// Returns fixed records after an optional delay.
pub struct StaticSource {
    label: String,
    records: Vec<LogRecord>,
    call_chain: Vec<CallEdge>,
    delay: Duration,
}

impl StaticSource {
    pub fn new(label: &str, records: Vec<LogRecord>) -> Self {
        Self {
            label: label.to_string(),
            records,
            call_chain: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_call_chain(mut self, call_chain: Vec<CallEdge>) -> Self {
        self.call_chain = call_chain;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Source for StaticSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn call_chain(&self) -> &[CallEdge] {
        &self.call_chain
    }

    async fn collect(&self, _window: &TimeWindow) -> Result<Collection, CollectionError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Collection::complete(self.records.clone()))
    }
}

pub struct FailingSource(pub &'static str);

#[async_trait]
impl Source for FailingSource {
    fn label(&self) -> &str {
        self.0
    }

    async fn collect(&self, _window: &TimeWindow) -> Result<Collection, CollectionError> {
        Err(CollectionError::new(self.0, "container not found"))
    }
}

/// Keeps the canonical bytes of every saved report.
#[derive(Default)]
pub struct MemorySink {
    pub saved: Mutex<Vec<Vec<u8>>>,
}

impl MemorySink {
    pub fn last(&self) -> Option<Vec<u8>> {
        self.saved.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, report: &Report) -> Result<(), SinkError> {
        let bytes = report.to_json_bytes().map_err(|e| SinkError::new("memory", e))?;
        self.saved.lock().unwrap().push(bytes);
        Ok(())
    }
}

pub struct FailingSink;

#[async_trait]
impl Sink for FailingSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn save(&self, _report: &Report) -> Result<(), SinkError> {
        Err(SinkError::new("broken", "disk full"))
    }
}
