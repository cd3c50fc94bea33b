pub mod correlate;
pub mod merge;
pub mod parse;
pub mod prompt;
pub mod retry;
pub mod signature;

use crate::chunker::Chunk;
use crate::config::types::{AnalysisMode, AnalyzerConfig};
use crate::llm::LlmBackend;
use crate::report::{AnalysisFinding, CausalLink, Category, Confidence, Severity};
use crate::source::CallEdge;
use crate::window::TimeWindow;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub use parse::{AnalysisParseError, ParsedFinding};
pub use retry::{AnalysisError, RetryExhausted, RetryPolicy};

pub const NO_FINDINGS_NARRATIVE: &str = "No errors, warnings or notable events were found in the analyzed logs.";

pub const FALLBACK_NARRATIVE: &str =
    "Summary unavailable: the summarization step failed. See the findings below.";

const RAW_RESPONSE_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error(transparent)]
    Exhausted(#[from] RetryExhausted),

    #[error("unusable summary: {0}")]
    Unparseable(#[from] AnalysisParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisProgress {
    Chunks { total: usize, processed: usize },
    Summarizing,
}

pub type ProgressFn = Arc<dyn Fn(AnalysisProgress) + Send + Sync>;

/// Everything the analyzer contributes to a report.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub findings: Vec<AnalysisFinding>,
    pub causal_links: Vec<CausalLink>,
    pub narrative: String,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
struct ChunkOutcome {
    source_label: String,
    sequence_index: usize,
    findings: Vec<AnalysisFinding>,
    warning: Option<String>,
}

#[derive(Clone)]
pub struct Analyzer {
    backend: Arc<dyn LlmBackend>,
    config: Arc<AnalyzerConfig>,
}

impl Analyzer {
    pub fn new(backend: Arc<dyn LlmBackend>, config: AnalyzerConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn chunk_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.max_attempts,
            initial_backoff: self.config.initial_backoff,
            max_backoff: self.config.max_backoff,
            call_timeout: self.config.call_timeout,
        }
    }

    fn summary_policy(&self) -> RetryPolicy {
        RetryPolicy {
            call_timeout: self.config.summary_timeout,
            ..self.chunk_policy()
        }
    }

    /// Analyzes every chunk, merges the findings and summarizes them.
    ///
    /// Chunk failures never abort the analysis: each failed chunk becomes a
    /// synthetic finding. The result does not depend on the mode.
    pub async fn analyze(
        &self,
        chunks: Vec<Chunk>,
        call_chain: &[CallEdge],
        progress: Option<ProgressFn>,
    ) -> Analysis {
        let total = chunks.len();
        let now = Utc::now();
        let notify = move |event: AnalysisProgress| {
            if let Some(progress) = &progress {
                progress(event);
            }
        };
        notify(AnalysisProgress::Chunks { total, processed: 0 });

        let mut outcomes = match self.config.mode {
            AnalysisMode::Sequential => self.run_sequential(chunks, now, &notify).await,
            AnalysisMode::Concurrent => self.run_concurrent(chunks, now, &notify).await,
        };
        outcomes.sort_by(|a, b| {
            a.source_label
                .cmp(&b.source_label)
                .then(a.sequence_index.cmp(&b.sequence_index))
        });

        let mut warnings = Vec::new();
        let mut raw_findings = Vec::new();
        for outcome in outcomes {
            warnings.extend(outcome.warning);
            raw_findings.extend(outcome.findings);
        }
        let findings = merge::merge_findings(raw_findings.clone());

        notify(AnalysisProgress::Summarizing);
        let (narrative, causal_links) = if findings.is_empty() {
            (NO_FINDINGS_NARRATIVE.to_string(), Vec::new())
        } else {
            match self.summarize(&findings, &raw_findings, call_chain).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(error = %e, "summarization failed, using fallback narrative");
                    warnings.push(format!("summarization failed: {}", e));
                    (FALLBACK_NARRATIVE.to_string(), Vec::new())
                }
            }
        };

        info!(
            chunks = total,
            findings = findings.len(),
            causal_links = causal_links.len(),
            warnings = warnings.len(),
            "analysis complete"
        );

        Analysis {
            findings,
            causal_links,
            narrative,
            warnings,
        }
    }

    async fn run_sequential(
        &self,
        chunks: Vec<Chunk>,
        now: DateTime<Utc>,
        notify: &(dyn Fn(AnalysisProgress) + Send + Sync),
    ) -> Vec<ChunkOutcome> {
        let total = chunks.len();
        let policy = self.chunk_policy();
        let template = self.config.prompts.analyze.as_deref();

        let mut outcomes = Vec::with_capacity(total);
        for (i, chunk) in chunks.iter().enumerate() {
            outcomes.push(analyze_chunk(self.backend.as_ref(), &policy, template, chunk, now).await);
            notify(AnalysisProgress::Chunks {
                total,
                processed: i + 1,
            });
        }
        outcomes
    }

    /// Workers live in a `JoinSet`, so dropping this future (a run deadline)
    /// aborts every in-flight chunk call.
    async fn run_concurrent(
        &self,
        chunks: Vec<Chunk>,
        now: DateTime<Utc>,
        notify: &(dyn Fn(AnalysisProgress) + Send + Sync),
    ) -> Vec<ChunkOutcome> {
        let total = chunks.len();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let policy = self.chunk_policy();

        let identities: Vec<(String, usize, TimeWindow)> = chunks
            .iter()
            .map(|c| (c.source_label.clone(), c.sequence_index, c.span))
            .collect();

        let mut workers = JoinSet::new();
        for (slot, chunk) in chunks.into_iter().enumerate() {
            let backend = self.backend.clone();
            let config = self.config.clone();
            let semaphore = semaphore.clone();

            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let template = config.prompts.analyze.as_deref();
                let outcome = analyze_chunk(backend.as_ref(), &policy, template, &chunk, now).await;
                (slot, outcome)
            });
        }

        let mut slots: Vec<Option<ChunkOutcome>> = (0..total).map(|_| None).collect();
        let mut processed = 0;
        while let Some(joined) = workers.join_next().await {
            processed += 1;
            match joined {
                Ok((slot, outcome)) => slots[slot] = Some(outcome),
                Err(e) => warn!(error = %e, "analysis worker failed"),
            }
            notify(AnalysisProgress::Chunks { total, processed });
        }

        slots
            .into_iter()
            .zip(identities)
            .map(|(outcome, (label, index, span))| {
                outcome.unwrap_or_else(|| {
                    let cause = "analysis worker failed".to_string();
                    let start = span.start.unwrap_or(now);
                    let end = span.end.unwrap_or(start);
                    ChunkOutcome {
                        findings: vec![failed_chunk_finding(&label, index, start, end, &cause)],
                        warning: Some(format!("chunk {}#{}: {}", label, index, cause)),
                        source_label: label,
                        sequence_index: index,
                    }
                })
            })
            .collect()
    }

    /// Edges are correlated on `per_source` findings, before merging folds
    /// spans from different sources together.
    async fn summarize(
        &self,
        findings: &[AnalysisFinding],
        per_source: &[AnalysisFinding],
        call_chain: &[CallEdge],
    ) -> Result<(String, Vec<CausalLink>), SummarizationError> {
        let candidates = correlate::candidates(per_source, call_chain, self.config.correlation_slack);
        debug!(
            edges = call_chain.len(),
            candidates = candidates.len(),
            "summarizing findings"
        );

        let request = prompt::summary_request(
            self.config.prompts.summarize.as_deref(),
            findings,
            call_chain,
            &candidates,
        );
        let text = self
            .summary_policy()
            .call(self.backend.as_ref(), &request, "summary")
            .await?;
        let output = parse::parse_summary_response(&text)?;

        Ok((
            output.narrative.trim().to_string(),
            correlate::build_links(&candidates, &output.causal_links),
        ))
    }
}

async fn analyze_chunk(
    backend: &dyn LlmBackend,
    policy: &RetryPolicy,
    template: Option<&str>,
    chunk: &Chunk,
    now: DateTime<Utc>,
) -> ChunkOutcome {
    let context = format!("{}#{}", chunk.source_label, chunk.sequence_index);
    let request = prompt::chunk_request(template, chunk, now);
    let span_start = chunk.span.start.unwrap_or(now);
    let span_end = chunk.span.end.unwrap_or(span_start);

    let (findings, warning) = match policy.call(backend, &request, &context).await {
        Ok(text) => match parse::parse_chunk_response(&text) {
            Ok(parsed) => (
                parsed
                    .into_iter()
                    .map(|p| to_finding(p, &chunk.source_label, span_start, span_end))
                    .collect(),
                None,
            ),
            Err(e) => {
                debug!(chunk = %context, error = %e, "unstructured analysis response");
                (
                    vec![unparsed_finding(&chunk.source_label, chunk.sequence_index, span_start, span_end, &text)],
                    Some(format!("chunk {}: unstructured response ({})", context, e)),
                )
            }
        },
        Err(e) => (
            vec![failed_chunk_finding(
                &chunk.source_label,
                chunk.sequence_index,
                span_start,
                span_end,
                &e.to_string(),
            )],
            Some(format!("chunk {}: {}", context, e)),
        ),
    };

    ChunkOutcome {
        source_label: chunk.source_label.clone(),
        sequence_index: chunk.sequence_index,
        findings,
        warning,
    }
}

/// Model-reported times are kept only when they fall inside the chunk.
fn to_finding(
    parsed: ParsedFinding,
    label: &str,
    span_start: DateTime<Utc>,
    span_end: DateTime<Utc>,
) -> AnalysisFinding {
    let within = |ts: &DateTime<Utc>| *ts >= span_start && *ts <= span_end;
    let first_seen = parsed.first_seen.filter(within).unwrap_or(span_start);
    let last_seen = parsed.last_seen.filter(within).unwrap_or(span_end).max(first_seen);

    AnalysisFinding {
        signature: signature::signature(parsed.category, &parsed.description),
        category: parsed.category,
        description: parsed.description,
        occurrences: parsed.occurrences.unwrap_or(1).max(1),
        first_seen,
        last_seen,
        source_labels: BTreeSet::from([label.to_string()]),
        severity: parsed.severity.unwrap_or(Severity::default_for(parsed.category)),
        confidence: Confidence::High,
    }
}

fn unparsed_finding(
    label: &str,
    sequence_index: usize,
    span_start: DateTime<Utc>,
    span_end: DateTime<Utc>,
    raw: &str,
) -> AnalysisFinding {
    let mut excerpt: String = raw.trim().chars().take(RAW_RESPONSE_LIMIT).collect();
    if raw.trim().chars().count() > RAW_RESPONSE_LIMIT {
        excerpt.push_str("...");
    }

    AnalysisFinding {
        category: Category::Info,
        signature: format!("analysis-unparsed:{}:{}", label, sequence_index),
        description: format!("Unstructured analysis output: {}", excerpt),
        occurrences: 1,
        first_seen: span_start,
        last_seen: span_end,
        source_labels: BTreeSet::from([label.to_string()]),
        severity: Severity::Low,
        confidence: Confidence::Low,
    }
}

fn failed_chunk_finding(
    label: &str,
    sequence_index: usize,
    span_start: DateTime<Utc>,
    span_end: DateTime<Utc>,
    cause: &str,
) -> AnalysisFinding {
    AnalysisFinding {
        category: Category::Error,
        signature: format!("analysis-failed:{}:{}", label, sequence_index),
        description: format!(
            "Analysis of chunk {} from {} failed: {}",
            sequence_index, label, cause
        ),
        occurrences: 1,
        first_seen: span_start,
        last_seen: span_end,
        source_labels: BTreeSet::from([label.to_string()]),
        severity: Severity::High,
        confidence: Confidence::High,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker;
    use crate::llm::{LlmError, LlmRequest};
    use crate::source::LogRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers chunk prompts by echoing one finding per log line.
    struct Echo {
        summaries: Mutex<u32>,
    }

    #[async_trait]
    impl LlmBackend for Echo {
        async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
            if request.system == prompt::SUMMARY_SYSTEM_PROMPT {
                *self.summaries.lock().unwrap() += 1;
                return Ok(r#"{"narrative": "all good", "causal_links": []}"#.to_string());
            }
            let findings: Vec<String> = request
                .prompt
                .lines()
                .filter_map(|l| l.split("] ").nth(2))
                .map(|text| format!(r#"{{"category": "error", "description": "{}"}}"#, text))
                .collect();
            Ok(format!(r#"{{"findings": [{}]}}"#, findings.join(",")))
        }
    }

    fn config(mode: AnalysisMode) -> AnalyzerConfig {
        AnalyzerConfig {
            mode,
            max_chunk_chars: 20,
            initial_backoff: Duration::from_millis(1),
            ..AnalyzerConfig::default()
        }
    }

    fn records() -> Vec<LogRecord> {
        let at = |s: i64| DateTime::from_timestamp(1_735_725_600 + s, 0).unwrap();
        vec![
            LogRecord::new("api", at(0), "timeout 1"),
            LogRecord::new("db", at(1), "lock wait 7"),
            LogRecord::new("api", at(2), "timeout 2"),
            LogRecord::new("api", at(3), "disk full"),
        ]
    }

    /// Takes a minute on lines mentioning "slow", a second otherwise.
    struct Uneven;

    #[async_trait]
    impl LlmBackend for Uneven {
        async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
            if request.system == prompt::SUMMARY_SYSTEM_PROMPT {
                return Ok(r#"{"narrative": "done", "causal_links": []}"#.to_string());
            }
            let delay = if request.prompt.contains("slow") { 60 } else { 1 };
            tokio::time::sleep(Duration::from_secs(delay)).await;
            Ok(r#"{"findings": []}"#.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_progress_counts_completions() {
        let at = |s: i64| DateTime::from_timestamp(1_735_725_600 + s, 0).unwrap();
        let records = vec![
            LogRecord::new("api", at(0), "slow query"),
            LogRecord::new("api", at(1), "cache hit"),
            LogRecord::new("api", at(2), "cache miss"),
        ];
        let chunks = chunker::split(&records, 10_000, 1);
        assert_eq!(chunks.len(), 3);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let progress: ProgressFn = {
            let seen = seen.clone();
            Arc::new(move |event: AnalysisProgress| {
                if let AnalysisProgress::Chunks { processed, .. } = event {
                    seen.lock().unwrap().push(processed);
                }
            })
        };
        let analyzer = Analyzer::new(
            Arc::new(Uneven),
            AnalyzerConfig {
                mode: AnalysisMode::Concurrent,
                concurrency: 3,
                ..AnalyzerConfig::default()
            },
        );

        let handle = tokio::spawn(async move { analyzer.analyze(chunks, &[], Some(progress)).await });
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);

        handle.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_input_skips_summary() {
        let echo = Arc::new(Echo {
            summaries: Mutex::new(0),
        });
        let analyzer = Analyzer::new(echo.clone(), config(AnalysisMode::Sequential));

        let analysis = analyzer.analyze(Vec::new(), &[], None).await;
        assert!(analysis.findings.is_empty());
        assert_eq!(analysis.narrative, NO_FINDINGS_NARRATIVE);
        assert_eq!(*echo.summaries.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_modes_agree() {
        let chunks = chunker::split(&records(), 20, 100);
        assert!(chunks.len() > 2);

        let sequential = Analyzer::new(
            Arc::new(Echo { summaries: Mutex::new(0) }),
            config(AnalysisMode::Sequential),
        )
        .analyze(chunks.clone(), &[], None)
        .await;
        let concurrent = Analyzer::new(
            Arc::new(Echo { summaries: Mutex::new(0) }),
            config(AnalysisMode::Concurrent),
        )
        .analyze(chunks, &[], None)
        .await;

        assert_eq!(sequential, concurrent);
        let timeout = sequential
            .findings
            .iter()
            .find(|f| f.signature == "error:timeout <n>")
            .unwrap();
        assert_eq!(timeout.occurrences, 2);
    }

    #[tokio::test]
    async fn test_progress_reaches_total() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |p| sink.lock().unwrap().push(p));

        let chunks = chunker::split(&records(), 20, 100);
        let total = chunks.len();
        Analyzer::new(
            Arc::new(Echo { summaries: Mutex::new(0) }),
            config(AnalysisMode::Concurrent),
        )
        .analyze(chunks, &[], Some(progress))
        .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&AnalysisProgress::Chunks { total, processed: 0 }));
        assert!(seen.contains(&AnalysisProgress::Chunks { total, processed: total }));
        assert_eq!(seen.last(), Some(&AnalysisProgress::Summarizing));
    }

    #[test]
    fn test_model_times_clamped_to_chunk() {
        let start: DateTime<Utc> = "2025-01-01T10:00:00Z".parse().unwrap();
        let end: DateTime<Utc> = "2025-01-01T10:05:00Z".parse().unwrap();
        let finding = to_finding(
            ParsedFinding {
                category: Category::Warning,
                description: "slow".to_string(),
                severity: None,
                occurrences: Some(0),
                first_seen: Some("2024-01-01T00:00:00Z".parse().unwrap()),
                last_seen: Some("2025-01-01T10:01:00Z".parse().unwrap()),
            },
            "api",
            start,
            end,
        );

        assert_eq!(finding.first_seen, start);
        assert_eq!(finding.last_seen, "2025-01-01T10:01:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(finding.occurrences, 1);
        assert_eq!(finding.severity, Severity::Medium);
    }
}
