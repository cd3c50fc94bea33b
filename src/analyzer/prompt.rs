use super::correlate::CorrelationCandidate;
use crate::chunker::Chunk;
use crate::llm::LlmRequest;
use crate::report::AnalysisFinding;
use crate::source::{CallEdge, LogRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;

pub const ANALYSIS_SYSTEM_PROMPT: &str = "You are an operations engineer triaging production logs. \
You answer only with the JSON structure you are asked for.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are an operations engineer writing the incident summary \
for a batch of already-classified log findings. You answer only with the JSON structure you are asked for.";

pub const DEFAULT_ANALYZE_TEMPLATE: &str = r#"Current time: {current_time}
Source: {source_label}

Review the log lines below and list every distinct error, warning or notable
event. Group repeated lines into one finding and count them.

Answer with a single JSON object:
{"findings": [{"category": "error|warning|info",
               "description": "<one line, no ids or numbers that vary>",
               "severity": "low|medium|high|critical",
               "occurrences": <count>,
               "first_seen": "<RFC 3339>",
               "last_seen": "<RFC 3339>"}]}

If nothing is worth reporting answer {"findings": []}.

Logs:
{log_chunk}"#;

pub const DEFAULT_SUMMARIZE_TEMPLATE: &str = r#"These findings were extracted from the logs of one monitoring run.

Findings:
{findings}

Declared call chain:
{call_chain}

Correlation candidates (edges with overlapping findings on both sides):
{candidates}

Write a short incident narrative covering the most severe issues first. For
each correlation candidate you believe is causal, give a one-sentence
hypothesis.

Answer with a single JSON object:
{"narrative": "<text>",
 "causal_links": [{"from": "<label>", "to": "<label>", "hypothesis": "<text>"}]}"#;

pub fn format_record(record: &LogRecord) -> String {
    format!(
        "[{}] [{}] {}",
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        record.source_label,
        record.text
    )
}

pub fn format_records(records: &[LogRecord]) -> String {
    records.iter().map(format_record).collect::<Vec<_>>().join("\n")
}

/// Request for one chunk. Log text is substituted last so that braces in
/// the logs are never treated as placeholders.
pub fn chunk_request(template: Option<&str>, chunk: &Chunk, now: DateTime<Utc>) -> LlmRequest {
    let prompt = template
        .unwrap_or(DEFAULT_ANALYZE_TEMPLATE)
        .replace("{source_label}", &chunk.source_label)
        .replace("{current_time}", &now.to_rfc3339_opts(SecondsFormat::Secs, true))
        .replace("{log_chunk}", &format_records(&chunk.records));

    LlmRequest {
        system: ANALYSIS_SYSTEM_PROMPT.to_string(),
        prompt,
    }
}

pub fn summary_request(
    template: Option<&str>,
    findings: &[AnalysisFinding],
    call_chain: &[CallEdge],
    candidates: &[CorrelationCandidate],
) -> LlmRequest {
    let chain = if call_chain.is_empty() {
        "(none)".to_string()
    } else {
        call_chain
            .iter()
            .map(|e| format!("- {} -> {} ({})", e.from, e.to, e.protocol))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let candidate_text = if candidates.is_empty() {
        "(none)".to_string()
    } else {
        candidates
            .iter()
            .map(|c| format!("- {} -> {}: {}", c.edge.from, c.edge.to, c.evidence.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let prompt = template
        .unwrap_or(DEFAULT_SUMMARIZE_TEMPLATE)
        .replace("{call_chain}", &chain)
        .replace("{candidates}", &candidate_text)
        .replace("{findings}", &format_findings(findings));

    LlmRequest {
        system: SUMMARY_SYSTEM_PROMPT.to_string(),
        prompt,
    }
}

fn format_findings(findings: &[AnalysisFinding]) -> String {
    let mut out = String::new();
    for (i, f) in findings.iter().enumerate() {
        let labels: Vec<&str> = f.source_labels.iter().map(String::as_str).collect();
        let _ = writeln!(
            out,
            "{}. [{}/{}] {} (x{}, sources: {}, {} .. {}) signature={}",
            i + 1,
            f.category.as_str(),
            f.severity.as_str(),
            f.description,
            f.occurrences,
            labels.join(","),
            f.first_seen.to_rfc3339_opts(SecondsFormat::Secs, true),
            f.last_seen.to_rfc3339_opts(SecondsFormat::Secs, true),
            f.signature
        );
    }
    out.trim_end().to_string()
}
