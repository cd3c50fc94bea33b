//! Tolerant extraction of the model's structured answers.

use crate::report::{Category, Severity};
use crate::window::parse_instant;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Marker a model may answer with when a chunk holds nothing notable.
pub const NONE_MARKER: &str = "<NONE>";

#[derive(Debug, Error)]
pub enum AnalysisParseError {
    #[error("response is empty")]
    Empty,

    #[error("response contains no JSON object")]
    NoJson,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("finding {index}: {reason}")]
    InvalidFinding { index: usize, reason: String },
}

/// One finding as the model reported it, before signatures and merging.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFinding {
    pub category: Category,
    pub description: String,
    pub severity: Option<Severity>,
    pub occurrences: Option<u64>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawChunkOutput {
    findings: Vec<RawFinding>,
}

#[derive(Deserialize)]
struct RawFinding {
    category: String,
    description: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    occurrences: Option<u64>,
    #[serde(default)]
    first_seen: Option<String>,
    #[serde(default)]
    last_seen: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProposedLink {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub hypothesis: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SummaryOutput {
    pub narrative: String,
    #[serde(default)]
    pub causal_links: Vec<ProposedLink>,
}

/// Finds the JSON object in a model response: the whole response, a fenced
/// code block, or the span between the outermost braces.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') && inner.ends_with('}') {
                return Some(inner);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

pub fn parse_chunk_response(text: &str) -> Result<Vec<ParsedFinding>, AnalysisParseError> {
    if text.trim().is_empty() {
        return Err(AnalysisParseError::Empty);
    }

    let Some(json) = extract_json(text) else {
        if text.contains(NONE_MARKER) {
            return Ok(Vec::new());
        }
        return Err(AnalysisParseError::NoJson);
    };

    let raw: RawChunkOutput = serde_json::from_str(json)?;
    raw.findings
        .into_iter()
        .enumerate()
        .map(|(index, f)| convert(index, f))
        .collect()
}

fn convert(index: usize, raw: RawFinding) -> Result<ParsedFinding, AnalysisParseError> {
    let category = parse_category(&raw.category).ok_or_else(|| AnalysisParseError::InvalidFinding {
        index,
        reason: format!("unknown category '{}'", raw.category),
    })?;

    let description = raw.description.trim().to_string();
    if description.is_empty() {
        return Err(AnalysisParseError::InvalidFinding {
            index,
            reason: "empty description".to_string(),
        });
    }

    Ok(ParsedFinding {
        category,
        description,
        severity: raw.severity.as_deref().and_then(parse_severity),
        occurrences: raw.occurrences,
        first_seen: raw.first_seen.as_deref().and_then(|s| parse_instant(s).ok()),
        last_seen: raw.last_seen.as_deref().and_then(|s| parse_instant(s).ok()),
    })
}

fn parse_category(value: &str) -> Option<Category> {
    match value.trim().to_lowercase().as_str() {
        "error" | "err" | "exception" | "fatal" | "critical" => Some(Category::Error),
        "warning" | "warn" => Some(Category::Warning),
        "info" | "information" | "notice" => Some(Category::Info),
        _ => None,
    }
}

fn parse_severity(value: &str) -> Option<Severity> {
    match value.trim().to_lowercase().as_str() {
        "low" | "minor" => Some(Severity::Low),
        "medium" | "moderate" => Some(Severity::Medium),
        "high" | "major" => Some(Severity::High),
        "critical" | "fatal" => Some(Severity::Critical),
        _ => None,
    }
}

/// Structured summary when the model returned one, otherwise the prose
/// itself becomes the narrative.
pub fn parse_summary_response(text: &str) -> Result<SummaryOutput, AnalysisParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AnalysisParseError::Empty);
    }

    if let Some(json) = extract_json(trimmed) {
        if let Ok(output) = serde_json::from_str::<SummaryOutput>(json) {
            if !output.narrative.trim().is_empty() {
                return Ok(output);
            }
        }
    }

    Ok(SummaryOutput {
        narrative: trimmed.to_string(),
        causal_links: Vec::new(),
    })
}
