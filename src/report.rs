//! Analysis results and the report persisted for each run.

use crate::source::PartialFailure;
use crate::window::TimeWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Error,
    Warning,
    Info,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Error => "error",
            Category::Warning => "warning",
            Category::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Used when the model does not say.
    pub fn default_for(category: Category) -> Self {
        match category {
            Category::Error => Severity::High,
            Category::Warning => Severity::Medium,
            Category::Info => Severity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    High,
}

/// A deduplicated issue. Findings with equal signatures in one run are
/// always merged into one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFinding {
    pub category: Category,
    pub signature: String,
    pub description: String,
    pub occurrences: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub source_labels: BTreeSet<String>,
    pub severity: Severity,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalLink {
    pub from_label: String,
    pub to_label: String,
    pub protocol: String,
    /// Signatures of the findings supporting the link.
    pub evidence: Vec<String>,
    pub hypothesis: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub task_name: String,
    pub window: TimeWindow,
    pub findings: Vec<AnalysisFinding>,
    pub causal_links: Vec<CausalLink>,
    pub narrative: String,
    pub source_failures: Vec<PartialFailure>,
    pub host: String,
    pub generated_at: DateTime<Utc>,
}

/// Listing entry for stored reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub run_id: Uuid,
    pub task_name: String,
    pub window: TimeWindow,
    pub generated_at: DateTime<Utc>,
    pub findings: usize,
    pub errors: usize,
    pub warnings: usize,
    pub causal_links: usize,
}

impl Report {
    /// Canonical serialized form. Every sink and the read path use these
    /// exact bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Hex SHA-256 of the canonical bytes.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        Ok(sha256_hex(&self.to_json_bytes()?))
    }

    pub fn count(&self, category: Category) -> usize {
        self.findings.iter().filter(|f| f.category == category).count()
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            run_id: self.run_id,
            task_name: self.task_name.clone(),
            window: self.window,
            generated_at: self.generated_at,
            findings: self.findings.len(),
            errors: self.count(Category::Error),
            warnings: self.count(Category::Warning),
            causal_links: self.causal_links.len(),
        }
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Log analysis: {}", self.task_name);
        let _ = writeln!(out);
        let _ = writeln!(out, "- Run: `{}`", self.run_id);
        let _ = writeln!(out, "- Window: {}", self.window);
        let _ = writeln!(out, "- Host: {}", self.host);
        let _ = writeln!(out, "- Generated: {}", self.generated_at.to_rfc3339());
        let _ = writeln!(
            out,
            "- Findings: {} ({} errors, {} warnings)",
            self.findings.len(),
            self.count(Category::Error),
            self.count(Category::Warning)
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "## Summary");
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", self.narrative.trim());

        if !self.findings.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Findings");
            for finding in &self.findings {
                let _ = writeln!(out);
                let _ = writeln!(
                    out,
                    "### [{}/{}] {}",
                    finding.category.as_str(),
                    finding.severity.as_str(),
                    finding.description
                );
                let _ = writeln!(out);
                let _ = writeln!(out, "- Occurrences: {}", finding.occurrences);
                let _ = writeln!(
                    out,
                    "- Seen: {} .. {}",
                    finding.first_seen.to_rfc3339(),
                    finding.last_seen.to_rfc3339()
                );
                let labels: Vec<&str> = finding.source_labels.iter().map(String::as_str).collect();
                let _ = writeln!(out, "- Sources: {}", labels.join(", "));
                if finding.confidence == Confidence::Low {
                    let _ = writeln!(out, "- Confidence: low");
                }
                let _ = writeln!(out, "- Signature: `{}`", finding.signature);
            }
        }

        if !self.causal_links.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Cross-service correlation");
            let _ = writeln!(out);
            for link in &self.causal_links {
                let _ = writeln!(
                    out,
                    "- {} -> {} ({}): {}",
                    link.from_label, link.to_label, link.protocol, link.hypothesis
                );
            }
        }

        if !self.source_failures.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Collection failures");
            let _ = writeln!(out);
            for failure in &self.source_failures {
                let _ = writeln!(out, "- {}: {}", failure.source_label, failure.cause);
            }
        }

        out
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(category: Category, severity: Severity) -> AnalysisFinding {
        let ts: DateTime<Utc> = "2025-01-01T10:00:00Z".parse().unwrap();
        AnalysisFinding {
            category,
            signature: format!("{}:db timeout", category.as_str()),
            description: "DB timeout".to_string(),
            occurrences: 3,
            first_seen: ts,
            last_seen: ts,
            source_labels: BTreeSet::from(["api".to_string()]),
            severity,
            confidence: Confidence::High,
        }
    }

    fn report() -> Report {
        Report {
            run_id: Uuid::nil(),
            task_name: "api".to_string(),
            window: TimeWindow::unbounded(),
            findings: vec![
                finding(Category::Error, Severity::High),
                finding(Category::Warning, Severity::Medium),
            ],
            causal_links: vec![],
            narrative: "Database timeouts dominate.".to_string(),
            source_failures: vec![PartialFailure {
                source_label: "worker".to_string(),
                cause: "timed out".to_string(),
            }],
            host: "box".to_string(),
            generated_at: "2025-01-01T11:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_json_bytes_are_stable() {
        let report = report();
        assert_eq!(report.to_json_bytes().unwrap(), report.clone().to_json_bytes().unwrap());
        assert_eq!(report.digest().unwrap().len(), 64);

        let parsed: Report = serde_json::from_slice(&report.to_json_bytes().unwrap()).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_markdown_sections() {
        let md = report().render_markdown();
        assert!(md.starts_with("# Log analysis: api"));
        assert!(md.contains("- Findings: 2 (1 errors, 1 warnings)"));
        assert!(md.contains("### [error/high] DB timeout"));
        assert!(md.contains("## Collection failures"));
        assert!(!md.contains("## Cross-service correlation"));
    }
}
