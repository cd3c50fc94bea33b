use crate::report::{AnalysisFinding, Confidence};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Folds findings with equal signatures into one, keeping the first
/// description seen in input order.
pub fn merge_findings(findings: Vec<AnalysisFinding>) -> Vec<AnalysisFinding> {
    let mut merged: Vec<AnalysisFinding> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for finding in findings {
        match index.get(&finding.signature) {
            Some(&slot) => absorb(&mut merged[slot], finding),
            None => {
                index.insert(finding.signature.clone(), merged.len());
                merged.push(finding);
            }
        }
    }

    sort_findings(&mut merged);
    merged
}

fn absorb(target: &mut AnalysisFinding, other: AnalysisFinding) {
    target.occurrences += other.occurrences;
    target.first_seen = target.first_seen.min(other.first_seen);
    target.last_seen = target.last_seen.max(other.last_seen);
    target.source_labels.extend(other.source_labels);
    target.severity = target.severity.max(other.severity);
    if other.confidence == Confidence::High {
        target.confidence = Confidence::High;
    }
}

/// Severity descending, then first_seen, then signature.
pub fn sort_findings(findings: &mut [AnalysisFinding]) {
    findings.sort_by(compare);
}

fn compare(a: &AnalysisFinding, b: &AnalysisFinding) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.first_seen.cmp(&b.first_seen))
        .then_with(|| a.signature.cmp(&b.signature))
}
