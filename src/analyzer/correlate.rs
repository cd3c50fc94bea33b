//! Deterministic pre-selection of call-chain edges that may carry a causal
//! link.

use super::parse::ProposedLink;
use crate::report::{AnalysisFinding, CausalLink, Category};
use crate::source::CallEdge;
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationCandidate {
    pub edge: CallEdge,
    /// Signatures of the overlapping findings on either side.
    pub evidence: Vec<String>,
}

/// Edges with at least one non-info finding on each side whose time ranges
/// overlap within `slack`.
///
/// `findings` should be per-source findings from before merging. A merged
/// finding's span covers every source it was seen in, so its time in one
/// label can't be told apart from its time in another.
pub fn candidates(
    findings: &[AnalysisFinding],
    call_chain: &[CallEdge],
    slack: Duration,
) -> Vec<CorrelationCandidate> {
    let slack = chrono::Duration::from_std(slack).unwrap_or_else(|_| chrono::Duration::zero());
    let mut out = Vec::new();
    for edge in call_chain {
        let upstream = on_side(findings, &edge.from);
        let downstream = on_side(findings, &edge.to);

        let mut evidence = BTreeSet::new();
        for a in &upstream {
            for b in &downstream {
                let overlapping =
                    a.first_seen - slack <= b.last_seen && b.first_seen - slack <= a.last_seen;
                if overlapping {
                    evidence.insert(a.signature.clone());
                    evidence.insert(b.signature.clone());
                }
            }
        }

        if !evidence.is_empty() {
            out.push(CorrelationCandidate {
                edge: edge.clone(),
                evidence: evidence.into_iter().collect(),
            });
        }
    }
    out
}

fn on_side<'a>(findings: &'a [AnalysisFinding], label: &str) -> Vec<&'a AnalysisFinding> {
    findings
        .iter()
        .filter(|f| f.category != Category::Info && f.source_labels.contains(label))
        .collect()
}

/// One link per candidate, using the model's hypothesis for that edge when
/// it gave one. Proposals for other edges are ignored.
pub fn build_links(candidates: &[CorrelationCandidate], proposed: &[ProposedLink]) -> Vec<CausalLink> {
    candidates
        .iter()
        .map(|c| {
            let hypothesis = proposed
                .iter()
                .find(|p| p.from == c.edge.from && p.to == c.edge.to && !p.hypothesis.trim().is_empty())
                .map(|p| p.hypothesis.trim().to_string())
                .unwrap_or_else(|| {
                    format!(
                        "Issues in {} overlap in time with issues in {}, which it calls over {}.",
                        c.edge.to, c.edge.from, c.edge.protocol
                    )
                });

            CausalLink {
                from_label: c.edge.from.clone(),
                to_label: c.edge.to.clone(),
                protocol: c.edge.protocol.clone(),
                evidence: c.evidence.clone(),
                hypothesis,
            }
        })
        .collect()
}
