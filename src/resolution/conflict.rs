//! Advisory pre-merge checks.
//!
//! Missing candidates or nodes are hard conflicts. Large merges and type
//! mismatches only produce warnings; policy on whether to proceed belongs
//! to the caller.

use serde::Serialize;

use crate::graph::KnowledgeBase;

use super::{CandidateStatus, ResolutionCandidate, ResolutionConfig};

/// Outcome of [`check_merge_conflicts`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConflictReport {
    pub has_conflict: bool,
    /// Hard blockers.
    pub reasons: Vec<String>,
    /// Advisory notes.
    pub warnings: Vec<String>,
    /// Either side touches more edges than the configured threshold.
    pub high_impact: bool,
}

impl ConflictReport {
    fn conflict(&mut self, reason: String) {
        self.has_conflict = true;
        self.reasons.push(reason);
    }
}

/// Check whether merging candidate `candidate_id` from `pending` is safe.
pub fn check_merge_conflicts(
    kb: &KnowledgeBase,
    candidate_id: &str,
    pending: &[ResolutionCandidate],
    config: &ResolutionConfig,
) -> ConflictReport {
    let mut report = ConflictReport::default();

    let Some(candidate) = pending.iter().find(|c| c.id == candidate_id) else {
        report.conflict(format!("candidate {candidate_id} not found"));
        return report;
    };
    if candidate.status != CandidateStatus::Pending {
        report.conflict(format!("candidate {candidate_id} is already {}", candidate.status));
    }

    let a = kb.get_node(&candidate.node_a_id);
    let b = kb.get_node(&candidate.node_b_id);
    for (id, node) in [(&candidate.node_a_id, a), (&candidate.node_b_id, b)] {
        if node.is_none() {
            report.conflict(format!("node {id} no longer exists"));
        }
    }
    let (Some(a), Some(b)) = (a, b) else {
        return report;
    };

    for node in [a, b] {
        let edges = kb.edges_for_node(&node.id).len();
        if edges > config.high_impact_edge_threshold {
            report.high_impact = true;
            report.warnings.push(format!(
                "\"{}\" has {edges} connections; this merge rewires many edges",
                node.label
            ));
        }
    }

    if !a.entity_type.eq_ignore_ascii_case(&b.entity_type) {
        report.warnings.push(format!(
            "entity types differ: \"{}\" is {}, \"{}\" is {}",
            a.label, a.entity_type, b.label, b.entity_type
        ));
    }

    let overlapping = pending
        .iter()
        .filter(|c| c.id != candidate.id && c.status == CandidateStatus::Pending)
        .filter(|c| c.involves(&a.id) || c.involves(&b.id))
        .count();
    if overlapping > 0 {
        report.warnings.push(format!(
            "{overlapping} other pending candidate(s) involve these nodes and may become stale"
        ));
    }

    report
}
