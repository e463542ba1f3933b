//! Duplicate-entity detection and merging.
//!
//! Resolution runs in two stages:
//!
//! 1. **Blocking** ([`blocking`]): nodes are bucketed by the character
//!    n-grams of their names; only pairs sharing a bucket are scored.
//! 2. **Scoring** ([`similarity`]): a weighted combination of string,
//!    alias, type, and graph-context signals.
//!
//! Scored pairs above the review threshold become [`ResolutionCandidate`]s,
//! which the [`merge`] engine applies on request.

pub mod blocking;
pub mod conflict;
pub mod merge;
pub mod similarity;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::{KnowledgeBase, Node, new_id};
use crate::normalize::DEFAULT_NGRAM;

pub use blocking::BlockingIndex;
pub use conflict::{ConflictReport, check_merge_conflicts};
pub use merge::{MergeEngine, MergeHistory, MergeRequest, MergeType, PairLockTable, PreMergeState};
pub use similarity::compute_similarity;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_review_threshold() -> f64 {
    0.7
}

fn default_auto_merge_threshold() -> f64 {
    0.95
}

fn default_ngram_size() -> usize {
    DEFAULT_NGRAM
}

fn default_high_impact_edge_threshold() -> usize {
    50
}

/// Relative weight of each similarity signal.
///
/// Weights need not sum to one; the combined score is divided by their total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    #[serde(default = "SignalWeights::default_string")]
    pub string: f64,
    #[serde(default = "SignalWeights::default_alias")]
    pub alias: f64,
    #[serde(default = "SignalWeights::default_type_match")]
    pub type_match: f64,
    #[serde(default = "SignalWeights::default_graph_context")]
    pub graph_context: f64,
    /// Reserved for embedding similarity; contributes nothing today.
    #[serde(default)]
    pub semantic: f64,
}

impl SignalWeights {
    fn default_string() -> f64 {
        0.45
    }
    fn default_alias() -> f64 {
        0.20
    }
    fn default_type_match() -> f64 {
        0.10
    }
    fn default_graph_context() -> f64 {
        0.25
    }

    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.string + self.alias + self.type_match + self.graph_context + self.semantic
    }
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            string: Self::default_string(),
            alias: Self::default_alias(),
            type_match: Self::default_type_match(),
            graph_context: Self::default_graph_context(),
            semantic: 0.0,
        }
    }
}

/// Tunable thresholds for candidate generation and merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Minimum confidence for a pair to surface as a candidate.
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,
    /// Minimum confidence for an unattended merge.
    #[serde(default = "default_auto_merge_threshold")]
    pub auto_merge_threshold: f64,
    /// Character n-gram size used for blocking.
    #[serde(default = "default_ngram_size")]
    pub ngram_size: usize,
    /// Edge count above which a merge is flagged as high-impact.
    #[serde(default = "default_high_impact_edge_threshold")]
    pub high_impact_edge_threshold: usize,
    #[serde(default)]
    pub weights: SignalWeights,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            review_threshold: default_review_threshold(),
            auto_merge_threshold: default_auto_merge_threshold(),
            ngram_size: default_ngram_size(),
            high_impact_edge_threshold: default_high_impact_edge_threshold(),
            weights: SignalWeights::default(),
        }
    }
}

impl ResolutionConfig {
    /// Reject thresholds outside [0, 1], negative weights, and a zero n-gram size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("review_threshold", self.review_threshold),
            ("auto_merge_threshold", self.auto_merge_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    message: format!("{name} must be within [0, 1], got {value}"),
                });
            }
        }
        let w = &self.weights;
        for (name, value) in [
            ("string", w.string),
            ("alias", w.alias),
            ("type_match", w.type_match),
            ("graph_context", w.graph_context),
            ("semantic", w.semantic),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(ConfigError::Invalid {
                    message: format!("weight `{name}` must be a non-negative number, got {value}"),
                });
            }
        }
        if self.ngram_size == 0 {
            return Err(ConfigError::Invalid {
                message: "ngram_size must be at least 1".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Review state of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A scored suggestion that two nodes are the same entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionCandidate {
    pub id: String,
    /// Lexicographically smaller node id of the pair.
    pub node_a_id: String,
    pub node_b_id: String,
    pub confidence: f64,
    /// Per-signal scores, keyed by signal name.
    #[serde(default)]
    pub signals: BTreeMap<String, f64>,
    #[serde(default)]
    pub status: CandidateStatus,
    pub created_at: DateTime<Utc>,
}

impl ResolutionCandidate {
    /// Create a pending candidate; the pair is stored in canonical order.
    pub fn new(
        a: impl Into<String>,
        b: impl Into<String>,
        confidence: f64,
        signals: BTreeMap<String, f64>,
    ) -> Self {
        let (a, b) = (a.into(), b.into());
        let (node_a_id, node_b_id) = if a <= b { (a, b) } else { (b, a) };
        Self {
            id: new_id(),
            node_a_id,
            node_b_id,
            confidence: confidence.clamp(0.0, 1.0),
            signals,
            status: CandidateStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Whether this candidate involves `node_id`.
    pub fn involves(&self, node_id: &str) -> bool {
        self.node_a_id == node_id || self.node_b_id == node_id
    }
}

fn sort_by_confidence(candidates: &mut [ResolutionCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node_a_id.cmp(&b.node_a_id))
            .then_with(|| a.node_b_id.cmp(&b.node_b_id))
    });
}

/// Score the blocked pairs among `nodes` and keep those at or above `min_confidence`.
///
/// Each unordered pair appears at most once; results are sorted by
/// confidence, highest first.
pub fn find_candidates(
    nodes: &[&Node],
    kb: &KnowledgeBase,
    config: &ResolutionConfig,
    min_confidence: f64,
) -> Vec<ResolutionCandidate> {
    let index = BlockingIndex::build(nodes.iter().copied(), config.ngram_size);
    let mut candidates: Vec<ResolutionCandidate> = index
        .candidate_pairs()
        .into_iter()
        .filter_map(|(i, j)| {
            let (a, b) = (nodes[i], nodes[j]);
            if a.id == b.id {
                return None;
            }
            let (confidence, signals) = compute_similarity(a, b, kb, &config.weights);
            (confidence >= min_confidence)
                .then(|| ResolutionCandidate::new(&a.id, &b.id, confidence, signals))
        })
        .collect();

    // Distinct positions can still hold the same node if the caller passed it twice.
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert((c.node_a_id.clone(), c.node_b_id.clone())));

    sort_by_confidence(&mut candidates);
    candidates
}

/// Candidates across the whole knowledge base at the configured review threshold.
pub fn find_resolution_candidates(kb: &KnowledgeBase, config: &ResolutionConfig) -> Vec<ResolutionCandidate> {
    let nodes: Vec<&Node> = kb.nodes().collect();
    let candidates = find_candidates(&nodes, kb, config, config.review_threshold);
    tracing::debug!(
        kb_id = %kb.id(),
        nodes = nodes.len(),
        candidates = candidates.len(),
        "resolution candidates computed"
    );
    candidates
}

/// Score one node against every other node, for duplicate checks at ingestion.
pub fn find_candidates_for_node(
    node: &Node,
    kb: &KnowledgeBase,
    config: &ResolutionConfig,
) -> Vec<ResolutionCandidate> {
    let mut candidates: Vec<ResolutionCandidate> = kb
        .nodes()
        .filter(|other| other.id != node.id)
        .filter_map(|other| {
            let (confidence, signals) = compute_similarity(node, other, kb, &config.weights);
            (confidence >= config.review_threshold)
                .then(|| ResolutionCandidate::new(&node.id, &other.id, confidence, signals))
        })
        .collect();
    sort_by_confidence(&mut candidates);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RelationshipDetail;

    fn people_kb() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("t", "");
        kb.add_node(Node::new("Sidney Gottlieb", "person")).unwrap();
        kb.add_node(Node::new("Sydney Gottlieb", "person")).unwrap();
        kb.add_node(Node::new("MKUltra", "project")).unwrap();
        kb.add_node(Node::new("CIA", "organization")).unwrap();
        for label in ["Sidney Gottlieb", "Sydney Gottlieb"] {
            kb.add_relationship(label, "MKUltra", RelationshipDetail::new("directed", "s"))
                .unwrap();
            kb.add_relationship(label, "CIA", RelationshipDetail::new("worked_for", "s"))
                .unwrap();
        }
        kb
    }

    #[test]
    fn default_config_is_valid() {
        let config = ResolutionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ngram_size, 3);
        assert!((config.weights.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = ResolutionConfig::default();
        config.review_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = ResolutionConfig::default();
        config.weights.alias = -0.1;
        assert!(config.validate().is_err());

        let mut config = ResolutionConfig::default();
        config.ngram_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_fills_missing_fields_from_defaults() {
        let config: ResolutionConfig = toml::from_str("review_threshold = 0.5\n[weights]\nstring = 1.0\n").unwrap();
        assert_eq!(config.review_threshold, 0.5);
        assert_eq!(config.auto_merge_threshold, 0.95);
        assert_eq!(config.weights.string, 1.0);
        assert_eq!(config.weights.alias, 0.20);
    }

    #[test]
    fn candidate_ids_are_canonical() {
        let c = ResolutionCandidate::new("zzz", "aaa", 0.9, BTreeMap::new());
        assert_eq!(c.node_a_id, "aaa");
        assert_eq!(c.node_b_id, "zzz");
        assert_eq!(c.status, CandidateStatus::Pending);
        assert!(c.involves("zzz"));
    }

    #[test]
    fn finds_spelling_variant() {
        let kb = people_kb();
        let candidates = find_resolution_candidates(&kb, &ResolutionConfig::default());
        assert_eq!(candidates.len(), 1);

        let c = &candidates[0];
        let labels: Vec<&str> = [&c.node_a_id, &c.node_b_id]
            .iter()
            .map(|id| kb.get_node(id).unwrap().label.as_str())
            .collect();
        assert!(labels.contains(&"Sidney Gottlieb"));
        assert!(labels.contains(&"Sydney Gottlieb"));
        assert!(c.signals.contains_key("string"));
    }

    #[test]
    fn candidates_sorted_and_unique() {
        let kb = people_kb();
        let nodes: Vec<&Node> = kb.nodes().collect();
        let candidates = find_candidates(&nodes, &kb, &ResolutionConfig::default(), 0.0);
        for pair in candidates.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        let mut keys: Vec<_> = candidates
            .iter()
            .map(|c| (c.node_a_id.clone(), c.node_b_id.clone()))
            .collect();
        let before = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), before);
    }

    #[test]
    fn candidates_for_node_excludes_self() {
        let kb = people_kb();
        let sidney = kb.get_node_by_label("Sidney Gottlieb").unwrap();
        let candidates = find_candidates_for_node(sidney, &kb, &ResolutionConfig::default());
        assert_eq!(candidates.len(), 1);
        assert!(candidates.iter().all(|c| !(c.node_a_id == sidney.id && c.node_b_id == sidney.id)));
    }
}
