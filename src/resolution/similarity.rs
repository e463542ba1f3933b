//! Weighted multi-signal similarity between two nodes.
//!
//! Signals, each in [0, 1]:
//!
//! - `string`: Jaro-Winkler over normalized labels
//! - `alias`: Jaccard over normalized name sets (label included)
//! - `type_match`: 1 when entity types are equal, else 0
//! - `graph_context`: Jaccard over normalized neighbor labels
//! - `semantic`: reserved, always 0
//!
//! The pair is put in canonical order before scoring, so the result is
//! identical for `(a, b)` and `(b, a)`.

use std::collections::{BTreeMap, HashSet};

use crate::graph::{KnowledgeBase, Node};
use crate::normalize::normalize;

use super::SignalWeights;

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    inter / union
}

fn name_set(node: &Node) -> HashSet<String> {
    node.names()
        .map(normalize)
        .filter(|n| !n.is_empty())
        .collect()
}

fn neighbor_labels(node: &Node, kb: &KnowledgeBase) -> HashSet<String> {
    kb.get_neighbors(&node.id)
        .into_iter()
        .map(|n| normalize(&n.label))
        .collect()
}

/// String similarity of two labels after normalization.
pub fn label_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (first, second) = if a <= b { (&a, &b) } else { (&b, &a) };
    strsim::jaro_winkler(first, second)
}

/// Score a pair. Returns the combined confidence and the individual signals.
pub fn compute_similarity(
    a: &Node,
    b: &Node,
    kb: &KnowledgeBase,
    weights: &SignalWeights,
) -> (f64, BTreeMap<String, f64>) {
    let (a, b) = if a.id <= b.id { (a, b) } else { (b, a) };

    let string = label_similarity(&a.label, &b.label);
    let alias = jaccard(&name_set(a), &name_set(b));
    let type_match = if a.entity_type.eq_ignore_ascii_case(&b.entity_type) {
        1.0
    } else {
        0.0
    };
    let graph_context = jaccard(&neighbor_labels(a, kb), &neighbor_labels(b, kb));
    let semantic = 0.0;

    let total = weights.total();
    let confidence = if total > 0.0 {
        (weights.string * string
            + weights.alias * alias
            + weights.type_match * type_match
            + weights.graph_context * graph_context
            + weights.semantic * semantic)
            / total
    } else {
        0.0
    };

    let signals = BTreeMap::from([
        ("string".to_string(), string),
        ("alias".to_string(), alias),
        ("type_match".to_string(), type_match),
        ("graph_context".to_string(), graph_context),
        ("semantic".to_string(), semantic),
    ]);

    (confidence.clamp(0.0, 1.0), signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RelationshipDetail;
    use proptest::prelude::*;

    #[test]
    fn identical_isolated_names_score_high() {
        let mut kb = KnowledgeBase::new("t", "");
        let a = kb.add_node(Node::new("Project MKUltra", "project")).unwrap();
        let b = kb.add_node(Node::new("project mk-ultra", "project")).unwrap();
        let (confidence, signals) = compute_similarity(&a, &b, &kb, &SignalWeights::default());
        assert!(signals["string"] > 0.9);
        assert_eq!(signals["type_match"], 1.0);
        assert_eq!(signals["graph_context"], 0.0);
        assert_eq!(signals["semantic"], 0.0);
        assert!(confidence > 0.5);
    }

    #[test]
    fn alias_overlap_counts_label() {
        let mut kb = KnowledgeBase::new("t", "");
        let a = kb
            .add_node(Node::new("CIA", "organization").with_aliases(["The Company"]))
            .unwrap();
        // Distinct index keys, but trailing punctuation is trimmed for scoring.
        let b = kb
            .add_node(Node::new("C.I.A.", "organization").with_aliases(["the company."]))
            .unwrap();
        let (_, signals) = compute_similarity(&a, &b, &kb, &SignalWeights::default());
        assert!((signals["alias"] - 1.0 / 3.0).abs() < 1e-9);

        let c = kb.add_node(Node::new("The Agency", "organization")).unwrap();
        let (_, signals) = compute_similarity(&a, &c, &kb, &SignalWeights::default());
        assert_eq!(signals["alias"], 0.0);
    }

    #[test]
    fn shared_neighbors_raise_graph_context() {
        let mut kb = KnowledgeBase::new("t", "");
        let a = kb.add_node(Node::new("Gottlieb", "person")).unwrap();
        let b = kb.add_node(Node::new("S. Gottlieb", "person")).unwrap();
        kb.add_node(Node::new("MKUltra", "project")).unwrap();
        kb.add_relationship("Gottlieb", "MKUltra", RelationshipDetail::new("ran", "s"))
            .unwrap();
        kb.add_relationship("MKUltra", "S. Gottlieb", RelationshipDetail::new("led_by", "s"))
            .unwrap();
        let (_, signals) = compute_similarity(&a, &b, &kb, &SignalWeights::default());
        assert_eq!(signals["graph_context"], 1.0);
    }

    #[test]
    fn zero_weights_yield_zero() {
        let mut kb = KnowledgeBase::new("t", "");
        let a = kb.add_node(Node::new("A", "x")).unwrap();
        let b = kb.add_node(Node::new("B", "x")).unwrap();
        let weights = SignalWeights {
            string: 0.0,
            alias: 0.0,
            type_match: 0.0,
            graph_context: 0.0,
            semantic: 0.0,
        };
        assert_eq!(compute_similarity(&a, &b, &kb, &weights).0, 0.0);
    }

    proptest! {
        #[test]
        fn similarity_is_symmetric(
            left in "[A-Za-z .]{1,20}",
            right in "[A-Za-z .]{1,20}",
            same_type in any::<bool>(),
        ) {
            let a = Node::new(left, "person");
            let b = Node::new(right, if same_type { "person" } else { "place" });
            let kb = KnowledgeBase::new("t", "");
            let weights = SignalWeights::default();
            let ab = compute_similarity(&a, &b, &kb, &weights);
            let ba = compute_similarity(&b, &a, &kb, &weights);
            prop_assert_eq!(ab.0, ba.0);
            prop_assert_eq!(ab.1, ba.1);
            prop_assert!((0.0..=1.0).contains(&ab.0));
        }
    }
}
