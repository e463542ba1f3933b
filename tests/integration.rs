//! End-to-end integration tests for lorekeeper.
//!
//! These tests exercise the full pipeline from extraction through entity
//! resolution, merging, and insight queries, checking that the store's
//! indices, the merge engine, and the query layer agree with each other.

use std::sync::RwLock;

use lorekeeper::error::MergeError;
use lorekeeper::extraction::{ExtractedEntity, ExtractedRelationship, ExtractionResult, apply_extraction};
use lorekeeper::graph::index::NodeExtras;
use lorekeeper::graph::{KnowledgeBase, Node, RelationshipDetail, Source, SourceType};
use lorekeeper::insights::{Insights, InsightsConfig, KeyEntityMethod};
use lorekeeper::resolution::{
    MergeEngine, MergeRequest, ResolutionConfig, compute_similarity, find_candidates,
    find_resolution_candidates,
};

fn rel(kind: &str) -> RelationshipDetail {
    RelationshipDetail::new(kind, "src1")
}

fn entity(label: &str, entity_type: &str, aliases: &[&str]) -> ExtractedEntity {
    ExtractedEntity {
        label: label.into(),
        entity_type: entity_type.into(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        ..Default::default()
    }
}

fn relationship(source: &str, target: &str, kind: &str) -> ExtractedRelationship {
    ExtractedRelationship {
        source_label: source.into(),
        target_label: target.into(),
        relationship_type: kind.into(),
        confidence: 0.9,
        evidence: None,
    }
}

fn assert_indices_consistent(kb: &KnowledgeBase) {
    for node in kb.nodes() {
        let by_label = kb.get_node_by_label(&node.label).expect("label indexed");
        assert_eq!(by_label.id, node.id, "label {} misindexed", node.label);
        let by_upper = kb.get_node_by_label(&node.label.to_uppercase()).expect("case-insensitive");
        assert_eq!(by_upper.id, node.id);
        for alias in &node.aliases {
            let by_alias = kb.get_node_by_label(alias).expect("alias indexed");
            assert_eq!(by_alias.id, node.id, "alias {alias} misindexed");
        }
    }
}

fn id_of(kb: &KnowledgeBase, label: &str) -> String {
    kb.resolve_label(label).expect("label resolves").to_string()
}

#[test]
fn alias_lookup_reuses_existing_node() {
    let mut kb = KnowledgeBase::new("Cold War", "");
    kb.add_node(Node::new("CIA", "organization").with_aliases(["Central Intelligence Agency"]))
        .unwrap();

    let (node, created) = kb
        .get_or_create_node("Central Intelligence Agency", "organization", NodeExtras::default())
        .unwrap();

    assert!(!created);
    assert_eq!(node.label, "CIA");
    assert_eq!(kb.stats().node_count, 1);
}

#[test]
fn two_hop_connection_and_key_entity() {
    let mut kb = KnowledgeBase::new("t", "");
    for (label, kind) in [("Alice", "person"), ("Bob", "person"), ("CIA", "organization")] {
        kb.add_node(Node::new(label, kind)).unwrap();
    }
    kb.add_relationship("Alice", "Bob", rel("knows")).unwrap();
    kb.add_relationship("Bob", "CIA", rel("works_for")).unwrap();

    let insights = Insights::new(&kb);
    let connection = insights.find_connection("Alice", "CIA");
    assert!(connection.connected);
    assert_eq!(connection.steps, 2);
    assert_eq!(connection.path[0].relationship_type, "knows");
    assert_eq!(connection.path[1].relationship_type, "works_for");

    let key = insights.get_key_entities(10, KeyEntityMethod::Connections, None);
    assert_eq!(key[0].label, "Bob");
    assert_eq!(key[0].score, 2.0);
}

#[test]
fn connection_steps_round_trip_through_find_paths() {
    let mut kb = KnowledgeBase::new("t", "");
    for label in ["A", "B", "C", "D", "E"] {
        kb.add_node(Node::new(label, "thing")).unwrap();
    }
    kb.add_relationship("A", "B", rel("r")).unwrap();
    kb.add_relationship("C", "B", rel("r")).unwrap();
    kb.add_relationship("C", "D", rel("r")).unwrap();
    kb.add_relationship("A", "E", rel("r")).unwrap();
    kb.add_relationship("E", "D", rel("r")).unwrap();

    let insights = Insights::new(&kb);
    for (from, to) in [("A", "D"), ("B", "E"), ("A", "C"), ("D", "A")] {
        let connection = insights.find_connection(from, to);
        assert!(connection.connected);
        let k = connection.steps;
        let paths = kb.find_paths(&id_of(&kb, from), &id_of(&kb, to), k);
        assert!(
            paths.iter().any(|p| p.len() == k + 1),
            "{from}->{to}: no path of {} nodes in {paths:?}",
            k + 1
        );
    }
}

#[test]
fn extraction_resolution_merge_pipeline() {
    let mut kb = KnowledgeBase::new("MKUltra", "Cold War research programs");
    let source_id = kb.add_source(Source::new("Episode 1", SourceType::Audio));
    let extraction = ExtractionResult {
        entities: vec![
            entity("Sidney Gottlieb", "person", &["Dr. Gottlieb"]),
            entity("Sydney Gottlieb", "person", &[]),
            entity("MKUltra", "project", &["Project MKUltra"]),
            entity("CIA", "organization", &["The Agency"]),
        ],
        relationships: vec![
            relationship("Sidney Gottlieb", "MKUltra", "directed"),
            relationship("Sydney Gottlieb", "MKUltra", "directed"),
            relationship("Sidney Gottlieb", "CIA", "worked_for"),
            relationship("Sydney Gottlieb", "the agency", "worked_for"),
            relationship("Unknown Person", "CIA", "worked_for"),
        ],
        discoveries: Vec::new(),
    };

    let stats = apply_extraction(&mut kb, &extraction, &source_id).unwrap();
    assert_eq!(stats.nodes_created, 4);
    assert_eq!(stats.relationships_added, 4);
    assert_eq!(stats.relationships_skipped, 1);
    assert_indices_consistent(&kb);

    let config = ResolutionConfig::default();
    let candidates = find_resolution_candidates(&kb, &config);
    let sidney = id_of(&kb, "Sidney Gottlieb");
    let sydney = id_of(&kb, "Sydney Gottlieb");
    let candidate = candidates
        .iter()
        .find(|c| c.involves(&sidney) && c.involves(&sydney))
        .expect("spelling variants are candidates");
    assert!(candidate.confidence >= config.review_threshold);

    let edges_before = kb.edge_count();
    let kb = RwLock::new(kb);
    let engine = MergeEngine::new();
    let history = engine
        .merge_nodes(&kb, MergeRequest::new(&sidney, &sydney).request_id("req-1"))
        .unwrap();
    assert_eq!(history.merged_label, "Sydney Gottlieb");

    let kb = kb.into_inner().unwrap();
    assert_eq!(kb.node_count(), 3);
    // Both of the merged node's edges fold into the survivor's existing ones.
    assert_eq!(kb.edge_count(), edges_before - 2);
    assert_eq!(id_of(&kb, "Sydney Gottlieb"), sidney);
    assert_indices_consistent(&kb);

    let insights = Insights::new(&kb);
    let connection = insights.find_connection("Dr. Gottlieb", "The Agency");
    assert!(connection.connected);
    assert_eq!(connection.steps, 1);
    let mentions = insights.get_mentions("Sidney Gottlieb");
    assert!(mentions.found);
    assert_eq!(mentions.mentions.len(), 1);
    assert_eq!(mentions.mentions[0].title, "Episode 1");
}

#[test]
fn repeated_request_id_is_idempotent() {
    let mut kb = KnowledgeBase::new("t", "");
    let a = kb.add_node(Node::new("Allen Dulles", "person")).unwrap();
    let b = kb.add_node(Node::new("A. Dulles", "person")).unwrap();
    let c = kb.add_node(Node::new("CIA", "organization")).unwrap();
    kb.add_relationship("A. Dulles", "CIA", rel("directed")).unwrap();
    let kb = RwLock::new(kb);
    let engine = MergeEngine::new();

    let first = engine
        .merge_nodes(&kb, MergeRequest::new(&a.id, &b.id).request_id("r"))
        .unwrap();
    let counts = {
        let kb = kb.read().unwrap();
        (kb.node_count(), kb.edge_count())
    };

    let again = engine
        .merge_nodes(&kb, MergeRequest::new(&a.id, &b.id).request_id("r"))
        .unwrap();
    let different_targets = engine
        .merge_nodes(&kb, MergeRequest::new(&a.id, &c.id).request_id("r"))
        .unwrap();

    assert_eq!(again.id, first.id);
    assert_eq!(different_targets.id, first.id);
    let kb = kb.read().unwrap();
    assert_eq!((kb.node_count(), kb.edge_count()), counts);
    assert!(kb.has_node(&c.id));
    assert_eq!(engine.history().len(), 1);
}

#[test]
fn merges_never_create_self_loops() {
    let mut kb = KnowledgeBase::new("t", "");
    let labels = ["Gottlieb", "S. Gottlieb", "Joseph Scheider", "MKUltra"];
    for label in labels {
        kb.add_node(Node::new(label, "thing")).unwrap();
    }
    kb.add_relationship("Gottlieb", "S. Gottlieb", rel("same_as")).unwrap();
    kb.add_relationship("S. Gottlieb", "Joseph Scheider", rel("alias_of")).unwrap();
    kb.add_relationship("Joseph Scheider", "Gottlieb", rel("same_as")).unwrap();
    kb.add_relationship("S. Gottlieb", "MKUltra", rel("directed")).unwrap();
    let survivor = id_of(&kb, "Gottlieb");
    let second = id_of(&kb, "S. Gottlieb");
    let third = id_of(&kb, "Joseph Scheider");

    let kb = RwLock::new(kb);
    let engine = MergeEngine::new();
    engine.merge_nodes(&kb, MergeRequest::new(&survivor, &second)).unwrap();
    engine.merge_nodes(&kb, MergeRequest::new(&survivor, &third)).unwrap();

    let kb = kb.read().unwrap();
    assert_eq!(kb.node_count(), 2);
    assert!(kb.edges().all(|e| e.source_node_id != e.target_node_id));
    assert_eq!(kb.edge_count(), 1);
    assert_indices_consistent(&kb);
}

#[test]
fn merging_an_alias_differs_from_merging_distinct_nodes() {
    let mut kb = KnowledgeBase::new("t", "");
    kb.add_node(Node::new("Sidney Gottlieb", "person").with_aliases(["Dr. Gottlieb"]))
        .unwrap();
    kb.add_node(Node::new("Joseph Scheider", "person")).unwrap();

    // "Dr. Gottlieb" names the survivor itself.
    let survivor = id_of(&kb, "Sidney Gottlieb");
    let alias_target = id_of(&kb, "Dr. Gottlieb");
    let distinct = id_of(&kb, "Joseph Scheider");
    let kb = RwLock::new(kb);
    let engine = MergeEngine::new();

    let err = engine
        .merge_nodes(&kb, MergeRequest::new(&survivor, &alias_target))
        .unwrap_err();
    assert!(matches!(err, MergeError::SelfMerge { .. }));
    assert_eq!(kb.read().unwrap().node_count(), 2);

    let history = engine
        .merge_nodes(&kb, MergeRequest::new(&survivor, &distinct))
        .unwrap();
    assert_eq!(history.merged_aliases, vec!["Joseph Scheider".to_string()]);
    assert_eq!(kb.read().unwrap().node_count(), 1);
}

#[test]
fn isolated_topics_and_groups() {
    let mut kb = KnowledgeBase::new("t", "");
    for label in ["CIA", "MKUltra", "Gottlieb", "Olson", "Dulles", "Tesla", "Edison"] {
        kb.add_node(Node::new(label, "thing")).unwrap();
    }
    kb.add_relationship("Gottlieb", "MKUltra", rel("directed")).unwrap();
    kb.add_relationship("CIA", "MKUltra", rel("funded")).unwrap();
    kb.add_relationship("Olson", "MKUltra", rel("subject_of")).unwrap();
    kb.add_relationship("Dulles", "CIA", rel("directed")).unwrap();
    kb.add_relationship("Gottlieb", "CIA", rel("worked_for")).unwrap();
    kb.add_relationship("Tesla", "Edison", rel("rivals")).unwrap();

    let insights = Insights::new(&kb);
    let isolated = insights.find_isolated_topics();
    assert_eq!(isolated.len(), 1);
    assert_eq!(isolated[0].size, 2);
    let mut labels: Vec<&str> = isolated[0].members.iter().map(|m| m.label.as_str()).collect();
    labels.sort();
    assert_eq!(labels, ["Edison", "Tesla"]);

    let groups = insights.discover_groups();
    assert!(!groups.is_empty() && groups.len() <= 5);
    assert_eq!(groups.iter().map(|g| g.size).sum::<usize>(), 5);
    assert!(groups.iter().flat_map(|g| &g.members).all(|m| m.label != "Tesla"));

    // Same seed, same partition.
    assert_eq!(insights.discover_groups(), groups);
}

#[test]
fn similarity_is_symmetric_across_a_real_graph() {
    let mut kb = KnowledgeBase::new("t", "");
    kb.add_node(Node::new("Central Intelligence Agency", "organization").with_aliases(["CIA"]))
        .unwrap();
    kb.add_node(Node::new("C.I.A.", "organization")).unwrap();
    kb.add_node(Node::new("Sidney Gottlieb", "person")).unwrap();
    kb.add_node(Node::new("Sid Gottlieb", "person")).unwrap();
    kb.add_relationship("Sidney Gottlieb", "CIA", rel("worked_for")).unwrap();
    kb.add_relationship("Sid Gottlieb", "C.I.A.", rel("worked_for")).unwrap();

    let weights = ResolutionConfig::default().weights;
    let nodes: Vec<&Node> = kb.nodes().collect();
    for a in &nodes {
        for b in &nodes {
            let (ab, signals_ab) = compute_similarity(a, b, &kb, &weights);
            let (ba, signals_ba) = compute_similarity(b, a, &kb, &weights);
            assert_eq!(ab, ba, "{} / {}", a.label, b.label);
            assert_eq!(signals_ab, signals_ba);
        }
    }
}

#[test]
fn suggestions_adapt_to_graph_state() {
    let empty = KnowledgeBase::new("t", "");
    let suggestions = Insights::new(&empty).get_smart_suggestions(5);
    assert_eq!(suggestions.len(), 1);

    let mut kb = KnowledgeBase::new("t", "");
    for label in ["CIA", "MKUltra", "Gottlieb", "Tesla", "Edison"] {
        kb.add_node(Node::new(label, "thing")).unwrap();
    }
    kb.add_relationship("Gottlieb", "MKUltra", rel("directed")).unwrap();
    kb.add_relationship("CIA", "MKUltra", rel("funded")).unwrap();
    kb.add_relationship("Tesla", "Edison", rel("rivals")).unwrap();

    let suggestions = Insights::new(&kb).get_smart_suggestions(5);
    assert!(!suggestions.is_empty() && suggestions.len() <= 5);
    assert!(suggestions.windows(2).all(|w| w[0].priority <= w[1].priority));
}

#[test]
fn dotted_acronym_is_scored_against_plain_acronym() {
    let mut kb = KnowledgeBase::new("Cold War", "");
    kb.add_node(Node::new("CIA", "organization")).unwrap();
    kb.add_node(Node::new("C.I.A.", "organization")).unwrap();
    kb.add_node(Node::new("MKUltra", "project")).unwrap();
    kb.add_node(Node::new("MK-Ultra", "project")).unwrap();
    let cia = id_of(&kb, "CIA");
    let dotted = id_of(&kb, "C.I.A.");

    let nodes: Vec<&Node> = kb.nodes().collect();
    let candidates = find_candidates(&nodes, &kb, &ResolutionConfig::default(), 0.0);
    let pair = candidates
        .iter()
        .find(|c| c.involves(&cia) && c.involves(&dotted))
        .expect("acronym variants are paired by blocking");
    assert!(pair.confidence > 0.0);
    assert!(
        candidates
            .iter()
            .any(|c| c.involves(&id_of(&kb, "MKUltra")) && c.involves(&id_of(&kb, "MK-Ultra")))
    );
}

/// Alice reaches Dave through Bob, through Carol, and through a four-hop
/// detour over Erin, Frank, and Grace.
fn diamond_with_detour() -> KnowledgeBase {
    let mut kb = KnowledgeBase::new("Paths", "");
    for name in ["Alice", "Bob", "Carol", "Dave", "Erin", "Frank", "Grace"] {
        kb.add_node(Node::new(name, "person")).unwrap();
    }
    for (a, b) in [
        ("Alice", "Bob"),
        ("Bob", "Dave"),
        ("Alice", "Carol"),
        ("Dave", "Carol"),
        ("Alice", "Erin"),
        ("Erin", "Frank"),
        ("Frank", "Grace"),
        ("Grace", "Dave"),
    ] {
        kb.add_relationship(a, b, rel("knows")).unwrap();
    }
    kb
}

#[test]
fn all_connections_respect_the_hop_limit() {
    let kb = diamond_with_detour();

    let paths = Insights::new(&kb).find_all_connections("Alice", "Dave");
    assert_eq!(paths.len(), 3);
    let mut lengths: Vec<usize> = paths.iter().map(Vec::len).collect();
    lengths.sort();
    assert_eq!(lengths, vec![2, 2, 4]);
    for path in &paths {
        assert_eq!(path.first().unwrap().from, "Alice");
        assert_eq!(path.last().unwrap().to, "Dave");
        for hop in path.windows(2) {
            assert_eq!(hop[0].to, hop[1].from);
        }
    }

    let short = InsightsConfig {
        max_path_length: 2,
        ..Default::default()
    };
    let paths = Insights::with_config(&kb, short).find_all_connections("alice", "DAVE");
    assert_eq!(paths.len(), 2);
    assert!(paths.iter().all(|p| p.len() == 2));
    let middles: Vec<&str> = paths.iter().map(|p| p[0].to.as_str()).collect();
    assert!(middles.contains(&"Bob"));
    assert!(middles.contains(&"Carol"));

    // Carol -> Dave exists only as Dave -> Carol.
    let via_carol = paths.iter().find(|p| p[0].to == "Carol").unwrap();
    assert_eq!(via_carol[1].relationship_type, "knows");
}

#[test]
fn all_connections_for_unknown_or_identical_entities() {
    let kb = diamond_with_detour();
    let insights = Insights::new(&kb);

    assert!(insights.find_all_connections("Alice", "Mallory").is_empty());
    assert!(insights.find_all_connections("Mallory", "Alice").is_empty());

    let trivial = insights.find_all_connections("Bob", "bob");
    assert_eq!(trivial.len(), 1);
    assert!(trivial[0].is_empty());
}
