//! Read-only analytical queries over a knowledge base.
//!
//! Nothing here fails: unknown labels, disconnected pairs, and degenerate
//! graphs come back as structured "not found" or empty results.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::graph::analytics::{self, CentralityScore, SIGNAL_FLOOR};
use crate::graph::traverse;
use crate::graph::{Edge, KnowledgeBase, Node, SourceType};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_max_path_length() -> usize {
    traverse::DEFAULT_MAX_LENGTH
}

fn default_louvain_seed() -> u64 {
    analytics::DEFAULT_SEED
}

fn default_pagerank_damping() -> f64 {
    analytics::DEFAULT_DAMPING
}

fn default_pagerank_iterations() -> usize {
    analytics::DEFAULT_ITERATIONS
}

/// Tunables for the insight queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsConfig {
    /// Hop limit for path enumeration.
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,
    /// Seed for community detection.
    #[serde(default = "default_louvain_seed")]
    pub louvain_seed: u64,
    #[serde(default = "default_pagerank_damping")]
    pub pagerank_damping: f64,
    #[serde(default = "default_pagerank_iterations")]
    pub pagerank_iterations: usize,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            max_path_length: default_max_path_length(),
            louvain_seed: default_louvain_seed(),
            pagerank_damping: default_pagerank_damping(),
            pagerank_iterations: default_pagerank_iterations(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Ranking method for [`Insights::get_key_entities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEntityMethod {
    /// Degree on the undirected view.
    #[default]
    Connections,
    /// PageRank on the directed graph.
    Influence,
    /// Betweenness centrality on the undirected view.
    Bridging,
}

impl FromStr for KeyEntityMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connections" | "degree" => Ok(Self::Connections),
            "influence" | "pagerank" => Ok(Self::Influence),
            "bridging" | "betweenness" => Ok(Self::Bridging),
            other => Err(format!(
                "unknown method \"{other}\" (expected connections, influence, or bridging)"
            )),
        }
    }
}

impl std::fmt::Display for KeyEntityMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connections => write!(f, "connections"),
            Self::Influence => write!(f, "influence"),
            Self::Bridging => write!(f, "bridging"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyEntity {
    pub id: String,
    pub label: String,
    pub entity_type: String,
    pub score: f64,
    pub explanation: String,
}

/// Direction of a traversed edge relative to the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDirection {
    Outgoing,
    Incoming,
}

/// One hop of a connection path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStep {
    /// Label of the node the hop starts from.
    pub from: String,
    pub to: String,
    pub relationship_type: String,
    pub direction: StepDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionResult {
    pub connected: bool,
    pub steps: usize,
    pub path: Vec<PathStep>,
    /// Node ids along the path, endpoints included.
    pub node_ids: Vec<String>,
    pub message: String,
}

impl ConnectionResult {
    fn not_connected(message: String) -> Self {
        Self {
            connected: false,
            steps: 0,
            path: Vec::new(),
            node_ids: Vec::new(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedConnection {
    pub id: String,
    pub label: String,
    pub entity_type: String,
    /// How the first entity relates to the shared node.
    pub relation_to_a: String,
    pub relation_to_b: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonGround {
    pub found: bool,
    pub shared: Vec<SharedConnection>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMember {
    pub id: String,
    pub label: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityGroup {
    pub id: usize,
    pub members: Vec<GroupMember>,
    pub size: usize,
    /// Label of the best-connected member.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mention {
    pub source_id: String,
    pub title: String,
    pub source_type: Option<SourceType>,
    pub url: Option<String>,
    pub transcript_id: Option<String>,
    /// False when the source id has no matching record.
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MentionReport {
    pub found: bool,
    pub label: String,
    pub mentions: Vec<Mention>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    pub relationship_type: String,
    pub direction: StepDirection,
    pub confidence: f64,
    pub evidence: Option<String>,
    pub source: Mention,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceReport {
    pub found: bool,
    pub items: Vec<EvidenceItem>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Bootstrap,
    Explore,
    Connect,
    Discover,
    FindRelationships,
    LookForGroups,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub priority: Priority,
    pub kind: SuggestionKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborhoodEntry {
    pub id: String,
    pub label: String,
    pub entity_type: String,
    pub distance: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighborhood {
    pub found: bool,
    pub center: Option<String>,
    pub entries: Vec<NeighborhoodEntry>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Graphs at least this large get a "look for groups" hint.
const LARGE_GRAPH: usize = 50;

/// Query facade over a borrowed knowledge base.
pub struct Insights<'a> {
    kb: &'a KnowledgeBase,
    config: InsightsConfig,
}

impl<'a> Insights<'a> {
    pub fn new(kb: &'a KnowledgeBase) -> Self {
        Self::with_config(kb, InsightsConfig::default())
    }

    pub fn with_config(kb: &'a KnowledgeBase, config: InsightsConfig) -> Self {
        Self { kb, config }
    }

    fn member(&self, id: &str) -> Option<GroupMember> {
        self.kb.get_node(id).map(|n| GroupMember {
            id: n.id.clone(),
            label: n.label.clone(),
            entity_type: n.entity_type.clone(),
        })
    }

    fn label_of(&self, id: &str) -> String {
        self.kb
            .get_node(id)
            .map(|n| n.label.clone())
            .unwrap_or_else(|| id.to_string())
    }

    // -----------------------------------------------------------------------
    // Key entities
    // -----------------------------------------------------------------------

    /// Top entities by the given method, optionally restricted to one type.
    pub fn get_key_entities(
        &self,
        limit: usize,
        method: KeyEntityMethod,
        entity_type: Option<&str>,
    ) -> Vec<KeyEntity> {
        let scores: Vec<CentralityScore> = match method {
            KeyEntityMethod::Connections => analytics::degree_centrality(self.kb),
            KeyEntityMethod::Influence => analytics::pagerank(
                self.kb,
                self.config.pagerank_damping,
                self.config.pagerank_iterations,
            ),
            KeyEntityMethod::Bridging => analytics::betweenness_centrality(self.kb),
        };

        let allowed: Option<HashSet<&str>> = entity_type.map(|t| {
            self.kb
                .find_nodes_by_type(t)
                .into_iter()
                .map(|n| n.id.as_str())
                .collect()
        });
        scores
            .into_iter()
            .filter(|s| allowed.as_ref().is_none_or(|ids| ids.contains(s.node_id.as_str())))
            .filter_map(|s| self.kb.get_node(&s.node_id).map(|n| (n, s.score)))
            .take(limit)
            .map(|(n, score)| KeyEntity {
                id: n.id.clone(),
                label: n.label.clone(),
                entity_type: n.entity_type.clone(),
                score,
                explanation: explain(method, score),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    /// Shortest connection between two labelled entities, ignoring direction.
    pub fn find_connection(&self, label_a: &str, label_b: &str) -> ConnectionResult {
        let (Some(a), Some(b)) = (self.kb.get_node_by_label(label_a), self.kb.get_node_by_label(label_b))
        else {
            let missing = if self.kb.get_node_by_label(label_a).is_none() {
                label_a
            } else {
                label_b
            };
            return ConnectionResult::not_connected(format!("Entity not found: {missing}"));
        };

        if a.id == b.id {
            return ConnectionResult {
                connected: true,
                steps: 0,
                path: Vec::new(),
                node_ids: vec![a.id.clone()],
                message: format!("\"{label_a}\" and \"{label_b}\" are the same entity ({})", a.label),
            };
        }

        let Some(ids) = traverse::shortest_path(self.kb, &a.id, &b.id) else {
            return ConnectionResult::not_connected(format!(
                "No connection found between {} and {}",
                a.label, b.label
            ));
        };

        let path: Vec<PathStep> = ids
            .windows(2)
            .filter_map(|pair| self.step(&pair[0], &pair[1]))
            .collect();
        let steps = ids.len() - 1;
        ConnectionResult {
            connected: true,
            steps,
            message: format!(
                "{} is connected to {} in {steps} step{}",
                a.label,
                b.label,
                if steps == 1 { "" } else { "s" }
            ),
            path,
            node_ids: ids,
        }
    }

    fn step(&self, from: &str, to: &str) -> Option<PathStep> {
        let (edge, direction) = match self.kb.get_edge_between(from, to) {
            Some(edge) => (edge, StepDirection::Outgoing),
            None => (self.kb.get_edge_between(to, from)?, StepDirection::Incoming),
        };
        Some(PathStep {
            from: self.label_of(from),
            to: self.label_of(to),
            relationship_type: edge.relationship_types().join(", "),
            direction,
        })
    }

    /// Up to ten simple paths between two entities within the configured hop limit.
    pub fn find_all_connections(&self, label_a: &str, label_b: &str) -> Vec<Vec<PathStep>> {
        let (Some(a), Some(b)) = (self.kb.get_node_by_label(label_a), self.kb.get_node_by_label(label_b))
        else {
            return Vec::new();
        };
        self.kb
            .find_paths(&a.id, &b.id, self.config.max_path_length)
            .into_iter()
            .map(|ids| ids.windows(2).filter_map(|p| self.step(&p[0], &p[1])).collect())
            .collect()
    }

    /// Entities directly connected to both `label_a` and `label_b`.
    pub fn find_common_ground(&self, label_a: &str, label_b: &str) -> CommonGround {
        let (Some(a), Some(b)) = (self.kb.get_node_by_label(label_a), self.kb.get_node_by_label(label_b))
        else {
            return CommonGround {
                found: false,
                shared: Vec::new(),
                message: "Entity not found".into(),
            };
        };

        let b_neighbors: HashSet<&str> = self.kb.neighbor_ids(&b.id).into_iter().collect();
        let shared: Vec<SharedConnection> = self
            .kb
            .neighbor_ids(&a.id)
            .into_iter()
            .filter(|id| b_neighbors.contains(id) && *id != a.id && *id != b.id)
            .filter_map(|id| self.kb.get_node(id))
            .map(|n| SharedConnection {
                id: n.id.clone(),
                label: n.label.clone(),
                entity_type: n.entity_type.clone(),
                relation_to_a: self.describe(a, n),
                relation_to_b: self.describe(b, n),
            })
            .collect();

        let message = if shared.is_empty() {
            format!("{} and {} have no direct connections in common", a.label, b.label)
        } else {
            format!("{} and {} share {} connection(s)", a.label, b.label, shared.len())
        };
        CommonGround {
            found: !shared.is_empty(),
            shared,
            message,
        }
    }

    fn describe(&self, x: &Node, other: &Node) -> String {
        let phrase = |edge: &Edge, subject: &str, object: &str| {
            format!("{subject} {} {object}", edge.relationship_types().join(", "))
        };
        let mut parts = Vec::new();
        if let Some(edge) = self.kb.get_edge_between(&x.id, &other.id) {
            parts.push(phrase(edge, &x.label, &other.label));
        }
        if let Some(edge) = self.kb.get_edge_between(&other.id, &x.id) {
            parts.push(phrase(edge, &other.label, &x.label));
        }
        parts.join("; ")
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    fn group(&self, id: usize, member_ids: &[String]) -> EntityGroup {
        let view = self.kb.undirected_view();
        let members: Vec<GroupMember> = member_ids.iter().filter_map(|m| self.member(m)).collect();
        let label = members
            .iter()
            .max_by(|x, y| {
                view.degree(&x.id)
                    .cmp(&view.degree(&y.id))
                    .then_with(|| y.label.cmp(&x.label))
            })
            .map(|m| m.label.clone())
            .unwrap_or_default();
        EntityGroup {
            id,
            size: members.len(),
            members,
            label,
        }
    }

    /// Communities within the largest connected component.
    pub fn discover_groups(&self) -> Vec<EntityGroup> {
        let components = analytics::connected_components(self.kb);
        let Some(largest) = components.first() else {
            return Vec::new();
        };
        if largest.size == 1 {
            return vec![self.group(0, &largest.members)];
        }

        analytics::louvain_communities(self.kb, &largest.members, self.config.louvain_seed)
            .iter()
            .enumerate()
            .map(|(id, members)| self.group(id, members))
            .collect()
    }

    /// Every connected component except the largest.
    pub fn find_isolated_topics(&self) -> Vec<EntityGroup> {
        analytics::connected_components(self.kb)
            .iter()
            .skip(1)
            .enumerate()
            .map(|(id, c)| self.group(id, &c.members))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Provenance
    // -----------------------------------------------------------------------

    fn mention(&self, source_id: &str) -> Mention {
        match self.kb.get_source(source_id) {
            Some(source) => Mention {
                source_id: source.id.clone(),
                title: source.title.clone(),
                source_type: Some(source.source_type),
                url: source.url.clone(),
                transcript_id: source.transcript_id().map(str::to_string),
                resolved: true,
            },
            None => Mention {
                source_id: source_id.to_string(),
                title: "Unknown source".into(),
                source_type: None,
                url: None,
                transcript_id: None,
                resolved: false,
            },
        }
    }

    /// Sources an entity was extracted from.
    pub fn get_mentions(&self, label: &str) -> MentionReport {
        let Some(node) = self.kb.get_node_by_label(label) else {
            return MentionReport {
                found: false,
                label: label.to_string(),
                mentions: Vec::new(),
            };
        };
        MentionReport {
            found: true,
            label: node.label.clone(),
            mentions: node.source_ids.iter().map(|id| self.mention(id)).collect(),
        }
    }

    /// Every relationship instance between two entities, in both directions,
    /// with its source.
    pub fn get_evidence(&self, label_a: &str, label_b: &str) -> EvidenceReport {
        let (Some(a), Some(b)) = (self.kb.get_node_by_label(label_a), self.kb.get_node_by_label(label_b))
        else {
            return EvidenceReport {
                found: false,
                items: Vec::new(),
                message: "Entity not found".into(),
            };
        };

        let mut items = Vec::new();
        for (from, to, direction) in [
            (a, b, StepDirection::Outgoing),
            (b, a, StepDirection::Incoming),
        ] {
            let Some(edge) = self.kb.get_edge_between(&from.id, &to.id) else {
                continue;
            };
            items.extend(edge.relationships.iter().map(|rel| EvidenceItem {
                relationship_type: rel.relationship_type.clone(),
                direction,
                confidence: rel.confidence,
                evidence: rel.evidence.clone(),
                source: self.mention(&rel.source_id),
            }));
        }

        let message = if items.is_empty() {
            format!("No direct relationship between {} and {}", a.label, b.label)
        } else {
            format!("{} piece(s) of evidence", items.len())
        };
        EvidenceReport {
            found: !items.is_empty(),
            items,
            message,
        }
    }

    // -----------------------------------------------------------------------
    // Neighborhood and suggestions
    // -----------------------------------------------------------------------

    /// Entities within `depth` hops of `label`, nearest first.
    pub fn get_neighborhood(&self, label: &str, depth: usize) -> Neighborhood {
        let Some(center) = self.kb.get_node_by_label(label) else {
            return Neighborhood {
                found: false,
                center: None,
                entries: Vec::new(),
            };
        };
        let entries = traverse::neighborhood(self.kb, &center.id, depth)
            .into_iter()
            .filter_map(|(id, distance)| {
                self.kb.get_node(&id).map(|n| NeighborhoodEntry {
                    id: n.id.clone(),
                    label: n.label.clone(),
                    entity_type: n.entity_type.clone(),
                    distance,
                })
            })
            .collect();
        Neighborhood {
            found: true,
            center: Some(center.label.clone()),
            entries,
        }
    }

    /// Heuristic next steps, most important first.
    pub fn get_smart_suggestions(&self, limit: usize) -> Vec<Suggestion> {
        let stats = self.kb.stats();
        if stats.node_count == 0 {
            return vec![Suggestion {
                priority: Priority::High,
                kind: SuggestionKind::Bootstrap,
                message: "The knowledge base is empty. Ingest a first source to bootstrap it.".into(),
            }]
            .into_iter()
            .take(limit)
            .collect();
        }

        let mut suggestions = Vec::new();

        let isolated = self.find_isolated_topics();
        if let Some(first) = isolated.first() {
            suggestions.push(Suggestion {
                priority: Priority::High,
                kind: SuggestionKind::Connect,
                message: format!(
                    "{} group(s) are disconnected from the main graph. How does {} relate to the rest?",
                    isolated.len(),
                    first.label
                ),
            });
        }

        let strongest = self.get_key_entities(1, KeyEntityMethod::Connections, None);
        if let Some(top) = strongest.first().filter(|t| t.score > 0.0) {
            suggestions.push(Suggestion {
                priority: Priority::Medium,
                kind: SuggestionKind::Explore,
                message: format!(
                    "Explore {}, the most connected entity ({} connections).",
                    top.label, top.score
                ),
            });
        }

        if stats.edge_count < stats.node_count {
            suggestions.push(Suggestion {
                priority: Priority::Medium,
                kind: SuggestionKind::FindRelationships,
                message: format!(
                    "The graph is sparse ({} relationships for {} entities). Look for how entities relate.",
                    stats.edge_count, stats.node_count
                ),
            });
        }

        if let Some(kind) = underrepresented_type(&stats.entity_types, self.kb) {
            suggestions.push(Suggestion {
                priority: Priority::Low,
                kind: SuggestionKind::Discover,
                message: format!("Few entities of type \"{kind}\" so far. Discover more of them."),
            });
        }

        if stats.node_count >= LARGE_GRAPH {
            suggestions.push(Suggestion {
                priority: Priority::Low,
                kind: SuggestionKind::LookForGroups,
                message: "The graph is large enough to look for groups of related entities.".into(),
            });
        }

        suggestions.sort_by_key(|s| s.priority);
        suggestions.truncate(limit);
        suggestions
    }
}

fn explain(method: KeyEntityMethod, score: f64) -> String {
    match method {
        KeyEntityMethod::Connections => {
            let n = score as usize;
            format!("Connected to {n} other entit{}", if n == 1 { "y" } else { "ies" })
        }
        _ if score < SIGNAL_FLOOR => "No measurable signal".into(),
        KeyEntityMethod::Influence => {
            format!("Influence score {score:.4}: referenced by well-connected entities")
        }
        KeyEntityMethod::Bridging => {
            format!("Bridging score {score:.4}: lies on paths between otherwise distant entities")
        }
    }
}

/// The entity type with the fewest nodes, when clearly outnumbered.
///
/// Types declared in the domain profile with no nodes yet count as zero.
fn underrepresented_type(counts: &BTreeMap<String, usize>, kb: &KnowledgeBase) -> Option<String> {
    let mut counts: BTreeMap<String, usize> = counts
        .iter()
        .map(|(k, v)| (k.to_lowercase(), *v))
        .fold(BTreeMap::new(), |mut acc, (k, v)| {
            *acc.entry(k).or_insert(0) += v;
            acc
        });
    if let Some(profile) = kb.domain_profile() {
        for name in profile.entity_type_names() {
            counts.entry(name.to_lowercase()).or_insert(0);
        }
    }
    let max = counts.values().copied().max()?;
    let (kind, min) = counts.iter().min_by_key(|(_, v)| **v)?;
    (max >= 5 && *min * 5 <= max).then(|| kind.clone())
}
