//! In-memory knowledge base with case-insensitive label/alias indices.
//!
//! Records live in id-keyed maps; topology lives in a `petgraph`
//! [`StableDiGraph`] whose node and edge weights are the record ids, so
//! removals never shift the indices of surviving nodes.
//!
//! A direction-agnostic [`UndirectedView`] is built lazily on first use and
//! cached until the next mutation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use petgraph::Direction;
use petgraph::graph::{DiGraph, UnGraph};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::extraction::DomainProfile;
use crate::normalize::lookup_key;

use super::{Edge, Node, Properties, RelationshipDetail, Source, new_id};

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Summary persisted as `meta.json` and returned by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub node_count: usize,
    #[serde(default)]
    pub edge_count: usize,
    #[serde(default)]
    pub source_count: usize,
}

/// Aggregate counts over a knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub source_count: usize,
    /// Nodes per entity type.
    pub entity_types: BTreeMap<String, usize>,
    /// Relationship instances per relationship type.
    pub relationship_types: BTreeMap<String, usize>,
}

/// Optional attributes applied when [`KnowledgeBase::get_or_create_node`]
/// creates a new node.
#[derive(Debug, Clone, Default)]
pub struct NodeExtras {
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub source_id: Option<String>,
    pub properties: Properties,
}

/// Direction-agnostic projection of the graph.
///
/// Parallel edges in opposite directions collapse into one undirected edge
/// and self-loops are dropped, so this is a simple graph.
#[derive(Debug, Clone)]
pub struct UndirectedView {
    graph: UnGraph<String, ()>,
    index: HashMap<String, petgraph::graph::NodeIndex>,
}

impl UndirectedView {
    fn build(kb: &KnowledgeBase) -> Self {
        let mut graph = UnGraph::with_capacity(kb.node_count(), kb.edge_count());
        let mut index = HashMap::with_capacity(kb.node_count());
        for node in kb.nodes() {
            index.insert(node.id.clone(), graph.add_node(node.id.clone()));
        }
        for edge in kb.edges() {
            if edge.source_node_id == edge.target_node_id {
                continue;
            }
            if let (Some(&a), Some(&b)) = (
                index.get(&edge.source_node_id),
                index.get(&edge.target_node_id),
            ) {
                graph.update_edge(a, b, ());
            }
        }
        Self { graph, index }
    }

    /// The underlying petgraph graph; node weights are node ids.
    pub fn graph(&self) -> &UnGraph<String, ()> {
        &self.graph
    }

    pub fn index_of(&self, node_id: &str) -> Option<petgraph::graph::NodeIndex> {
        self.index.get(node_id).copied()
    }

    pub fn id_of(&self, idx: petgraph::graph::NodeIndex) -> &str {
        &self.graph[idx]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of distinct neighbors, ignoring direction.
    pub fn degree(&self, node_id: &str) -> usize {
        self.index_of(node_id)
            .map(|idx| self.graph.neighbors(idx).count())
            .unwrap_or(0)
    }
}

/// A knowledge base: nodes, edges, sources, and the indices over them.
#[derive(Clone)]
pub struct KnowledgeBase {
    id: String,
    name: String,
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    domain_profile: Option<DomainProfile>,
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    sources: BTreeMap<String, Source>,
    /// lookup_key(label) → node id.
    label_index: HashMap<String, String>,
    /// lookup_key(alias) → node id.
    alias_index: HashMap<String, String>,
    /// Directed topology; weights are node ids and edge ids.
    graph: StableDiGraph<String, String>,
    /// Node id → graph index.
    node_index: HashMap<String, NodeIndex>,
    undirected: OnceLock<UndirectedView>,
}

impl KnowledgeBase {
    /// Create a new empty knowledge base.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self::empty(new_id(), name.into(), description.into(), now, now)
    }

    fn empty(
        id: String,
        name: String,
        description: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            description,
            created_at,
            updated_at,
            domain_profile: None,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            sources: BTreeMap::new(),
            label_index: HashMap::new(),
            alias_index: HashMap::new(),
            graph: StableDiGraph::new(),
            node_index: HashMap::new(),
            undirected: OnceLock::new(),
        }
    }

    /// Rebuild a knowledge base from persisted records.
    ///
    /// Index collisions in the stored data are resolved last-write-wins,
    /// and edges whose endpoints are missing are dropped.
    pub fn restore(
        meta: KnowledgeBaseMeta,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        sources: Vec<Source>,
        domain_profile: Option<DomainProfile>,
    ) -> Self {
        let mut kb = Self::empty(
            meta.id,
            meta.name,
            meta.description,
            meta.created_at,
            meta.updated_at,
        );
        kb.domain_profile = domain_profile;

        for node in nodes {
            let idx = kb.graph.add_node(node.id.clone());
            kb.node_index.insert(node.id.clone(), idx);
            kb.index_names(&node);
            kb.nodes.insert(node.id.clone(), node);
        }

        for edge in edges {
            let endpoints = (
                kb.node_index.get(&edge.source_node_id).copied(),
                kb.node_index.get(&edge.target_node_id).copied(),
            );
            let (Some(a), Some(b)) = endpoints else {
                tracing::warn!(
                    kb_id = %kb.id,
                    edge_id = %edge.id,
                    "dropping edge with missing endpoint"
                );
                continue;
            };
            if let Some(existing) = kb.graph.find_edge(a, b) {
                let existing_id = kb.graph[existing].clone();
                if let Some(target) = kb.edges.get_mut(&existing_id) {
                    target.relationships.extend(edge.relationships);
                }
                continue;
            }
            kb.graph.add_edge(a, b, edge.id.clone());
            kb.edges.insert(edge.id.clone(), edge);
        }

        for source in sources {
            kb.sources.insert(source.id.clone(), source);
        }

        kb
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn meta(&self) -> KnowledgeBaseMeta {
        KnowledgeBaseMeta {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            source_count: self.sources.len(),
        }
    }

    pub fn domain_profile(&self) -> Option<&DomainProfile> {
        self.domain_profile.as_ref()
    }

    pub fn set_domain_profile(&mut self, profile: DomainProfile) {
        self.domain_profile = Some(profile);
        self.updated_at = Utc::now();
    }

    /// Drop the cached undirected view and bump `updated_at`.
    fn invalidate(&mut self) {
        self.undirected = OnceLock::new();
        self.updated_at = Utc::now();
    }

    // -----------------------------------------------------------------------
    // Label / alias indices
    // -----------------------------------------------------------------------

    fn index_names(&mut self, node: &Node) {
        self.label_index.insert(lookup_key(&node.label), node.id.clone());
        for alias in &node.aliases {
            self.alias_index.insert(lookup_key(alias), node.id.clone());
        }
    }

    fn unindex_names(&mut self, node: &Node) {
        let label_key = lookup_key(&node.label);
        if self.label_index.get(&label_key) == Some(&node.id) {
            self.label_index.remove(&label_key);
        }
        for alias in &node.aliases {
            let key = lookup_key(alias);
            if self.alias_index.get(&key) == Some(&node.id) {
                self.alias_index.remove(&key);
            }
        }
    }

    /// The node id a label or alias currently maps to.
    ///
    /// Primary labels win over aliases.
    pub fn resolve_label(&self, text: &str) -> Option<&str> {
        let key = lookup_key(text);
        self.label_index
            .get(&key)
            .or_else(|| self.alias_index.get(&key))
            .map(String::as_str)
    }

    /// The id of a *different* node already claiming `name`, if any.
    fn claimed_by_other(&self, name: &str, node_id: &str) -> Option<&str> {
        self.resolve_label(name).filter(|owner| *owner != node_id)
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Insert a node and index its label and aliases.
    ///
    /// Fails with [`GraphError::LabelConflict`] if any of its names is
    /// already claimed by a different node. Re-adding an existing id
    /// replaces that node's record.
    pub fn add_node(&mut self, node: Node) -> GraphResult<Node> {
        if lookup_key(&node.label).is_empty() {
            return Err(GraphError::EmptyLabel);
        }
        for name in node.names() {
            if let Some(existing) = self.claimed_by_other(name, &node.id) {
                return Err(GraphError::LabelConflict {
                    label: name.to_string(),
                    existing_id: existing.to_string(),
                });
            }
        }

        if let Some(previous) = self.nodes.remove(&node.id) {
            self.unindex_names(&previous);
        } else {
            let idx = self.graph.add_node(node.id.clone());
            self.node_index.insert(node.id.clone(), idx);
        }

        self.index_names(&node);
        self.nodes.insert(node.id.clone(), node.clone());
        self.invalidate();
        Ok(node)
    }

    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Case-insensitive lookup by primary label, then by alias.
    pub fn get_node_by_label(&self, text: &str) -> Option<&Node> {
        self.resolve_label(text).and_then(|id| self.nodes.get(id))
    }

    /// Return the node a label resolves to, creating it if none does.
    ///
    /// The label is matched against both labels and aliases, so a label that
    /// is already someone's alias resolves to that node. On creation, extra
    /// aliases claimed by other nodes are skipped.
    pub fn get_or_create_node(
        &mut self,
        label: &str,
        entity_type: &str,
        extras: NodeExtras,
    ) -> GraphResult<(Node, bool)> {
        if let Some(existing) = self.get_node_by_label(label) {
            return Ok((existing.clone(), false));
        }

        let mut node = Node::new(label.trim(), entity_type);
        for alias in extras.aliases {
            if self.resolve_label(&alias).is_none() {
                node.push_alias(alias);
            }
        }
        node.description = extras.description.filter(|d| !d.trim().is_empty());
        node.properties = extras.properties;
        if let Some(source_id) = extras.source_id {
            node.source_ids.insert(source_id);
        }

        let node = self.add_node(node)?;
        Ok((node, true))
    }

    /// Add an alias to a node. Returns `false` if it was already one of its names.
    pub fn add_alias(&mut self, node_id: &str, alias: &str) -> GraphResult<bool> {
        if let Some(existing) = self.claimed_by_other(alias, node_id) {
            return Err(GraphError::LabelConflict {
                label: alias.to_string(),
                existing_id: existing.to_string(),
            });
        }
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.to_string(),
            })?;
        if !node.push_alias(alias.to_string()) {
            return Ok(false);
        }
        node.updated_at = Utc::now();
        self.alias_index
            .insert(lookup_key(alias), node_id.to_string());
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Tag a node with a source id.
    pub fn add_node_source(&mut self, node_id: &str, source_id: &str) -> GraphResult<bool> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.to_string(),
            })?;
        let added = node.source_ids.insert(source_id.to_string());
        if added {
            node.updated_at = Utc::now();
            self.updated_at = node.updated_at;
        }
        Ok(added)
    }

    /// Merge properties into a node; keys the node already has are kept.
    pub fn merge_node_properties(&mut self, node_id: &str, properties: Properties) -> GraphResult<()> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.to_string(),
            })?;
        for (key, value) in properties {
            node.properties.entry(key).or_insert(value);
        }
        node.updated_at = Utc::now();
        self.updated_at = node.updated_at;
        Ok(())
    }

    /// Fill in a node's description if it has none.
    pub fn fill_description(&mut self, node_id: &str, description: &str) -> GraphResult<bool> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.to_string(),
            })?;
        if node.description.is_some() || description.trim().is_empty() {
            return Ok(false);
        }
        node.description = Some(description.to_string());
        node.updated_at = Utc::now();
        self.updated_at = node.updated_at;
        Ok(true)
    }

    /// Remove a node, its index entries, and every incident edge.
    ///
    /// Returns the removed node and edges, or `None` if absent.
    pub fn remove_node(&mut self, node_id: &str) -> Option<(Node, Vec<Edge>)> {
        let idx = self.node_index.remove(node_id)?;
        let node = self.nodes.remove(node_id)?;
        self.unindex_names(&node);

        let mut seen = HashSet::new();
        let edge_ids: Vec<String> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
            .filter(|e| seen.insert(e.id()))
            .map(|e| e.weight().clone())
            .collect();
        let edges = edge_ids
            .iter()
            .filter_map(|id| self.edges.remove(id))
            .collect();

        self.graph.remove_node(idx);
        self.invalidate();
        Some((node, edges))
    }

    /// All nodes, in graph order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.nodes.get(&self.graph[idx]))
    }

    pub fn find_nodes_by_type(&self, entity_type: &str) -> Vec<&Node> {
        self.nodes()
            .filter(|n| n.entity_type.eq_ignore_ascii_case(entity_type))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    /// Insert an edge between two existing nodes.
    ///
    /// If an edge already connects the same ordered pair, the new edge's
    /// relationships are appended to it and the existing edge is returned.
    pub fn add_edge(&mut self, edge: Edge) -> GraphResult<Edge> {
        let a = self.index_for(&edge.source_node_id)?;
        let b = self.index_for(&edge.target_node_id)?;

        if let Some(existing) = self.graph.find_edge(a, b) {
            let existing_id = self.graph[existing].clone();
            let target = self
                .edges
                .get_mut(&existing_id)
                .ok_or_else(|| GraphError::NodeNotFound {
                    node_id: edge.source_node_id.clone(),
                })?;
            target.relationships.extend(edge.relationships);
            target.updated_at = Utc::now();
            let merged = target.clone();
            self.invalidate();
            return Ok(merged);
        }

        self.graph.add_edge(a, b, edge.id.clone());
        self.edges.insert(edge.id.clone(), edge.clone());
        self.invalidate();
        Ok(edge)
    }

    fn index_for(&self, node_id: &str) -> GraphResult<NodeIndex> {
        self.node_index
            .get(node_id)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.to_string(),
            })
    }

    pub fn get_edge(&self, edge_id: &str) -> Option<&Edge> {
        self.edges.get(edge_id)
    }

    /// The edge from `source_id` to `target_id`. Direction matters.
    pub fn get_edge_between(&self, source_id: &str, target_id: &str) -> Option<&Edge> {
        let a = self.node_index.get(source_id)?;
        let b = self.node_index.get(target_id)?;
        let e = self.graph.find_edge(*a, *b)?;
        self.edges.get(&self.graph[e])
    }

    /// Return the edge between an ordered pair, creating an empty one if needed.
    pub fn get_or_create_edge(&mut self, source_id: &str, target_id: &str) -> GraphResult<(Edge, bool)> {
        if let Some(edge) = self.get_edge_between(source_id, target_id) {
            return Ok((edge.clone(), false));
        }
        let edge = self.add_edge(Edge::new(source_id, target_id))?;
        Ok((edge, true))
    }

    /// Record a relationship between two labelled entities.
    ///
    /// Both labels are resolved through labels and aliases. Returns `None`
    /// when either is unknown; that is a normal outcome for callers.
    pub fn add_relationship(
        &mut self,
        source_label: &str,
        target_label: &str,
        detail: RelationshipDetail,
    ) -> Option<Edge> {
        let source_id = self.resolve_label(source_label)?.to_string();
        let target_id = self.resolve_label(target_label)?.to_string();
        let mut edge = Edge::new(source_id, target_id);
        edge.relationships.push(detail);
        self.add_edge(edge).ok()
    }

    /// Every edge touching a node, outgoing first.
    pub fn edges_for_node(&self, node_id: &str) -> Vec<&Edge> {
        let Some(&idx) = self.node_index.get(node_id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
            .filter(|e| seen.insert(e.id()))
            .filter_map(|e| self.edges.get(e.weight()))
            .collect()
    }

    /// All edges, in graph order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.edges.get(&self.graph[e]))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    // -----------------------------------------------------------------------
    // Neighborhoods
    // -----------------------------------------------------------------------

    /// Ids of predecessors and successors, without duplicates.
    pub fn neighbor_ids(&self, node_id: &str) -> Vec<&str> {
        let Some(&idx) = self.node_index.get(node_id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        self.graph
            .neighbors_directed(idx, Direction::Outgoing)
            .chain(self.graph.neighbors_directed(idx, Direction::Incoming))
            .filter(|n| *n != idx && seen.insert(*n))
            .map(|n| self.graph[n].as_str())
            .collect()
    }

    /// Union of predecessors and successors. Empty for isolated or absent nodes.
    pub fn get_neighbors(&self, node_id: &str) -> Vec<&Node> {
        self.neighbor_ids(node_id)
            .into_iter()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// Simple paths from `from` to `to` of at most `max_length` edges,
    /// ignoring direction. At most ten are returned.
    pub fn find_paths(&self, from: &str, to: &str, max_length: usize) -> Vec<Vec<String>> {
        super::traverse::simple_paths(self, from, to, max_length, super::traverse::MAX_PATHS)
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    /// Register a source, replacing any record with the same id.
    pub fn add_source(&mut self, source: Source) -> String {
        let id = source.id.clone();
        self.sources.insert(id.clone(), source);
        self.updated_at = Utc::now();
        id
    }

    pub fn get_source(&self, source_id: &str) -> Option<&Source> {
        self.sources.get(source_id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    // -----------------------------------------------------------------------
    // Views and statistics
    // -----------------------------------------------------------------------

    /// Cached undirected projection, rebuilt lazily after mutations.
    pub fn undirected_view(&self) -> &UndirectedView {
        self.undirected.get_or_init(|| UndirectedView::build(self))
    }

    /// A compact directed copy of the topology with contiguous indices.
    ///
    /// Node weights are node ids; parallel edges do not occur.
    pub fn directed_snapshot(&self) -> DiGraph<String, ()> {
        let mut graph = DiGraph::with_capacity(self.node_count(), self.edge_count());
        let mut index = HashMap::with_capacity(self.node_count());
        for idx in self.graph.node_indices() {
            index.insert(idx, graph.add_node(self.graph[idx].clone()));
        }
        for e in self.graph.edge_indices() {
            let Some((s, t)) = self.graph.edge_endpoints(e) else {
                continue;
            };
            if let (Some(&a), Some(&b)) = (index.get(&s), index.get(&t)) {
                graph.add_edge(a, b, ());
            }
        }
        graph
    }

    pub fn stats(&self) -> KnowledgeBaseStats {
        let mut entity_types = BTreeMap::new();
        for node in self.nodes.values() {
            *entity_types.entry(node.entity_type.clone()).or_insert(0) += 1;
        }
        let mut relationship_types = BTreeMap::new();
        for edge in self.edges.values() {
            for rel in &edge.relationships {
                *relationship_types
                    .entry(rel.relationship_type.clone())
                    .or_insert(0) += 1;
            }
        }
        KnowledgeBaseStats {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            source_count: self.source_count(),
            entity_types,
            relationship_types,
        }
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .field("sources", &self.source_count())
            .finish()
    }
}
