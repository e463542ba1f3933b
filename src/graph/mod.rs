//! Knowledge base data model and graph algorithms.
//!
//! A knowledge base stores [`Node`]s (entities), directed [`Edge`]s bundling
//! one or more [`RelationshipDetail`]s, and the [`Source`]s they were
//! extracted from.
//!
//! - [`index`]: the [`KnowledgeBase`] store with label/alias indices
//! - [`traverse`]: shortest paths and bounded simple-path enumeration
//! - [`analytics`]: centrality, components, and community detection

pub mod analytics;
pub mod index;
pub mod traverse;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use index::{KnowledgeBase, KnowledgeBaseMeta, KnowledgeBaseStats};

/// Generate a fresh opaque 12-character identifier.
pub fn new_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// A property value: a small closed set of scalar types.
///
/// Keeps serialization and equality well-defined while still accepting the
/// loosely typed properties emitted by extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// String-keyed property map.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A single real-world entity tracked in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Opaque 12-character identifier.
    pub id: String,
    /// Primary display name.
    pub label: String,
    /// Open string tag, e.g. "person" or "organization".
    pub entity_type: String,
    /// Alternate names, in insertion order. Never contains the label.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    /// Ids of the sources this entity was extracted from.
    #[serde(default)]
    pub source_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a node with a fresh id and current timestamps.
    pub fn new(label: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            label: label.into(),
            entity_type: entity_type.into(),
            aliases: Vec::new(),
            description: None,
            properties: Properties::new(),
            source_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for alias in aliases {
            self.push_alias(alias.into());
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_ids.insert(source_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add an alias unless it equals the label or an existing alias
    /// (case-insensitively). Returns whether it was added.
    pub fn push_alias(&mut self, alias: String) -> bool {
        let key = crate::normalize::lookup_key(&alias);
        if key.is_empty() || key == crate::normalize::lookup_key(&self.label) {
            return false;
        }
        if self
            .aliases
            .iter()
            .any(|a| crate::normalize::lookup_key(a) == key)
        {
            return false;
        }
        self.aliases.push(alias);
        true
    }

    /// Label followed by every alias.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.label.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// One extracted relationship instance carried by an [`Edge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDetail {
    pub relationship_type: String,
    /// Provenance: the [`Source`] this relationship was extracted from.
    pub source_id: String,
    /// Extraction confidence in [0.0, 1.0].
    pub confidence: f64,
    /// Supporting quote from the source, if any.
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    pub extracted_at: DateTime<Utc>,
}

impl RelationshipDetail {
    pub fn new(relationship_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            source_id: source_id.into(),
            confidence: 1.0,
            evidence: None,
            properties: Properties::new(),
            extracted_at: Utc::now(),
        }
    }

    /// Set the confidence, clamped to [0.0, 1.0].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

/// The aggregate directed connection between two nodes.
///
/// At most one edge exists per ordered `(source_node_id, target_node_id)`
/// pair. Relationship types may repeat across details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default)]
    pub relationships: Vec<RelationshipDetail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(source_node_id: impl Into<String>, target_node_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            relationships: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Distinct relationship types on this edge, in first-seen order.
    pub fn relationship_types(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for rel in &self.relationships {
            if !seen.contains(&rel.relationship_type.as_str()) {
                seen.push(rel.relationship_type.as_str());
            }
        }
        seen
    }

    /// The node at the other end from `node_id`, if `node_id` is an endpoint.
    pub fn other_end(&self, node_id: &str) -> Option<&str> {
        if self.source_node_id == node_id {
            Some(&self.target_node_id)
        } else if self.target_node_id == node_id {
            Some(&self.source_node_id)
        } else {
            None
        }
    }
}

/// Kind of material a source was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Video,
    Audio,
    Document,
    Webpage,
    #[default]
    Other,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Webpage => "webpage",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "audio" | "podcast" => Ok(Self::Audio),
            "document" | "pdf" => Ok(Self::Document),
            "webpage" | "web" | "url" => Ok(Self::Webpage),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown source type \"{other}\"")),
        }
    }
}

/// Provenance record for ingested material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub url: Option<String>,
    /// Free-form metadata; may carry a `transcript_id` for evidence linking.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub processed_at: DateTime<Utc>,
}

impl Source {
    pub fn new(title: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            source_type,
            url: None,
            metadata: BTreeMap::new(),
            processed_at: Utc::now(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// External transcript identifier, when present in metadata.
    pub fn transcript_id(&self) -> Option<&str> {
        self.metadata.get("transcript_id").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_twelve_chars() {
        let id = new_id();
        assert_eq!(id.len(), 12);
        assert_ne!(id, new_id());
    }

    #[test]
    fn push_alias_skips_label_and_duplicates() {
        let mut node = Node::new("CIA", "organization");
        assert!(!node.push_alias("cia".into()));
        assert!(node.push_alias("Central Intelligence Agency".into()));
        assert!(!node.push_alias("central intelligence agency".into()));
        assert_eq!(node.aliases, vec!["Central Intelligence Agency"]);
    }

    #[test]
    fn property_value_untagged_serde() {
        let mut props = Properties::new();
        props.insert("born".into(), PropertyValue::Number(1918.0));
        props.insert("role".into(), "chemist".into());
        props.insert("active".into(), true.into());

        let json = serde_json::to_string(&props).unwrap();
        assert_eq!(json, r#"{"active":true,"born":1918.0,"role":"chemist"}"#);

        let parsed: Properties = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, props);
    }

    #[test]
    fn source_type_serde_is_lowercase() {
        let json = serde_json::to_string(&SourceType::Webpage).unwrap();
        assert_eq!(json, "\"webpage\"");
    }

    #[test]
    fn edge_relationship_types_are_unique() {
        let mut edge = Edge::new("a", "b");
        edge.relationships.push(RelationshipDetail::new("knows", "s1"));
        edge.relationships.push(RelationshipDetail::new("works_with", "s1"));
        edge.relationships.push(RelationshipDetail::new("knows", "s2"));
        assert_eq!(edge.relationship_types(), vec!["knows", "works_with"]);
        assert_eq!(edge.other_end("a"), Some("b"));
        assert_eq!(edge.other_end("z"), None);
    }

    #[test]
    fn confidence_is_clamped() {
        let rel = RelationshipDetail::new("knows", "s").with_confidence(1.7);
        assert_eq!(rel.confidence, 1.0);
    }

    #[test]
    fn source_type_parses_common_names() {
        assert_eq!("Video".parse::<SourceType>().unwrap(), SourceType::Video);
        assert_eq!("podcast".parse::<SourceType>().unwrap(), SourceType::Audio);
        assert!("hologram".parse::<SourceType>().is_err());
    }
}
