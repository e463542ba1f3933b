//! Typed extraction input and its application to a knowledge base.
//!
//! An external extractor produces a [`DomainProfile`] (the entity and
//! relationship vocabulary for a project) and, per source, an
//! [`ExtractionResult`]. This module only consumes those payloads.

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::index::{GraphResult, NodeExtras};
use crate::graph::{KnowledgeBase, Properties, RelationshipDetail};

fn default_confidence() -> f64 {
    1.0
}

/// An entity type in a domain vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// A relationship type in a domain vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTypeDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Entity types allowed at the source end; empty means any.
    #[serde(default)]
    pub source_types: Vec<String>,
    #[serde(default)]
    pub target_types: Vec<String>,
}

/// An entity known up front, before any source is ingested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedEntity {
    pub label: String,
    pub entity_type: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Schema and context for a project. Read-only to the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entity_types: Vec<EntityTypeDef>,
    #[serde(default)]
    pub relationship_types: Vec<RelationshipTypeDef>,
    #[serde(default)]
    pub seed_entities: Vec<SeedEntity>,
    #[serde(default)]
    pub extraction_context: String,
}

impl DomainProfile {
    pub fn entity_type_names(&self) -> impl Iterator<Item = &str> {
        self.entity_types.iter().map(|t| t.name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub label: String,
    pub entity_type: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source_label: String,
    pub target_label: String,
    pub relationship_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Option<String>,
}

/// Free-form observation surfaced by the extractor (new themes, open questions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    #[serde(default)]
    pub kind: String,
    pub description: String,
    /// Labels of the entities involved.
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Everything extracted from one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
    #[serde(default)]
    pub discoveries: Vec<Discovery>,
}

/// Counts from [`apply_extraction`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub relationships_added: usize,
    /// Relationships whose source or target label did not resolve.
    pub relationships_skipped: usize,
}

/// Apply one extraction payload, tagging everything with `source_id`.
///
/// Entities are created or reused via label-or-alias lookup; reused nodes
/// gain new aliases, an empty description is filled, and the source is
/// recorded. Relationships with an unresolvable end are skipped.
pub fn apply_extraction(
    kb: &mut KnowledgeBase,
    result: &ExtractionResult,
    source_id: &str,
) -> GraphResult<ExtractionStats> {
    let mut stats = ExtractionStats::default();

    for entity in &result.entities {
        if entity.label.trim().is_empty() {
            continue;
        }
        let (node, created) = kb.get_or_create_node(
            &entity.label,
            &entity.entity_type,
            NodeExtras {
                aliases: entity.aliases.clone(),
                description: entity.description.clone(),
                source_id: Some(source_id.to_string()),
                properties: entity.properties.clone(),
            },
        )?;
        if created {
            stats.nodes_created += 1;
            continue;
        }

        let mut changed = kb.add_node_source(&node.id, source_id)?;
        for alias in &entity.aliases {
            match kb.add_alias(&node.id, alias) {
                Ok(added) => changed |= added,
                // Someone else's name; leave it with them.
                Err(GraphError::LabelConflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if let Some(description) = &entity.description {
            changed |= kb.fill_description(&node.id, description)?;
        }
        if !entity.properties.is_empty() {
            kb.merge_node_properties(&node.id, entity.properties.clone())?;
        }
        if changed {
            stats.nodes_updated += 1;
        }
    }

    for rel in &result.relationships {
        let mut detail = RelationshipDetail::new(&rel.relationship_type, source_id)
            .with_confidence(rel.confidence);
        detail.evidence = rel.evidence.clone();
        match kb.add_relationship(&rel.source_label, &rel.target_label, detail) {
            Some(_) => stats.relationships_added += 1,
            None => stats.relationships_skipped += 1,
        }
    }

    tracing::debug!(
        kb_id = %kb.id(),
        source_id,
        created = stats.nodes_created,
        updated = stats.nodes_updated,
        added = stats.relationships_added,
        skipped = stats.relationships_skipped,
        "extraction applied"
    );
    Ok(stats)
}
