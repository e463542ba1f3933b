// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # lorekeeper
//!
//! Evolving knowledge graphs built from transcripts: a graph store of
//! entities and relationships, entity resolution with atomic merges, and
//! read-only insight queries.
//!
//! ## Architecture
//!
//! - **Normalization** (`normalize`): canonical name keys and n-grams
//! - **Graph store** (`graph`): petgraph-backed knowledge base with label/alias indices
//! - **Entity resolution** (`resolution`): n-gram blocking, weighted similarity, merges
//! - **Insights** (`insights`): centrality, paths, communities, evidence, suggestions
//! - **Persistence** (`persist`): directory-per-knowledge-base JSON plus GraphML
//!
//! ## Library usage
//!
//! ```
//! use lorekeeper::graph::{KnowledgeBase, Node, RelationshipDetail};
//! use lorekeeper::insights::Insights;
//!
//! let mut kb = KnowledgeBase::new("Cold War", "MKUltra research");
//! kb.add_node(Node::new("CIA", "organization").with_aliases(["The Agency"])).unwrap();
//! kb.add_node(Node::new("Sidney Gottlieb", "person")).unwrap();
//! kb.add_relationship("Sidney Gottlieb", "the agency", RelationshipDetail::new("worked_for", "s1"));
//!
//! let path = Insights::new(&kb).find_connection("Sidney Gottlieb", "CIA");
//! assert_eq!(path.steps, 1);
//! ```

pub mod config;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod insights;
pub mod normalize;
pub mod paths;
pub mod persist;
pub mod resolution;
