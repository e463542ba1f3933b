//! Rich diagnostic error types for lorekeeper.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers know exactly
//! what went wrong and how to fix it.
//!
//! Read-only queries never return these: "not found" and degenerate graphs are
//! reported as empty or structured results instead.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for lorekeeper.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, sources) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum LoreError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] crate::paths::PathError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("node not found: {node_id}")]
    #[diagnostic(
        code(lore::graph::node_not_found),
        help(
            "No node with this id exists in the knowledge base. \
             It may have been merged into another node."
        )
    )]
    NodeNotFound { node_id: String },

    #[error("label \"{label}\" is already claimed by node {existing_id}")]
    #[diagnostic(
        code(lore::graph::label_conflict),
        help(
            "Labels and aliases map to at most one node. Use `get_or_create_node` \
             to reuse the existing node, or merge the two nodes."
        )
    )]
    LabelConflict { label: String, existing_id: String },

    #[error("empty label")]
    #[diagnostic(
        code(lore::graph::empty_label),
        help("Node labels must contain at least one non-whitespace character.")
    )]
    EmptyLabel,
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MergeError {
    #[error("cannot merge node {node_id} into itself")]
    #[diagnostic(
        code(lore::merge::self_merge),
        help("Pick two distinct nodes. A node's own aliases are already part of it.")
    )]
    SelfMerge { node_id: String },

    #[error("merge target not found: {node_id}")]
    #[diagnostic(
        code(lore::merge::node_not_found),
        help(
            "The node no longer exists. It was probably consumed by an earlier merge; \
             refresh the candidate list and retry."
        )
    )]
    NodeNotFound { node_id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PersistError {
    #[error("I/O error at {path}: {source}")]
    #[diagnostic(
        code(lore::persist::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error at {path}: {message}")]
    #[diagnostic(
        code(lore::persist::serde),
        help(
            "Failed to serialize or deserialize knowledge base data. \
             The file may have been edited by hand or written by an incompatible version."
        )
    )]
    Serialization { path: String, message: String },

    #[error("invalid knowledge base id: {id:?}")]
    #[diagnostic(
        code(lore::persist::invalid_id),
        help("Knowledge base ids become directory names and must not contain path separators or start with '.'.")
    )]
    InvalidId { id: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(lore::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(lore::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(lore::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(lore::config::invalid), help("{message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning lorekeeper results.
pub type LoreResult<T> = std::result::Result<T, LoreError>;
