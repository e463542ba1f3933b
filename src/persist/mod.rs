//! Directory-per-knowledge-base persistence.
//!
//! Layout under the store's base directory:
//!
//! ```text
//! {base}/{kb_id}/
//!   meta.json            KnowledgeBaseMeta
//!   nodes.json           [Node]
//!   edges.json           [Edge]
//!   sources.json         [Source]
//!   domain_profile.json  DomainProfile (only when set)
//!   graph.graphml        GraphML export
//!   merge_history.json   [MergeHistory] (written by callers that merge)
//! ```
//!
//! Every file is written to a hidden temp file in the same directory, synced,
//! and renamed into place. `meta.json` is written last and marks the
//! directory as a knowledge base; a missing or corrupt `meta.json` means
//! "not found".

pub mod graphml;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PersistError;
use crate::extraction::DomainProfile;
use crate::graph::{Edge, KnowledgeBase, KnowledgeBaseMeta, Node, Source};
use crate::resolution::MergeHistory;

pub use graphml::export_graphml;

/// Result type for persistence operations.
pub type PersistResult<T> = std::result::Result<T, PersistError>;

pub const META_FILE: &str = "meta.json";
pub const NODES_FILE: &str = "nodes.json";
pub const EDGES_FILE: &str = "edges.json";
pub const SOURCES_FILE: &str = "sources.json";
pub const PROFILE_FILE: &str = "domain_profile.json";
pub const GRAPHML_FILE: &str = "graph.graphml";
pub const HISTORY_FILE: &str = "merge_history.json";

fn io_err(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write `bytes` to `path` atomically: temp file, fsync, rename.
///
/// On failure the temp file is removed and the error returned; an existing
/// file at `path` is never left half-written.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> PersistResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.tmp"));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        // Persist the rename itself.
        #[cfg(unix)]
        fs::File::open(dir)?.sync_all()?;
        Ok(())
    })();

    if let Err(source) = result {
        if tmp.exists() {
            tracing::warn!(path = %tmp.display(), "removing temp file after failed write");
            let _ = fs::remove_file(&tmp);
        }
        return Err(io_err(path, source));
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> PersistResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| PersistError::Serialization {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    write_atomic(path, &json)
}

/// Read and parse a JSON file. A missing file is `Ok(None)`.
fn read_json<T: DeserializeOwned>(path: &Path) -> PersistResult<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path, e)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| PersistError::Serialization {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

/// Knowledge base ids become directory names; refuse anything path-like.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.starts_with('.')
        && !id.contains(['/', '\\'])
}

/// On-disk store of knowledge bases under one base directory.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseStore {
    base_dir: PathBuf,
}

impl KnowledgeBaseStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding one knowledge base.
    pub fn kb_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    /// Create the directory of a knowledge base about to be written.
    fn writable_dir(&self, id: &str) -> PersistResult<PathBuf> {
        if !is_safe_id(id) {
            return Err(PersistError::InvalidId { id: id.to_string() });
        }
        let dir = self.kb_dir(id);
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(dir)
    }

    /// Write every file of `kb`, `meta.json` last.
    pub fn save(&self, kb: &KnowledgeBase) -> PersistResult<()> {
        let dir = self.writable_dir(kb.id())?;

        let nodes: Vec<&Node> = kb.nodes().collect();
        let edges: Vec<&Edge> = kb.edges().collect();
        let sources: Vec<&Source> = kb.sources().collect();
        write_json(&dir.join(NODES_FILE), &nodes)?;
        write_json(&dir.join(EDGES_FILE), &edges)?;
        write_json(&dir.join(SOURCES_FILE), &sources)?;

        let profile_path = dir.join(PROFILE_FILE);
        match kb.domain_profile() {
            Some(profile) => write_json(&profile_path, profile)?,
            None => match fs::remove_file(&profile_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&profile_path, e)),
            },
        }

        write_atomic(&dir.join(GRAPHML_FILE), export_graphml(kb).as_bytes())?;
        write_json(&dir.join(META_FILE), &kb.meta())?;

        tracing::info!(
            kb_id = %kb.id(),
            nodes = kb.node_count(),
            edges = kb.edge_count(),
            "knowledge base saved"
        );
        Ok(())
    }

    fn read_meta(&self, id: &str) -> Option<KnowledgeBaseMeta> {
        if !is_safe_id(id) {
            return None;
        }
        let path = self.kb_dir(id).join(META_FILE);
        match read_json::<KnowledgeBaseMeta>(&path) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(kb_id = id, error = %e, "unreadable meta.json");
                None
            }
        }
    }

    /// Load a knowledge base. Missing or corrupt data yields `Ok(None)`.
    ///
    /// Only `meta.json` is required; the other files default to empty.
    pub fn load(&self, id: &str) -> PersistResult<Option<KnowledgeBase>> {
        let Some(meta) = self.read_meta(id) else {
            return Ok(None);
        };
        let dir = self.kb_dir(id);

        let loaded = (|| -> PersistResult<KnowledgeBase> {
            let nodes: Vec<Node> = read_json(&dir.join(NODES_FILE))?.unwrap_or_default();
            let edges: Vec<Edge> = read_json(&dir.join(EDGES_FILE))?.unwrap_or_default();
            let sources: Vec<Source> = read_json(&dir.join(SOURCES_FILE))?.unwrap_or_default();
            let profile: Option<DomainProfile> = read_json(&dir.join(PROFILE_FILE))?;
            Ok(KnowledgeBase::restore(meta, nodes, edges, sources, profile))
        })();

        match loaded {
            Ok(kb) => {
                tracing::info!(kb_id = id, nodes = kb.node_count(), "knowledge base loaded");
                Ok(Some(kb))
            }
            Err(e @ PersistError::Serialization { .. }) => {
                tracing::warn!(kb_id = id, error = %e, "corrupt knowledge base treated as missing");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Load by id, falling back to a case-insensitive name match.
    pub fn find(&self, id_or_name: &str) -> PersistResult<Option<KnowledgeBase>> {
        if let Some(kb) = self.load(id_or_name)? {
            return Ok(Some(kb));
        }
        let wanted = id_or_name.to_lowercase();
        let Some(meta) = self
            .list()?
            .into_iter()
            .find(|m| m.name.to_lowercase() == wanted)
        else {
            return Ok(None);
        };
        self.load(&meta.id)
    }

    /// Metadata of every readable knowledge base, oldest first.
    ///
    /// Directories without a valid `meta.json` are skipped.
    pub fn list(&self) -> PersistResult<Vec<KnowledgeBaseMeta>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.base_dir, e)),
        };

        let mut metas: Vec<KnowledgeBaseMeta> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|id| {
                let meta = self.read_meta(&id);
                if meta.is_none() {
                    tracing::warn!(kb_id = %id, "skipping directory without a valid meta.json");
                }
                meta
            })
            .collect();
        metas.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(metas)
    }

    /// Remove a knowledge base directory. Returns whether one existed.
    pub fn delete(&self, id: &str) -> PersistResult<bool> {
        if !is_safe_id(id) {
            return Ok(false);
        }
        let dir = self.kb_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(kb_id = id, "knowledge base deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&dir, e)),
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.read_meta(id).is_some()
    }

    /// Merge audit records kept next to a knowledge base. Missing file is empty.
    pub fn load_merge_history(&self, id: &str) -> PersistResult<Vec<MergeHistory>> {
        if !is_safe_id(id) {
            return Ok(Vec::new());
        }
        Ok(read_json(&self.kb_dir(id).join(HISTORY_FILE))?.unwrap_or_default())
    }

    pub fn save_merge_history(&self, id: &str, history: &[MergeHistory]) -> PersistResult<()> {
        let dir = self.writable_dir(id)?;
        write_json(&dir.join(HISTORY_FILE), history)?;
        tracing::debug!(kb_id = id, records = history.len(), "merge history saved");
        Ok(())
    }
}
