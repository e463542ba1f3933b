//! Merge engine: collapse two nodes into one with idempotency and pair locking.
//!
//! A merge runs `requested → replay check → locked → snapshotted → applied →
//! recorded → unlocked`. The pair lock is an RAII guard, so it is released on
//! every exit path. The merge is applied to a working copy of the knowledge
//! base and committed only when every step succeeded, so a failed merge
//! leaves the graph untouched. A batch of automatic merges shares one working
//! copy and commits once.

use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::MergeError;
use crate::graph::{Edge, KnowledgeBase, Node, new_id};

use super::ResolutionCandidate;

/// Result type for merge operations.
pub type MergeResult<T> = std::result::Result<T, MergeError>;

/// Who initiated a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeType {
    Auto,
    #[default]
    User,
    Agent,
}

impl std::fmt::Display for MergeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// A request to fold `merged_id` into `survivor_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    pub survivor_id: String,
    pub merged_id: String,
    pub merge_type: MergeType,
    pub merged_by: Option<String>,
    /// Idempotency key. A repeated key returns the original history.
    pub request_id: Option<String>,
    pub confidence: Option<f64>,
}

impl MergeRequest {
    pub fn new(survivor_id: impl Into<String>, merged_id: impl Into<String>) -> Self {
        Self {
            survivor_id: survivor_id.into(),
            merged_id: merged_id.into(),
            merge_type: MergeType::default(),
            merged_by: None,
            request_id: None,
            confidence: None,
        }
    }

    pub fn merge_type(mut self, merge_type: MergeType) -> Self {
        self.merge_type = merge_type;
        self
    }

    pub fn merged_by(mut self, actor: impl Into<String>) -> Self {
        self.merged_by = Some(actor.into());
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

/// Verbatim records captured before a merge, for external rollback tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreMergeState {
    pub survivor: Node,
    pub merged: Node,
    /// Every edge touching the merged node.
    pub edges: Vec<Edge>,
}

/// Append-only audit record of one merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeHistory {
    pub id: String,
    pub survivor_id: String,
    pub merged_id: String,
    pub merged_label: String,
    /// Names newly added to the survivor as aliases.
    pub merged_aliases: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub merge_type: MergeType,
    #[serde(default)]
    pub merged_by: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    pub pre_merge_state: PreMergeState,
    pub survivor_label_before: String,
    pub survivor_aliases_before: Vec<String>,
    pub edges_redirected: usize,
    pub merged_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Pair locks
// ---------------------------------------------------------------------------

type PairKey = (String, String);

fn pair_key(a: &str, b: &str) -> PairKey {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Debug, Default)]
struct PairSlot {
    held: Mutex<bool>,
    released: Condvar,
}

/// Exclusive locks keyed by unordered node-id pairs.
///
/// Concurrent requests for the same pair wait for each other; unrelated
/// pairs proceed independently. Entries are removed when their last holder
/// or waiter lets go, so the table stays bounded by in-flight merges.
#[derive(Debug, Default)]
pub struct PairLockTable {
    slots: DashMap<PairKey, Arc<PairSlot>>,
}

impl PairLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the pair `(a, b)` is free, then hold it until the guard drops.
    pub fn acquire(&self, a: &str, b: &str) -> PairLockGuard<'_> {
        let key = pair_key(a, b);
        // Cloned under the shard lock, so a concurrent release sees this waiter.
        let slot = Arc::clone(
            &self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(PairSlot::default())),
        );

        let mut held = slot.held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = slot
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        drop(held);

        PairLockGuard {
            table: self,
            key,
            slot,
        }
    }

    /// Number of pairs currently locked or awaited.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Holds a pair lock; releases it on drop.
#[derive(Debug)]
pub struct PairLockGuard<'a> {
    table: &'a PairLockTable,
    key: PairKey,
    slot: Arc<PairSlot>,
}

impl Drop for PairLockGuard<'_> {
    fn drop(&mut self) {
        {
            let mut held = self.slot.held.lock().unwrap_or_else(PoisonError::into_inner);
            *held = false;
        }
        self.slot.released.notify_one();
        // The table and this guard hold one reference each; more means waiters.
        self.table
            .slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) <= 2);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Applies merges and keeps the idempotency ledger.
#[derive(Debug, Default)]
pub struct MergeEngine {
    locks: PairLockTable,
    ledger: RwLock<Vec<MergeHistory>>,
    by_request: DashMap<String, MergeHistory>,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the ledger with previously recorded merges.
    pub fn with_history(history: Vec<MergeHistory>) -> Self {
        let engine = Self::new();
        for record in history {
            engine.record(record);
        }
        engine
    }

    /// Every recorded merge, oldest first.
    pub fn history(&self) -> Vec<MergeHistory> {
        self.ledger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find_by_request_id(&self, request_id: &str) -> Option<MergeHistory> {
        self.by_request.get(request_id).map(|r| r.value().clone())
    }

    /// The pair-lock table, exposed for inspection.
    pub fn locks(&self) -> &PairLockTable {
        &self.locks
    }

    fn record(&self, history: MergeHistory) {
        if let Some(request_id) = &history.request_id {
            self.by_request.insert(request_id.clone(), history.clone());
        }
        self.ledger
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(history);
    }

    fn replay(&self, request: &MergeRequest) -> Option<MergeHistory> {
        let request_id = request.request_id.as_deref()?;
        let existing = self.find_by_request_id(request_id)?;
        tracing::debug!(
            request_id,
            history_id = %existing.id,
            "idempotent merge replay"
        );
        Some(existing)
    }

    /// Fold `request.merged_id` into `request.survivor_id`.
    ///
    /// Self-merges and unknown ids are rejected before any state changes.
    /// A request whose `request_id` was already applied returns the original
    /// history, even when it names a different pair.
    pub fn merge_nodes(&self, kb: &RwLock<KnowledgeBase>, request: MergeRequest) -> MergeResult<MergeHistory> {
        if request.survivor_id == request.merged_id {
            return Err(MergeError::SelfMerge {
                node_id: request.survivor_id,
            });
        }
        if let Some(existing) = self.replay(&request) {
            return Ok(existing);
        }

        let _pair = self.locks.acquire(&request.survivor_id, &request.merged_id);
        tracing::debug!(
            survivor = %request.survivor_id,
            merged = %request.merged_id,
            "merge pair lock acquired"
        );

        let mut kb = kb.write().unwrap_or_else(PoisonError::into_inner);
        // A concurrent request with the same key may have finished while we waited.
        if let Some(existing) = self.replay(&request) {
            return Ok(existing);
        }

        let history = apply_merge(&mut kb, &request)?;
        self.record(history.clone());
        tracing::debug!(
            kb_id = %kb.id(),
            survivor = %history.survivor_id,
            merged = %history.merged_id,
            edges_redirected = history.edges_redirected,
            "merge applied"
        );
        Ok(history)
    }

    /// Merge a candidate's second node into its first, carrying its confidence.
    pub fn merge_candidate(
        &self,
        kb: &RwLock<KnowledgeBase>,
        candidate: &ResolutionCandidate,
        merge_type: MergeType,
        merged_by: Option<&str>,
        request_id: Option<&str>,
    ) -> MergeResult<MergeHistory> {
        let mut request = MergeRequest::new(&candidate.node_a_id, &candidate.node_b_id)
            .merge_type(merge_type)
            .confidence(candidate.confidence);
        request.merged_by = merged_by.map(str::to_string);
        request.request_id = request_id.map(str::to_string);
        self.merge_nodes(kb, request)
    }

    /// Merge every candidate at or above `threshold`, highest confidence first.
    ///
    /// Candidates touching a node already involved in an earlier merge of this
    /// batch, or a node that no longer exists, are skipped. The batch holds
    /// the pair locks of every selected candidate, then applies all merges to
    /// a single working copy that is committed at the end.
    pub fn auto_resolve_candidates(
        &self,
        kb: &RwLock<KnowledgeBase>,
        candidates: &[ResolutionCandidate],
        threshold: f64,
    ) -> Vec<MergeHistory> {
        let mut ordered: Vec<&ResolutionCandidate> = candidates
            .iter()
            .filter(|c| c.confidence >= threshold && c.node_a_id != c.node_b_id)
            .collect();
        if ordered.is_empty() {
            return Vec::new();
        }
        ordered.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Sorted acquisition keeps concurrent batches from deadlocking.
        let mut keys: Vec<PairKey> = ordered
            .iter()
            .map(|c| pair_key(&c.node_a_id, &c.node_b_id))
            .collect();
        keys.sort();
        keys.dedup();
        let _pairs: Vec<PairLockGuard<'_>> = keys.iter().map(|(a, b)| self.locks.acquire(a, b)).collect();

        let mut kb = kb.write().unwrap_or_else(PoisonError::into_inner);
        let mut working = kb.clone();
        let mut consumed = std::collections::HashSet::new();
        let mut merged: Vec<MergeHistory> = Vec::new();
        for candidate in ordered {
            if consumed.contains(&candidate.node_a_id) || consumed.contains(&candidate.node_b_id) {
                continue;
            }
            if !(working.has_node(&candidate.node_a_id) && working.has_node(&candidate.node_b_id)) {
                continue;
            }

            let request = MergeRequest::new(&candidate.node_a_id, &candidate.node_b_id)
                .merge_type(MergeType::Auto)
                .confidence(candidate.confidence);
            match merge_in_place(&mut working, &request) {
                Ok(history) => {
                    consumed.insert(candidate.node_a_id.clone());
                    consumed.insert(candidate.node_b_id.clone());
                    merged.push(history);
                }
                Err(e) => {
                    tracing::warn!(candidate = %candidate.id, error = %e, "auto-merge skipped");
                    // The failed attempt may have half-applied; rebuild from the merges that held.
                    working = kb.clone();
                    merged.retain(|h| {
                        let replay = MergeRequest::new(&h.survivor_id, &h.merged_id).merge_type(h.merge_type);
                        merge_in_place(&mut working, &replay).is_ok()
                    });
                }
            }
        }

        if !merged.is_empty() {
            *kb = working;
            for history in &merged {
                self.record(history.clone());
            }
            tracing::debug!(kb_id = %kb.id(), merges = merged.len(), "auto-merge batch applied");
        }
        merged
    }
}

/// Apply a merge to a working copy and commit it into `kb` on success.
fn apply_merge(kb: &mut KnowledgeBase, request: &MergeRequest) -> MergeResult<MergeHistory> {
    let mut working = kb.clone();
    let history = merge_in_place(&mut working, request)?;
    *kb = working;
    Ok(history)
}

/// Fold `request.merged_id` into `request.survivor_id` directly in `kb`.
///
/// Unknown ids are rejected before anything changes. A later failure can
/// leave `kb` partially merged, so callers pass a copy they can discard.
fn merge_in_place(kb: &mut KnowledgeBase, request: &MergeRequest) -> MergeResult<MergeHistory> {
    let lookup = |id: &str| {
        kb.get_node(id).cloned().ok_or_else(|| MergeError::NodeNotFound {
            node_id: id.to_string(),
        })
    };
    let survivor = lookup(&request.survivor_id)?;
    let merged = lookup(&request.merged_id)?;
    let pre_merge_state = PreMergeState {
        survivor: survivor.clone(),
        merged: merged.clone(),
        edges: kb.edges_for_node(&merged.id).into_iter().cloned().collect(),
    };

    let (removed, edges) = kb
        .remove_node(&merged.id)
        .ok_or_else(|| MergeError::NodeNotFound {
            node_id: merged.id.clone(),
        })?;

    let mut absorbed = Vec::new();
    for name in removed.names() {
        match kb.resolve_label(name) {
            Some(owner) if owner != survivor.id => {
                tracing::debug!(name, owner, "alias claimed by another node; not absorbed");
            }
            _ => {
                if kb.add_alias(&survivor.id, name)? {
                    absorbed.push(name.to_string());
                }
            }
        }
    }
    kb.merge_node_properties(&survivor.id, removed.properties.clone())?;
    for source_id in &removed.source_ids {
        kb.add_node_source(&survivor.id, source_id)?;
    }
    if let Some(description) = &removed.description {
        kb.fill_description(&survivor.id, description)?;
    }

    let mut edges_redirected = 0;
    for edge in edges {
        let remap = |id: &String| {
            if *id == merged.id {
                survivor.id.clone()
            } else {
                id.clone()
            }
        };
        let source_node_id = remap(&edge.source_node_id);
        let target_node_id = remap(&edge.target_node_id);
        if source_node_id == target_node_id {
            tracing::debug!(edge_id = %edge.id, "dropping edge that would become a self-loop");
            continue;
        }
        kb.add_edge(Edge {
            source_node_id,
            target_node_id,
            updated_at: Utc::now(),
            ..edge
        })?;
        edges_redirected += 1;
    }

    Ok(MergeHistory {
        id: new_id(),
        survivor_id: survivor.id.clone(),
        merged_id: merged.id.clone(),
        merged_label: merged.label.clone(),
        merged_aliases: absorbed,
        confidence: request.confidence,
        merge_type: request.merge_type,
        merged_by: request.merged_by.clone(),
        request_id: request.request_id.clone(),
        survivor_label_before: survivor.label.clone(),
        survivor_aliases_before: survivor.aliases.clone(),
        pre_merge_state,
        edges_redirected,
        merged_at: Utc::now(),
    })
}
