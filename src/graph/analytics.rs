//! Graph analytics: centrality, components, and community detection.
//!
//! Degree, betweenness, components, and communities run on the cached
//! undirected view; PageRank runs on the directed topology. All functions
//! return results sorted by relevance (score desc, size desc) and never fail:
//! degenerate inputs produce empty or zero-valued results.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::index::KnowledgeBase;

/// Scores below this are treated as "no measurable signal".
pub const SIGNAL_FLOOR: f64 = 1e-4;

/// Default PageRank damping factor.
pub const DEFAULT_DAMPING: f64 = 0.85;

/// Default PageRank iteration count.
pub const DEFAULT_ITERATIONS: usize = 100;

/// Default seed for community detection.
pub const DEFAULT_SEED: u64 = 42;

/// A centrality score for a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct CentralityScore {
    pub node_id: String,
    pub score: f64,
}

fn sort_scores(scores: &mut [CentralityScore]) {
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// ---------------------------------------------------------------------------
// Degree centrality
// ---------------------------------------------------------------------------

/// Number of distinct neighbors per node, ignoring direction.
pub fn degree_centrality(kb: &KnowledgeBase) -> Vec<CentralityScore> {
    let view = kb.undirected_view();
    let graph = view.graph();
    let mut results: Vec<CentralityScore> = graph
        .node_indices()
        .map(|idx| CentralityScore {
            node_id: graph[idx].clone(),
            score: graph.neighbors(idx).count() as f64,
        })
        .collect();
    sort_scores(&mut results);
    results
}

// ---------------------------------------------------------------------------
// PageRank
// ---------------------------------------------------------------------------

/// PageRank over the directed graph.
///
/// Power iteration over the adjacency lists, so each round costs O(V + E).
/// Rank held by nodes without out-edges is spread evenly over all nodes.
pub fn pagerank(kb: &KnowledgeBase, damping: f64, iterations: usize) -> Vec<CentralityScore> {
    let graph = kb.directed_snapshot();
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    let damping = damping.clamp(0.0, 1.0);
    let uniform = 1.0 / n as f64;
    let out_degree: Vec<usize> = graph.node_indices().map(|idx| graph.neighbors(idx).count()).collect();
    let mut scores = vec![uniform; n];
    for _ in 0..iterations {
        let dangling: f64 = graph
            .node_indices()
            .filter(|idx| out_degree[idx.index()] == 0)
            .map(|idx| scores[idx.index()])
            .sum();
        let mut next = vec![(1.0 - damping) * uniform + damping * dangling * uniform; n];
        for idx in graph.node_indices() {
            let degree = out_degree[idx.index()];
            if degree == 0 {
                continue;
            }
            let share = damping * scores[idx.index()] / degree as f64;
            for target in graph.neighbors(idx) {
                next[target.index()] += share;
            }
        }
        scores = next;
    }

    let mut results: Vec<CentralityScore> = graph
        .node_indices()
        .map(|idx| {
            let score = scores[idx.index()];
            CentralityScore {
                node_id: graph[idx].clone(),
                score: if score.is_finite() { score } else { 0.0 },
            }
        })
        .collect();
    sort_scores(&mut results);
    results
}

// ---------------------------------------------------------------------------
// Betweenness centrality
// ---------------------------------------------------------------------------

/// Normalized betweenness centrality (Brandes) on the undirected view.
///
/// Scores are scaled by `1 / ((n-1)(n-2))`; graphs with two or fewer nodes
/// score zero everywhere.
pub fn betweenness_centrality(kb: &KnowledgeBase) -> Vec<CentralityScore> {
    let view = kb.undirected_view();
    let graph = view.graph();
    let n = graph.node_count();
    let mut centrality = vec![0.0f64; n];

    for s in graph.node_indices() {
        let mut stack: Vec<NodeIndex> = Vec::with_capacity(n);
        let mut preds: Vec<Vec<NodeIndex>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0f64; n];
        let mut dist = vec![-1i64; n];
        sigma[s.index()] = 1.0;
        dist[s.index()] = 0;

        let mut queue = VecDeque::from([s]);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for w in graph.neighbors(v) {
                if dist[w.index()] < 0 {
                    dist[w.index()] = dist[v.index()] + 1;
                    queue.push_back(w);
                }
                if dist[w.index()] == dist[v.index()] + 1 {
                    sigma[w.index()] += sigma[v.index()];
                    preds[w.index()].push(v);
                }
            }
        }

        let mut delta = vec![0.0f64; n];
        while let Some(w) = stack.pop() {
            for &v in &preds[w.index()] {
                delta[v.index()] +=
                    sigma[v.index()] / sigma[w.index()] * (1.0 + delta[w.index()]);
            }
            if w != s {
                centrality[w.index()] += delta[w.index()];
            }
        }
    }

    let scale = if n > 2 {
        1.0 / ((n - 1) * (n - 2)) as f64
    } else {
        0.0
    };

    let mut results: Vec<CentralityScore> = graph
        .node_indices()
        .map(|idx| CentralityScore {
            node_id: graph[idx].clone(),
            score: centrality[idx.index()] * scale,
        })
        .collect();
    sort_scores(&mut results);
    results
}

// ---------------------------------------------------------------------------
// Connected components
// ---------------------------------------------------------------------------

/// A connected component of the undirected view.
#[derive(Debug, Clone)]
pub struct ConnectedComponent {
    /// Component identifier (position after sorting).
    pub id: usize,
    /// Member node ids, in graph order.
    pub members: Vec<String>,
    pub size: usize,
}

/// Connected components, largest first.
pub fn connected_components(kb: &KnowledgeBase) -> Vec<ConnectedComponent> {
    let view = kb.undirected_view();
    let graph = view.graph();

    let mut groups: Vec<Vec<NodeIndex>> = tarjan_scc(graph);
    for group in &mut groups {
        group.sort();
    }
    // Largest first; ties broken by earliest member for stable output.
    groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

    groups
        .into_iter()
        .enumerate()
        .map(|(id, indices)| {
            let members: Vec<String> = indices.iter().map(|i| graph[*i].clone()).collect();
            let size = members.len();
            ConnectedComponent { id, members, size }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Louvain community detection
// ---------------------------------------------------------------------------

/// Weighted graph at one level of the Louvain hierarchy.
struct LevelGraph {
    /// Neighbor weights, excluding self-loops. Symmetric.
    adj: Vec<BTreeMap<usize, f64>>,
    /// Internal weight collapsed into each node.
    self_loops: Vec<f64>,
}

impl LevelGraph {
    fn strength(&self, i: usize) -> f64 {
        self.adj[i].values().sum::<f64>() + 2.0 * self.self_loops[i]
    }

    fn len(&self) -> usize {
        self.adj.len()
    }
}

/// Move nodes between communities until no single move improves modularity.
/// Returns the community of each node and whether anything moved.
fn local_moving(level: &LevelGraph, rng: &mut StdRng) -> (Vec<usize>, bool) {
    let n = level.len();
    let strengths: Vec<f64> = (0..n).map(|i| level.strength(i)).collect();
    let m2: f64 = strengths.iter().sum();
    let mut community: Vec<usize> = (0..n).collect();
    let mut totals = strengths.clone();
    if m2 <= 0.0 {
        return (community, false);
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    let mut any_moved = false;
    for _pass in 0..100 {
        let mut moved = false;
        for &i in &order {
            let current = community[i];
            let k_i = strengths[i];
            totals[current] -= k_i;

            let mut links: Vec<(usize, f64)> = Vec::new();
            for (&j, &w) in &level.adj[i] {
                let c = community[j];
                match links.iter_mut().find(|(lc, _)| *lc == c) {
                    Some(entry) => entry.1 += w,
                    None => links.push((c, w)),
                }
            }
            links.sort_by_key(|(c, _)| *c);

            let weight_to = |c: usize| {
                links
                    .iter()
                    .find(|(lc, _)| *lc == c)
                    .map(|(_, w)| *w)
                    .unwrap_or(0.0)
            };
            let gain = |c: usize, w: f64| w - totals[c] * k_i / m2;

            let mut best = current;
            let mut best_gain = gain(current, weight_to(current));
            for &(c, w) in &links {
                let g = gain(c, w);
                if g > best_gain + 1e-12 {
                    best = c;
                    best_gain = g;
                }
            }

            totals[best] += k_i;
            if best != current {
                community[i] = best;
                moved = true;
                any_moved = true;
            }
        }
        if !moved {
            break;
        }
    }

    (community, any_moved)
}

/// Collapse communities into single nodes. Returns the aggregated graph
/// and, for each new node, the old nodes it contains.
fn aggregate(level: &LevelGraph, community: &[usize]) -> (LevelGraph, Vec<Vec<usize>>) {
    let mut renumber: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, &c) in community.iter().enumerate() {
        let next = renumber.len();
        let id = *renumber.entry(c).or_insert(next);
        if id == groups.len() {
            groups.push(Vec::new());
        }
        groups[id].push(i);
    }

    let k = groups.len();
    let mut adj: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); k];
    let mut self_loops = vec![0.0f64; k];
    for i in 0..level.len() {
        let ci = renumber[&community[i]];
        self_loops[ci] += level.self_loops[i];
        for (&j, &w) in &level.adj[i] {
            if j <= i {
                continue;
            }
            let cj = renumber[&community[j]];
            if ci == cj {
                self_loops[ci] += w;
            } else {
                *adj[ci].entry(cj).or_insert(0.0) += w;
                *adj[cj].entry(ci).or_insert(0.0) += w;
            }
        }
    }

    (LevelGraph { adj, self_loops }, groups)
}

/// Louvain modularity-optimizing communities over the given nodes.
///
/// Only edges between the given nodes are considered. The result is
/// deterministic for a fixed `seed`. Communities are returned largest first,
/// members in input order.
pub fn louvain_communities(kb: &KnowledgeBase, node_ids: &[String], seed: u64) -> Vec<Vec<String>> {
    if node_ids.is_empty() {
        return Vec::new();
    }

    let position: HashMap<&str, usize> = node_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let wanted: HashSet<&str> = position.keys().copied().collect();

    let view = kb.undirected_view();
    let graph = view.graph();
    let mut adj: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); node_ids.len()];
    for (i, id) in node_ids.iter().enumerate() {
        let Some(idx) = view.index_of(id) else {
            continue;
        };
        for neighbor in graph.neighbors(idx) {
            let other = view.id_of(neighbor);
            if wanted.contains(other) {
                adj[i].insert(position[other], 1.0);
            }
        }
    }

    let mut level = LevelGraph {
        self_loops: vec![0.0; node_ids.len()],
        adj,
    };
    // members[k] = original positions contained in level node k.
    let mut members: Vec<Vec<usize>> = (0..node_ids.len()).map(|i| vec![i]).collect();
    let mut rng = StdRng::seed_from_u64(seed);

    loop {
        let (community, moved) = local_moving(&level, &mut rng);
        if !moved {
            break;
        }
        let (next, groups) = aggregate(&level, &community);
        if groups.len() == level.len() {
            // Nodes moved and came back; the partition did not change.
            break;
        }
        members = groups
            .iter()
            .map(|g| {
                let mut merged: Vec<usize> = g.iter().flat_map(|k| members[*k].clone()).collect();
                merged.sort_unstable();
                merged
            })
            .collect();
        level = next;
    }

    let mut communities: Vec<Vec<String>> = members
        .into_iter()
        .map(|m| m.into_iter().map(|i| node_ids[i].clone()).collect())
        .collect();
    communities.sort_by(|a, b| b.len().cmp(&a.len()));
    communities
}
