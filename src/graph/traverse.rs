//! Path finding and bounded traversal over the undirected view.
//!
//! Direction is ignored here: a relationship connects two entities whichever
//! way it was phrased. Callers that care about direction inspect the
//! directed edges along the returned path.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::NodeIndex;

use super::index::KnowledgeBase;

/// Upper bound on the number of paths returned by [`simple_paths`].
pub const MAX_PATHS: usize = 10;

/// Default hop limit for path enumeration.
pub const DEFAULT_MAX_LENGTH: usize = 5;

/// Shortest path by hop count between two nodes, as node ids.
///
/// Returns `None` if either node is absent or they are not connected.
/// A node is connected to itself by the single-element path.
pub fn shortest_path(kb: &KnowledgeBase, from: &str, to: &str) -> Option<Vec<String>> {
    let view = kb.undirected_view();
    let start = view.index_of(from)?;
    let goal = view.index_of(to)?;
    if start == goal {
        return Some(vec![from.to_string()]);
    }

    let graph = view.graph();
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
    let mut queue: VecDeque<NodeIndex> = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        for next in graph.neighbors(current) {
            if !visited.insert(next) {
                continue;
            }
            parent.insert(next, current);
            if next == goal {
                let mut path = vec![goal];
                let mut cursor = goal;
                while let Some(&prev) = parent.get(&cursor) {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path.into_iter().map(|i| view.id_of(i).to_string()).collect());
            }
            queue.push_back(next);
        }
    }

    None
}

/// Enumerate simple paths of at most `max_length` edges, depth-first.
///
/// Stops after `limit` paths. Paths come back in discovery order, which is
/// not necessarily shortest-first.
pub fn simple_paths(
    kb: &KnowledgeBase,
    from: &str,
    to: &str,
    max_length: usize,
    limit: usize,
) -> Vec<Vec<String>> {
    let view = kb.undirected_view();
    let (Some(start), Some(goal)) = (view.index_of(from), view.index_of(to)) else {
        return Vec::new();
    };
    if limit == 0 {
        return Vec::new();
    }
    if start == goal {
        return vec![vec![from.to_string()]];
    }
    if max_length == 0 {
        return Vec::new();
    }

    let graph = view.graph();
    let mut found: Vec<Vec<String>> = Vec::new();
    let mut path: Vec<NodeIndex> = vec![start];
    let mut on_path: HashSet<NodeIndex> = HashSet::from([start]);
    // One neighbor iterator per path position.
    let mut stack = vec![graph.neighbors(start)];

    while let Some(children) = stack.last_mut() {
        let Some(child) = children.next() else {
            stack.pop();
            if let Some(done) = path.pop() {
                on_path.remove(&done);
            }
            continue;
        };
        if on_path.contains(&child) {
            continue;
        }
        if child == goal {
            let mut complete: Vec<String> = path.iter().map(|i| view.id_of(*i).to_string()).collect();
            complete.push(view.id_of(goal).to_string());
            found.push(complete);
            if found.len() >= limit {
                break;
            }
            continue;
        }
        // `path.len()` edges would be used to reach `child`; one more is needed for the goal.
        if path.len() < max_length {
            path.push(child);
            on_path.insert(child);
            stack.push(graph.neighbors(child));
        }
    }

    found
}

/// Nodes within `depth` hops of `start`, with their distance, in BFS order.
///
/// The start node itself is excluded.
pub fn neighborhood(kb: &KnowledgeBase, start: &str, depth: usize) -> Vec<(String, usize)> {
    let view = kb.undirected_view();
    let Some(origin) = view.index_of(start) else {
        return Vec::new();
    };

    let graph = view.graph();
    let mut visited: HashSet<NodeIndex> = HashSet::from([origin]);
    let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::from([(origin, 0)]);
    let mut reached = Vec::new();

    while let Some((current, dist)) = queue.pop_front() {
        if dist >= depth {
            continue;
        }
        for next in graph.neighbors(current) {
            if visited.insert(next) {
                reached.push((view.id_of(next).to_string(), dist + 1));
                queue.push_back((next, dist + 1));
            }
        }
    }

    reached
}
