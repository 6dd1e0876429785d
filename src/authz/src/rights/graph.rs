//! Implied-rights graph traversal
//!
//! Edges point from a right to the rights it implies. The graph must stay
//! acyclic; [`find_path`] is what registration uses to prove that a new
//! edge set would not close a loop.

use std::collections::{BTreeSet, HashMap};

use super::RightId;

/// Adjacency sets: right → rights it directly implies
pub(crate) type Edges = HashMap<RightId, BTreeSet<RightId>>;

/// All rights reachable from `start` (excluding `start` unless on a cycle)
pub(crate) fn closure(edges: &Edges, start: RightId) -> BTreeSet<RightId> {
    let mut reached = BTreeSet::new();
    let mut stack: Vec<RightId> = edges.get(&start).into_iter().flatten().copied().collect();

    while let Some(current) = stack.pop() {
        if reached.insert(current) {
            if let Some(next) = edges.get(&current) {
                stack.extend(next.iter().copied().filter(|n| !reached.contains(n)));
            }
        }
    }

    reached
}

/// Finds a path `from → … → to` following implication edges
///
/// Depth-first with a visited set; returns the first path found.
pub(crate) fn find_path(edges: &Edges, from: RightId, to: RightId) -> Option<Vec<RightId>> {
    let mut visited = BTreeSet::new();
    let mut path = Vec::new();
    if dfs(edges, from, to, &mut visited, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn dfs(
    edges: &Edges,
    node: RightId,
    target: RightId,
    visited: &mut BTreeSet<RightId>,
    path: &mut Vec<RightId>,
) -> bool {
    path.push(node);
    if node == target {
        return true;
    }

    if visited.insert(node) {
        if let Some(next) = edges.get(&node) {
            for &n in next {
                if dfs(edges, n, target, visited, path) {
                    return true;
                }
            }
        }
    }

    path.pop();
    false
}
