//! Cycle-checked fixpoint traversal over an [`EdgeGraph`].
//!
//! Every read path (descendants, ancestors, filtered search, operation-set
//! resolution) is built on [`walk`]: an iterative depth-first search whose
//! explicit stack is the current path. A node reached while it is still on the
//! path means the relation is cyclic, and the walk fails with
//! [`GraphError::CycleDetected`] instead of looping.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;

use crate::element::NodeId;
use crate::error::GraphError;

use super::GraphResult;
use super::index::EdgeGraph;

/// What the walker does after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Continue through this node's neighbors.
    Expand,
    /// Do not walk past this node.
    Prune,
    /// End the whole walk.
    Stop,
}

/// One stack entry: a node on the current path and its unexplored neighbors.
struct Frame {
    node: NodeId,
    pending: Vec<NodeId>,
    cursor: usize,
}

/// Depth-first walk from `roots` along `direction`.
///
/// `visit` is called once per node reached through at least one edge, with
/// the current path (`root ..= node`). Roots themselves are only visited if
/// some root reaches them. A node is expanded at most once, so diamonds are
/// cheap; a node pruned on one path is not revisited through another.
pub fn walk<F>(
    graph: &EdgeGraph,
    roots: &[NodeId],
    direction: Direction,
    mut visit: F,
) -> GraphResult<()>
where
    F: FnMut(NodeId, &[NodeId]) -> Step,
{
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut on_path: HashSet<NodeId> = HashSet::new();
    let mut finished: HashSet<NodeId> = HashSet::new();
    let mut path: Vec<NodeId> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    for &root in roots {
        if finished.contains(&root) {
            continue;
        }
        on_path.insert(root);
        path.push(root);
        stack.push(Frame {
            node: root,
            pending: graph.neighbors(root, direction),
            cursor: 0,
        });

        while let Some(frame) = stack.last_mut() {
            let Some(next) = frame.pending.get(frame.cursor).copied() else {
                on_path.remove(&frame.node);
                finished.insert(frame.node);
                stack.pop();
                path.pop();
                continue;
            };
            frame.cursor += 1;

            if on_path.contains(&next) {
                tracing::warn!(
                    node = %next,
                    relation = %graph.relation(),
                    "cycle detected during traversal"
                );
                return Err(GraphError::CycleDetected {
                    node_id: next.get(),
                    relation: graph.relation().to_string(),
                });
            }
            if !seen.insert(next) {
                continue;
            }

            path.push(next);
            let step = visit(next, &path);
            match step {
                Step::Stop => return Ok(()),
                Step::Expand if !finished.contains(&next) => {
                    on_path.insert(next);
                    stack.push(Frame {
                        node: next,
                        pending: graph.neighbors(next, direction),
                        cursor: 0,
                    });
                }
                _ => {
                    path.pop();
                }
            }
        }
    }

    Ok(())
}

/// Every node reachable from any root through a non-empty path.
pub fn descendants(graph: &EdgeGraph, roots: &[NodeId]) -> GraphResult<HashSet<NodeId>> {
    collect(graph, roots, Direction::Outgoing)
}

/// Every node from which some root is reachable through a non-empty path.
pub fn ancestors(graph: &EdgeGraph, roots: &[NodeId]) -> GraphResult<HashSet<NodeId>> {
    collect(graph, roots, Direction::Incoming)
}

fn collect(graph: &EdgeGraph, roots: &[NodeId], direction: Direction) -> GraphResult<HashSet<NodeId>> {
    let mut out = HashSet::new();
    walk(graph, roots, direction, |node, _| {
        out.insert(node);
        Step::Expand
    })?;
    Ok(out)
}

/// Whether `to` is reachable from `from` through a non-empty path.
///
/// The whole descendant set of `from` is walked even when `to` turns up
/// early, so any cycle reachable from `from` fails the query. The
/// materialized closure answers the same way.
pub fn is_reachable(graph: &EdgeGraph, from: NodeId, to: NodeId) -> GraphResult<bool> {
    Ok(descendants(graph, &[from])?.contains(&to))
}

/// Direct parents of every node in the ancestor subgraph of `roots`.
///
/// Keys are the roots and their ancestors that have at least one parent; the
/// values are the interstitial edges of the subgraph grouped by child.
pub fn parent_ids_by_node(
    graph: &EdgeGraph,
    roots: &[NodeId],
) -> GraphResult<HashMap<NodeId, HashSet<NodeId>>> {
    let mut members = ancestors(graph, roots)?;
    members.extend(roots.iter().copied());

    Ok(members
        .into_iter()
        .filter_map(|node| {
            let parents: HashSet<NodeId> = graph.parents_of(node).into_iter().collect();
            (!parents.is_empty()).then_some((node, parents))
        })
        .collect())
}

/// Full ancestor set of every node in the ancestor subgraph of `roots`.
///
/// Same key set as [`parent_ids_by_node`]; each value is the transitive
/// closure of that node's parents, computed once per node.
pub fn ancestor_ids_by_node(
    graph: &EdgeGraph,
    roots: &[NodeId],
) -> GraphResult<HashMap<NodeId, HashSet<NodeId>>> {
    let parents = parent_ids_by_node(graph, roots)?;
    let mut memo: HashMap<NodeId, HashSet<NodeId>> = HashMap::with_capacity(parents.len());
    let empty = HashSet::new();

    // Post-order over the (already cycle-checked) parent map.
    for &start in parents.keys() {
        let mut stack = vec![(start, false)];
        while let Some((node, ready)) = stack.pop() {
            if memo.contains_key(&node) {
                continue;
            }
            let direct = parents.get(&node).unwrap_or(&empty);
            if !ready {
                stack.push((node, true));
                stack.extend(
                    direct
                        .iter()
                        .filter(|p| !memo.contains_key(*p))
                        .map(|&p| (p, false)),
                );
                continue;
            }
            let mut all = direct.clone();
            for p in direct {
                if let Some(above) = memo.get(p) {
                    all.extend(above.iter().copied());
                }
            }
            memo.insert(node, all);
        }
    }

    memo.retain(|node, _| parents.contains_key(node));
    Ok(memo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Relation;

    fn id(raw: u64) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    fn ids(raw: &[u64]) -> HashSet<NodeId> {
        raw.iter().map(|&r| id(r)).collect()
    }

    fn graph(edges: &[(u64, u64)]) -> EdgeGraph {
        let g = EdgeGraph::new(Relation::Assignments);
        for &(p, c) in edges {
            g.insert_edge(id(p), id(c));
        }
        g
    }

    #[test]
    fn descendants_follow_edges_forward() {
        // 1 -> 2 -> 3, 1 -> 4, 5 isolated parent of 4
        let g = graph(&[(1, 2), (2, 3), (1, 4), (5, 4)]);
        assert_eq!(descendants(&g, &[id(1)]).unwrap(), ids(&[2, 3, 4]));
        assert_eq!(descendants(&g, &[id(2), id(5)]).unwrap(), ids(&[3, 4]));
        assert!(descendants(&g, &[id(3)]).unwrap().is_empty());
    }

    #[test]
    fn roots_are_included_only_when_reached() {
        let g = graph(&[(1, 2), (2, 3)]);
        assert_eq!(descendants(&g, &[id(1), id(2)]).unwrap(), ids(&[2, 3]));
        // Walking 2 first must not hide it from the result when 1 reaches it.
        assert_eq!(descendants(&g, &[id(2), id(1)]).unwrap(), ids(&[2, 3]));
        assert_eq!(ancestors(&g, &[id(3), id(2)]).unwrap(), ids(&[1, 2]));
    }

    #[test]
    fn ancestors_mirror_descendants() {
        let g = graph(&[(1, 2), (2, 3), (1, 3), (4, 3)]);
        assert_eq!(ancestors(&g, &[id(3)]).unwrap(), ids(&[1, 2, 4]));
        for a in 1..=4 {
            for b in 1..=4 {
                let down = descendants(&g, &[id(a)]).unwrap().contains(&id(b));
                let up = ancestors(&g, &[id(b)]).unwrap().contains(&id(a));
                assert_eq!(down, up, "symmetry broken for ({a}, {b})");
            }
        }
    }

    #[test]
    fn unknown_nodes_yield_empty_results() {
        let g = graph(&[(1, 2)]);
        assert!(descendants(&g, &[id(99)]).unwrap().is_empty());
        assert!(ancestors(&g, &[id(99)]).unwrap().is_empty());
        assert!(!is_reachable(&g, id(99), id(1)).unwrap());
        assert!(ancestor_ids_by_node(&g, &[id(99)]).unwrap().is_empty());
    }

    #[test]
    fn reachability_requires_a_path() {
        let g = graph(&[(1, 2), (2, 3)]);
        assert!(is_reachable(&g, id(1), id(3)).unwrap());
        assert!(!is_reachable(&g, id(3), id(1)).unwrap());
        assert!(!is_reachable(&g, id(1), id(1)).unwrap());
    }

    #[test]
    fn cycle_fails_fast() {
        let g = graph(&[(1, 2), (2, 3), (3, 1)]);
        let err = descendants(&g, &[id(1)]).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
        assert!(ancestors(&g, &[id(2)]).is_err());
    }

    #[test]
    fn reachability_fails_on_any_cycle_below_the_source() {
        // 1 -> 2 -> 3 -> 2, 1 -> 4
        let g = graph(&[(1, 2), (2, 3), (3, 2), (1, 4)]);
        assert!(is_reachable(&g, id(1), id(2)).is_err());
        assert!(is_reachable(&g, id(1), id(4)).is_err());
        assert!(is_reachable(&g, id(1), id(9)).is_err());
        // Nothing cyclic below 4.
        assert!(!is_reachable(&g, id(4), id(2)).unwrap());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let g = graph(&[(1, 1)]);
        assert!(matches!(
            descendants(&g, &[id(1)]),
            Err(GraphError::CycleDetected { node_id: 1, .. })
        ));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        // 1 -> 2 -> 4, 1 -> 3 -> 4
        let g = graph(&[(1, 2), (1, 3), (2, 4), (3, 4)]);
        assert_eq!(descendants(&g, &[id(1)]).unwrap(), ids(&[2, 3, 4]));
        assert_eq!(ancestors(&g, &[id(4)]).unwrap(), ids(&[1, 2, 3]));
    }

    #[test]
    fn walk_reports_paths_from_root() {
        let g = graph(&[(1, 2), (2, 3)]);
        let mut paths = Vec::new();
        walk(&g, &[id(1)], Direction::Outgoing, |_, path| {
            paths.push(path.to_vec());
            Step::Expand
        })
        .unwrap();
        assert_eq!(paths, vec![vec![id(1), id(2)], vec![id(1), id(2), id(3)]]);
    }

    #[test]
    fn grouping_by_node() {
        // 1 -> 3, 2 -> 3, 3 -> 4, 5 -> 1
        let g = graph(&[(1, 3), (2, 3), (3, 4), (5, 1)]);

        let parents = parent_ids_by_node(&g, &[id(4)]).unwrap();
        assert_eq!(parents.len(), 3);
        assert_eq!(parents[&id(4)], ids(&[3]));
        assert_eq!(parents[&id(3)], ids(&[1, 2]));
        assert_eq!(parents[&id(1)], ids(&[5]));

        let all = ancestor_ids_by_node(&g, &[id(4)]).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[&id(4)], ids(&[1, 2, 3, 5]));
        assert_eq!(all[&id(3)], ids(&[1, 2, 5]));
        assert_eq!(all[&id(1)], ids(&[5]));
        assert!(!all.contains_key(&id(2)));
    }
}
