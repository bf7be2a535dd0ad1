//! Association-filtered traversal.
//!
//! Walks the graph from a start node and treats every node carrying one of
//! the candidate associations as a barrier: the node is reported and the walk
//! does not continue past it. The result is the set of nearest governing
//! nodes, one per path, without computing full ancestor sets first.

use std::collections::HashSet;

use petgraph::Direction;

use crate::element::{AssociationId, NodeId};

use super::GraphResult;
use super::association::AssociationIndex;
use super::index::EdgeGraph;
use super::traverse::{Step, walk};

/// Nearest ancestors of `start` carrying a candidate association.
///
/// The start node itself is never tested. A node reached through several
/// paths is examined once; if it matches it is reported, otherwise its
/// parents are explored.
pub fn filtered_ancestors(
    graph: &EdgeGraph,
    associations: &AssociationIndex,
    start: NodeId,
    candidates: &HashSet<AssociationId>,
) -> GraphResult<HashSet<NodeId>> {
    filtered(graph, associations, start, candidates, Direction::Incoming)
}

/// Forward mirror of [`filtered_ancestors`]: nearest descendants carrying a
/// candidate association.
pub fn filtered_descendants(
    graph: &EdgeGraph,
    associations: &AssociationIndex,
    start: NodeId,
    candidates: &HashSet<AssociationId>,
) -> GraphResult<HashSet<NodeId>> {
    filtered(graph, associations, start, candidates, Direction::Outgoing)
}

fn filtered(
    graph: &EdgeGraph,
    associations: &AssociationIndex,
    start: NodeId,
    candidates: &HashSet<AssociationId>,
    direction: Direction,
) -> GraphResult<HashSet<NodeId>> {
    let mut matched = HashSet::new();
    if candidates.is_empty() {
        return Ok(matched);
    }

    walk(graph, &[start], direction, |node, _| {
        if associations.carries_any(node, candidates) {
            matched.insert(node);
            Step::Prune
        } else {
            Step::Expand
        }
    })?;

    tracing::debug!(
        start = %start,
        candidates = candidates.len(),
        matched = matched.len(),
        "filtered traversal finished"
    );
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Association;
    use crate::graph::Relation;

    fn id(raw: u64) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    fn aid(raw: u64) -> AssociationId {
        AssociationId::new(raw).unwrap()
    }

    fn ids(raw: &[u64]) -> HashSet<NodeId> {
        raw.iter().map(|&r| id(r)).collect()
    }

    fn aids(raw: &[u64]) -> HashSet<AssociationId> {
        raw.iter().map(|&r| aid(r)).collect()
    }

    fn graph(edges: &[(u64, u64)]) -> EdgeGraph {
        let g = EdgeGraph::new(Relation::Assignments);
        for &(p, c) in edges {
            g.insert_edge(id(p), id(c));
        }
        g
    }

    fn label(index: &AssociationIndex, assoc: u64, node: u64) {
        index.insert(Association {
            id: aid(assoc),
            object_attribute: id(node),
            operation_set: id(1000 + assoc),
        });
    }

    #[test]
    fn matching_node_is_a_barrier() {
        // 1 -> 2 -> 3, association A on 2
        let g = graph(&[(1, 2), (2, 3)]);
        let index = AssociationIndex::new();
        label(&index, 1, 2);
        label(&index, 2, 1);

        let found = filtered_ancestors(&g, &index, id(3), &aids(&[1, 2])).unwrap();
        assert_eq!(found, ids(&[2]));
    }

    #[test]
    fn non_candidate_labels_are_walked_through() {
        let g = graph(&[(1, 2), (2, 3)]);
        let index = AssociationIndex::new();
        label(&index, 1, 2);
        label(&index, 2, 1);

        let found = filtered_ancestors(&g, &index, id(3), &aids(&[2])).unwrap();
        assert_eq!(found, ids(&[1]));
    }

    #[test]
    fn each_path_stops_at_its_nearest_match() {
        // 10 -> 4 -> 3, 10 -> 5 -> 6 -> 3; match on 4 and 10
        let g = graph(&[(10, 4), (4, 3), (10, 5), (5, 6), (6, 3)]);
        let index = AssociationIndex::new();
        label(&index, 1, 4);
        label(&index, 2, 10);

        let found = filtered_ancestors(&g, &index, id(3), &aids(&[1, 2])).unwrap();
        // 10 is reached through 5 and 6, which carry nothing.
        assert_eq!(found, ids(&[4, 10]));
    }

    #[test]
    fn start_node_is_not_tested() {
        let g = graph(&[(1, 2)]);
        let index = AssociationIndex::new();
        label(&index, 1, 2);
        let found = filtered_ancestors(&g, &index, id(2), &aids(&[1])).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn empty_candidates_match_nothing() {
        let g = graph(&[(1, 2)]);
        let index = AssociationIndex::new();
        label(&index, 1, 1);
        assert!(filtered_ancestors(&g, &index, id(2), &HashSet::new()).unwrap().is_empty());
    }

    #[test]
    fn descendants_mirror() {
        let g = graph(&[(1, 2), (2, 3)]);
        let index = AssociationIndex::new();
        label(&index, 1, 2);
        label(&index, 2, 3);
        let found = filtered_descendants(&g, &index, id(1), &aids(&[1, 2])).unwrap();
        assert_eq!(found, ids(&[2]));
    }
}
