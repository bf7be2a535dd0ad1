//! Operation-set resolution.
//!
//! Given candidate operation-set roots and the unique identifier of an
//! operation, find the roots that actually contain the operation. The search
//! runs backward from the operation node; the walker's path is the
//! provenance, so each hit carries the chain `root -> ... -> operation`.

use std::collections::{BTreeSet, HashSet};

use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::element::{ElementKind, NodeId};
use crate::registry::ElementRegistry;

use super::GraphResult;
use super::index::EdgeGraph;
use super::traverse::{Step, walk};

/// A root that reaches the operation, with the first path found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSetMatch {
    /// The operation-set root.
    pub root: NodeId,
    /// `root, ..., operation`.
    pub path: Vec<NodeId>,
}

/// Roots that are ancestors of the operation, each with its provenance path.
///
/// The operation is the node of kind [`ElementKind::Operation`] registered
/// under `operation_unique_id`. Unknown identifiers and roots that do not
/// reach it produce no matches. Each root appears at most once; results are
/// ordered by root id.
pub fn resolve_operation_set_paths(
    graph: &EdgeGraph,
    registry: &ElementRegistry,
    roots: &[NodeId],
    operation_unique_id: &str,
) -> GraphResult<Vec<OperationSetMatch>> {
    let candidates: HashSet<NodeId> = roots.iter().copied().collect();
    if candidates.is_empty() {
        return Ok(vec![]);
    }
    let Some(operation) = registry.lookup_kind(operation_unique_id, ElementKind::Operation) else {
        tracing::debug!(operation = operation_unique_id, "no operation with this identifier");
        return Ok(vec![]);
    };

    let mut matches = Vec::new();
    walk(graph, &[operation], Direction::Incoming, |node, path| {
        if candidates.contains(&node) {
            matches.push(OperationSetMatch {
                root: node,
                path: path.iter().rev().copied().collect(),
            });
            if matches.len() == candidates.len() {
                return Step::Stop;
            }
        }
        Step::Expand
    })?;

    matches.sort_by_key(|m| m.root);
    Ok(matches)
}

/// Roots that are ancestors of the operation identified by `operation_unique_id`.
pub fn resolve_operation_sets(
    graph: &EdgeGraph,
    registry: &ElementRegistry,
    roots: &[NodeId],
    operation_unique_id: &str,
) -> GraphResult<BTreeSet<NodeId>> {
    Ok(
        resolve_operation_set_paths(graph, registry, roots, operation_unique_id)?
            .into_iter()
            .map(|m| m.root)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::PolicyElement;
    use crate::graph::Relation;

    fn id(raw: u64) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    fn fixture() -> (EdgeGraph, ElementRegistry) {
        // 10 -> 20 -> 30, 11 -> 40; 30 is operation "op1", 40 is operation "op2"
        let g = EdgeGraph::new(Relation::Assignments);
        g.insert_edge(id(10), id(20));
        g.insert_edge(id(20), id(30));
        g.insert_edge(id(11), id(40));

        let registry = ElementRegistry::new();
        for (raw, kind, uid) in [
            (10, ElementKind::OperationSet, "set-a"),
            (11, ElementKind::OperationSet, "set-b"),
            (20, ElementKind::OperationSet, "set-a-inner"),
            (30, ElementKind::Operation, "op1"),
            (40, ElementKind::Operation, "op2"),
        ] {
            registry.register(PolicyElement::new(id(raw), kind, uid)).unwrap();
        }
        (g, registry)
    }

    #[test]
    fn only_ancestor_roots_are_returned() {
        let (g, registry) = fixture();
        let found = resolve_operation_sets(&g, &registry, &[id(10), id(11)], "op1").unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![id(10)]);
    }

    #[test]
    fn provenance_path_runs_root_to_operation() {
        let (g, registry) = fixture();
        let matches =
            resolve_operation_set_paths(&g, &registry, &[id(10), id(20), id(11)], "op1").unwrap();
        assert_eq!(
            matches,
            vec![
                OperationSetMatch {
                    root: id(10),
                    path: vec![id(10), id(20), id(30)],
                },
                OperationSetMatch {
                    root: id(20),
                    path: vec![id(20), id(30)],
                },
            ]
        );
    }

    #[test]
    fn root_reported_once_across_paths() {
        let (g, registry) = fixture();
        // Second route 10 -> 25 -> 30.
        g.insert_edge(id(10), id(25));
        g.insert_edge(id(25), id(30));
        let matches = resolve_operation_set_paths(&g, &registry, &[id(10), id(10)], "op1").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].root, id(10));
    }

    #[test]
    fn unknown_or_non_operation_identifiers_match_nothing() {
        let (g, registry) = fixture();
        assert!(resolve_operation_sets(&g, &registry, &[id(10)], "nope").unwrap().is_empty());
        // "set-a-inner" exists but is not an operation.
        assert!(resolve_operation_sets(&g, &registry, &[id(10)], "set-a-inner").unwrap().is_empty());
        assert!(resolve_operation_sets(&g, &registry, &[], "op1").unwrap().is_empty());
    }
}
