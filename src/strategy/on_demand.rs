//! Recursive query engine: no auxiliary relation, every read walks the graph.

use std::collections::HashSet;
use std::sync::Arc;

use crate::element::NodeId;
use crate::error::ReachResult;
use crate::graph::index::EdgeGraph;
use crate::graph::traverse;

use super::{ReachabilityStrategy, StrategyKind};

/// Answers reachability by traversing the live assignment graph.
///
/// Mutations are plain edge inserts and removes. Reads run the cycle-checked
/// walker, so a cyclic graph fails the query instead of looping.
#[derive(Debug)]
pub struct RecursiveQueryEngine {
    edges: Arc<EdgeGraph>,
}

impl RecursiveQueryEngine {
    pub fn new(edges: Arc<EdgeGraph>) -> Self {
        Self { edges }
    }
}

impl ReachabilityStrategy for RecursiveQueryEngine {
    fn kind(&self) -> StrategyKind {
        StrategyKind::OnDemand
    }

    fn insert_edge(&self, parent: NodeId, child: NodeId) -> ReachResult<bool> {
        Ok(self.edges.insert_edge(parent, child))
    }

    fn remove_edge(&self, parent: NodeId, child: NodeId) -> ReachResult<bool> {
        Ok(self.edges.remove_edge(parent, child))
    }

    fn is_reachable(&self, from: NodeId, to: NodeId) -> ReachResult<bool> {
        Ok(traverse::is_reachable(&self.edges, from, to)?)
    }

    fn descendants_of(&self, roots: &[NodeId]) -> ReachResult<HashSet<NodeId>> {
        Ok(traverse::descendants(&self.edges, roots)?)
    }

    fn ancestors_of(&self, roots: &[NodeId]) -> ReachResult<HashSet<NodeId>> {
        Ok(traverse::ancestors(&self.edges, roots)?)
    }
}
