//! In-memory edge relation with an id index.
//!
//! Uses a `petgraph` stable graph for adjacency in both directions and a
//! `DashMap` for O(1) `NodeId → NodeIndex` lookups. Stable indices keep the
//! id index valid when nodes are removed.

use std::sync::RwLock;

use dashmap::DashMap;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;

use crate::element::NodeId;

use super::{Edge, Relation};

/// One directed edge relation (assignments or logical links).
///
/// Edges are unique: inserting an existing edge or removing a missing one is a
/// no-op reported through the boolean return value.
pub struct EdgeGraph {
    relation: Relation,
    /// The directed graph: nodes carry their NodeId, edges carry nothing.
    graph: RwLock<StableDiGraph<NodeId, ()>>,
    /// NodeId → NodeIndex mapping for O(1) node lookups.
    node_index: DashMap<NodeId, NodeIndex>,
}

impl EdgeGraph {
    /// Create a new empty graph for the given relation.
    pub fn new(relation: Relation) -> Self {
        Self {
            relation,
            graph: RwLock::new(StableDiGraph::new()),
            node_index: DashMap::new(),
        }
    }

    /// Which relation this graph holds.
    pub fn relation(&self) -> Relation {
        self.relation
    }

    /// Ensure a node exists, returning its index. Caller holds the write lock.
    fn ensure_node(&self, graph: &mut StableDiGraph<NodeId, ()>, id: NodeId) -> NodeIndex {
        if let Some(idx) = self.node_index.get(&id) {
            return *idx.value();
        }
        let idx = graph.add_node(id);
        self.node_index.insert(id, idx);
        idx
    }

    fn index_of(&self, id: NodeId) -> Option<NodeIndex> {
        self.node_index.get(&id).map(|idx| *idx.value())
    }

    /// Insert `parent → child`. Returns `false` if the edge already existed.
    pub fn insert_edge(&self, parent: NodeId, child: NodeId) -> bool {
        let mut graph = self.graph.write().expect("graph lock poisoned");
        let p = self.ensure_node(&mut graph, parent);
        let c = self.ensure_node(&mut graph, child);
        if graph.find_edge(p, c).is_some() {
            return false;
        }
        graph.add_edge(p, c, ());
        true
    }

    /// Remove `parent → child`. Returns `false` if there was no such edge.
    pub fn remove_edge(&self, parent: NodeId, child: NodeId) -> bool {
        let mut graph = self.graph.write().expect("graph lock poisoned");
        let (Some(p), Some(c)) = (self.index_of(parent), self.index_of(child)) else {
            return false;
        };
        match graph.find_edge(p, c) {
            Some(edge) => {
                graph.remove_edge(edge);
                true
            }
            None => false,
        }
    }

    /// Whether the direct edge `parent → child` exists.
    pub fn has_edge(&self, parent: NodeId, child: NodeId) -> bool {
        let graph = self.graph.read().expect("graph lock poisoned");
        match (self.index_of(parent), self.index_of(child)) {
            (Some(p), Some(c)) => graph.find_edge(p, c).is_some(),
            _ => false,
        }
    }

    /// Direct neighbors of a node. `Incoming` yields parents, `Outgoing` children.
    pub fn neighbors(&self, id: NodeId, direction: Direction) -> Vec<NodeId> {
        let graph = self.graph.read().expect("graph lock poisoned");
        let Some(idx) = self.index_of(id) else {
            return vec![];
        };
        graph
            .neighbors_directed(idx, direction)
            .filter_map(|n| graph.node_weight(n).copied())
            .collect()
    }

    /// Direct parents of a node.
    pub fn parents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct children of a node.
    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Every edge touching the node, in either direction.
    pub fn incident_edges(&self, id: NodeId) -> Vec<Edge> {
        let graph = self.graph.read().expect("graph lock poisoned");
        let Some(idx) = self.index_of(id) else {
            return vec![];
        };
        let incoming = graph.edges_directed(idx, Direction::Incoming);
        let outgoing = graph.edges_directed(idx, Direction::Outgoing);
        incoming
            .chain(outgoing)
            .filter_map(|e| {
                let parent = *graph.node_weight(e.source())?;
                let child = *graph.node_weight(e.target())?;
                Some(Edge::new(parent, child))
            })
            .collect()
    }

    /// Drop a node and every edge touching it. Returns whether the node existed.
    pub fn remove_node(&self, id: NodeId) -> bool {
        let mut graph = self.graph.write().expect("graph lock poisoned");
        match self.node_index.remove(&id) {
            Some((_, idx)) => graph.remove_node(idx).is_some(),
            None => false,
        }
    }

    /// Check if a node exists.
    pub fn has_node(&self, id: NodeId) -> bool {
        self.node_index.contains_key(&id)
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.node_index.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.read().expect("graph lock poisoned").edge_count()
    }

    /// All node ids, sorted.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.node_index.iter().map(|e| *e.key()).collect();
        nodes.sort();
        nodes
    }

    /// All edges, sorted by `(parent, child)`.
    pub fn edges(&self) -> Vec<Edge> {
        let graph = self.graph.read().expect("graph lock poisoned");
        let mut edges: Vec<Edge> = graph
            .edge_indices()
            .filter_map(|ei| {
                let (src, dst) = graph.edge_endpoints(ei)?;
                Some(Edge::new(*graph.node_weight(src)?, *graph.node_weight(dst)?))
            })
            .collect();
        edges.sort();
        edges
    }

    /// Bulk-load edges, e.g. when restoring from persistent storage.
    /// Returns the number of edges that were new.
    pub fn bulk_load(&self, edges: &[Edge]) -> usize {
        edges
            .iter()
            .filter(|e| self.insert_edge(e.parent, e.child))
            .count()
    }
}

impl std::fmt::Debug for EdgeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeGraph")
            .field("relation", &self.relation)
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    #[test]
    fn insert_and_query() {
        let g = EdgeGraph::new(Relation::Assignments);
        assert!(g.insert_edge(id(1), id(2)));
        assert!(g.insert_edge(id(1), id(3)));

        assert!(g.has_node(id(1)));
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 2);
        assert!(g.has_edge(id(1), id(2)));
        assert!(!g.has_edge(id(2), id(1)));

        let mut children = g.children_of(id(1));
        children.sort();
        assert_eq!(children, vec![id(2), id(3)]);
        assert_eq!(g.parents_of(id(3)), vec![id(1)]);
    }

    #[test]
    fn duplicate_insert_and_missing_remove_are_noops() {
        let g = EdgeGraph::new(Relation::Assignments);
        assert!(g.insert_edge(id(1), id(2)));
        assert!(!g.insert_edge(id(1), id(2)));
        assert_eq!(g.edge_count(), 1);

        assert!(g.remove_edge(id(1), id(2)));
        assert!(!g.remove_edge(id(1), id(2)));
        assert!(!g.remove_edge(id(8), id(9)));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let g = EdgeGraph::new(Relation::LogicalLinks);
        g.insert_edge(id(1), id(2));
        g.insert_edge(id(2), id(3));
        g.insert_edge(id(4), id(3));

        let mut incident = g.incident_edges(id(2));
        incident.sort();
        assert_eq!(
            incident,
            vec![Edge::new(id(1), id(2)), Edge::new(id(2), id(3))]
        );

        assert!(g.remove_node(id(2)));
        assert!(!g.remove_node(id(2)));
        assert_eq!(g.edges(), vec![Edge::new(id(4), id(3))]);
        // Indices of surviving nodes stay valid.
        assert_eq!(g.parents_of(id(3)), vec![id(4)]);
        assert!(g.insert_edge(id(1), id(4)));
        assert!(g.has_edge(id(1), id(4)));
    }

    #[test]
    fn bulk_load_counts_new_edges() {
        let g = EdgeGraph::new(Relation::Assignments);
        let edges = [
            Edge::new(id(1), id(2)),
            Edge::new(id(2), id(3)),
            Edge::new(id(1), id(2)),
        ];
        assert_eq!(g.bulk_load(&edges), 2);
        assert_eq!(g.edges(), vec![Edge::new(id(1), id(2)), Edge::new(id(2), id(3))]);
    }

    #[test]
    fn empty_queries() {
        let g = EdgeGraph::new(Relation::Assignments);
        assert!(g.parents_of(id(1)).is_empty());
        assert!(g.children_of(id(1)).is_empty());
        assert!(g.incident_edges(id(1)).is_empty());
        assert!(!g.has_edge(id(1), id(2)));
    }
}
