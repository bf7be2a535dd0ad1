//! Directed policy graphs and the traversals over them.
//!
//! - [`index::EdgeGraph`]: one in-memory edge relation (petgraph + DashMap index)
//! - [`traverse`]: cycle-checked fixpoint walks (descendants, ancestors, grouping)
//! - [`filter`]: ancestor search that stops at matching associations
//! - [`opset`]: operation-set resolution with per-root provenance
//! - [`association`]: object-attribute → association labels
//!
//! The same [`index::EdgeGraph`] type backs both the assignment relation and
//! the logical-link relation; the two are never merged.

pub mod association;
pub mod filter;
pub mod index;
pub mod opset;
pub mod traverse;

use serde::{Deserialize, Serialize};

use crate::element::NodeId;
use crate::error::GraphError;

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// A directed edge: `child` is assigned to (contained by) `parent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub parent: NodeId,
    pub child: NodeId,
}

impl Edge {
    pub fn new(parent: NodeId, child: NodeId) -> Self {
        Self { parent, child }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.parent, self.child)
    }
}

/// Which edge relation a graph holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Assignments,
    LogicalLinks,
}

impl Relation {
    pub fn as_str(self) -> &'static str {
        match self {
            Relation::Assignments => "assignments",
            Relation::LogicalLinks => "logical_links",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
