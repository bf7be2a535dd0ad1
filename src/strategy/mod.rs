//! Reachability strategies.
//!
//! Both strategies answer the same questions over the assignment relation and
//! must agree on every answer:
//!
//! - [`materialized::ClosureMaintainer`]: keeps an explicit closure relation
//!   up to date on every edge mutation; reads are lookups.
//! - [`on_demand::RecursiveQueryEngine`]: keeps nothing extra; reads walk
//!   the live edge set.
//!
//! The engine picks one per deployment through [`StrategyKind`].

pub mod materialized;
pub mod on_demand;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::element::NodeId;
use crate::error::{EngineError, ReachResult};

pub use materialized::{ClosureDrift, ClosureMaintainer};
pub use on_demand::RecursiveQueryEngine;

/// Which strategy answers reachability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Materialized,
    OnDemand,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Materialized => "materialized",
            StrategyKind::OnDemand => "on_demand",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "materialized" | "closure" => Ok(Self::Materialized),
            "on_demand" | "recursive" => Ok(Self::OnDemand),
            other => Err(EngineError::InvalidConfig {
                message: format!("unknown strategy \"{other}\", expected materialized or on_demand"),
            }),
        }
    }
}

/// Reachability over the assignment relation.
///
/// Implementations own the edge mutations so that any auxiliary state stays
/// consistent with the edge set. `insert_edge` and `remove_edge` return
/// whether the edge set changed; unknown nodes in reads yield empty results.
/// Reads fail with `CycleDetected` whenever a cycle is reachable from the
/// queried nodes in the direction of the query.
pub trait ReachabilityStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn insert_edge(&self, parent: NodeId, child: NodeId) -> ReachResult<bool>;

    fn remove_edge(&self, parent: NodeId, child: NodeId) -> ReachResult<bool>;

    /// Whether `to` is reachable from `from` through a non-empty path.
    fn is_reachable(&self, from: NodeId, to: NodeId) -> ReachResult<bool>;

    /// Union of the descendants of every root.
    fn descendants_of(&self, roots: &[NodeId]) -> ReachResult<HashSet<NodeId>>;

    /// Union of the ancestors of every root.
    fn ancestors_of(&self, roots: &[NodeId]) -> ReachResult<HashSet<NodeId>>;

    /// Number of materialized closure tuples, if the strategy keeps any.
    fn closure_len(&self) -> ReachResult<Option<usize>> {
        Ok(None)
    }

    /// Recompute auxiliary state from the edge set. Returns the number of
    /// closure tuples written, or `None` when there is nothing to rebuild.
    fn rebuild(&self) -> ReachResult<Option<usize>> {
        Ok(None)
    }

    /// Compare auxiliary state against a from-scratch traversal.
    fn verify(&self) -> ReachResult<Option<ClosureDrift>> {
        Ok(None)
    }

    /// Whether auxiliary state fell behind the edge set after a failed write.
    /// A stale strategy still answers correctly from the edges.
    fn is_stale(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_loosely() {
        assert_eq!("materialized".parse::<StrategyKind>().unwrap(), StrategyKind::Materialized);
        assert_eq!("On-Demand".parse::<StrategyKind>().unwrap(), StrategyKind::OnDemand);
        assert!("sql".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&StrategyKind::OnDemand).unwrap();
        assert_eq!(json, "\"on_demand\"");
        assert_eq!(StrategyKind::OnDemand.to_string(), "on_demand");
    }
}
