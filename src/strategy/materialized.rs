//! Closure maintainer: incremental upkeep of the materialized closure.
//!
//! The closure relation holds `(ancestor, descendant)` for every non-empty
//! assignment path. Reads are index lookups; the work happens on mutation.
//!
//! **Insert** `p -> c`: every ancestor of `p` (and `p`) now reaches every
//! descendant of `c` (and `c`), so the new tuples are
//! `({p} ∪ Anc(p)) × ({c} ∪ Desc(c))`.
//!
//! **Remove** `p -> c`: only tuples in the affected region
//! `P × C = ({p} ∪ Anc(p)) × ({c} ∪ Desc(c))` can lose support. They are all
//! deleted except the ones backed by a surviving direct edge, then rebuilt by
//! joining surviving tuples `(a, m)` and `(m, d)` until nothing new appears.
//! Tuples outside the region never depended on the removed edge.
//!
//! A failed closure write leaves the maintainer **stale**: reads fall back to
//! walking the edge graph and the next mutation or [`rebuild`] recomputes the
//! closure from scratch.
//!
//! [`rebuild`]: ReachabilityStrategy::rebuild

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use petgraph::Direction;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::closure::{ClosurePair, ClosureStore};
use crate::element::NodeId;
use crate::error::{GraphError, ReachError, ReachResult};
use crate::graph::index::EdgeGraph;
use crate::graph::traverse;

use super::{ReachabilityStrategy, StrategyKind};

/// Difference between the stored closure and a from-scratch computation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureDrift {
    /// Tuples implied by the edges but absent from the closure.
    pub missing: Vec<ClosurePair>,
    /// Tuples in the closure with no supporting path.
    pub extra: Vec<ClosurePair>,
}

impl ClosureDrift {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

impl std::fmt::Display for ClosureDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_clean() {
            return f.write_str("closure is consistent");
        }
        write!(
            f,
            "closure drift: {} missing, {} extra",
            self.missing.len(),
            self.extra.len()
        )
    }
}

/// Materialized reachability over the assignment relation.
pub struct ClosureMaintainer {
    edges: Arc<EdgeGraph>,
    closure: Box<dyn ClosureStore>,
    /// Serializes mutations, rebuilds and verification; reads do not take it.
    write_lock: Mutex<()>,
    /// Set when a closure write failed part-way.
    stale: AtomicBool,
}

impl ClosureMaintainer {
    pub fn new(edges: Arc<EdgeGraph>, closure: Box<dyn ClosureStore>) -> Self {
        Self {
            edges,
            closure,
            write_lock: Mutex::new(()),
            stale: AtomicBool::new(false),
        }
    }

    /// The closure relation.
    pub fn closure(&self) -> &dyn ClosureStore {
        self.closure.as_ref()
    }

    fn with_self(node: NodeId, mut set: HashSet<NodeId>) -> HashSet<NodeId> {
        set.insert(node);
        set
    }

    fn region(&self, parent: NodeId, child: NodeId) -> ReachResult<(HashSet<NodeId>, HashSet<NodeId>)> {
        let above = Self::with_self(parent, self.closure.ancestors_of(parent)?);
        let below = Self::with_self(child, self.closure.descendants_of(child)?);
        Ok((above, below))
    }

    fn mark_stale(&self, err: &ReachError) {
        self.stale.store(true, Ordering::Release);
        tracing::warn!(
            backend = self.closure.backend(),
            error = %err,
            "closure write failed, answering from the edge graph until rebuilt"
        );
    }

    fn apply_insert(&self, parent: NodeId, child: NodeId) -> ReachResult<()> {
        let (above, below) = self.region(parent, child)?;
        let pairs: Vec<ClosurePair> = above
            .iter()
            .flat_map(|&a| below.iter().map(move |&d| (a, d)))
            .collect();
        let added = self.closure.insert_pairs(&pairs)?;

        tracing::debug!(
            parent = %parent,
            child = %child,
            ancestors = above.len(),
            descendants = below.len(),
            added,
            "closure insert"
        );
        Ok(())
    }

    fn apply_remove(&self, parent: NodeId, child: NodeId) -> ReachResult<()> {
        let (above, below) = self.region(parent, child)?;
        let stale: Vec<ClosurePair> = above
            .iter()
            .flat_map(|&a| below.iter().map(move |&d| (a, d)))
            .filter(|&(a, d)| !self.edges.has_edge(a, d))
            .collect();
        let deleted = self.closure.remove_pairs(&stale)?;
        let (restored, rounds) = self.reinsert_until_fixpoint(&above, &below)?;

        tracing::debug!(
            parent = %parent,
            child = %child,
            ancestors = above.len(),
            descendants = below.len(),
            deleted,
            restored,
            rounds,
            "closure remove"
        );
        Ok(())
    }

    /// Join surviving tuples through intermediate nodes until no tuple in
    /// `above × below` can be added.
    ///
    /// Descendant sets are read from the closure once and kept current with
    /// the tuples each round adds.
    fn reinsert_until_fixpoint(
        &self,
        above: &HashSet<NodeId>,
        below: &HashSet<NodeId>,
    ) -> ReachResult<(usize, usize)> {
        let mut reach: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
        let mut restored = 0;
        let mut rounds = 0;
        loop {
            rounds += 1;
            let mut found: Vec<ClosurePair> = Vec::new();
            for &a in above {
                if !reach.contains_key(&a) {
                    reach.insert(a, self.closure.descendants_of(a)?);
                }
                let mids: Vec<NodeId> = reach
                    .get(&a)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default();
                for &m in &mids {
                    if !reach.contains_key(&m) {
                        reach.insert(m, self.closure.descendants_of(m)?);
                    }
                }

                let Some(from_a) = reach.get(&a) else { continue };
                for m in &mids {
                    let Some(from_m) = reach.get(m) else { continue };
                    found.extend(
                        from_m
                            .iter()
                            .filter(|d| below.contains(*d) && !from_a.contains(*d))
                            .map(|&d| (a, d)),
                    );
                }
            }
            found.sort();
            found.dedup();
            if found.is_empty() {
                return Ok((restored, rounds));
            }
            restored += self.closure.insert_pairs(&found)?;
            for &(a, d) in &found {
                reach.entry(a).or_default().insert(d);
            }
        }
    }

    /// From-scratch closure of the current edge set, computed in parallel.
    ///
    /// Unlike the read path this does not stop at cycles: a node on a cycle
    /// simply reaches itself.
    fn oracle(&self) -> Vec<ClosurePair> {
        let nodes = self.edges.nodes();
        let mut pairs: Vec<ClosurePair> = nodes
            .par_iter()
            .flat_map_iter(|&n| {
                let mut seen: HashSet<NodeId> = HashSet::new();
                let mut stack = self.edges.neighbors(n, Direction::Outgoing);
                while let Some(next) = stack.pop() {
                    if seen.insert(next) {
                        stack.extend(self.edges.neighbors(next, Direction::Outgoing));
                    }
                }
                seen.into_iter().map(move |d| (n, d))
            })
            .collect();
        pairs.sort();
        pairs
    }

    fn rebuild_locked(&self) -> ReachResult<usize> {
        let pairs = self.oracle();
        let written = self
            .closure
            .clear()
            .and_then(|()| self.closure.insert_pairs(&pairs))
            .map_err(ReachError::from);
        let written = match written {
            Ok(n) => n,
            Err(err) => {
                self.mark_stale(&err);
                return Err(err);
            }
        };
        self.stale.store(false, Ordering::Release);
        tracing::info!(
            backend = self.closure.backend(),
            edges = self.edges.edge_count(),
            tuples = written,
            "closure rebuilt"
        );
        Ok(written)
    }

    /// A node on a cycle reaches itself; materialized reads refuse to answer
    /// when such a node is among the nodes the query reaches.
    fn check_acyclic<'a>(&self, nodes: impl IntoIterator<Item = &'a NodeId>) -> ReachResult<()> {
        for &node in nodes {
            if self.closure.contains(node, node)? {
                tracing::warn!(node = %node, "cycle detected in materialized closure");
                return Err(GraphError::CycleDetected {
                    node_id: node.get(),
                    relation: self.edges.relation().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn collect(
        &self,
        roots: &[NodeId],
        lookup: impl Fn(NodeId) -> ReachResult<HashSet<NodeId>>,
    ) -> ReachResult<HashSet<NodeId>> {
        let mut out = HashSet::new();
        for &root in roots {
            out.extend(lookup(root)?);
        }
        self.check_acyclic(&out)?;
        Ok(out)
    }
}

impl ReachabilityStrategy for ClosureMaintainer {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Materialized
    }

    fn insert_edge(&self, parent: NodeId, child: NodeId) -> ReachResult<bool> {
        let _guard = self.write_lock.lock().expect("closure write lock poisoned");
        if !self.edges.insert_edge(parent, child) {
            return Ok(false);
        }
        if self.is_stale() {
            self.rebuild_locked()?;
        } else if let Err(err) = self.apply_insert(parent, child) {
            self.mark_stale(&err);
            return Err(err);
        }
        Ok(true)
    }

    fn remove_edge(&self, parent: NodeId, child: NodeId) -> ReachResult<bool> {
        let _guard = self.write_lock.lock().expect("closure write lock poisoned");
        if !self.edges.remove_edge(parent, child) {
            return Ok(false);
        }
        if self.is_stale() {
            self.rebuild_locked()?;
        } else if let Err(err) = self.apply_remove(parent, child) {
            self.mark_stale(&err);
            return Err(err);
        }
        Ok(true)
    }

    fn is_reachable(&self, from: NodeId, to: NodeId) -> ReachResult<bool> {
        if self.is_stale() {
            return Ok(traverse::is_reachable(&self.edges, from, to)?);
        }
        let below = self.closure.descendants_of(from)?;
        self.check_acyclic(&below)?;
        Ok(below.contains(&to))
    }

    fn descendants_of(&self, roots: &[NodeId]) -> ReachResult<HashSet<NodeId>> {
        if self.is_stale() {
            return Ok(traverse::descendants(&self.edges, roots)?);
        }
        self.collect(roots, |n| Ok(self.closure.descendants_of(n)?))
    }

    fn ancestors_of(&self, roots: &[NodeId]) -> ReachResult<HashSet<NodeId>> {
        if self.is_stale() {
            return Ok(traverse::ancestors(&self.edges, roots)?);
        }
        self.collect(roots, |n| Ok(self.closure.ancestors_of(n)?))
    }

    fn closure_len(&self) -> ReachResult<Option<usize>> {
        Ok(Some(self.closure.len()?))
    }

    fn rebuild(&self) -> ReachResult<Option<usize>> {
        let _guard = self.write_lock.lock().expect("closure write lock poisoned");
        self.rebuild_locked().map(Some)
    }

    fn verify(&self) -> ReachResult<Option<ClosureDrift>> {
        let _guard = self.write_lock.lock().expect("closure write lock poisoned");
        let expected: HashSet<ClosurePair> = self.oracle().into_iter().collect();
        let stored: HashSet<ClosurePair> = self.closure.pairs()?.into_iter().collect();

        let mut drift = ClosureDrift {
            missing: expected.difference(&stored).copied().collect(),
            extra: stored.difference(&expected).copied().collect(),
        };
        drift.missing.sort();
        drift.extra.sort();

        if !drift.is_clean() {
            tracing::warn!(
                missing = drift.missing.len(),
                extra = drift.extra.len(),
                "closure does not match the assignment graph"
            );
        }
        Ok(Some(drift))
    }

    fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ClosureMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureMaintainer")
            .field("edges", &self.edges)
            .field("backend", &self.closure.backend())
            .field("stale", &self.is_stale())
            .finish()
    }
}
