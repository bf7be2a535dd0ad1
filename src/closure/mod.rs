//! The materialized closure relation.
//!
//! A [`ClosureStore`] holds `(ancestor, descendant)` tuples with a uniqueness
//! constraint on the pair and indexes them in both directions. Two backends:
//!
//! - [`MemClosure`]: forward and backward hash maps behind one `RwLock`
//! - [`durable::DurableClosure`]: redb tables that survive restarts
//!
//! The store knows nothing about edges; keeping it equal to the transitive
//! closure of the assignment relation is the job of the closure maintainer.

pub mod durable;

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::element::NodeId;
use crate::store::StoreResult;

pub use durable::DurableClosure;

/// An `(ancestor, descendant)` tuple.
pub type ClosurePair = (NodeId, NodeId);

/// Storage for the closure relation.
///
/// Inserting an existing tuple and removing a missing one are ignored; the
/// returned counts only include tuples that actually changed.
pub trait ClosureStore: Send + Sync {
    /// Short backend name for logs and engine info.
    fn backend(&self) -> &'static str;

    fn insert_pairs(&self, pairs: &[ClosurePair]) -> StoreResult<usize>;

    fn remove_pairs(&self, pairs: &[ClosurePair]) -> StoreResult<usize>;

    fn contains(&self, ancestor: NodeId, descendant: NodeId) -> StoreResult<bool>;

    fn descendants_of(&self, ancestor: NodeId) -> StoreResult<HashSet<NodeId>>;

    fn ancestors_of(&self, descendant: NodeId) -> StoreResult<HashSet<NodeId>>;

    /// Every tuple, sorted.
    fn pairs(&self) -> StoreResult<Vec<ClosurePair>>;

    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn clear(&self) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct Tables {
    forward: HashMap<NodeId, HashSet<NodeId>>,
    backward: HashMap<NodeId, HashSet<NodeId>>,
    len: usize,
}

/// In-memory closure relation.
#[derive(Debug, Default)]
pub struct MemClosure {
    tables: RwLock<Tables>,
}

impl MemClosure {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClosureStore for MemClosure {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn insert_pairs(&self, pairs: &[ClosurePair]) -> StoreResult<usize> {
        let mut tables = self.tables.write().expect("closure lock poisoned");
        let mut inserted = 0;
        for &(ancestor, descendant) in pairs {
            if tables.forward.entry(ancestor).or_default().insert(descendant) {
                tables.backward.entry(descendant).or_default().insert(ancestor);
                inserted += 1;
            }
        }
        tables.len += inserted;
        Ok(inserted)
    }

    fn remove_pairs(&self, pairs: &[ClosurePair]) -> StoreResult<usize> {
        let mut tables = self.tables.write().expect("closure lock poisoned");
        let mut removed = 0;
        for &(ancestor, descendant) in pairs {
            let hit = tables
                .forward
                .get_mut(&ancestor)
                .is_some_and(|set| set.remove(&descendant));
            if !hit {
                continue;
            }
            if let Some(set) = tables.backward.get_mut(&descendant) {
                set.remove(&ancestor);
            }
            removed += 1;
        }
        tables.forward.retain(|_, set| !set.is_empty());
        tables.backward.retain(|_, set| !set.is_empty());
        tables.len -= removed;
        Ok(removed)
    }

    fn contains(&self, ancestor: NodeId, descendant: NodeId) -> StoreResult<bool> {
        let tables = self.tables.read().expect("closure lock poisoned");
        Ok(tables
            .forward
            .get(&ancestor)
            .is_some_and(|set| set.contains(&descendant)))
    }

    fn descendants_of(&self, ancestor: NodeId) -> StoreResult<HashSet<NodeId>> {
        let tables = self.tables.read().expect("closure lock poisoned");
        Ok(tables.forward.get(&ancestor).cloned().unwrap_or_default())
    }

    fn ancestors_of(&self, descendant: NodeId) -> StoreResult<HashSet<NodeId>> {
        let tables = self.tables.read().expect("closure lock poisoned");
        Ok(tables.backward.get(&descendant).cloned().unwrap_or_default())
    }

    fn pairs(&self) -> StoreResult<Vec<ClosurePair>> {
        let tables = self.tables.read().expect("closure lock poisoned");
        let mut pairs: Vec<ClosurePair> = tables
            .forward
            .iter()
            .flat_map(|(&a, set)| set.iter().map(move |&d| (a, d)))
            .collect();
        pairs.sort();
        Ok(pairs)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.tables.read().expect("closure lock poisoned").len)
    }

    fn clear(&self) -> StoreResult<()> {
        *self.tables.write().expect("closure lock poisoned") = Tables::default();
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    fn ids(raw: &[u64]) -> HashSet<NodeId> {
        raw.iter().map(|&r| id(r)).collect()
    }

    #[test]
    fn pairs_are_unique() {
        let closure = MemClosure::new();
        assert_eq!(
            closure
                .insert_pairs(&[(id(1), id(2)), (id(1), id(2)), (id(2), id(3))])
                .unwrap(),
            2
        );
        assert_eq!(closure.insert_pairs(&[(id(1), id(2))]).unwrap(), 0);
        assert_eq!(closure.len().unwrap(), 2);
        assert_eq!(closure.pairs().unwrap(), vec![(id(1), id(2)), (id(2), id(3))]);
    }

    #[test]
    fn both_directions_stay_in_sync() {
        let closure = MemClosure::new();
        closure
            .insert_pairs(&[(id(1), id(3)), (id(2), id(3)), (id(1), id(2))])
            .unwrap();
        assert_eq!(closure.ancestors_of(id(3)).unwrap(), ids(&[1, 2]));
        assert_eq!(closure.descendants_of(id(1)).unwrap(), ids(&[2, 3]));

        assert_eq!(closure.remove_pairs(&[(id(1), id(3)), (id(5), id(6))]).unwrap(), 1);
        assert!(!closure.contains(id(1), id(3)).unwrap());
        assert_eq!(closure.ancestors_of(id(3)).unwrap(), ids(&[2]));
        assert_eq!(closure.len().unwrap(), 2);

        closure.clear().unwrap();
        assert!(closure.is_empty().unwrap());
        assert!(closure.descendants_of(id(1)).unwrap().is_empty());
    }
}
