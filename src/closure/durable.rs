//! Closure relation persisted in redb.

use std::collections::HashSet;
use std::sync::Arc;

use crate::element::NodeId;
use crate::error::StoreError;
use crate::store::StoreResult;
use crate::store::durable::DurableStore;

use super::{ClosurePair, ClosureStore};

/// Closure tuples stored in the `closure` table of a [`DurableStore`].
///
/// Each batch of inserts or removes is one write transaction.
#[derive(Debug, Clone)]
pub struct DurableClosure {
    store: Arc<DurableStore>,
}

impl DurableClosure {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }
}

fn node(raw: u64) -> StoreResult<NodeId> {
    NodeId::new(raw).ok_or_else(|| StoreError::Serialization {
        message: "closure table holds node id 0".into(),
    })
}

fn raw_pairs(pairs: &[ClosurePair]) -> Vec<(u64, u64)> {
    pairs.iter().map(|(a, d)| (a.get(), d.get())).collect()
}

impl ClosureStore for DurableClosure {
    fn backend(&self) -> &'static str {
        "redb"
    }

    fn insert_pairs(&self, pairs: &[ClosurePair]) -> StoreResult<usize> {
        self.store.closure_insert(&raw_pairs(pairs))
    }

    fn remove_pairs(&self, pairs: &[ClosurePair]) -> StoreResult<usize> {
        self.store.closure_remove(&raw_pairs(pairs))
    }

    fn contains(&self, ancestor: NodeId, descendant: NodeId) -> StoreResult<bool> {
        self.store.closure_contains(ancestor.get(), descendant.get())
    }

    fn descendants_of(&self, ancestor: NodeId) -> StoreResult<HashSet<NodeId>> {
        self.store
            .closure_descendants(ancestor.get())?
            .into_iter()
            .map(node)
            .collect()
    }

    fn ancestors_of(&self, descendant: NodeId) -> StoreResult<HashSet<NodeId>> {
        self.store
            .closure_ancestors(descendant.get())?
            .into_iter()
            .map(node)
            .collect()
    }

    fn pairs(&self) -> StoreResult<Vec<ClosurePair>> {
        self.store
            .closure_pairs()?
            .into_iter()
            .map(|(a, d)| Ok((node(a)?, node(d)?)))
            .collect()
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.store.closure_len()? as usize)
    }

    fn clear(&self) -> StoreResult<()> {
        self.store.closure_clear()
    }
}
