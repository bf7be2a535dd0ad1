//! Associations attached to object-attribute nodes.
//!
//! An association labels a node with a permission grant. The index answers
//! "which of these candidate associations does this node carry" for the
//! filtered traversal.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::element::{Association, AssociationId, NodeId};
use crate::error::ReachResult;
use crate::store::durable::{DurableStore, RecordTable};
use crate::store::{decode, encode};

/// Concurrent index of associations by id and by carrying node.
#[derive(Debug, Default)]
pub struct AssociationIndex {
    by_id: DashMap<AssociationId, Association>,
    by_node: DashMap<NodeId, Vec<AssociationId>>,
}

impl AssociationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an association.
    pub fn insert(&self, association: Association) {
        if let Some(previous) = self.by_id.insert(association.id, association) {
            self.detach(previous.object_attribute, previous.id);
        }
        self.by_node
            .entry(association.object_attribute)
            .or_default()
            .push(association.id);
    }

    /// Remove an association by id.
    pub fn remove(&self, id: AssociationId) -> Option<Association> {
        let (_, association) = self.by_id.remove(&id)?;
        self.detach(association.object_attribute, id);
        Some(association)
    }

    fn detach(&self, node: NodeId, id: AssociationId) {
        if let Some(mut ids) = self.by_node.get_mut(&node) {
            ids.retain(|&a| a != id);
        }
        self.by_node.remove_if(&node, |_, ids| ids.is_empty());
    }

    /// Drop every association carried by a node. Returns the removed ones.
    pub fn remove_node(&self, node: NodeId) -> Vec<Association> {
        let Some((_, ids)) = self.by_node.remove(&node) else {
            return vec![];
        };
        ids.into_iter()
            .filter_map(|id| self.by_id.remove(&id).map(|(_, a)| a))
            .collect()
    }

    pub fn get(&self, id: AssociationId) -> Option<Association> {
        self.by_id.get(&id).map(|r| *r.value())
    }

    /// Associations carried by a node.
    pub fn on_node(&self, node: NodeId) -> Vec<Association> {
        self.by_node
            .get(&node)
            .map(|ids| ids.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    /// Whether the node carries any of the candidate associations.
    pub fn carries_any(&self, node: NodeId, candidates: &HashSet<AssociationId>) -> bool {
        self.by_node
            .get(&node)
            .is_some_and(|ids| ids.iter().any(|id| candidates.contains(id)))
    }

    /// All associations, ordered by id.
    pub fn all(&self) -> Vec<Association> {
        let mut all: Vec<Association> = self.by_id.iter().map(|r| *r.value()).collect();
        all.sort_by_key(|a| a.id);
        all
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Write one association (or its absence) through to the durable store.
    pub fn persist_one(&self, store: &DurableStore, id: AssociationId) -> ReachResult<()> {
        match self.get(id) {
            Some(association) => {
                store.put_record(RecordTable::Associations, id.get(), &encode(&association)?)?
            }
            None => {
                store.remove_record(RecordTable::Associations, id.get())?;
            }
        }
        Ok(())
    }

    /// Restore the index from the durable store.
    pub fn restore(store: &DurableStore) -> ReachResult<Self> {
        let index = Self::new();
        for (_id, bytes) in store.records(RecordTable::Associations)? {
            index.insert(decode(&bytes)?);
        }
        Ok(index)
    }
}
