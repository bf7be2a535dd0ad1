//! Element registry: policy elements by id and by unique identifier.
//!
//! The [`ElementRegistry`] stands in for the host's record store. It provides
//! O(1) lookups in both directions using two `DashMap`s and can be persisted
//! to and restored from the durable store.

use dashmap::DashMap;

use crate::element::{ElementKind, NodeId, PolicyElement};
use crate::error::{GraphError, ReachResult};
use crate::store::durable::{DurableStore, RecordTable};
use crate::store::{decode, encode};

/// Bidirectional registry mapping ids to elements and unique identifiers to ids.
#[derive(Debug, Default)]
pub struct ElementRegistry {
    /// Forward map: NodeId → PolicyElement (source of truth).
    by_id: DashMap<NodeId, PolicyElement>,
    /// Reverse map: unique identifier → NodeId.
    by_unique: DashMap<String, NodeId>,
}

impl ElementRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an element. Re-registering an id replaces the old record.
    ///
    /// Errors if the unique identifier belongs to a different element.
    pub fn register(&self, element: PolicyElement) -> ReachResult<()> {
        if let Some(existing) = self.by_unique.get(&element.unique_identifier) {
            if *existing.value() != element.id {
                return Err(GraphError::DuplicateUniqueIdentifier {
                    unique_identifier: element.unique_identifier.clone(),
                    existing_id: existing.value().get(),
                }
                .into());
            }
        }

        if let Some(previous) = self.by_id.get(&element.id) {
            if previous.unique_identifier != element.unique_identifier {
                self.by_unique.remove(&previous.unique_identifier);
            }
        }

        self.by_unique
            .insert(element.unique_identifier.clone(), element.id);
        self.by_id.insert(element.id, element);
        Ok(())
    }

    /// Remove an element, returning its record.
    pub fn remove(&self, id: NodeId) -> Option<PolicyElement> {
        let (_, element) = self.by_id.remove(&id)?;
        self.by_unique.remove(&element.unique_identifier);
        Some(element)
    }

    /// Look up an element by id.
    pub fn get(&self, id: NodeId) -> Option<PolicyElement> {
        self.by_id.get(&id).map(|r| r.value().clone())
    }

    /// Kind tag of an element, if registered.
    pub fn kind_of(&self, id: NodeId) -> Option<ElementKind> {
        self.by_id.get(&id).map(|r| r.value().kind)
    }

    /// Look up an element id by its unique identifier.
    pub fn lookup_unique(&self, unique_identifier: &str) -> Option<NodeId> {
        self.by_unique.get(unique_identifier).map(|r| *r.value())
    }

    /// Id of the element with this unique identifier, if it has the given kind.
    pub fn lookup_kind(&self, unique_identifier: &str, kind: ElementKind) -> Option<NodeId> {
        let id = self.lookup_unique(unique_identifier)?;
        (self.kind_of(id)? == kind).then_some(id)
    }

    /// All registered elements, ordered by id.
    pub fn all(&self) -> Vec<PolicyElement> {
        let mut all: Vec<PolicyElement> = self.by_id.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|e| e.id);
        all
    }

    /// Number of registered elements.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write one element through to the durable store.
    pub fn persist_one(&self, store: &DurableStore, id: NodeId) -> ReachResult<()> {
        match self.get(id) {
            Some(element) => store.put_record(RecordTable::Elements, id.get(), &encode(&element)?)?,
            None => {
                store.remove_record(RecordTable::Elements, id.get())?;
            }
        }
        Ok(())
    }

    /// Restore the registry from the durable store.
    pub fn restore(store: &DurableStore) -> ReachResult<Self> {
        let registry = Self::new();
        for (_id, bytes) in store.records(RecordTable::Elements)? {
            let element: PolicyElement = decode(&bytes)?;
            registry.register(element)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReachError;

    fn id(raw: u64) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let registry = ElementRegistry::new();
        registry
            .register(PolicyElement::new(id(1), ElementKind::Operation, "read"))
            .unwrap();
        registry
            .register(PolicyElement::new(id(2), ElementKind::OperationSet, "readers"))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup_unique("read"), Some(id(1)));
        assert_eq!(registry.kind_of(id(2)), Some(ElementKind::OperationSet));
        assert_eq!(registry.lookup_kind("read", ElementKind::Operation), Some(id(1)));
        assert_eq!(registry.lookup_kind("readers", ElementKind::Operation), None);
        assert_eq!(registry.lookup_unique("write"), None);
    }

    #[test]
    fn duplicate_unique_identifier_is_rejected() {
        let registry = ElementRegistry::new();
        registry
            .register(PolicyElement::new(id(1), ElementKind::User, "alice"))
            .unwrap();
        let err = registry
            .register(PolicyElement::new(id(2), ElementKind::User, "alice"))
            .unwrap_err();
        assert!(matches!(
            err,
            ReachError::Graph(GraphError::DuplicateUniqueIdentifier { existing_id: 1, .. })
        ));
    }

    #[test]
    fn reregistering_replaces_identifier() {
        let registry = ElementRegistry::new();
        registry
            .register(PolicyElement::new(id(1), ElementKind::User, "alice"))
            .unwrap();
        registry
            .register(PolicyElement::new(id(1), ElementKind::User, "alice@corp"))
            .unwrap();
        assert_eq!(registry.lookup_unique("alice"), None);
        assert_eq!(registry.lookup_unique("alice@corp"), Some(id(1)));

        let removed = registry.remove(id(1)).unwrap();
        assert_eq!(removed.unique_identifier, "alice@corp");
        assert!(registry.is_empty());
        assert_eq!(registry.lookup_unique("alice@corp"), None);
    }
}
