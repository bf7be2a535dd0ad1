//! Policy element types.
//!
//! Every node in the access-control graph is a [`PolicyElement`] identified by
//! a [`NodeId`] and tagged with an [`ElementKind`]. Permission grants attach to
//! object-attribute nodes as [`Association`]s. The engine treats elements as
//! opaque keys plus a kind tag; their records belong to the host.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Unique, niche-optimized identifier for a policy element.
///
/// Uses `NonZeroU64` so that `Option<NodeId>` is the same size as `NodeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(NonZeroU64);

impl NodeId {
    /// Create a `NodeId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(NodeId)
    }

    /// Like [`NodeId::new`], but reports a zero id as an error.
    pub fn try_from_raw(raw: u64) -> Result<Self, GraphError> {
        Self::new(raw).ok_or(GraphError::InvalidNodeId { raw })
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pe:{}", self.0)
    }
}

/// Identifier of a policy-element association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct AssociationId(NonZeroU64);

impl AssociationId {
    /// Create an `AssociationId` from a raw `u64`. Returns `None` for zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(AssociationId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for AssociationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "assoc:{}", self.0)
    }
}

/// Type tag of a policy element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    User,
    UserAttribute,
    Object,
    ObjectAttribute,
    Operation,
    OperationSet,
    PolicyClass,
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElementKind::User => "user",
            ElementKind::UserAttribute => "user_attribute",
            ElementKind::Object => "object",
            ElementKind::ObjectAttribute => "object_attribute",
            ElementKind::Operation => "operation",
            ElementKind::OperationSet => "operation_set",
            ElementKind::PolicyClass => "policy_class",
        };
        f.write_str(name)
    }
}

/// A typed node in the access-control graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyElement {
    /// Stable identity.
    pub id: NodeId,
    /// Type tag.
    pub kind: ElementKind,
    /// Caller-supplied identifier used for external lookups.
    pub unique_identifier: String,
}

impl PolicyElement {
    pub fn new(id: NodeId, kind: ElementKind, unique_identifier: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            unique_identifier: unique_identifier.into(),
        }
    }
}

/// A permission grant attached to an object-attribute node.
///
/// Associations are labels, not path edges: filtered traversal uses them as
/// barriers, reachability ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Association {
    pub id: AssociationId,
    /// The object-attribute node carrying the grant.
    pub object_attribute: NodeId,
    /// The operation set being granted.
    pub operation_set: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_niche_optimization() {
        assert_eq!(
            std::mem::size_of::<Option<NodeId>>(),
            std::mem::size_of::<NodeId>()
        );
    }

    #[test]
    fn zero_ids_are_rejected() {
        assert!(NodeId::new(0).is_none());
        assert!(AssociationId::new(0).is_none());
        assert!(matches!(
            NodeId::try_from_raw(0),
            Err(GraphError::InvalidNodeId { raw: 0 })
        ));
        assert_eq!(NodeId::try_from_raw(9).unwrap().get(), 9);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ElementKind::OperationSet).unwrap();
        assert_eq!(json, "\"operation_set\"");
        let back: ElementKind = serde_json::from_str("\"object_attribute\"").unwrap();
        assert_eq!(back, ElementKind::ObjectAttribute);
        assert_eq!(ElementKind::PolicyClass.to_string(), "policy_class");
    }
}
