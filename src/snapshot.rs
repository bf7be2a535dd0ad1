//! JSON graph snapshots for bulk loading and export.
//!
//! A snapshot carries everything the engine needs to answer queries: the
//! elements, both edge relations and the associations. Ids are plain
//! non-zero integers:
//!
//! ```json
//! {
//!   "elements": [{ "id": 1, "kind": "user", "unique_identifier": "alice" }],
//!   "assignments": [{ "parent": 2, "child": 1 }],
//!   "logical_links": [],
//!   "associations": [{ "id": 1, "object_attribute": 3, "operation_set": 4 }]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::element::{Association, PolicyElement};
use crate::error::{ReachResult, StoreError};
use crate::graph::Edge;

/// Serializable view of a whole policy graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub elements: Vec<PolicyElement>,
    #[serde(default)]
    pub assignments: Vec<Edge>,
    /// Kept apart from `assignments`; never part of the closure.
    #[serde(default)]
    pub logical_links: Vec<Edge>,
    #[serde(default)]
    pub associations: Vec<Association>,
}

impl GraphSnapshot {
    /// Parse a snapshot from JSON text.
    pub fn from_json(json: &str) -> ReachResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            StoreError::Serialization {
                message: format!("invalid graph snapshot: {e}"),
            }
            .into()
        })
    }

    /// Read a snapshot from a JSON file.
    pub fn from_json_file(path: &Path) -> ReachResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io { source })?;
        Self::from_json(&text)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> ReachResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            StoreError::Serialization {
                message: format!("failed to serialize graph snapshot: {e}"),
            }
            .into()
        })
    }
}
