// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # pm-reach
//!
//! Reachability engine for policy-machine access-control graphs. Answers
//! "is B reachable from A" over the assignment relation and keeps the
//! answer correct while assignments are added and removed.
//!
//! ## Architecture
//!
//! - **Edge graphs** (`graph`): assignment and logical-link relations (petgraph + DashMap)
//! - **Traversal** (`graph::traverse`): cycle-checked walks, grouping, filtered search
//! - **Closure** (`closure`): the materialized `(ancestor, descendant)` relation
//! - **Strategies** (`strategy`): incremental closure maintenance or on-demand traversal
//! - **Storage** (`store`): optional redb persistence for edges, records and the closure
//!
//! ## Library usage
//!
//! ```no_run
//! use pm_reach::element::NodeId;
//! use pm_reach::engine::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let id = |raw| NodeId::new(raw).unwrap();
//! engine.insert_edge(id(1), id(2)).unwrap();
//! engine.insert_edge(id(2), id(3)).unwrap();
//! assert!(engine.is_reachable(id(1), id(3)).unwrap());
//! ```

pub mod closure;
pub mod element;
pub mod engine;
pub mod error;
pub mod graph;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod strategy;
