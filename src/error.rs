//! Diagnostic error types for the reachability engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. [`ReachError`] wraps them transparently
//! so the full diagnostic chain reaches the caller.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the reachability engine.
#[derive(Debug, Error, Diagnostic)]
pub enum ReachError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("cycle detected at node {node_id} in the {relation} relation")]
    #[diagnostic(
        code(pm_reach::graph::cycle),
        help(
            "Assignment and logical-link graphs must be acyclic. \
             Remove one of the edges on the cycle through this node, \
             or enable `reject_cycles` so offending edges are refused at insertion."
        )
    )]
    CycleDetected { node_id: u64, relation: String },

    #[error("policy element not found: node {node_id}")]
    #[diagnostic(
        code(pm_reach::graph::node_not_found),
        help("Register the element with `Engine::add_element` before referring to it.")
    )]
    NodeNotFound { node_id: u64 },

    #[error("unique identifier \"{unique_identifier}\" is already used by node {existing_id}")]
    #[diagnostic(
        code(pm_reach::graph::duplicate_unique_identifier),
        help("Unique identifiers are caller-supplied and must not repeat across elements.")
    )]
    DuplicateUniqueIdentifier {
        unique_identifier: String,
        existing_id: u64,
    },

    #[error("invalid node id: {raw}")]
    #[diagnostic(
        code(pm_reach::graph::invalid_id),
        help("Node and association ids are non-zero unsigned integers.")
    )]
    InvalidNodeId { raw: u64 },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(pm_reach::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(pm_reach::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             If the problem persists, the closure can be rebuilt from the \
             assignment table with `pm-reach verify --rebuild`."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(pm_reach::store::serde),
        help(
            "Failed to serialize or deserialize a stored record. \
             The on-disk format may come from an incompatible version."
        )
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read engine config: {path}")]
    #[diagnostic(
        code(pm_reach::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse engine config: {path}: {message}")]
    #[diagnostic(
        code(pm_reach::config::parse),
        help(
            "Check the TOML syntax. Recognized keys are `strategy` \
             (\"materialized\" or \"on_demand\"), `data_dir` and `reject_cycles`."
        )
    )]
    Parse { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(pm_reach::engine::invalid_config),
        help("Check the EngineConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("data directory error: {path}")]
    #[diagnostic(
        code(pm_reach::engine::data_dir),
        help(
            "The data directory could not be accessed. \
             Ensure the path exists and has read/write permissions."
        )
    )]
    DataDir { path: String },
}

/// Convenience alias for functions returning engine results.
pub type ReachResult<T> = std::result::Result<T, ReachError>;
