//! Engine facade: top-level API for the reachability engine.
//!
//! The `Engine` owns the element registry, the association index, both edge
//! relations, the selected reachability strategy and the optional durable
//! store, and exposes every query and mutation the policy machine needs.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::closure::{ClosureStore, DurableClosure, MemClosure};
use crate::element::{Association, AssociationId, NodeId, PolicyElement};
use crate::error::{ConfigError, EngineError, GraphError, ReachResult, StoreError};
use crate::graph::association::AssociationIndex;
use crate::graph::index::EdgeGraph;
use crate::graph::opset::{self, OperationSetMatch};
use crate::graph::{Edge, Relation, filter, traverse};
use crate::registry::ElementRegistry;
use crate::snapshot::GraphSnapshot;
use crate::store::durable::{DurableStore, EdgeTable};
use crate::strategy::{
    ClosureDrift, ClosureMaintainer, ReachabilityStrategy, RecursiveQueryEngine, StrategyKind,
};

/// Configuration for the reachability engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// How reachability is answered (default: materialized closure).
    pub strategy: StrategyKind,
    /// Data directory for persistence. `None` for memory-only mode.
    pub data_dir: Option<PathBuf>,
    /// Refuse edges that would close a cycle (default: true).
    pub reject_cycles: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Materialized,
            data_dir: None,
            reject_cycles: true,
        }
    }
}

impl EngineConfig {
    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: &Path) -> ReachResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> ReachResult<Self> {
        Self::parse(text, "<inline>")
    }

    fn parse(text: &str, origin: &str) -> ReachResult<Self> {
        toml::from_str(text).map_err(|e| {
            ConfigError::Parse {
                path: origin.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// Counts of what a snapshot load changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub elements: usize,
    pub assignments: usize,
    pub logical_links: usize,
    pub associations: usize,
}

impl std::fmt::Display for LoadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "loaded {} elements, {} assignments, {} logical links, {} associations",
            self.elements, self.assignments, self.logical_links, self.associations
        )
    }
}

/// The policy-machine reachability engine.
pub struct Engine {
    config: EngineConfig,
    registry: ElementRegistry,
    associations: AssociationIndex,
    assignments: Arc<EdgeGraph>,
    logical_links: EdgeGraph,
    strategy: Box<dyn ReachabilityStrategy>,
    store: Option<Arc<DurableStore>>,
    /// Serializes mutations so that cycle checks and writes see one state.
    mutations: Mutex<()>,
}

impl Engine {
    /// Create (or reopen) an engine with the given configuration.
    pub fn new(config: EngineConfig) -> ReachResult<Self> {
        tracing::info!(
            strategy = %config.strategy,
            persistent = config.data_dir.is_some(),
            reject_cycles = config.reject_cycles,
            "initializing pm-reach engine"
        );

        let store = match config.data_dir {
            Some(ref dir) => {
                std::fs::create_dir_all(dir).map_err(|_| EngineError::DataDir {
                    path: dir.display().to_string(),
                })?;
                Some(Arc::new(DurableStore::open(dir)?))
            }
            None => None,
        };

        let assignments = Arc::new(EdgeGraph::new(Relation::Assignments));
        let logical_links = EdgeGraph::new(Relation::LogicalLinks);
        let (registry, associations) = match store {
            Some(ref store) => {
                assignments.bulk_load(&stored_edges(store, EdgeTable::Assignments)?);
                logical_links.bulk_load(&stored_edges(store, EdgeTable::LogicalLinks)?);
                let registry = ElementRegistry::restore(store)?;
                let associations = AssociationIndex::restore(store)?;
                tracing::info!(
                    elements = registry.len(),
                    assignments = assignments.edge_count(),
                    logical_links = logical_links.edge_count(),
                    associations = associations.len(),
                    "restored policy graph"
                );
                (registry, associations)
            }
            None => (ElementRegistry::new(), AssociationIndex::new()),
        };

        let strategy = build_strategy(config.strategy, &assignments, store.as_ref())?;

        Ok(Self {
            config,
            registry,
            associations,
            assignments,
            logical_links,
            strategy,
            store,
            mutations: Mutex::new(()),
        })
    }

    // -----------------------------------------------------------------------
    // Assignments
    // -----------------------------------------------------------------------

    /// Assign `child` to `parent`. Returns `false` if the edge already existed.
    pub fn insert_edge(&self, parent: NodeId, child: NodeId) -> ReachResult<bool> {
        let _guard = self.mutations.lock().expect("engine mutation lock poisoned");
        if self.assignments.has_edge(parent, child) {
            return Ok(false);
        }
        if self.config.reject_cycles
            && (parent == child || self.strategy.is_reachable(child, parent)?)
        {
            return Err(rejected_cycle(parent, Relation::Assignments));
        }
        self.apply_assignment(parent, child, true)
    }

    /// Remove the assignment `parent -> child`. Returns `false` if absent.
    pub fn remove_edge(&self, parent: NodeId, child: NodeId) -> ReachResult<bool> {
        let _guard = self.mutations.lock().expect("engine mutation lock poisoned");
        self.remove_assignment_locked(parent, child)
    }

    fn remove_assignment_locked(&self, parent: NodeId, child: NodeId) -> ReachResult<bool> {
        if !self.assignments.has_edge(parent, child) {
            return Ok(false);
        }
        self.apply_assignment(parent, child, false)
    }

    /// Apply an assignment change the caller has checked is not a no-op.
    ///
    /// The edge is written to disk first, together with the closure-stale
    /// flag when the strategy keeps a closure. Then the strategy applies it.
    /// If the strategy fails, the change is undone in memory and on disk, so
    /// an `Err` leaves the edge set as it was.
    fn apply_assignment(&self, parent: NodeId, child: NodeId, present: bool) -> ReachResult<bool> {
        if let Some(store) = &self.store {
            store.write_edge(
                EdgeTable::Assignments,
                parent.get(),
                child.get(),
                present,
                self.keeps_closure(),
            )?;
        }

        let applied = if present {
            self.strategy.insert_edge(parent, child)
        } else {
            self.strategy.remove_edge(parent, child)
        };
        match applied {
            Ok(changed) => {
                self.settle_closure_flag();
                Ok(changed)
            }
            Err(err) => {
                self.roll_back_assignment(parent, child, present);
                Err(err)
            }
        }
    }

    fn roll_back_assignment(&self, parent: NodeId, child: NodeId, present: bool) {
        tracing::warn!(
            parent = %parent,
            child = %child,
            insert = present,
            "assignment failed, rolling back"
        );
        // The strategy may have changed the edge set before failing.
        if present {
            self.assignments.remove_edge(parent, child);
        } else {
            self.assignments.insert_edge(parent, child);
        }

        let mut disk_restored = true;
        if let Some(store) = &self.store {
            if let Err(err) =
                store.write_edge(EdgeTable::Assignments, parent.get(), child.get(), !present, false)
            {
                tracing::error!(error = %err, "could not undo the stored edge");
                disk_restored = false;
            }
        }

        match self.strategy.rebuild() {
            Ok(_) if disk_restored => self.settle_closure_flag(),
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "closure rebuild after rollback failed"),
        }
    }

    fn keeps_closure(&self) -> bool {
        self.strategy.kind() == StrategyKind::Materialized
    }

    /// Clear the on-disk stale flag once the closure matches the edges again.
    fn settle_closure_flag(&self) {
        if !self.keeps_closure() || self.strategy.is_stale() {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(err) = store.set_closure_stale(false) {
                tracing::warn!(error = %err, "could not clear the closure-stale flag");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reachability
    // -----------------------------------------------------------------------

    /// Whether `to` is reachable from `from` through a non-empty path.
    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> ReachResult<bool> {
        self.strategy.is_reachable(from, to)
    }

    /// Union of the descendants of every root.
    pub fn descendants_of(&self, roots: &[NodeId]) -> ReachResult<HashSet<NodeId>> {
        self.strategy.descendants_of(roots)
    }

    /// Union of the ancestors of every root.
    pub fn ancestors_of(&self, roots: &[NodeId]) -> ReachResult<HashSet<NodeId>> {
        self.strategy.ancestors_of(roots)
    }

    /// Full ancestor set of every node in the ancestor subgraph of `roots`.
    pub fn ancestor_ids_by_node(
        &self,
        roots: &[NodeId],
    ) -> ReachResult<HashMap<NodeId, HashSet<NodeId>>> {
        Ok(traverse::ancestor_ids_by_node(&self.assignments, roots)?)
    }

    /// Direct parents of every node in the ancestor subgraph of `roots`.
    pub fn parent_ids_by_node(
        &self,
        roots: &[NodeId],
    ) -> ReachResult<HashMap<NodeId, HashSet<NodeId>>> {
        Ok(traverse::parent_ids_by_node(&self.assignments, roots)?)
    }

    /// Nearest ancestors of `start` carrying one of the candidate associations.
    pub fn filtered_ancestors(
        &self,
        start: NodeId,
        candidates: &HashSet<AssociationId>,
    ) -> ReachResult<HashSet<NodeId>> {
        Ok(filter::filtered_ancestors(
            &self.assignments,
            &self.associations,
            start,
            candidates,
        )?)
    }

    /// Nearest descendants of `start` carrying one of the candidate associations.
    pub fn filtered_descendants(
        &self,
        start: NodeId,
        candidates: &HashSet<AssociationId>,
    ) -> ReachResult<HashSet<NodeId>> {
        Ok(filter::filtered_descendants(
            &self.assignments,
            &self.associations,
            start,
            candidates,
        )?)
    }

    /// Operation-set roots that contain the named operation.
    pub fn resolve_operation_sets(
        &self,
        roots: &[NodeId],
        operation_unique_id: &str,
    ) -> ReachResult<BTreeSet<NodeId>> {
        Ok(opset::resolve_operation_sets(
            &self.assignments,
            &self.registry,
            roots,
            operation_unique_id,
        )?)
    }

    /// Like [`Engine::resolve_operation_sets`], with a provenance path per root.
    pub fn resolve_operation_set_paths(
        &self,
        roots: &[NodeId],
        operation_unique_id: &str,
    ) -> ReachResult<Vec<OperationSetMatch>> {
        Ok(opset::resolve_operation_set_paths(
            &self.assignments,
            &self.registry,
            roots,
            operation_unique_id,
        )?)
    }

    // -----------------------------------------------------------------------
    // Logical links
    // -----------------------------------------------------------------------

    /// Add a logical link. Logical links never enter the assignment closure.
    pub fn insert_logical_link(&self, parent: NodeId, child: NodeId) -> ReachResult<bool> {
        let _guard = self.mutations.lock().expect("engine mutation lock poisoned");
        if self.logical_links.has_edge(parent, child) {
            return Ok(false);
        }
        if self.config.reject_cycles
            && (parent == child || traverse::is_reachable(&self.logical_links, child, parent)?)
        {
            return Err(rejected_cycle(parent, Relation::LogicalLinks));
        }
        self.persist_edge(EdgeTable::LogicalLinks, parent, child, true)?;
        Ok(self.logical_links.insert_edge(parent, child))
    }

    pub fn remove_logical_link(&self, parent: NodeId, child: NodeId) -> ReachResult<bool> {
        let _guard = self.mutations.lock().expect("engine mutation lock poisoned");
        self.remove_logical_link_locked(parent, child)
    }

    fn remove_logical_link_locked(&self, parent: NodeId, child: NodeId) -> ReachResult<bool> {
        if !self.logical_links.has_edge(parent, child) {
            return Ok(false);
        }
        self.persist_edge(EdgeTable::LogicalLinks, parent, child, false)?;
        Ok(self.logical_links.remove_edge(parent, child))
    }

    pub fn logical_link_descendants_of(&self, roots: &[NodeId]) -> ReachResult<HashSet<NodeId>> {
        Ok(traverse::descendants(&self.logical_links, roots)?)
    }

    pub fn logical_link_ancestors_of(&self, roots: &[NodeId]) -> ReachResult<HashSet<NodeId>> {
        Ok(traverse::ancestors(&self.logical_links, roots)?)
    }

    /// Whether `to` is reachable from `from` over logical links only.
    pub fn logical_link_reachable(&self, from: NodeId, to: NodeId) -> ReachResult<bool> {
        Ok(traverse::is_reachable(&self.logical_links, from, to)?)
    }

    // -----------------------------------------------------------------------
    // Elements and associations
    // -----------------------------------------------------------------------

    /// Register (or replace) a policy element.
    pub fn add_element(&self, element: PolicyElement) -> ReachResult<()> {
        let _guard = self.mutations.lock().expect("engine mutation lock poisoned");
        let id = element.id;
        self.registry.register(element)?;
        if let Some(store) = &self.store {
            self.registry.persist_one(store, id)?;
        }
        Ok(())
    }

    /// Remove an element together with every edge and association touching it.
    ///
    /// Assignment edges go through the strategy one at a time so the closure
    /// stays consistent. Returns the removed record, if the id was registered.
    pub fn remove_element(&self, id: NodeId) -> ReachResult<Option<PolicyElement>> {
        let _guard = self.mutations.lock().expect("engine mutation lock poisoned");

        let assignments = self.assignments.incident_edges(id);
        for edge in &assignments {
            self.remove_assignment_locked(edge.parent, edge.child)?;
        }
        self.assignments.remove_node(id);

        let links = self.logical_links.incident_edges(id);
        for edge in &links {
            self.remove_logical_link_locked(edge.parent, edge.child)?;
        }
        self.logical_links.remove_node(id);

        let mut dropped = self.associations.remove_node(id);
        for association in self.associations.all() {
            if association.operation_set == id {
                dropped.extend(self.associations.remove(association.id));
            }
        }

        let removed = self.registry.remove(id);
        if let Some(store) = &self.store {
            for association in &dropped {
                self.associations.persist_one(store, association.id)?;
            }
            self.registry.persist_one(store, id)?;
        }

        tracing::debug!(
            node = %id,
            assignments = assignments.len(),
            logical_links = links.len(),
            associations = dropped.len(),
            "element removed"
        );
        Ok(removed)
    }

    /// Look up an element by id.
    pub fn element(&self, id: NodeId) -> Option<PolicyElement> {
        self.registry.get(id)
    }

    /// Look up an element id by unique identifier.
    pub fn lookup_unique(&self, unique_identifier: &str) -> Option<NodeId> {
        self.registry.lookup_unique(unique_identifier)
    }

    /// Attach an association to its object-attribute node.
    ///
    /// Both the object attribute and the operation set must be registered.
    pub fn add_association(&self, association: Association) -> ReachResult<()> {
        let _guard = self.mutations.lock().expect("engine mutation lock poisoned");
        for node in [association.object_attribute, association.operation_set] {
            if self.registry.get(node).is_none() {
                return Err(GraphError::NodeNotFound { node_id: node.get() }.into());
            }
        }
        self.associations.insert(association);
        if let Some(store) = &self.store {
            self.associations.persist_one(store, association.id)?;
        }
        Ok(())
    }

    pub fn remove_association(&self, id: AssociationId) -> ReachResult<Option<Association>> {
        let _guard = self.mutations.lock().expect("engine mutation lock poisoned");
        let removed = self.associations.remove(id);
        if let (Some(store), Some(_)) = (&self.store, removed) {
            self.associations.persist_one(store, id)?;
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Snapshots and maintenance
    // -----------------------------------------------------------------------

    /// Apply a snapshot on top of the current graph.
    ///
    /// Elements load first, then edges, then associations, so associations
    /// can refer to elements from the same snapshot.
    pub fn load_snapshot(&self, snapshot: &GraphSnapshot) -> ReachResult<LoadReport> {
        let mut report = LoadReport::default();
        for element in &snapshot.elements {
            let is_new = self.registry.get(element.id).as_ref() != Some(element);
            self.add_element(element.clone())?;
            report.elements += usize::from(is_new);
        }
        for edge in &snapshot.assignments {
            report.assignments += usize::from(self.insert_edge(edge.parent, edge.child)?);
        }
        for edge in &snapshot.logical_links {
            report.logical_links += usize::from(self.insert_logical_link(edge.parent, edge.child)?);
        }
        for association in &snapshot.associations {
            let is_new = self.associations.get(association.id) != Some(*association);
            self.add_association(*association)?;
            report.associations += usize::from(is_new);
        }
        tracing::info!(%report, "snapshot applied");
        Ok(report)
    }

    /// Export the whole graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            elements: self.registry.all(),
            assignments: self.assignments.edges(),
            logical_links: self.logical_links.edges(),
            associations: self.associations.all(),
        }
    }

    /// Compare the materialized closure against a fresh traversal.
    /// `None` for strategies that keep no closure.
    pub fn verify_closure(&self) -> ReachResult<Option<ClosureDrift>> {
        self.strategy.verify()
    }

    /// Recompute the materialized closure from the assignment edges.
    /// `None` for strategies that keep no closure.
    pub fn rebuild_closure(&self) -> ReachResult<Option<usize>> {
        let _guard = self.mutations.lock().expect("engine mutation lock poisoned");
        let written = self.strategy.rebuild()?;
        self.settle_closure_flag();
        Ok(written)
    }

    /// Get system info (element, edge and closure counts).
    pub fn info(&self) -> ReachResult<EngineInfo> {
        Ok(EngineInfo {
            strategy: self.strategy.kind(),
            elements: self.registry.len(),
            nodes: self.assignments.node_count(),
            assignments: self.assignments.edge_count(),
            logical_links: self.logical_links.edge_count(),
            associations: self.associations.len(),
            closure_tuples: self.strategy.closure_len()?,
            reject_cycles: self.config.reject_cycles,
            persistent: self.store.is_some(),
        })
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the assignment graph.
    pub fn assignments(&self) -> &EdgeGraph {
        &self.assignments
    }

    /// Get the logical-link graph.
    pub fn logical_links(&self) -> &EdgeGraph {
        &self.logical_links
    }

    /// Get the element registry.
    pub fn registry(&self) -> &ElementRegistry {
        &self.registry
    }

    /// Get the association index.
    pub fn associations(&self) -> &AssociationIndex {
        &self.associations
    }

    fn persist_edge(
        &self,
        table: EdgeTable,
        parent: NodeId,
        child: NodeId,
        present: bool,
    ) -> ReachResult<()> {
        if let Some(store) = &self.store {
            if present {
                store.insert_edge(table, parent.get(), child.get())?;
            } else {
                store.remove_edge(table, parent.get(), child.get())?;
            }
        }
        Ok(())
    }
}

fn rejected_cycle(parent: NodeId, relation: Relation) -> crate::error::ReachError {
    tracing::warn!(node = %parent, %relation, "edge rejected: it would close a cycle");
    GraphError::CycleDetected {
        node_id: parent.get(),
        relation: relation.to_string(),
    }
    .into()
}

fn stored_edges(store: &DurableStore, table: EdgeTable) -> ReachResult<Vec<Edge>> {
    store
        .edges(table)?
        .into_iter()
        .map(|(p, c)| match (NodeId::new(p), NodeId::new(c)) {
            (Some(parent), Some(child)) => Ok(Edge::new(parent, child)),
            _ => Err(StoreError::Serialization {
                message: format!("stored edge ({p}, {c}) has a zero node id"),
            }
            .into()),
        })
        .collect()
}

fn build_strategy(
    kind: StrategyKind,
    assignments: &Arc<EdgeGraph>,
    store: Option<&Arc<DurableStore>>,
) -> ReachResult<Box<dyn ReachabilityStrategy>> {
    match kind {
        StrategyKind::Materialized => {
            let closure: Box<dyn ClosureStore> = match store {
                Some(store) => Box::new(DurableClosure::new(Arc::clone(store))),
                None => Box::new(MemClosure::new()),
            };
            let flagged = match store {
                Some(store) => store.closure_stale()?,
                None => false,
            };
            let missing = closure.is_empty()? && assignments.edge_count() > 0;
            let maintainer = ClosureMaintainer::new(Arc::clone(assignments), closure);
            if flagged || missing {
                tracing::info!(
                    edges = assignments.edge_count(),
                    flagged,
                    "closure behind stored assignments, rebuilding"
                );
                maintainer.rebuild()?;
                if let Some(store) = store {
                    store.set_closure_stale(false)?;
                }
            }
            Ok(Box::new(maintainer))
        }
        StrategyKind::OnDemand => {
            // A closure left by a materialized run would go stale under
            // on-demand writes; drop it so a later switch rebuilds it.
            if let Some(store) = store {
                if store.closure_len()? > 0 {
                    tracing::info!("discarding materialized closure for on-demand strategy");
                    store.closure_clear()?;
                }
            }
            Ok(Box::new(RecursiveQueryEngine::new(Arc::clone(assignments))))
        }
    }
}

/// Summary information about the engine state.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub strategy: StrategyKind,
    pub elements: usize,
    pub nodes: usize,
    pub assignments: usize,
    pub logical_links: usize,
    pub associations: usize,
    pub closure_tuples: Option<usize>,
    pub reject_cycles: bool,
    pub persistent: bool,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "pm-reach engine info")?;
        writeln!(f, "  strategy:       {}", self.strategy)?;
        writeln!(f, "  elements:       {}", self.elements)?;
        writeln!(f, "  nodes:          {}", self.nodes)?;
        writeln!(f, "  assignments:    {}", self.assignments)?;
        writeln!(f, "  logical links:  {}", self.logical_links)?;
        writeln!(f, "  associations:   {}", self.associations)?;
        match self.closure_tuples {
            Some(n) => writeln!(f, "  closure tuples: {n}")?,
            None => writeln!(f, "  closure tuples: -")?,
        }
        writeln!(f, "  reject cycles:  {}", self.reject_cycles)?;
        writeln!(f, "  persistent:     {}", self.persistent)?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("strategy", &self.strategy.kind())
            .field("assignments", &self.assignments)
            .field("logical_links", &self.logical_links)
            .finish()
    }
}
