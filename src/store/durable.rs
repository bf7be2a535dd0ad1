//! ACID-durable record store backed by redb.
//!
//! Holds the edge relations, element and association records, and the
//! materialized closure relation. Pair tables are keyed by `(u64, u64)` with a
//! unit value, so the uniqueness constraint on a pair is the key itself.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::error::StoreError;
use crate::store::StoreResult;

const ASSIGNMENTS_TABLE: TableDefinition<(u64, u64), ()> = TableDefinition::new("assignments");
const LOGICAL_LINKS_TABLE: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("logical_links");
/// `(ancestor, descendant)` tuples.
const CLOSURE_TABLE: TableDefinition<(u64, u64), ()> = TableDefinition::new("closure");
/// Reverse index over the closure: `(descendant, ancestor)`.
const CLOSURE_BY_DESCENDANT_TABLE: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("closure_by_descendant");
const ELEMENTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("elements");
const ASSOCIATIONS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("associations");
/// Engine flags keyed by name; a key is present while its flag is set.
const META_TABLE: TableDefinition<&str, ()> = TableDefinition::new("meta");

/// Set while the assignment table may be ahead of the closure tables.
const CLOSURE_STALE_KEY: &str = "closure_stale";

/// An edge relation persisted as a pair table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTable {
    Assignments,
    LogicalLinks,
}

impl EdgeTable {
    fn definition(self) -> TableDefinition<'static, (u64, u64), ()> {
        match self {
            EdgeTable::Assignments => ASSIGNMENTS_TABLE,
            EdgeTable::LogicalLinks => LOGICAL_LINKS_TABLE,
        }
    }
}

/// A table of bincode-encoded records keyed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTable {
    Elements,
    Associations,
}

impl RecordTable {
    fn definition(self) -> TableDefinition<'static, u64, &'static [u8]> {
        match self {
            RecordTable::Elements => ELEMENTS_TABLE,
            RecordTable::Associations => ASSOCIATIONS_TABLE,
        }
    }
}

fn redb_err<E: std::fmt::Display>(op: &'static str) -> impl Fn(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{op} failed: {e}"),
    }
}

/// ACID-durable store using redb.
///
/// All writes go through transactions. Reads use MVCC snapshots.
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create a durable store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join("pm-reach.redb");
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Create every table up front so read transactions never hit a missing table.
        let txn = db.begin_write().map_err(redb_err("begin_write"))?;
        for def in [
            ASSIGNMENTS_TABLE,
            LOGICAL_LINKS_TABLE,
            CLOSURE_TABLE,
            CLOSURE_BY_DESCENDANT_TABLE,
        ] {
            txn.open_table(def).map_err(redb_err("open_table"))?;
        }
        for def in [ELEMENTS_TABLE, ASSOCIATIONS_TABLE] {
            txn.open_table(def).map_err(redb_err("open_table"))?;
        }
        txn.open_table(META_TABLE).map_err(redb_err("open_table"))?;
        txn.commit().map_err(redb_err("commit"))?;

        Ok(Self { db: Arc::new(db) })
    }

    // -----------------------------------------------------------------------
    // Edge relations
    // -----------------------------------------------------------------------

    /// Persist an edge. Returns whether it was new.
    pub fn insert_edge(&self, table: EdgeTable, parent: u64, child: u64) -> StoreResult<bool> {
        self.write_edge(table, parent, child, true, false)
    }

    /// Delete an edge. Returns whether it existed.
    pub fn remove_edge(&self, table: EdgeTable, parent: u64, child: u64) -> StoreResult<bool> {
        self.write_edge(table, parent, child, false, false)
    }

    /// Insert (`present`) or delete an edge and, in the same transaction,
    /// set the closure-stale flag when `mark_closure_stale` is true.
    ///
    /// The flag stays set until [`DurableStore::set_closure_stale`] clears
    /// it, so a closure update that never commits is detected on reopen.
    /// Returns whether the edge table changed.
    pub fn write_edge(
        &self,
        table: EdgeTable,
        parent: u64,
        child: u64,
        present: bool,
        mark_closure_stale: bool,
    ) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let changed = {
            let mut t = txn
                .open_table(table.definition())
                .map_err(redb_err("open_table"))?;
            if present {
                t.insert((parent, child), ())
                    .map_err(redb_err("insert"))?
                    .is_none()
            } else {
                t.remove((parent, child))
                    .map_err(redb_err("remove"))?
                    .is_some()
            }
        };
        if mark_closure_stale {
            let mut meta = txn.open_table(META_TABLE).map_err(redb_err("open_table"))?;
            meta.insert(CLOSURE_STALE_KEY, ()).map_err(redb_err("insert"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(changed)
    }

    /// All persisted edges of a relation, ordered by `(parent, child)`.
    pub fn edges(&self, table: EdgeTable) -> StoreResult<Vec<(u64, u64)>> {
        self.scan_pairs(table.definition())
    }

    // -----------------------------------------------------------------------
    // Closure relation
    // -----------------------------------------------------------------------

    /// Insert closure tuples in one transaction. Existing tuples are ignored.
    /// Returns how many tuples were new.
    pub fn closure_insert(&self, pairs: &[(u64, u64)]) -> StoreResult<usize> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let mut inserted = 0;
        {
            let mut forward = txn
                .open_table(CLOSURE_TABLE)
                .map_err(redb_err("open_table"))?;
            let mut reverse = txn
                .open_table(CLOSURE_BY_DESCENDANT_TABLE)
                .map_err(redb_err("open_table"))?;
            for &(ancestor, descendant) in pairs {
                let fresh = forward
                    .insert((ancestor, descendant), ())
                    .map_err(redb_err("insert"))?
                    .is_none();
                if fresh {
                    reverse
                        .insert((descendant, ancestor), ())
                        .map_err(redb_err("insert"))?;
                    inserted += 1;
                }
            }
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(inserted)
    }

    /// Delete closure tuples in one transaction. Returns how many existed.
    pub fn closure_remove(&self, pairs: &[(u64, u64)]) -> StoreResult<usize> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let mut removed = 0;
        {
            let mut forward = txn
                .open_table(CLOSURE_TABLE)
                .map_err(redb_err("open_table"))?;
            let mut reverse = txn
                .open_table(CLOSURE_BY_DESCENDANT_TABLE)
                .map_err(redb_err("open_table"))?;
            for &(ancestor, descendant) in pairs {
                let existed = forward
                    .remove((ancestor, descendant))
                    .map_err(redb_err("remove"))?
                    .is_some();
                if existed {
                    reverse
                        .remove((descendant, ancestor))
                        .map_err(redb_err("remove"))?;
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(removed)
    }

    /// Whether the closure holds `(ancestor, descendant)`.
    pub fn closure_contains(&self, ancestor: u64, descendant: u64) -> StoreResult<bool> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn
            .open_table(CLOSURE_TABLE)
            .map_err(redb_err("open_table"))?;
        let hit = table
            .get((ancestor, descendant))
            .map_err(redb_err("get"))?;
        Ok(hit.is_some())
    }

    /// Descendants of `ancestor` recorded in the closure.
    pub fn closure_descendants(&self, ancestor: u64) -> StoreResult<Vec<u64>> {
        self.scan_second(CLOSURE_TABLE, ancestor)
    }

    /// Ancestors of `descendant` recorded in the closure.
    pub fn closure_ancestors(&self, descendant: u64) -> StoreResult<Vec<u64>> {
        self.scan_second(CLOSURE_BY_DESCENDANT_TABLE, descendant)
    }

    /// Every closure tuple, ordered by `(ancestor, descendant)`.
    pub fn closure_pairs(&self) -> StoreResult<Vec<(u64, u64)>> {
        self.scan_pairs(CLOSURE_TABLE)
    }

    /// Number of closure tuples.
    pub fn closure_len(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn
            .open_table(CLOSURE_TABLE)
            .map_err(redb_err("open_table"))?;
        table.len().map_err(redb_err("len"))
    }

    /// Drop every closure tuple.
    pub fn closure_clear(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        for def in [CLOSURE_TABLE, CLOSURE_BY_DESCENDANT_TABLE] {
            txn.delete_table(def).map_err(redb_err("delete_table"))?;
            txn.open_table(def).map_err(redb_err("open_table"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }

    /// Set or clear the closure-stale flag.
    pub fn set_closure_stale(&self, stale: bool) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        {
            let mut meta = txn.open_table(META_TABLE).map_err(redb_err("open_table"))?;
            if stale {
                meta.insert(CLOSURE_STALE_KEY, ()).map_err(redb_err("insert"))?;
            } else {
                meta.remove(CLOSURE_STALE_KEY).map_err(redb_err("remove"))?;
            }
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }

    /// Whether an edge write committed without its closure update.
    pub fn closure_stale(&self) -> StoreResult<bool> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let meta = txn.open_table(META_TABLE).map_err(redb_err("open_table"))?;
        let hit = meta.get(CLOSURE_STALE_KEY).map_err(redb_err("get"))?;
        Ok(hit.is_some())
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Store a record, replacing any previous value.
    pub fn put_record(&self, table: RecordTable, id: u64, value: &[u8]) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        {
            let mut t = txn
                .open_table(table.definition())
                .map_err(redb_err("open_table"))?;
            t.insert(id, value).map_err(redb_err("insert"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }

    /// Delete a record. Returns whether it existed.
    pub fn remove_record(&self, table: RecordTable, id: u64) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let existed = {
            let mut t = txn
                .open_table(table.definition())
                .map_err(redb_err("open_table"))?;
            t.remove(id).map_err(redb_err("remove"))?.is_some()
        };
        txn.commit().map_err(redb_err("commit"))?;
        Ok(existed)
    }

    /// All records of a table as `(id, bytes)`.
    pub fn records(&self, table: RecordTable) -> StoreResult<Vec<(u64, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let t = txn
            .open_table(table.definition())
            .map_err(redb_err("open_table"))?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(redb_err("iter"))? {
            let (key, value) = entry.map_err(redb_err("iter"))?;
            out.push((key.value(), value.value().to_vec()));
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Scans
    // -----------------------------------------------------------------------

    fn scan_pairs(&self, def: TableDefinition<(u64, u64), ()>) -> StoreResult<Vec<(u64, u64)>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn.open_table(def).map_err(redb_err("open_table"))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(redb_err("iter"))? {
            let (key, _) = entry.map_err(redb_err("iter"))?;
            out.push(key.value());
        }
        Ok(out)
    }

    /// Second components of every pair whose first component is `first`.
    fn scan_second(&self, def: TableDefinition<(u64, u64), ()>, first: u64) -> StoreResult<Vec<u64>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn.open_table(def).map_err(redb_err("open_table"))?;
        let mut out = Vec::new();
        for entry in table
            .range((first, 0)..=(first, u64::MAX))
            .map_err(redb_err("range"))?
        {
            let (key, _) = entry.map_err(redb_err("range"))?;
            out.push(key.value().1);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}
