//! # Ordered Store Adapter
//!
//! A thin wrapper over the redb embedded database that isolates the rest of
//! the system from the storage engine. redb provides:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//! - Sorted byte-keyed tables with range scans
//!
//! The keyspace is partitioned into fixed named sub-stores, one per record
//! type. Adding a sub-store is a schema-version bump, never a silent
//! key-format change.
//!
//! ## Contract
//!
//! A [`Snapshot`] observes a consistent point-in-time view even while
//! writers commit concurrently. Writers serialize: a second `begin_write`
//! blocks until the first transaction commits or aborts. Range scans are
//! lazy, forward-only, and finite; a partially consumed scan cannot be
//! restarted; re-open a range from the last key to resume.
//!
//! Snapshots should be dropped promptly: a retained snapshot blocks the
//! engine's reclamation of superseded pages.

use crate::types::KairosError;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::ops::Bound;
use std::path::Path;

/// Ingested sources: nid key -> SourceRecord envelope.
const SOURCES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sources");

/// Evidence spans: nid key -> SpanRecord envelope.
const SPANS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("spans");

/// Graph nodes, latest version: nid key -> NodeRecord envelope.
const NODES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("nodes");

/// Graph edges, latest version: nid key -> EdgeRecord envelope.
const EDGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("edges");

/// Validity windows and source/time postings.
///
/// Two key shapes share this table: 8-byte claim keys hold per-claim window
/// chains, 24-byte posting keys hold (source, timestamp, member) entries.
/// The shapes cannot collide: an 8-byte key is a strict prefix of any
/// posting key and posting scans use 16-byte lower bounds.
const TEMPORAL_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("temporal_index");

/// Page-anchored spans: (source, page, y) key -> span nid key.
const PAGE_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("page_index");

/// Append-only audit log: (nid, version) key -> VersionRecord envelope.
const VERSION_LOG: TableDefinition<&[u8], &[u8]> = TableDefinition::new("version_log");

/// Counters and store metadata: short string keys -> 8-byte values.
const META: TableDefinition<&[u8], &[u8]> = TableDefinition::new("meta");

/// The fixed sub-stores partitioning the keyspace by record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubStore {
    Sources,
    Spans,
    Nodes,
    Edges,
    TemporalIndex,
    PageIndex,
    VersionLog,
    Meta,
}

impl SubStore {
    /// All sub-stores, in creation order.
    pub const ALL: [Self; 8] = [
        Self::Sources,
        Self::Spans,
        Self::Nodes,
        Self::Edges,
        Self::TemporalIndex,
        Self::PageIndex,
        Self::VersionLog,
        Self::Meta,
    ];

    const fn definition(self) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
        match self {
            Self::Sources => SOURCES,
            Self::Spans => SPANS,
            Self::Nodes => NODES,
            Self::Edges => EDGES,
            Self::TemporalIndex => TEMPORAL_INDEX,
            Self::PageIndex => PAGE_INDEX,
            Self::VersionLog => VERSION_LOG,
            Self::Meta => META,
        }
    }
}

/// Read access shared by snapshots and in-flight write transactions.
///
/// Validation during a write must see that transaction's own pending writes
/// (batch admission creates nodes and then edges referencing them), so the
/// repository's read helpers are generic over this seam.
pub trait KvRead {
    /// Point lookup of a raw value.
    fn get_raw(&self, sub: SubStore, key: &[u8]) -> Result<Option<Vec<u8>>, KairosError>;

    /// Eagerly collect an entire sub-store in key order.
    fn scan(&self, sub: SubStore) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KairosError>;
}

// =============================================================================
// STORE
// =============================================================================

/// The disk-backed store handle.
///
/// Cheap to share by reference; all state lives in the database file.
pub struct Store {
    db: Database,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create a store at the given path.
    ///
    /// All sub-stores are created up front so that read transactions never
    /// observe a missing table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KairosError> {
        let db = Database::create(path.as_ref())?;
        {
            let txn = db.begin_write()?;
            for sub in SubStore::ALL {
                let _ = txn.open_table(sub.definition())?;
            }
            txn.commit()?;
        }
        Ok(Self { db })
    }

    /// Begin a snapshot-isolated read transaction.
    pub fn begin_read(&self) -> Result<Snapshot, KairosError> {
        Ok(Snapshot {
            txn: self.db.begin_read()?,
        })
    }

    /// Begin the (single) write transaction.
    ///
    /// Blocks briefly if another writer is active; readers are unaffected.
    pub fn begin_write(&self) -> Result<WriteTxn, KairosError> {
        Ok(WriteTxn {
            txn: self.db.begin_write()?,
        })
    }

    /// Compact the database file (optional maintenance).
    pub fn compact(&mut self) -> Result<(), KairosError> {
        self.db
            .compact()
            .map_err(|e| KairosError::Resource(e.to_string()))?;
        Ok(())
    }
}

// =============================================================================
// SNAPSHOT (read transaction)
// =============================================================================

/// A consistent, isolated, point-in-time read view over the store.
///
/// Pins the database state as of `begin_read`; commits that land afterwards
/// are invisible until a new snapshot is opened.
pub struct Snapshot {
    txn: redb::ReadTransaction,
}

impl Snapshot {
    /// Point lookup of a raw value.
    pub fn get(&self, sub: SubStore, key: &[u8]) -> Result<Option<Vec<u8>>, KairosError> {
        let table = self.txn.open_table(sub.definition())?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    /// Lazy forward scan over `[start, end)`.
    pub fn range(&self, sub: SubStore, start: &[u8], end: &[u8]) -> Result<RangeIter, KairosError> {
        let table = self.txn.open_table(sub.definition())?;
        Ok(RangeIter {
            inner: table.range(start..end)?,
        })
    }

    /// Lazy forward scan from `start` to the end of the sub-store.
    pub fn range_from(&self, sub: SubStore, start: &[u8]) -> Result<RangeIter, KairosError> {
        let table = self.txn.open_table(sub.definition())?;
        Ok(RangeIter {
            inner: table.range::<&[u8]>((Bound::Included(start), Bound::Unbounded))?,
        })
    }

    /// Lazy forward scan over the whole sub-store.
    pub fn iter(&self, sub: SubStore) -> Result<RangeIter, KairosError> {
        self.range_from(sub, &[])
    }

    /// Number of entries in a sub-store.
    pub fn len(&self, sub: SubStore) -> Result<u64, KairosError> {
        let table = self.txn.open_table(sub.definition())?;
        Ok(table.len()?)
    }

    /// Whether a sub-store is empty.
    pub fn is_empty(&self, sub: SubStore) -> Result<bool, KairosError> {
        Ok(self.len(sub)? == 0)
    }
}

impl KvRead for Snapshot {
    fn get_raw(&self, sub: SubStore, key: &[u8]) -> Result<Option<Vec<u8>>, KairosError> {
        self.get(sub, key)
    }

    fn scan(&self, sub: SubStore) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KairosError> {
        self.iter(sub)?.collect()
    }
}

/// A lazy, forward-only, finite sequence of `(key, value)` pairs.
///
/// Not restartable once partially consumed; consumers that need to resume
/// re-open a range from the last key they saw.
pub struct RangeIter {
    inner: redb::Range<'static, &'static [u8], &'static [u8]>,
}

impl Iterator for RangeIter {
    type Item = Result<(Vec<u8>, Vec<u8>), KairosError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| {
            entry
                .map(|(key, value)| (key.value().to_vec(), value.value().to_vec()))
                .map_err(KairosError::from)
        })
    }
}

// =============================================================================
// WRITE TRANSACTION
// =============================================================================

/// The store's single serialized write transaction.
///
/// All writes within one transaction become visible atomically at commit;
/// an abort (explicit or by drop) discards every pending write.
pub struct WriteTxn {
    txn: redb::WriteTransaction,
}

impl WriteTxn {
    /// Point lookup that sees this transaction's own pending writes.
    pub fn get(&self, sub: SubStore, key: &[u8]) -> Result<Option<Vec<u8>>, KairosError> {
        let table = self.txn.open_table(sub.definition())?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    /// Insert or overwrite a value.
    pub fn put(&self, sub: SubStore, key: &[u8], value: &[u8]) -> Result<(), KairosError> {
        let mut table = self.txn.open_table(sub.definition())?;
        table.insert(key, value)?;
        Ok(())
    }

    /// Remove a key if present.
    pub fn delete(&self, sub: SubStore, key: &[u8]) -> Result<(), KairosError> {
        let mut table = self.txn.open_table(sub.definition())?;
        table.remove(key)?;
        Ok(())
    }

    /// Make all pending writes durable and visible.
    pub fn commit(self) -> Result<(), KairosError> {
        self.txn.commit()?;
        Ok(())
    }

    /// Discard all pending writes.
    pub fn abort(self) -> Result<(), KairosError> {
        self.txn.abort()?;
        Ok(())
    }
}

impl KvRead for WriteTxn {
    fn get_raw(&self, sub: SubStore, key: &[u8]) -> Result<Option<Vec<u8>>, KairosError> {
        self.get(sub, key)
    }

    fn scan(&self, sub: SubStore) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KairosError> {
        let table = self.txn.open_table(sub.definition())?;
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            entries.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(entries)
    }
}

// =============================================================================
// TESTS
// =============================================================================
