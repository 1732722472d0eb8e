//! Thin capability wrapper around the underlying `redb` KV store: open/close,
//! atomic multi-keyspace write batches, point get, and scoped prefix
//! iteration. Everything above this module reaches `redb` only through here.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{debug, info};

use crate::cursor::RawScan;
use crate::error::{Error, Result};
use crate::keyspace;

type Table = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// One operation within a [`StorageEngine::write_batch`] call.
#[derive(Clone)]
pub(crate) enum Op {
    /// Insert `key -> value` into `table`. When `require_absent` is set,
    /// the whole batch is aborted (nothing committed) if `key` is already
    /// present — this is how the ingestor enforces "node/edge ids are a
    /// set" without a separate read-then-write round trip.
    Put {
        table: Table,
        key: Vec<u8>,
        value: Vec<u8>,
        require_absent: bool,
    },
    /// Remove `key` from `table`, if present.
    #[allow(dead_code)]
    Delete { table: Table, key: Vec<u8> },
}

/// Outcome of a [`StorageEngine::write_batch`] call.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// Every operation applied atomically.
    Committed,
    /// A `require_absent` precondition failed; none of the batch's
    /// operations are visible to subsequent readers.
    DuplicateKey(Vec<u8>),
}

struct Inner {
    db: Database,
    outstanding_cursors: Arc<AtomicUsize>,
    closed: AtomicBool,
}

/// A cheap-to-clone handle onto the graph's on-disk storage. Cloning shares
/// the same underlying `redb::Database` and cursor-accounting state; it
/// exists so joined cursors (which need to read a second keyspace per
/// element) can hold their own handle without borrowing the engine that
/// produced them.
#[derive(Clone)]
pub(crate) struct StorageEngine {
    inner: Arc<Inner>,
}

impl StorageEngine {
    /// Opens (creating if absent) the directory at `path` and every
    /// declared keyspace within it.
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path).map_err(|e| Error::storage_open(e))?;
        let db_path = path.join("graph.redb");
        let db = Database::create(&db_path).map_err(Error::from)?;
        Self::init_tables(&db)?;
        info!(path = %db_path.display(), "opened storage engine");
        Ok(Self {
            inner: Arc::new(Inner {
                db,
                outstanding_cursors: Arc::new(AtomicUsize::new(0)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn init_tables(db: &Database) -> Result<()> {
        let txn = db.begin_write()?;
        for table in keyspace::ALL {
            txn.open_table(*table)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::usage("operation attempted on a closed handle"));
        }
        Ok(())
    }

    /// Closes the handle. Idempotent. Fails with [`Error::UsageError`] if
    /// any cursor produced by this engine is still outstanding — closing
    /// while cursors are live is rejected rather than blocking.
    pub(crate) fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let outstanding = self.inner.outstanding_cursors.load(Ordering::SeqCst);
        if outstanding > 0 {
            self.inner.closed.store(false, Ordering::SeqCst);
            return Err(Error::usage(format!(
                "cannot close: {outstanding} outstanding cursor(s)"
            )));
        }
        debug!("storage engine closed");
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Applies every operation in `ops` atomically. Returns
    /// [`WriteOutcome::DuplicateKey`] (with nothing committed) the first
    /// time a `require_absent` precondition fails.
    pub(crate) fn write_batch(&self, ops: Vec<Op>) -> Result<WriteOutcome> {
        self.ensure_open()?;
        let txn = self.inner.db.begin_write()?;
        for op in &ops {
            match op {
                Op::Put {
                    table,
                    key,
                    value,
                    require_absent,
                } => {
                    let mut t = txn.open_table(*table)?;
                    if *require_absent && t.get(key.as_slice())?.is_some() {
                        drop(t);
                        // Abort discards every change staged in this
                        // transaction so far; nothing in `ops` becomes visible.
                        txn.abort()?;
                        return Ok(WriteOutcome::DuplicateKey(key.clone()));
                    }
                    t.insert(key.as_slice(), value.as_slice())?;
                }
                Op::Delete { table, key } => {
                    let mut t = txn.open_table(*table)?;
                    t.remove(key.as_slice())?;
                }
            }
        }
        txn.commit()?;
        Ok(WriteOutcome::Committed)
    }

    /// Point lookup within `table`.
    pub(crate) fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let txn = self.inner.db.begin_read()?;
        let t = txn.open_table(table)?;
        Ok(t.get(key)?.map(|guard| guard.value().to_vec()))
    }

    /// Opens a scoped, forward-only scan over `table`, restricted to
    /// `prefix` when given. Release of the underlying `redb` read
    /// transaction is guaranteed once the returned scan is dropped.
    pub(crate) fn scan(&self, table: Table, prefix: Option<&[u8]>) -> Result<RawScan> {
        self.ensure_open()?;
        RawScan::open(
            &self.inner.db,
            table,
            prefix,
            self.inner.outstanding_cursors.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::NODES;

    #[test]
    fn open_creates_directory_and_is_idempotent_to_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let engine = StorageEngine::open(&path).unwrap();
        assert!(path.exists());
        drop(engine);
        // Reopening an existing store must not fail.
        StorageEngine::open(&path).unwrap();
    }

    #[test]
    fn write_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(dir.path()).unwrap();
        let outcome = engine
            .write_batch(vec![Op::Put {
                table: NODES,
                key: b"n1".to_vec(),
                value: b"v1".to_vec(),
                require_absent: true,
            }])
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Committed);
        assert_eq!(engine.get(NODES, b"n1").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn require_absent_aborts_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(dir.path()).unwrap();
        engine
            .write_batch(vec![Op::Put {
                table: NODES,
                key: b"n1".to_vec(),
                value: b"v1".to_vec(),
                require_absent: true,
            }])
            .unwrap();

        let outcome = engine
            .write_batch(vec![
                Op::Put {
                    table: NODES,
                    key: b"n2".to_vec(),
                    value: b"v2".to_vec(),
                    require_absent: true,
                },
                Op::Put {
                    table: NODES,
                    key: b"n1".to_vec(),
                    value: b"dup".to_vec(),
                    require_absent: true,
                },
            ])
            .unwrap();
        assert_eq!(outcome, WriteOutcome::DuplicateKey(b"n1".to_vec()));
        // n2 must not have been committed either: the batch is all-or-nothing.
        assert_eq!(engine.get(NODES, b"n2").unwrap(), None);
        assert_eq!(engine.get(NODES, b"n1").unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn close_rejects_while_cursor_outstanding() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(dir.path()).unwrap();
        let scan = engine.scan(NODES, None).unwrap();
        assert!(engine.close().is_err());
        drop(scan);
        assert!(engine.close().is_ok());
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(dir.path()).unwrap();
        engine.close().unwrap();
        engine.close().unwrap();
    }

    #[test]
    fn operations_after_close_are_usage_errors() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(dir.path()).unwrap();
        engine.close().unwrap();
        let err = engine.get(NODES, b"n1").unwrap_err();
        assert!(matches!(err, Error::UsageError(_)));
    }
}
