//! Scoped cursor primitive: a `redb` read transaction plus a range iterator
//! over one keyspace, wrapped so release is guaranteed on every exit path.
//!
//! This is the low-level building block `query::Cursor<T>` is built on; it
//! knows nothing about graph semantics, only "iterate this table's
//! key/value pairs in byte order, optionally restricted to a prefix".

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ouroboros::self_referencing;
use redb::{Database, ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::{Error, Result};

#[self_referencing]
pub(crate) struct RawCursor {
    txn: ReadTransaction,
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
    #[borrows(table)]
    #[covariant]
    iter: redb::Range<'this, &'static [u8], &'static [u8]>,
}

impl RawCursor {
    fn open(
        db: &Database,
        table_def: TableDefinition<'static, &'static [u8], &'static [u8]>,
        prefix: Option<&[u8]>,
    ) -> Result<Self> {
        let txn = db.begin_read()?;
        let table = txn.open_table(table_def)?;
        let (start, end) = match prefix {
            Some(p) => (p.to_vec(), crate::keyspace::next_prefix(p)),
            None => (Vec::new(), None),
        };
        RawCursorTryBuilder {
            txn,
            table,
            iter_builder: move |table| -> Result<redb::Range<'_, &'static [u8], &'static [u8]>> {
                let iter = match end {
                    Some(end) => table.range::<&[u8]>((
                        Bound::Included(start.as_slice()),
                        Bound::Excluded(end.as_slice()),
                    ))?,
                    None => table.range::<&[u8]>((Bound::Included(start.as_slice()), Bound::Unbounded))?,
                };
                Ok(iter)
            },
        }
        .try_build()
    }
}

impl Iterator for RawCursor {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.with_iter_mut(|iter| {
            iter.next().map(|entry| {
                entry
                    .map(|(k, v)| (k.value().to_vec(), v.value().to_vec()))
                    .map_err(Error::storage_io)
            })
        })
    }
}

/// Decrements the adapter's outstanding-cursor counter on drop, guaranteeing
/// release happens exactly once however the owning cursor goes out of scope
/// (normal exhaustion, early `drop`, or unwinding).
pub(crate) struct CursorGuard {
    outstanding: Arc<AtomicUsize>,
}

impl CursorGuard {
    pub(crate) fn new(outstanding: Arc<AtomicUsize>) -> Self {
        outstanding.fetch_add(1, Ordering::SeqCst);
        Self { outstanding }
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A released-on-drop scan over one keyspace, optionally restricted to a
/// byte prefix. This is the type [`crate::adapter::StorageEngine::scan`]
/// returns; higher layers decode the raw `(key, value)` pairs.
pub(crate) struct RawScan {
    cursor: RawCursor,
    _guard: CursorGuard,
}

impl RawScan {
    pub(crate) fn open(
        db: &Database,
        table: TableDefinition<'static, &'static [u8], &'static [u8]>,
        prefix: Option<&[u8]>,
        outstanding: Arc<AtomicUsize>,
    ) -> Result<Self> {
        Ok(Self {
            cursor: RawCursor::open(db, table, prefix)?,
            _guard: CursorGuard::new(outstanding),
        })
    }
}

impl Iterator for RawScan {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next()
    }
}
