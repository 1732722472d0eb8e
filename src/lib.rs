//! Embedded, on-disk property-graph storage engine.
//!
//! [`Db`] persists labeled nodes and labeled (directed or undirected) edges,
//! each carrying an open-ended string property map, atop [`redb`] as the
//! ordered key-value layer. It serves point lookups, property-equality
//! scans, adjacency traversal, and schema/metadata queries, and bulk-loads
//! graphs from the pipe-delimited `.pgdf` text format.
//!
//! ```no_run
//! use pgdfdb::{Db, Options};
//!
//! let db = Db::open("./graph-data", Options::default())?;
//! db.ingest_file("./social.pgdf")?;
//! if let Some(node) = db.get_node("user_101")? {
//!     println!("{}: {:?}", node.label, node.props);
//! }
//! for edge in db.iter_neighbours("user_101")? {
//!     println!("{:?}", edge?.edge.label);
//! }
//! db.close()?;
//! # Ok::<(), pgdfdb::Error>(())
//! ```

mod adapter;
mod codec;
mod cursor;
mod error;
mod ingest;
mod keyspace;
mod model;
mod query;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use adapter::StorageEngine;
use ingest::Ingestor;
use query::QueryEngine;

pub use error::{Error, Result};
pub use ingest::IngestReport;
pub use model::{Edge, EdgeEntry, Node, NodeEntry};
pub use query::Cursor;

/// Configuration for [`Db::open`] and ingestion calls made through it.
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of consecutive valid records grouped into one write
    /// transaction during ingestion. Higher values amortize transaction
    /// overhead on large loads; `1` (the default) gives the simplest
    /// per-record failure isolation.
    pub batch_size: usize,
    /// When `true`, ingestion stops and returns the first encountered
    /// error instead of skipping the offending record and continuing.
    pub strict_ingestion: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            batch_size: 1,
            strict_ingestion: false,
        }
    }
}

impl Options {
    /// Starts from the defaults (`batch_size: 1`, `strict_ingestion: false`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets [`Options::batch_size`]. Values less than `1` are clamped to `1`.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets [`Options::strict_ingestion`].
    pub fn strict_ingestion(mut self, strict: bool) -> Self {
        self.strict_ingestion = strict;
        self
    }
}

/// A handle onto one graph database directory.
///
/// Cheaply `Clone`-able: every clone shares the same underlying storage and
/// outstanding-cursor accounting, so cursors produced by one clone are
/// counted against `close()` calls made through any other.
#[derive(Clone)]
pub struct Db {
    storage: StorageEngine,
    options: Options,
}

impl Db {
    /// Opens (creating if absent) the graph database directory at `path`.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let storage = StorageEngine::open(path)?;
        Ok(Self { storage, options })
    }

    /// Closes the handle. Idempotent; fails with [`Error::UsageError`] if
    /// any cursor produced by this handle (or a clone of it) is still
    /// outstanding.
    pub fn close(&self) -> Result<()> {
        self.storage.close()
    }

    pub fn is_closed(&self) -> bool {
        self.storage.is_closed()
    }

    fn ingestor(&self) -> Ingestor {
        Ingestor::with_batch_size(self.storage.clone(), self.options.batch_size)
    }

    /// Bulk-loads a `.pgdf` file, honoring [`Options::strict_ingestion`].
    pub fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestReport> {
        self.ingestor()
            .ingest_file(path, self.options.strict_ingestion)
    }

    /// Bulk-loads `.pgdf` text already in memory, honoring
    /// [`Options::strict_ingestion`].
    pub fn ingest_text(&self, text: &str) -> Result<IngestReport> {
        self.ingestor()
            .ingest_text(text, self.options.strict_ingestion)
    }

    fn query(&self) -> QueryEngine {
        QueryEngine::new(self.storage.clone())
    }

    /// Single `NODES` point-get; `None` if absent.
    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        self.query().get_node(id)
    }

    /// Single `EDGES` point-get; `None` if absent.
    pub fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        self.query().get_edge(id)
    }

    /// Prefix-less iteration over every stored node.
    pub fn iter_all_nodes(&self) -> Result<Cursor<NodeEntry>> {
        self.query().iter_all_nodes()
    }

    /// Prefix-less iteration over every stored edge.
    pub fn iter_all_edges(&self) -> Result<Cursor<EdgeEntry>> {
        self.query().iter_all_edges()
    }

    /// Edges with the given label, ordered by edge id.
    pub fn iter_edges_by_label(&self, label: &str) -> Result<Cursor<EdgeEntry>> {
        self.query().iter_edges_by_label(label)
    }

    /// Edges incident to `node_id`. For a directed edge, only its source
    /// endpoint is adjacent to it; see [`Cursor`] docs for the full rule.
    pub fn iter_neighbours(&self, node_id: &str) -> Result<Cursor<EdgeEntry>> {
        self.query().iter_neighbours(node_id)
    }

    /// Nodes carrying the exact property `key = value`.
    pub fn iter_nodes_by_property(&self, key: &str, value: &str) -> Result<Cursor<NodeEntry>> {
        self.query().iter_nodes_by_property(key, value)
    }

    /// Edges carrying the exact property `key = value`.
    pub fn iter_edges_by_property(&self, key: &str, value: &str) -> Result<Cursor<EdgeEntry>> {
        self.query().iter_edges_by_property(key, value)
    }

    /// Total number of distinct nodes.
    pub fn count_nodes(&self) -> Result<u64> {
        self.query().count_nodes()
    }

    /// Total number of distinct edges.
    pub fn count_edges(&self) -> Result<u64> {
        self.query().count_edges()
    }

    /// Edge count per label.
    pub fn edge_count_by_label(&self) -> Result<BTreeMap<String, u64>> {
        self.query().edge_count_by_label()
    }

    /// Property-key set per node label, the union across all nodes of that label.
    pub fn node_schema(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        self.query().node_schema()
    }

    /// Property-key set per edge label, the union across all edges of that label.
    pub fn edge_schema(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        self.query().edge_schema()
    }
}
