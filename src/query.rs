//! Read API: point lookups, property-equals scans, adjacency traversal,
//! global iterators, and metadata aggregation. Every multi-result query
//! returns a lazy [`Cursor`].

use std::collections::{BTreeMap, BTreeSet};

use crate::adapter::StorageEngine;
use crate::codec;
use crate::error::{Error, Result};
use crate::keyspace::{
    self, ADJ, EDGES, EDGES_BY_LABEL, EDGE_PROP_IDX, META, META_EDGES_TOTAL,
    META_EDGE_LABEL_COUNT, META_EDGE_LABEL_SCHEMA, META_NODES_TOTAL, META_NODE_LABEL_SCHEMA,
    NODES, NODE_PROP_IDX,
};
use crate::model::{Edge, EdgeEntry, Node, NodeEntry};

/// A scoped, forward-only, lazily-decoded stream of query results. Dropping
/// a cursor at any point — including mid-iteration — releases the
/// underlying storage read transaction immediately. A drained cursor is
/// simply a cursor whose `next()` keeps returning `None`; there is no
/// separate "close" call to forget.
pub struct Cursor<T> {
    scan: crate::cursor::RawScan,
    decode: Box<dyn FnMut(Vec<u8>, Vec<u8>) -> Result<T> + Send>,
}

impl<T> Iterator for Cursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scan
            .next()
            .map(|entry| entry.and_then(|(k, v)| (self.decode)(k, v)))
    }
}

/// Implements the spec's read API over a [`StorageEngine`] handle.
#[derive(Clone)]
pub(crate) struct QueryEngine {
    storage: StorageEngine,
}

fn node_id_str(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| Error::decode(format!("invalid node id bytes: {e}")))
}

impl QueryEngine {
    pub(crate) fn new(storage: StorageEngine) -> Self {
        Self { storage }
    }

    /// Single `NODES` point-get; `None` if absent.
    pub(crate) fn get_node(&self, id: &str) -> Result<Option<Node>> {
        keyspace::validate_token("node id", id, false)?;
        match self.storage.get(NODES, id.as_bytes())? {
            Some(value) => Ok(Some(codec::decode_node(&value)?)),
            None => Ok(None),
        }
    }

    /// Single `EDGES` point-get; `None` if absent.
    pub(crate) fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        keyspace::validate_token("edge id", id, false)?;
        match self.storage.get(EDGES, id.as_bytes())? {
            Some(value) => Ok(Some(codec::decode_edge(&value)?)),
            None => Ok(None),
        }
    }

    /// Prefix-less iteration of `NODES`.
    pub(crate) fn iter_all_nodes(&self) -> Result<Cursor<NodeEntry>> {
        let scan = self.storage.scan(NODES, None)?;
        Ok(Cursor {
            scan,
            decode: Box::new(|k, v| {
                let id = node_id_str(k)?;
                let node = codec::decode_node(&v)?;
                Ok(NodeEntry { id, node })
            }),
        })
    }

    /// Prefix-less iteration of `EDGES`.
    pub(crate) fn iter_all_edges(&self) -> Result<Cursor<EdgeEntry>> {
        let scan = self.storage.scan(EDGES, None)?;
        Ok(Cursor {
            scan,
            decode: Box::new(|k, v| {
                let id = node_id_str(k)?;
                let edge = codec::decode_edge(&v)?;
                Ok(EdgeEntry { id, edge })
            }),
        })
    }

    /// Prefix scan of `EDGES_BY_LABEL` under `label SEP`, joined with
    /// `EDGES` per element. Ordered by `edge_id` within the label.
    pub(crate) fn iter_edges_by_label(&self, label: &str) -> Result<Cursor<EdgeEntry>> {
        keyspace::validate_token("label", label, true)?;
        self.joined_edge_scan(EDGES_BY_LABEL, &[label.as_bytes()])
    }

    /// Prefix scan of `ADJ` under `node_id SEP`, joined with `EDGES` per
    /// element. For a directed edge, only its `src` endpoint carries an
    /// `ADJ` row, so this yields outgoing edges only when `n` is the
    /// source of a directed edge; an undirected edge is reachable from
    /// both endpoints, and an undirected self-loop is yielded twice (one
    /// `ADJ` row per endpoint, both equal to `n`).
    pub(crate) fn iter_neighbours(&self, node_id: &str) -> Result<Cursor<EdgeEntry>> {
        keyspace::validate_token("node id", node_id, false)?;
        self.joined_edge_scan(ADJ, &[node_id.as_bytes()])
    }

    /// Prefix scan of `NODE_PROP_IDX` under `k SEP v SEP`, joined with `NODES`.
    pub(crate) fn iter_nodes_by_property(&self, key: &str, value: &str) -> Result<Cursor<NodeEntry>> {
        keyspace::validate_token("property key", key, false)?;
        keyspace::validate_token("property value", value, true)?;
        let prefix = keyspace::scan_prefix(&[key.as_bytes(), value.as_bytes()]);
        let prefix_len = prefix.len();
        let storage = self.storage.clone();
        let scan = self.storage.scan(NODE_PROP_IDX, Some(&prefix))?;
        Ok(Cursor {
            scan,
            decode: Box::new(move |k, _v| {
                let id = node_id_str(k[prefix_len..].to_vec())?;
                let value = storage
                    .get(NODES, id.as_bytes())?
                    .ok_or_else(|| Error::index_inconsistency(format!("node {id} missing from NODES")))?;
                let node = codec::decode_node(&value)?;
                Ok(NodeEntry { id, node })
            }),
        })
    }

    /// Prefix scan of `EDGE_PROP_IDX` under `k SEP v SEP`, joined with `EDGES`.
    pub(crate) fn iter_edges_by_property(&self, key: &str, value: &str) -> Result<Cursor<EdgeEntry>> {
        keyspace::validate_token("property key", key, false)?;
        keyspace::validate_token("property value", value, true)?;
        let prefix = keyspace::scan_prefix(&[key.as_bytes(), value.as_bytes()]);
        self.joined_edge_scan_prefixed(EDGE_PROP_IDX, prefix)
    }

    fn joined_edge_scan(
        &self,
        table: redb::TableDefinition<'static, &'static [u8], &'static [u8]>,
        prefix_parts: &[&[u8]],
    ) -> Result<Cursor<EdgeEntry>> {
        let prefix = keyspace::scan_prefix(prefix_parts);
        self.joined_edge_scan_prefixed(table, prefix)
    }

    fn joined_edge_scan_prefixed(
        &self,
        table: redb::TableDefinition<'static, &'static [u8], &'static [u8]>,
        prefix: Vec<u8>,
    ) -> Result<Cursor<EdgeEntry>> {
        let prefix_len = prefix.len();
        let storage = self.storage.clone();
        let scan = self.storage.scan(table, Some(&prefix))?;
        Ok(Cursor {
            scan,
            decode: Box::new(move |k, _v| {
                let id = node_id_str(k[prefix_len..].to_vec())?;
                let value = storage
                    .get(EDGES, id.as_bytes())?
                    .ok_or_else(|| Error::index_inconsistency(format!("edge {id} missing from EDGES")))?;
                let edge = codec::decode_edge(&value)?;
                Ok(EdgeEntry { id, edge })
            }),
        })
    }

    /// Reads `META.nodes_total`.
    pub(crate) fn count_nodes(&self) -> Result<u64> {
        self.read_counter(META_NODES_TOTAL)
    }

    /// Reads `META.edges_total`.
    pub(crate) fn count_edges(&self) -> Result<u64> {
        self.read_counter(META_EDGES_TOTAL)
    }

    fn read_counter(&self, key: &[u8]) -> Result<u64> {
        match self.storage.get(META, key)? {
            Some(bytes) => codec::decode_count(&bytes),
            None => Ok(0),
        }
    }

    /// Reads every `edge_label_count SEP *` entry in `META`.
    pub(crate) fn edge_count_by_label(&self) -> Result<BTreeMap<String, u64>> {
        let prefix = keyspace::scan_prefix(&[META_EDGE_LABEL_COUNT]);
        let prefix_len = prefix.len();
        let mut out = BTreeMap::new();
        for entry in self.storage.scan(META, Some(&prefix))? {
            let (k, v) = entry?;
            let label = node_id_str(k[prefix_len..].to_vec())?;
            out.insert(label, codec::decode_count(&v)?);
        }
        Ok(out)
    }

    /// Reads every `node_label_schema SEP *` entry in `META`.
    pub(crate) fn node_schema(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        self.read_schema(META_NODE_LABEL_SCHEMA)
    }

    /// Reads every `edge_label_schema SEP *` entry in `META`.
    pub(crate) fn edge_schema(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        self.read_schema(META_EDGE_LABEL_SCHEMA)
    }

    fn read_schema(&self, namespace: &[u8]) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let prefix = keyspace::scan_prefix(&[namespace]);
        let prefix_len = prefix.len();
        let mut out = BTreeMap::new();
        for entry in self.storage.scan(META, Some(&prefix))? {
            let (k, v) = entry?;
            let label = node_id_str(k[prefix_len..].to_vec())?;
            out.insert(label, codec::decode_schema(&v)?);
        }
        Ok(out)
    }
}
