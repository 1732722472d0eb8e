//! Converts parsed `.pgdf` records into write-batches that update every
//! keyspace a node or edge touches, maintaining the cross-keyspace
//! invariants described alongside the keyspace layout.

mod pgdf;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use tracing::warn;

use crate::adapter::{Op, StorageEngine, WriteOutcome};
use crate::codec;
use crate::error::{Error, Result};
use crate::keyspace::{
    self, ADJ, EDGES, EDGES_BY_LABEL, EDGE_PROP_IDX, META, META_EDGES_TOTAL,
    META_EDGE_LABEL_COUNT, META_EDGE_LABEL_SCHEMA, META_NODES_TOTAL, META_NODE_LABEL_SCHEMA,
    NODES, NODE_PROP_IDX,
};
use pgdf::{ParsedRecord, Parser, Record};

/// Outcome of one ingestion call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub nodes_ingested: u64,
    pub edges_ingested: u64,
    /// Number of input lines rejected (malformed record or duplicate id).
    pub records_skipped: u64,
}

enum Kind {
    Node,
    Edge,
}

impl Kind {
    fn noun(&self) -> &'static str {
        match self {
            Kind::Node => "node",
            Kind::Edge => "edge",
        }
    }
}

struct Prepared {
    kind: Kind,
    id: String,
    record: Record,
    ops: Vec<Op>,
}

/// Accumulates the `META` side-effects of a group of records (counters and
/// schema sets) in memory so that a group of more than one record touching
/// the same label only issues one `META` write per key, reading each
/// key's current value from storage at most once per group.
struct MetaAccumulator<'a> {
    storage: &'a StorageEngine,
    counters: HashMap<Vec<u8>, u64>,
    schemas: HashMap<Vec<u8>, BTreeSet<String>>,
}

impl<'a> MetaAccumulator<'a> {
    fn new(storage: &'a StorageEngine) -> Self {
        Self {
            storage,
            counters: HashMap::new(),
            schemas: HashMap::new(),
        }
    }

    fn bump_counter(&mut self, key: &[u8]) -> Result<()> {
        if let std::collections::hash_map::Entry::Vacant(e) = self.counters.entry(key.to_vec()) {
            let current = match self.storage.get(META, key)? {
                Some(bytes) => codec::decode_count(&bytes)?,
                None => 0,
            };
            e.insert(current);
        }
        *self.counters.get_mut(key).expect("just inserted") += 1;
        Ok(())
    }

    fn add_schema_keys(&mut self, key: &[u8], props: &BTreeMap<String, String>) -> Result<()> {
        if let std::collections::hash_map::Entry::Vacant(e) = self.schemas.entry(key.to_vec()) {
            let current = match self.storage.get(META, key)? {
                Some(bytes) => codec::decode_schema(&bytes)?,
                None => BTreeSet::new(),
            };
            e.insert(current);
        }
        let set = self.schemas.get_mut(key).expect("just inserted");
        set.extend(props.keys().cloned());
        Ok(())
    }

    fn into_ops(self) -> Vec<Op> {
        let mut ops = Vec::with_capacity(self.counters.len() + self.schemas.len());
        for (key, value) in self.counters {
            ops.push(Op::Put {
                table: META,
                key,
                value: codec::encode_count(value),
                require_absent: false,
            });
        }
        for (key, set) in self.schemas {
            ops.push(Op::Put {
                table: META,
                key,
                value: codec::encode_schema(&set),
                require_absent: false,
            });
        }
        ops
    }
}

/// Like [`keyspace::validate_token`], but maps a validation failure to
/// [`Error::BadRecord`] carrying the record's source line: ingestion-path
/// token violations are malformed-record errors, not the `UsageError` that
/// `keyspace::validate_token` raises for direct API calls (`get_node`, ...).
fn validate_record_token(line: usize, what: &str, value: &str, allow_empty: bool) -> Result<()> {
    keyspace::validate_token(what, value, allow_empty).map_err(|e| match e {
        Error::UsageError(message) => Error::bad_record(line, message),
        other => other,
    })
}

fn validate_node_fields(
    line: usize,
    id: &str,
    label: &str,
    props: &BTreeMap<String, String>,
) -> Result<()> {
    validate_record_token(line, "node id", id, false)?;
    validate_record_token(line, "label", label, true)?;
    for key in props.keys() {
        validate_record_token(line, "property key", key, false)?;
    }
    for value in props.values() {
        validate_record_token(line, "property value", value, true)?;
    }
    Ok(())
}

fn validate_edge_fields(
    line: usize,
    id: &str,
    label: &str,
    src: &str,
    dst: &str,
    props: &BTreeMap<String, String>,
) -> Result<()> {
    validate_record_token(line, "edge id", id, false)?;
    validate_record_token(line, "label", label, true)?;
    validate_record_token(line, "src node id", src, false)?;
    validate_record_token(line, "dst node id", dst, false)?;
    for key in props.keys() {
        validate_record_token(line, "property key", key, false)?;
    }
    for value in props.values() {
        validate_record_token(line, "property value", value, true)?;
    }
    Ok(())
}

/// Builds the per-record portion of a record's ops (everything except the
/// `META` side-effects, which are merged across the whole group). `line` is
/// the record's 1-based source line, used only to stamp a validation
/// failure as `Error::BadRecord { line, .. }`.
fn prepare_record(line: usize, record: &Record, meta: &mut MetaAccumulator<'_>) -> Result<Prepared> {
    match record {
        Record::Node { id, label, props } => {
            validate_node_fields(line, id, label, props)?;
            let mut ops = vec![Op::Put {
                table: NODES,
                key: id.as_bytes().to_vec(),
                value: codec::encode_node(&crate::model::Node {
                    label: label.clone(),
                    props: props.clone(),
                }),
                require_absent: true,
            }];
            for (k, v) in props {
                ops.push(Op::Put {
                    table: NODE_PROP_IDX,
                    key: keyspace::compose_key(&[k.as_bytes(), v.as_bytes(), id.as_bytes()]),
                    value: Vec::new(),
                    require_absent: false,
                });
            }
            meta.bump_counter(META_NODES_TOTAL)?;
            meta.add_schema_keys(
                &keyspace::compose_key(&[META_NODE_LABEL_SCHEMA, label.as_bytes()]),
                props,
            )?;
            Ok(Prepared {
                kind: Kind::Node,
                id: id.clone(),
                record: record.clone(),
                ops,
            })
        }
        Record::Edge {
            id,
            label,
            directed,
            src,
            dst,
            props,
        } => {
            validate_edge_fields(line, id, label, src, dst, props)?;
            let mut ops = vec![Op::Put {
                table: EDGES,
                key: id.as_bytes().to_vec(),
                value: codec::encode_edge(&crate::model::Edge {
                    label: label.clone(),
                    src: src.clone(),
                    dst: dst.clone(),
                    directed: *directed,
                    props: props.clone(),
                }),
                require_absent: true,
            }];
            ops.push(Op::Put {
                table: EDGES_BY_LABEL,
                key: keyspace::compose_key(&[label.as_bytes(), id.as_bytes()]),
                value: Vec::new(),
                require_absent: false,
            });
            ops.push(Op::Put {
                table: ADJ,
                key: keyspace::compose_key(&[src.as_bytes(), id.as_bytes()]),
                value: Vec::new(),
                require_absent: false,
            });
            if !directed {
                // An undirected self-loop (src == dst) produces the same ADJ
                // key twice; the second write is a harmless no-op overwrite,
                // so the edge is reachable once from that node, not twice.
                ops.push(Op::Put {
                    table: ADJ,
                    key: keyspace::compose_key(&[dst.as_bytes(), id.as_bytes()]),
                    value: Vec::new(),
                    require_absent: false,
                });
            }
            for (k, v) in props {
                ops.push(Op::Put {
                    table: EDGE_PROP_IDX,
                    key: keyspace::compose_key(&[k.as_bytes(), v.as_bytes(), id.as_bytes()]),
                    value: Vec::new(),
                    require_absent: false,
                });
            }
            meta.bump_counter(META_EDGES_TOTAL)?;
            meta.bump_counter(&keyspace::compose_key(&[META_EDGE_LABEL_COUNT, label.as_bytes()]))?;
            meta.add_schema_keys(
                &keyspace::compose_key(&[META_EDGE_LABEL_SCHEMA, label.as_bytes()]),
                props,
            )?;
            Ok(Prepared {
                kind: Kind::Edge,
                id: id.clone(),
                record: record.clone(),
                ops,
            })
        }
    }
}

/// Drives the `.pgdf` parser into atomic write-batches.
pub(crate) struct Ingestor {
    storage: StorageEngine,
    batch_size: usize,
}

impl Ingestor {
    pub(crate) fn new(storage: StorageEngine) -> Self {
        Self::with_batch_size(storage, 1)
    }

    pub(crate) fn with_batch_size(storage: StorageEngine, batch_size: usize) -> Self {
        Self {
            storage,
            batch_size: batch_size.max(1),
        }
    }

    pub(crate) fn ingest_text(&self, text: &str, strict: bool) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut parser = Parser::new(text);

        loop {
            let mut group: Vec<(usize, Prepared)> = Vec::new();
            let mut meta = MetaAccumulator::new(&self.storage);

            while group.len() < self.batch_size {
                let Some(next) = parser.next() else { break };
                match next {
                    Ok(ParsedRecord { line, record }) => match prepare_record(line, &record, &mut meta) {
                        Ok(prepared) => group.push((line, prepared)),
                        Err(e) => {
                            if strict {
                                // Commit whatever this group already
                                // validated before surfacing the error: a
                                // later bad record must not un-commit or
                                // drop records already accepted into it.
                                if !group.is_empty() {
                                    self.commit_group(group, meta, strict, &mut report)?;
                                }
                                return Err(e);
                            }
                            warn!(line, error = %e, "skipping malformed record");
                            report.records_skipped += 1;
                        }
                    },
                    Err(e) => {
                        if strict {
                            if !group.is_empty() {
                                self.commit_group(group, meta, strict, &mut report)?;
                            }
                            return Err(e);
                        }
                        warn!(error = %e, "skipping unparsable line");
                        report.records_skipped += 1;
                    }
                }
            }

            if group.is_empty() {
                break;
            }

            self.commit_group(group, meta, strict, &mut report)?;
        }

        Ok(report)
    }

    pub(crate) fn ingest_file(&self, path: impl AsRef<Path>, strict: bool) -> Result<IngestReport> {
        let text = std::fs::read_to_string(path)?;
        self.ingest_text(&text, strict)
    }

    /// Commits one group of prepared records atomically. On a duplicate-id
    /// failure within a group of more than one record, isolates the fault
    /// by retrying the group one record at a time so a single bad record
    /// cannot sink its batch-mates.
    fn commit_group(
        &self,
        group: Vec<(usize, Prepared)>,
        meta: MetaAccumulator<'_>,
        strict: bool,
        report: &mut IngestReport,
    ) -> Result<()> {
        if group.len() == 1 {
            let (line, prepared) = group.into_iter().next().expect("len checked");
            let mut ops = prepared.ops.clone();
            ops.extend(meta.into_ops());
            match self.storage.write_batch(ops)? {
                WriteOutcome::Committed => {
                    match prepared.kind {
                        Kind::Node => report.nodes_ingested += 1,
                        Kind::Edge => report.edges_ingested += 1,
                    }
                    Ok(())
                }
                WriteOutcome::DuplicateKey(_) => {
                    let err = Error::bad_record(
                        line,
                        format!("duplicate {} id {:?}", prepared.kind.noun(), prepared.id),
                    );
                    if strict {
                        return Err(err);
                    }
                    warn!(line, id = %prepared.id, "skipping duplicate id");
                    report.records_skipped += 1;
                    Ok(())
                }
            }
        } else {
            let ops: Vec<Op> = group
                .iter()
                .flat_map(|(_, p)| p.ops.clone())
                .chain(meta.into_ops())
                .collect();
            match self.storage.write_batch(ops)? {
                WriteOutcome::Committed => {
                    for (_, prepared) in &group {
                        match prepared.kind {
                            Kind::Node => report.nodes_ingested += 1,
                            Kind::Edge => report.edges_ingested += 1,
                        }
                    }
                    Ok(())
                }
                WriteOutcome::DuplicateKey(_) => {
                    // Isolate the fault: re-derive each record's ops and
                    // META side-effects independently (the group-wide
                    // accumulator above was discarded along with the
                    // aborted transaction) and commit one at a time so a
                    // single duplicate id cannot sink its batch-mates.
                    for (line, prepared) in group {
                        let mut retry_meta = MetaAccumulator::new(&self.storage);
                        let reprepared = prepare_record(line, &prepared.record, &mut retry_meta)
                            .expect("record already validated once during group assembly");
                        self.commit_group(vec![(line, reprepared)], retry_meta, strict, report)?;
                    }
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::NODES;

    fn engine() -> (tempfile::TempDir, StorageEngine) {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn ingest_nodes_and_edges_updates_counts_and_schema() {
        let (_dir, storage) = engine();
        let ingestor = Ingestor::new(storage.clone());

        let report = ingestor
            .ingest_text(
                "@id|@label|country\n\
                 user_101|User|Mexico\n\
                 user_102|User|USA\n\
                 user_103|User|Chile\n",
                true,
            )
            .unwrap();
        assert_eq!(report.nodes_ingested, 3);
        assert_eq!(report.records_skipped, 0);

        let report = ingestor
            .ingest_text(
                "@id|@label|@dir|@out|@in|\n\
                 edge_50|KNOWS|T|user_101|user_102|\n\
                 edge_51|WORKS_WITH|T|user_103|user_101|\n\
                 edge_52|KNOWS|T|user_102|user_103|\n",
                true,
            )
            .unwrap();
        assert_eq!(report.edges_ingested, 3);

        let query = crate::query::QueryEngine::new(storage);
        assert_eq!(query.count_nodes().unwrap(), 3);
        assert_eq!(query.count_edges().unwrap(), 3);
        let by_label = query.edge_count_by_label().unwrap();
        assert_eq!(by_label.get("KNOWS"), Some(&2));
        assert_eq!(by_label.get("WORKS_WITH"), Some(&1));
        let schema = query.node_schema().unwrap();
        assert_eq!(
            schema.get("User").unwrap(),
            &BTreeSet::from(["country".to_string()])
        );
    }

    #[test]
    fn duplicate_id_is_skipped_without_touching_counts() {
        let (_dir, storage) = engine();
        let ingestor = Ingestor::new(storage.clone());
        ingestor
            .ingest_text("@id|@label|\nuser_101|User\n", true)
            .unwrap();

        let report = ingestor
            .ingest_text("@id|@label|\nuser_101|User\n", false)
            .unwrap();
        assert_eq!(report.records_skipped, 1);
        assert_eq!(report.nodes_ingested, 0);
        assert_eq!(storage.get(NODES, b"user_101").unwrap().is_some(), true);

        let query = crate::query::QueryEngine::new(storage);
        assert_eq!(query.count_nodes().unwrap(), 1);
    }

    #[test]
    fn strict_mode_propagates_duplicate_as_error() {
        let (_dir, storage) = engine();
        let ingestor = Ingestor::new(storage);
        ingestor
            .ingest_text("@id|@label|\nuser_101|User\n", true)
            .unwrap();
        let err = ingestor
            .ingest_text("@id|@label|\nuser_101|User\n", true)
            .unwrap_err();
        assert!(matches!(err, Error::BadRecord { .. }));
    }

    #[test]
    fn batch_grouping_isolates_a_duplicate_within_the_group() {
        let (_dir, storage) = engine();
        let ingestor = Ingestor::new(storage.clone());
        ingestor
            .ingest_text("@id|@label|\nuser_101|User\n", true)
            .unwrap();

        let grouped = Ingestor::with_batch_size(storage.clone(), 4);
        let report = grouped
            .ingest_text(
                "@id|@label|\nuser_102|User\nuser_101|User\nuser_103|User\n",
                false,
            )
            .unwrap();
        assert_eq!(report.nodes_ingested, 2);
        assert_eq!(report.records_skipped, 1);

        let query = crate::query::QueryEngine::new(storage);
        assert_eq!(query.count_nodes().unwrap(), 3);
    }

    #[test]
    fn strict_mode_with_batch_size_commits_already_validated_records_before_erroring() {
        let (_dir, storage) = engine();
        let grouped = Ingestor::with_batch_size(storage.clone(), 4);
        let err = grouped
            .ingest_text(
                "@id|@label|\nuser_1|User\nuser_2|User\n|User\nuser_3|User\n",
                true,
            )
            .unwrap_err();
        assert!(matches!(err, Error::BadRecord { .. }));

        // user_1 and user_2 were already validated into the same
        // batch-sized group when the empty-id record failed; a strict
        // error on a later record must not discard them.
        let query = crate::query::QueryEngine::new(storage);
        assert_eq!(query.count_nodes().unwrap(), 2);
        assert!(query.get_node("user_1").unwrap().is_some());
        assert!(query.get_node("user_2").unwrap().is_some());
    }

    #[test]
    fn token_validation_failure_during_ingestion_is_bad_record_with_line() {
        let (_dir, storage) = engine();
        let ingestor = Ingestor::new(storage);
        let err = ingestor
            .ingest_text("@id|@label|\nuser_1|User\n|User\n", true)
            .unwrap_err();
        match err {
            Error::BadRecord { line, .. } => assert_eq!(line, 3),
            other => panic!("expected BadRecord, got {other:?}"),
        }
    }

    #[test]
    fn token_validation_failure_is_skipped_not_propagated_in_non_strict_mode() {
        let (_dir, storage) = engine();
        let ingestor = Ingestor::new(storage.clone());
        let report = ingestor
            .ingest_text("@id|@label|\nuser_1|User\n|User\n", false)
            .unwrap();
        assert_eq!(report.nodes_ingested, 1);
        assert_eq!(report.records_skipped, 1);

        let query = crate::query::QueryEngine::new(storage);
        assert_eq!(query.count_nodes().unwrap(), 1);
    }
}
