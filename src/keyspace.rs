//! The fixed set of logical keyspaces and the key-composition rules every
//! other module builds on.
//!
//! Each keyspace is an independent, byte-ordered `redb` table keyed and
//! valued by raw bytes. Composite keys join their parts with [`SEPARATOR`]
//! so that a prefix scan over `part ++ [SEPARATOR]` unambiguously selects
//! every key that has `part` as its leading component.

use redb::TableDefinition;

use crate::error::{Error, Result};

/// Byte forbidden in any user-supplied string (node/edge id, label,
/// property key or value). Chosen because it cannot appear in valid UTF-8
/// except as the NUL character, which graph identifiers have no reason to
/// contain.
pub const SEPARATOR: u8 = 0x00;

/// Point lookup of a node by id; full-scan for "all nodes".
pub const NODES: TableDefinition<'static, &[u8], &[u8]> = TableDefinition::new("nodes");
/// Point lookup of an edge by id; full-scan for "all edges".
pub const EDGES: TableDefinition<'static, &[u8], &[u8]> = TableDefinition::new("edges");
/// `label SEP edge_id -> ()`, scanned by `label SEP` prefix.
pub const EDGES_BY_LABEL: TableDefinition<'static, &[u8], &[u8]> =
    TableDefinition::new("edges_by_label");
/// `node_id SEP edge_id -> ()`, scanned by `node_id SEP` prefix.
pub const ADJ: TableDefinition<'static, &[u8], &[u8]> = TableDefinition::new("adj");
/// `prop_key SEP prop_value SEP node_id -> ()`.
pub const NODE_PROP_IDX: TableDefinition<'static, &[u8], &[u8]> =
    TableDefinition::new("node_prop_idx");
/// `prop_key SEP prop_value SEP edge_id -> ()`.
pub const EDGE_PROP_IDX: TableDefinition<'static, &[u8], &[u8]> =
    TableDefinition::new("edge_prop_idx");
/// Small named keys: total counts, per-label counts, per-label schema sets.
pub const META: TableDefinition<'static, &[u8], &[u8]> = TableDefinition::new("meta");

/// All keyspaces, used by the adapter to eagerly create every table on open.
pub const ALL: &[TableDefinition<'static, &[u8], &[u8]>] = &[
    NODES,
    EDGES,
    EDGES_BY_LABEL,
    ADJ,
    NODE_PROP_IDX,
    EDGE_PROP_IDX,
    META,
];

/// META keys are themselves namespaced with the separator so that, e.g.,
/// every `edge_label_count` entry can be range-scanned with a shared prefix.
pub const META_NODES_TOTAL: &[u8] = b"nodes_total";
pub const META_EDGES_TOTAL: &[u8] = b"edges_total";
pub const META_EDGE_LABEL_COUNT: &[u8] = b"edge_label_count";
pub const META_NODE_LABEL_SCHEMA: &[u8] = b"node_label_schema";
pub const META_EDGE_LABEL_SCHEMA: &[u8] = b"edge_label_schema";

/// Joins `parts` with a single [`SEPARATOR`] between each pair. No
/// separator is appended after the final part — callers that need a scan
/// prefix call [`scan_prefix`] instead.
pub fn compose_key(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.extend_from_slice(part);
    }
    out
}

/// Builds the scan prefix for the leading `parts` of a composite key: the
/// joined parts followed by a trailing separator, so a scan only matches
/// keys whose next component starts fresh (never a key that merely shares
/// a string prefix with the last part).
pub fn scan_prefix(parts: &[&[u8]]) -> Vec<u8> {
    let mut key = compose_key(parts);
    key.push(SEPARATOR);
    key
}

/// The exclusive upper bound of a byte-lexicographic range that contains
/// every key starting with `prefix`. Returns `None` when `prefix` is empty
/// or made entirely of `0xFF` bytes, in which case the range is unbounded
/// above (every key compares less than infinity).
pub fn next_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last == 0xFF {
            end.pop();
        } else {
            *end.last_mut().unwrap() += 1;
            return Some(end);
        }
    }
    None
}

/// Validates a user-supplied token (id, label, property key, or property
/// value): it must not contain [`SEPARATOR`], and — unless `allow_empty`
/// is set — it must be non-empty. `what` names the field in the returned
/// error for debuggability.
pub fn validate_token(what: &str, value: &str, allow_empty: bool) -> Result<()> {
    if !allow_empty && value.is_empty() {
        return Err(Error::usage(format!("{what} must not be empty")));
    }
    if value.as_bytes().contains(&SEPARATOR) {
        return Err(Error::usage(format!(
            "{what} must not contain the separator byte"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_key_joins_with_single_separator() {
        let key = compose_key(&[b"alice", b"knows", b"bob"]);
        assert_eq!(key, b"alice\0knows\0bob");
    }

    #[test]
    fn scan_prefix_adds_trailing_separator() {
        let prefix = scan_prefix(&[b"alice"]);
        assert_eq!(prefix, b"alice\0");
        // Must not match a key that merely shares a string prefix.
        let other = compose_key(&[b"aliceBob", b"x"]);
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn next_prefix_increments_last_non_ff_byte() {
        assert_eq!(next_prefix(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(next_prefix(&[0x61, 0xFF]), Some(vec![0x62]));
        assert_eq!(next_prefix(&[0xFF, 0xFF]), None);
        assert_eq!(next_prefix(b""), None);
    }

    #[test]
    fn validate_token_rejects_separator_and_emptiness() {
        assert!(validate_token("id", "", false).is_err());
        assert!(validate_token("label", "", true).is_ok());
        assert!(validate_token("id", "a\0b", false).is_err());
        assert!(validate_token("id", "ok", false).is_ok());
    }
}
