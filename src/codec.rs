//! Pure functions turning logical graph entities into the byte values
//! stored in the `NODES`/`EDGES` keyspaces, and back.
//!
//! The wire format is a 1-byte version header followed by
//! length-prefixed (`u32` little-endian) fields, the same tagged,
//! length-prefixed shape this codebase's property-value encoding uses.
//! Property maps are written in sorted-key order so that two equivalent
//! maps always encode to identical bytes.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::model::{Edge, Node};

const FORMAT_VERSION: u8 = 1;

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    let len = u32::try_from(bytes.len()).expect("field length fits in u32");
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_bytes(out, s.as_bytes());
}

fn write_bool(out: &mut Vec<u8>, b: bool) {
    out.push(u8::from(b));
}

fn write_props(out: &mut Vec<u8>, props: &BTreeMap<String, String>) {
    let count = u32::try_from(props.len()).expect("property count fits in u32");
    out.extend_from_slice(&count.to_le_bytes());
    for (k, v) in props {
        write_str(out, k);
        write_str(out, v);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::decode("unexpected end of value"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let raw: [u8; 4] = self.take(4)?.try_into().expect("length checked above");
        Ok(u32::from_le_bytes(raw))
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    fn read_str(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::decode(format!("invalid utf-8: {e}")))
    }

    fn read_props(&mut self) -> Result<BTreeMap<String, String>> {
        let count = self.read_u32()?;
        let mut props = BTreeMap::new();
        for _ in 0..count {
            let key = self.read_str()?;
            let value = self.read_str()?;
            props.insert(key, value);
        }
        Ok(props)
    }

    fn expect_exhausted(&self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(Error::decode("trailing bytes after decoded value"));
        }
        Ok(())
    }
}

fn read_header(reader: &mut Reader<'_>) -> Result<()> {
    let version = reader.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(Error::decode(format!(
            "unsupported format version {version}"
        )));
    }
    Ok(())
}

/// Encodes a node's `{label, props}` into its `NODES` value.
pub fn encode_node(node: &Node) -> Vec<u8> {
    let mut out = vec![FORMAT_VERSION];
    write_str(&mut out, &node.label);
    write_props(&mut out, &node.props);
    out
}

/// Decodes a `NODES` value back into a [`Node`].
pub fn decode_node(bytes: &[u8]) -> Result<Node> {
    let mut reader = Reader::new(bytes);
    read_header(&mut reader)?;
    let label = reader.read_str()?;
    let props = reader.read_props()?;
    reader.expect_exhausted()?;
    Ok(Node { label, props })
}

/// Encodes an edge's `{label, src, dst, directed, props}` into its `EDGES` value.
pub fn encode_edge(edge: &Edge) -> Vec<u8> {
    let mut out = vec![FORMAT_VERSION];
    write_str(&mut out, &edge.label);
    write_str(&mut out, &edge.src);
    write_str(&mut out, &edge.dst);
    write_bool(&mut out, edge.directed);
    write_props(&mut out, &edge.props);
    out
}

/// Decodes an `EDGES` value back into an [`Edge`].
pub fn decode_edge(bytes: &[u8]) -> Result<Edge> {
    let mut reader = Reader::new(bytes);
    read_header(&mut reader)?;
    let label = reader.read_str()?;
    let src = reader.read_str()?;
    let dst = reader.read_str()?;
    let directed = reader.read_bool()?;
    let props = reader.read_props()?;
    reader.expect_exhausted()?;
    Ok(Edge {
        label,
        src,
        dst,
        directed,
        props,
    })
}

/// Encodes a `u64` counter as 8 little-endian bytes for storage in `META`.
pub fn encode_count(count: u64) -> Vec<u8> {
    count.to_le_bytes().to_vec()
}

/// Decodes a `META` counter value.
pub fn decode_count(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::decode("invalid counter width"))?;
    Ok(u64::from_le_bytes(raw))
}

/// Encodes a property-key schema set (sorted, deduplicated) for storage in `META`.
pub fn encode_schema(keys: &std::collections::BTreeSet<String>) -> Vec<u8> {
    let mut out = Vec::new();
    let count = u32::try_from(keys.len()).expect("schema key count fits in u32");
    out.extend_from_slice(&count.to_le_bytes());
    for key in keys {
        write_str(&mut out, key);
    }
    out
}

/// Decodes a `META` schema-set value back into a sorted set of keys.
pub fn decode_schema(bytes: &[u8]) -> Result<std::collections::BTreeSet<String>> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_u32()?;
    let mut keys = std::collections::BTreeSet::new();
    for _ in 0..count {
        keys.insert(reader.read_str()?);
    }
    reader.expect_exhausted()?;
    Ok(keys)
}
