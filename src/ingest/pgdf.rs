//! Line-oriented parser for the `.pgdf` pipe-delimited text format.
//!
//! The parser's only obligation is to turn text into [`Record`] values; it
//! knows nothing about keyspaces, batching, or storage. A single input's
//! first non-empty, non-comment line is its header, which fixes whether
//! every following record is a node or an edge record and names the
//! trailing property columns.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

const NODE_HEADER_PREFIX: &str = "@id|@label|";
const EDGE_HEADER_PREFIX: &str = "@id|@label|@dir|@out|@in|";

/// One parsed `.pgdf` data line, not yet validated against ingestion rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Record {
    Node {
        id: String,
        label: String,
        props: BTreeMap<String, String>,
    },
    Edge {
        id: String,
        label: String,
        directed: bool,
        src: String,
        dst: String,
        props: BTreeMap<String, String>,
    },
}

/// A [`Record`] paired with the 1-based source line it came from, for
/// error reporting.
pub(crate) struct ParsedRecord {
    pub(crate) line: usize,
    pub(crate) record: Record,
}

enum HeaderKind {
    Node,
    Edge,
}

struct Header {
    kind: HeaderKind,
    prop_columns: Vec<String>,
}

fn split_columns(rest: &str) -> Vec<String> {
    if rest.is_empty() {
        Vec::new()
    } else {
        rest.split('|').map(str::to_string).collect()
    }
}

fn parse_header(line: &str, line_no: usize) -> Result<Header> {
    if let Some(rest) = line.strip_prefix(EDGE_HEADER_PREFIX) {
        Ok(Header {
            kind: HeaderKind::Edge,
            prop_columns: split_columns(rest),
        })
    } else if let Some(rest) = line.strip_prefix(NODE_HEADER_PREFIX) {
        Ok(Header {
            kind: HeaderKind::Node,
            prop_columns: split_columns(rest),
        })
    } else {
        Err(Error::bad_record(
            line_no,
            format!("unrecognized header: {line}"),
        ))
    }
}

/// Returns `fields[idx]`, or `""` when the line has fewer trailing columns
/// than the header promised — a short line is "missing fields at
/// end-of-line", which the format treats as empty rather than malformed.
fn field<'a>(fields: &[&'a str], idx: usize) -> &'a str {
    fields.get(idx).copied().unwrap_or("")
}

fn parse_props(header_columns: &[String], fields: &[&str], start: usize) -> BTreeMap<String, String> {
    header_columns
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), field(fields, start + i).to_string()))
        .collect()
}

fn parse_record(header: &Header, line: &str, line_no: usize) -> Result<Record> {
    let fields: Vec<&str> = line.split('|').collect();
    let id = field(&fields, 0).to_string();
    let label = field(&fields, 1).to_string();
    match header.kind {
        HeaderKind::Node => {
            let props = parse_props(&header.prop_columns, &fields, 2);
            Ok(Record::Node { id, label, props })
        }
        HeaderKind::Edge => {
            let dir = field(&fields, 2);
            let directed = match dir {
                "T" => true,
                "F" => false,
                other => {
                    return Err(Error::bad_record(
                        line_no,
                        format!("@dir must be \"T\" or \"F\", got {other:?}"),
                    ))
                }
            };
            let src = field(&fields, 3).to_string();
            let dst = field(&fields, 4).to_string();
            let props = parse_props(&header.prop_columns, &fields, 5);
            Ok(Record::Edge {
                id,
                label,
                directed,
                src,
                dst,
                props,
            })
        }
    }
}

/// Iterates the non-comment, non-empty lines of a `.pgdf` document,
/// consuming the first such line as the header and yielding every
/// subsequent one as a [`ParsedRecord`].
pub(crate) struct Parser<'a> {
    lines: std::str::Lines<'a>,
    header: Option<Header>,
    line_no: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            header: None,
            line_no: 0,
        }
    }
}

impl<'a> Iterator for Parser<'a> {
    type Item = Result<ParsedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = self.lines.next()?;
            self.line_no += 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if self.header.is_none() {
                match parse_header(line, self.line_no) {
                    Ok(header) => {
                        self.header = Some(header);
                        continue;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }
            let header = self.header.as_ref().expect("set above");
            return Some(parse_record(header, line, self.line_no).map(|record| ParsedRecord {
                line: self.line_no,
                record,
            }));
        }
    }
}
