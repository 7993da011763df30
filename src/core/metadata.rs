//! Deconvolution parameter reports.
//!
//! The server writes `<stem>.parameters.txt` as a sequence of HTML tables, one
//! per parameter group:
//!
//! ```text
//! <table>
//!   <tr><td colspan="3">Restoration parameters</td></tr>   header -> namespace
//!   <tr><td>Parameter</td><td>Channel</td><td>Value</td></tr>   column titles
//!   <tr><td>SNR</td><td>1</td><td>12.3</td></tr>            key "SNR ch1"
//!   <tr><td>Algorithm</td><td>All</td><td>CMLE</td></tr>    key "Algorithm"
//!   <tr><td colspan="3"></td></tr>                          footer, dropped
//! </table>
//! ```
//!
//! Reports are enrichment only: [`parse_report_file`] degrades to an empty
//! [`Metadata`] with a warning instead of failing.

use std::path::Path;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::infra::io::read_text_lossy;

/// Channel value marking a parameter that applies to every channel.
pub const ALL_CHANNELS: &str = "All";

static TABLE_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<table\b").unwrap());
static TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table\s*>").unwrap());
static ROW_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<tr\b").unwrap());
static ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr\s*>").unwrap());
static CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(td|th)\b[^>]*>(.*?)</(?:td|th)\s*>").unwrap()
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());

/// Parameter key -> value within one namespace.
pub type KeyValues = IndexMap<String, String>;

/// Namespace (table header) -> parameters, both in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Metadata {
    namespaces: IndexMap<String, KeyValues>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key` in `namespace`, creating the namespace.
    pub fn insert(&mut self, namespace: &str, key: impl Into<String>, value: impl Into<String>) {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    pub fn namespace(&self, name: &str) -> Option<&KeyValues> {
        self.namespaces.get(name)
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<&str> {
        self.namespace(namespace)?.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &KeyValues)> {
        self.namespaces.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    /// All key/values regardless of namespace; a later namespace wins when
    /// two share a key.
    pub fn flatten(&self) -> KeyValues {
        let mut out = KeyValues::new();
        for values in self.namespaces.values() {
            for (k, v) in values {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("unbalanced <{tag}> elements: {opened} opened, {closed} closed")]
    Unbalanced { tag: &'static str, opened: usize, closed: usize },

    #[error("table {table} has no header cell")]
    MissingHeader { table: usize },

    #[error("table {table}, row {row}: expected parameter, channel and value cells, found {found}")]
    MissingCells { table: usize, row: usize, found: usize },

    #[error("cannot read report: {0}")]
    Io(#[from] std::io::Error),
}

/// One `<td>`/`<th>` with its text content.
struct Cell {
    heading: bool,
    text: String,
}

/// Parse a report document. Any structural problem fails the whole document.
pub fn parse(document: &str) -> Result<Metadata, MetadataError> {
    let tables: Vec<&str> = TABLE
        .captures_iter(document)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let opened = TABLE_OPEN.find_iter(document).count();
    if opened != tables.len() {
        return Err(MetadataError::Unbalanced { tag: "table", opened, closed: tables.len() });
    }

    let mut metadata = Metadata::new();

    for (t, table) in tables.iter().enumerate() {
        let rows: Vec<Vec<Cell>> = ROW
            .captures_iter(table)
            .filter_map(|c| c.get(1).map(|m| cells(m.as_str())))
            .collect();

        let opened = ROW_OPEN.find_iter(table).count();
        if opened != rows.len() {
            return Err(MetadataError::Unbalanced { tag: "tr", opened, closed: rows.len() });
        }

        let header = rows
            .first()
            .and_then(|r| r.first())
            .map(|c| c.text.clone())
            .ok_or(MetadataError::MissingHeader { table: t })?;

        // Slot the namespace in document order even when it ends up empty
        metadata.namespaces.entry(header.clone()).or_default();

        // Everything between the header row and the trailing footer row
        let body = if rows.len() > 2 { &rows[1..rows.len() - 1] } else { &[][..] };

        for (r, row) in body.iter().enumerate() {
            let Some(first) = row.first() else {
                continue;
            };
            if first.text.is_empty() || is_column_titles(row) {
                continue;
            }
            if row.len() < 3 {
                return Err(MetadataError::MissingCells { table: t, row: r + 1, found: row.len() });
            }

            let param = &first.text;
            let channel = &row[1].text;
            let value = &row[row.len() - 1].text;

            let key = if channel == ALL_CHANNELS {
                param.clone()
            } else {
                format!("{param} ch{channel}")
            };
            metadata.insert(&header, key, value.clone());
        }
    }

    Ok(metadata)
}

/// Parse, or log a warning and return an empty mapping.
pub fn parse_or_empty(document: &str, source: &str) -> Metadata {
    match parse(document) {
        Ok(m) => m,
        Err(e) => {
            warn!(source, error = %e, "cannot parse parameter report; no key/values will be attached");
            Metadata::new()
        }
    }
}

/// Best-effort load of a report file.
pub fn parse_report_file(path: &Path) -> Metadata {
    match read_text_lossy(path) {
        Ok(text) => {
            let m = parse_or_empty(&text, &path.display().to_string());
            debug!(path = %path.display(), namespaces = m.len(), "parsed parameter report");
            m
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read parameter report");
            Metadata::new()
        }
    }
}

fn cells(row: &str) -> Vec<Cell> {
    CELL.captures_iter(row)
        .map(|c| Cell {
            heading: c[1].eq_ignore_ascii_case("th"),
            text: cell_text(&c[2]),
        })
        .collect()
}

/// `Parameter | Channel | Value` title rows carry no parameter.
fn is_column_titles(row: &[Cell]) -> bool {
    if row.iter().all(|c| c.heading) {
        return true;
    }
    row.len() >= 2
        && row[0].text.eq_ignore_ascii_case("parameter")
        && row[1].text.eq_ignore_ascii_case("channel")
}

/// Strip nested tags, decode entities, collapse whitespace.
fn cell_text(inner: &str) -> String {
    let stripped = TAG.replace_all(inner, " ");
    let decoded = ENTITY.replace_all(&stripped, |c: &Captures| decode_entity(&c[1], &c[0]));
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entity(name: &str, raw: &str) -> String {
    let numeric = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = name.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };
    if let Some(ch) = numeric.and_then(char::from_u32) {
        return ch.to_string();
    }

    match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "micro" => "\u{00b5}",
        _ => raw,
    }
    .to_string()
}
