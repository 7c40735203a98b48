//! Uniform row representation and mapping from native driver results.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::ast::Scalar;

/// One result row: ordered `(column, value)` pairs.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Row {
    cells: Vec<(String, Scalar)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Scalar)>) -> Self {
        Self { cells: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }

    pub fn push(&mut self, column: impl Into<String>, value: Scalar) {
        self.cells.push((column.into(), value));
    }

    /// Value of `column`; the first match wins when names repeat.
    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.cells.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.cells.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Raw result handed back by a backend driver.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeRows {
    /// Column names plus positional values, as SQL drivers return them.
    Tabular { columns: Vec<String>, rows: Vec<Vec<Scalar>> },
    /// JSON documents, as document and search stores return them.
    Documents(Vec<Json>),
    /// A bare count from a count query.
    Count(u64),
}

impl NativeRows {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            NativeRows::Tabular { columns, rows } => rows
                .into_iter()
                .map(|values| Row::from_pairs(columns.iter().cloned().zip(values)))
                .collect(),
            NativeRows::Documents(docs) => docs.into_iter().map(document_to_row).collect(),
            NativeRows::Count(n) => {
                // counts past i64::MAX keep their exact digits as text
                let count = i64::try_from(n)
                    .map(Scalar::Int)
                    .unwrap_or_else(|_| Scalar::Text(n.to_string()));
                vec![Row::from_pairs([("count", count)])]
            }
        }
    }

    /// Count carried by this result, if it is shaped like one.
    pub fn count(&self) -> Option<u64> {
        match self {
            NativeRows::Count(n) => Some(*n),
            NativeRows::Tabular { rows, .. } => match rows.first().and_then(|r| r.first()) {
                Some(Scalar::Int(n)) if *n >= 0 => Some(*n as u64),
                _ => None,
            },
            NativeRows::Documents(_) => None,
        }
    }
}

/// Flatten a document's top-level fields into a row, `_id` first.
fn document_to_row(doc: Json) -> Row {
    let mut row = Row::new();
    match doc {
        Json::Object(mut map) => {
            if let Some(id) = map.remove("_id") {
                row.push("_id", json_to_scalar(id));
            }
            for (key, value) in map {
                row.push(key, json_to_scalar(value));
            }
        }
        other => row.push("document", json_to_scalar(other)),
    }
    row
}

/// Map a JSON value (including extended-JSON wrappers) to a scalar. Nested
/// objects and arrays keep their JSON text.
pub fn json_to_scalar(value: Json) -> Scalar {
    match value {
        Json::Null => Scalar::Null,
        Json::Bool(b) => Scalar::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Scalar::Int(i),
            None => n.as_f64().map(Scalar::Float).unwrap_or_else(|| Scalar::Text(n.to_string())),
        },
        Json::String(s) => Scalar::Text(s),
        Json::Object(map) => {
            extended_json(&map).unwrap_or_else(|| Scalar::Text(Json::Object(map).to_string()))
        }
        array @ Json::Array(_) => Scalar::Text(array.to_string()),
    }
}

fn extended_json(map: &Map<String, Json>) -> Option<Scalar> {
    if map.len() != 1 {
        return None;
    }
    let (key, inner) = map.iter().next()?;
    match (key.as_str(), inner) {
        ("$oid", Json::String(s)) => Some(Scalar::Text(s.clone())),
        ("$date", Json::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| Scalar::Timestamp(t.with_timezone(&Utc))),
        ("$date", Json::Number(n)) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(Scalar::Timestamp),
        ("$binary", Json::Object(bin)) => bin
            .get("base64")
            .and_then(Json::as_str)
            .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64).ok())
            .map(Scalar::Bytes),
        _ => None,
    }
}
