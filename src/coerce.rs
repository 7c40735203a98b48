//! Value coercion driven by a column's declared type.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::ast::Scalar;

/// Storage class a declared column type resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Integer,
    Float,
    Text,
    Bytes,
    Timestamp,
    /// Unrecognised type name; values pass through untouched.
    Unknown,
}

impl ColumnKind {
    /// Resolve a database type name such as `varchar(255)` or `INT UNSIGNED`.
    pub fn from_declared(declared: &str) -> Self {
        let lowered = declared.trim().to_ascii_lowercase();
        let base = lowered.split('(').next().unwrap_or("").trim();
        let base = base.strip_suffix(" unsigned").unwrap_or(base).trim();

        match base {
            "bool" | "boolean" => ColumnKind::Boolean,
            "int" | "integer" | "int2" | "int4" | "int8" | "int16" | "int32" | "int64"
            | "smallint" | "bigint" | "tinyint" | "mediumint" | "serial" | "bigserial"
            | "smallserial" | "long" => ColumnKind::Integer,
            "float" | "float4" | "float8" | "float32" | "float64" | "double"
            | "double precision" | "real" | "decimal" | "numeric" | "number" => ColumnKind::Float,
            "text" | "varchar" | "char" | "character" | "character varying" | "string"
            | "uuid" | "json" | "jsonb" | "citext" | "enum" | "keyword" | "objectid"
            | "tinytext" | "mediumtext" | "longtext" | "nvarchar" | "nchar" => ColumnKind::Text,
            "bytea" | "blob" | "binary" | "varbinary" | "longblob" | "bindata" => ColumnKind::Bytes,
            "timestamp" | "timestamptz" | "datetime" | "date" | "timestamp with time zone"
            | "timestamp without time zone" => ColumnKind::Timestamp,
            _ => ColumnKind::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnKind::Boolean => "boolean",
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Text => "text",
            ColumnKind::Bytes => "bytes",
            ColumnKind::Timestamp => "timestamp",
            ColumnKind::Unknown => "unknown",
        }
    }
}

/// Convert `value` to the storage class `kind`. `None` means the value has
/// no faithful representation in that class.
pub fn coerce(value: &Scalar, kind: ColumnKind) -> Option<Scalar> {
    if value.is_null() || kind == ColumnKind::Unknown {
        return Some(value.clone());
    }

    match kind {
        ColumnKind::Boolean => match value {
            Scalar::Bool(b) => Some(Scalar::Bool(*b)),
            Scalar::Int(0) => Some(Scalar::Bool(false)),
            Scalar::Int(1) => Some(Scalar::Bool(true)),
            Scalar::Text(s) => parse_bool(s).map(Scalar::Bool),
            _ => None,
        },
        ColumnKind::Integer => match value {
            Scalar::Int(i) => Some(Scalar::Int(*i)),
            Scalar::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Some(Scalar::Int(*f as i64))
            }
            Scalar::Text(s) => s.trim().parse::<i64>().ok().map(Scalar::Int),
            _ => None,
        },
        ColumnKind::Float => match value {
            Scalar::Float(f) => Some(Scalar::Float(*f)),
            Scalar::Int(i) => Some(Scalar::Float(*i as f64)),
            Scalar::Text(s) => {
                s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(Scalar::Float)
            }
            _ => None,
        },
        ColumnKind::Text => match value {
            Scalar::Text(s) => Some(Scalar::Text(s.clone())),
            Scalar::Int(i) => Some(Scalar::Text(i.to_string())),
            Scalar::Float(f) => Some(Scalar::Text(f.to_string())),
            Scalar::Bool(b) => Some(Scalar::Text(b.to_string())),
            Scalar::Timestamp(t) => Some(Scalar::Text(t.to_rfc3339())),
            Scalar::Bytes(b) => String::from_utf8(b.clone()).ok().map(Scalar::Text),
            Scalar::Null => Some(Scalar::Null),
        },
        ColumnKind::Bytes => match value {
            Scalar::Bytes(b) => Some(Scalar::Bytes(b.clone())),
            Scalar::Text(s) => Some(Scalar::Bytes(s.as_bytes().to_vec())),
            _ => None,
        },
        ColumnKind::Timestamp => match value {
            Scalar::Timestamp(t) => Some(Scalar::Timestamp(*t)),
            Scalar::Int(secs) => DateTime::<Utc>::from_timestamp(*secs, 0).map(Scalar::Timestamp),
            Scalar::Text(s) => parse_timestamp(s).map(Scalar::Timestamp),
            _ => None,
        },
        ColumnKind::Unknown => Some(value.clone()),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
