//! Document-store translator producing MongoDB-style JSON filters.

use base64::Engine as _;
use serde_json::{json, Map, Value as Json};
use tracing::debug;

use super::{
    check_identifier, check_page, check_sorts, resolve_atom, DialectTranslator, NativeQuery,
    ResolvedAtom, ResolvedValue,
};
use crate::ast::{Condition, QueryRequest, Scalar, SortDirection, TableSchema};
use crate::error::TranslationError;
use crate::operator::{BackendFamily, Operator};

/// A `find` (or `countDocuments` when `count_only`) against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub collection: String,
    pub filter: Json,
    /// `(field, 1 | -1)` in priority order
    pub sort: Vec<(String, i32)>,
    pub skip: u64,
    /// `None` for counts
    pub limit: Option<u64>,
    pub count_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DocumentTranslator;

impl DocumentTranslator {
    pub fn new() -> Self {
        Self
    }

    fn filter(
        &self,
        condition: Option<&Condition>,
        schema: &TableSchema,
    ) -> Result<Json, TranslationError> {
        match condition {
            Some(condition) => compile(condition, schema),
            None => Ok(json!({})),
        }
    }
}

impl DialectTranslator for DocumentTranslator {
    fn family(&self) -> BackendFamily {
        BackendFamily::Document
    }

    fn translate(
        &self,
        request: &QueryRequest,
        schema: &TableSchema,
    ) -> Result<NativeQuery, TranslationError> {
        check_identifier(&request.table)?;
        check_page(&request.page)?;
        check_sorts(&request.sorts, schema)?;

        let filter = self.filter(request.condition.as_ref(), schema)?;
        let sort = request
            .sorts
            .iter()
            .map(|s| {
                let dir = match s.direction {
                    SortDirection::Ascending => 1,
                    SortDirection::Descending => -1,
                };
                (s.column.clone(), dir)
            })
            .collect();

        debug!(collection = %request.table, filter = %filter, "translated document query");
        Ok(NativeQuery::Document(DocumentQuery {
            collection: request.table.clone(),
            filter,
            sort,
            skip: request.page.offset,
            limit: Some(request.page.limit),
            count_only: false,
        }))
    }

    fn translate_count(
        &self,
        table: &str,
        condition: Option<&Condition>,
        schema: &TableSchema,
    ) -> Result<NativeQuery, TranslationError> {
        check_identifier(table)?;
        let filter = self.filter(condition, schema)?;
        Ok(NativeQuery::Document(DocumentQuery {
            collection: table.to_string(),
            filter,
            sort: Vec::new(),
            skip: 0,
            limit: None,
            count_only: true,
        }))
    }
}

fn compile(condition: &Condition, schema: &TableSchema) -> Result<Json, TranslationError> {
    match condition {
        Condition::And(children) if children.is_empty() => Ok(json!({})),
        // matches no document
        Condition::Or(children) if children.is_empty() => Ok(json!({"$nor": [{}]})),
        Condition::And(children) => Ok(json!({ "$and": compile_all(children, schema)? })),
        Condition::Or(children) => Ok(json!({ "$or": compile_all(children, schema)? })),
        Condition::Atomic(atom) => {
            Ok(compile_atom(resolve_atom(atom, schema, BackendFamily::Document)?))
        }
    }
}

fn compile_all(
    children: &[Condition],
    schema: &TableSchema,
) -> Result<Vec<Json>, TranslationError> {
    children.iter().map(|c| compile(c, schema)).collect()
}

fn compile_atom(atom: ResolvedAtom) -> Json {
    let field = atom.column.as_str();
    let value = |v: &Scalar| to_json(field, v);

    let predicate = match (atom.operator, &atom.value) {
        (Operator::IsNull, _) => Json::Null,
        (Operator::IsNotNull, _) => json!({"$ne": null}),
        (Operator::In, ResolvedValue::List(values)) => {
            json!({"$in": values.iter().map(value).collect::<Vec<_>>()})
        }
        (Operator::NotIn, ResolvedValue::List(values)) => {
            let mut excluded: Vec<Json> = values.iter().map(value).collect();
            excluded.push(Json::Null);
            json!({ "$nin": excluded })
        }
        // only strings take part in pattern matching, either way round
        (Operator::Like, ResolvedValue::Single(Scalar::Text(pattern))) => {
            json!({"$type": "string", "$regex": like_regex(pattern), "$options": "s"})
        }
        (Operator::NotLike, ResolvedValue::Single(Scalar::Text(pattern))) => {
            json!({"$type": "string", "$not": {"$regex": like_regex(pattern), "$options": "s"}})
        }
        (Operator::NotEqual, ResolvedValue::Single(v)) => json!({"$nin": [value(v), null]}),
        (op, ResolvedValue::Single(v)) => {
            let key = match op {
                Operator::GreaterThan => "$gt",
                Operator::GreaterOrEqual => "$gte",
                Operator::LessThan => "$lt",
                Operator::LessOrEqual => "$lte",
                _ => "$eq",
            };
            let mut map = Map::new();
            map.insert(key.to_string(), value(v));
            Json::Object(map)
        }
        // resolve_atom never pairs a list operator with a single value
        _ => json!({"$in": []}),
    };

    let mut map = Map::new();
    map.insert(field.to_string(), predicate);
    Json::Object(map)
}

/// Anchored regex where `%` matches any run of characters.
fn like_regex(pattern: &str) -> String {
    let body = pattern.split('%').map(regex::escape).collect::<Vec<_>>().join(".*");
    format!("^{}$", body)
}

fn to_json(field: &str, value: &Scalar) -> Json {
    match value {
        Scalar::Null => Json::Null,
        Scalar::Bool(b) => json!(b),
        Scalar::Int(i) => json!(i),
        Scalar::Float(f) => json!(f),
        Scalar::Text(s) if field == "_id" && is_object_id(s) => json!({"$oid": s}),
        Scalar::Text(s) => json!(s),
        Scalar::Bytes(b) => json!({
            "$binary": {
                "base64": base64::engine::general_purpose::STANDARD.encode(b),
                "subType": "00"
            }
        }),
        Scalar::Timestamp(t) => json!({"$date": t.to_rfc3339()}),
    }
}

fn is_object_id(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
