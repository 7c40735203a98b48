//! Search-engine translator producing Elasticsearch query DSL.

use base64::Engine as _;
use serde_json::{json, Value as Json};
use tracing::debug;

use super::{
    check_identifier, check_page, check_sorts, resolve_atom, DialectTranslator, NativeQuery,
    ResolvedAtom, ResolvedValue, TranslatorConfig,
};
use crate::ast::{Condition, QueryRequest, Scalar, SortDirection, TableSchema};
use crate::error::TranslationError;
use crate::operator::{BackendFamily, Operator};

/// A `_search` (or `_count` when `count_only`) request body for one index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub index: String,
    pub body: Json,
    pub count_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchTranslator {
    max_result_window: u64,
}

impl Default for SearchTranslator {
    fn default() -> Self {
        Self::new(&TranslatorConfig::default())
    }
}

impl SearchTranslator {
    pub fn new(config: &TranslatorConfig) -> Self {
        Self { max_result_window: config.max_result_window }
    }

    fn query(
        &self,
        condition: Option<&Condition>,
        schema: &TableSchema,
    ) -> Result<Json, TranslationError> {
        match condition {
            Some(condition) => compile(condition, schema),
            None => Ok(match_all()),
        }
    }
}

impl DialectTranslator for SearchTranslator {
    fn family(&self) -> BackendFamily {
        BackendFamily::Search
    }

    fn translate(
        &self,
        request: &QueryRequest,
        schema: &TableSchema,
    ) -> Result<NativeQuery, TranslationError> {
        check_identifier(&request.table)?;
        check_page(&request.page)?;
        check_sorts(&request.sorts, schema)?;

        let page = &request.page;
        let window = page.offset.saturating_add(page.limit);
        if window > self.max_result_window {
            return Err(TranslationError::PaginationUnsupported {
                family: BackendFamily::Search,
                reason: format!(
                    "offset {} + limit {} exceeds max_result_window {}",
                    page.offset, page.limit, self.max_result_window
                ),
            });
        }

        let query = self.query(request.condition.as_ref(), schema)?;
        let sort: Vec<Json> = request
            .sorts
            .iter()
            .map(|s| {
                let order = match s.direction {
                    SortDirection::Ascending => "asc",
                    SortDirection::Descending => "desc",
                };
                json!({ s.column.clone(): { "order": order } })
            })
            .collect();

        let mut body = json!({ "query": query, "from": page.offset, "size": page.limit });
        if !sort.is_empty() {
            body["sort"] = Json::Array(sort);
        }

        debug!(
            index = %request.table,
            from = page.offset,
            size = page.limit,
            "translated search query"
        );
        Ok(NativeQuery::Search(SearchQuery {
            index: request.table.clone(),
            body,
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
        let query = self.query(condition, schema)?;
        Ok(NativeQuery::Search(SearchQuery {
            index: table.to_string(),
            body: json!({ "query": query }),
            count_only: true,
        }))
    }
}

fn match_all() -> Json {
    json!({"match_all": {}})
}

fn compile(condition: &Condition, schema: &TableSchema) -> Result<Json, TranslationError> {
    match condition {
        Condition::And(children) if children.is_empty() => Ok(match_all()),
        Condition::Or(children) if children.is_empty() => {
            Ok(json!({"bool": {"must_not": [match_all()]}}))
        }
        Condition::And(children) => {
            let must = compile_all(children, schema)?;
            Ok(json!({"bool": {"must": must}}))
        }
        Condition::Or(children) => {
            let should = compile_all(children, schema)?;
            Ok(json!({"bool": {"should": should, "minimum_should_match": 1}}))
        }
        Condition::Atomic(atom) => {
            let resolved = resolve_atom(atom, schema, BackendFamily::Search)?;
            resolved.require_text_pattern(BackendFamily::Search)?;
            Ok(compile_atom(resolved))
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
    let exists = json!({"exists": {"field": field}});
    // a negated match only holds where the field has a value
    let present_and_not =
        |clause: Json| json!({"bool": {"must": [exists.clone()], "must_not": [clause]}});

    match (atom.operator, atom.value) {
        (Operator::IsNull, _) => json!({"bool": {"must_not": [exists.clone()]}}),
        (Operator::IsNotNull, _) => exists.clone(),
        (Operator::In, ResolvedValue::List(values)) => terms(field, &values),
        (Operator::NotIn, ResolvedValue::List(values)) => present_and_not(terms(field, &values)),
        (Operator::Like, ResolvedValue::Single(Scalar::Text(pattern))) => wildcard(field, &pattern),
        (Operator::NotLike, ResolvedValue::Single(Scalar::Text(pattern))) => {
            present_and_not(wildcard(field, &pattern))
        }
        (Operator::Equal, ResolvedValue::Single(v)) => term(field, &v),
        (Operator::NotEqual, ResolvedValue::Single(v)) => present_and_not(term(field, &v)),
        (op, ResolvedValue::Single(v)) => {
            let bound = match op {
                Operator::GreaterThan => "gt",
                Operator::GreaterOrEqual => "gte",
                Operator::LessThan => "lt",
                _ => "lte",
            };
            json!({"range": { field: { bound: to_json(&v) } }})
        }
        _ => json!({"bool": {"must_not": [match_all()]}}),
    }
}

fn term(field: &str, value: &Scalar) -> Json {
    json!({"term": { field: to_json(value) }})
}

fn terms(field: &str, values: &[Scalar]) -> Json {
    json!({"terms": { field: values.iter().map(to_json).collect::<Vec<_>>() }})
}

/// `%` becomes `*`; the wildcard syntax's own metacharacters are escaped.
fn wildcard(field: &str, pattern: &str) -> Json {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '%' => out.push('*'),
            '*' | '?' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    json!({"wildcard": { field: { "value": out } }})
}

fn to_json(value: &Scalar) -> Json {
    match value {
        Scalar::Null => Json::Null,
        Scalar::Bool(b) => json!(b),
        Scalar::Int(i) => json!(i),
        Scalar::Float(f) => json!(f),
        Scalar::Text(s) => json!(s),
        Scalar::Bytes(b) => json!(base64::engine::general_purpose::STANDARD.encode(b)),
        Scalar::Timestamp(t) => json!(t.to_rfc3339()),
    }
}
