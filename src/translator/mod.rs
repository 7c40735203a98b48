//! Dialect translators.
//!
//! A translator turns a [`QueryRequest`] into a backend-native query. Every
//! translator runs the same validation first (column existence, operand
//! shape, coercion) so that no request reaches I/O in a state the backend
//! would have to guess about.

mod document;
mod keyvalue;
mod search;
mod sql;

pub use document::{DocumentQuery, DocumentTranslator};
pub use keyvalue::{KeyValueFilter, KeyValueQuery, KeyValueTranslator};
pub use search::{SearchQuery, SearchTranslator};
pub use sql::{Optimization, SqlDialect, SqlStatement, SqlTranslator};

use serde::{Deserialize, Serialize};

use crate::ast::{
    AtomicCondition, Condition, Operand, Page, QueryRequest, Scalar, Sort, TableSchema,
};
use crate::coerce::{coerce, ColumnKind};
use crate::error::TranslationError;
use crate::operator::{Arity, BackendFamily, Operator};

/// Query in the form a backend driver executes.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeQuery {
    Sql(SqlStatement),
    Document(DocumentQuery),
    Search(SearchQuery),
    KeyValue(KeyValueQuery),
}

impl NativeQuery {
    pub fn family(&self) -> BackendFamily {
        match self {
            NativeQuery::Sql(_) => BackendFamily::Sql,
            NativeQuery::Document(_) => BackendFamily::Document,
            NativeQuery::Search(_) => BackendFamily::Search,
            NativeQuery::KeyValue(_) => BackendFamily::KeyValue,
        }
    }
}

/// Translator limits, loaded with the dispatcher configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// IN lists longer than this are split into OR-ed chunks
    pub max_in_values: usize,
    /// OR chains of at least this many equalities on one column become IN
    pub or_to_in_threshold: usize,
    /// Deepest `offset + limit` a search backend will serve
    pub max_result_window: u64,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            max_in_values: 1000,
            or_to_in_threshold: 5,
            max_result_window: 10_000,
        }
    }
}

/// Converts abstract requests into one family's native queries.
pub trait DialectTranslator: Send + Sync {
    fn family(&self) -> BackendFamily;

    /// Translate a row-fetching request.
    fn translate(
        &self,
        request: &QueryRequest,
        schema: &TableSchema,
    ) -> Result<NativeQuery, TranslationError>;

    /// Translate a request counting the rows that match `condition`.
    fn translate_count(
        &self,
        table: &str,
        condition: Option<&Condition>,
        schema: &TableSchema,
    ) -> Result<NativeQuery, TranslationError>;
}

/// Closed set of translators, one per backend family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Translator {
    Sql(SqlTranslator),
    Document(DocumentTranslator),
    Search(SearchTranslator),
    KeyValue(KeyValueTranslator),
}

impl Translator {
    fn inner(&self) -> &dyn DialectTranslator {
        match self {
            Translator::Sql(t) => t,
            Translator::Document(t) => t,
            Translator::Search(t) => t,
            Translator::KeyValue(t) => t,
        }
    }
}

impl DialectTranslator for Translator {
    fn family(&self) -> BackendFamily {
        self.inner().family()
    }

    fn translate(
        &self,
        request: &QueryRequest,
        schema: &TableSchema,
    ) -> Result<NativeQuery, TranslationError> {
        self.inner().translate(request, schema)
    }

    fn translate_count(
        &self,
        table: &str,
        condition: Option<&Condition>,
        schema: &TableSchema,
    ) -> Result<NativeQuery, TranslationError> {
        self.inner().translate_count(table, condition, schema)
    }
}

/// An atomic condition after validation and coercion.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedAtom {
    pub column: String,
    pub operator: Operator,
    pub value: ResolvedValue,
    /// Kind of the column itself, independent of the operand's coercion target
    pub column_kind: ColumnKind,
}

impl ResolvedAtom {
    /// Reject LIKE / NOT LIKE on a column known to hold non-text data.
    ///
    /// Used by families whose engines either refuse such a pattern or match it
    /// against the value's text rendering.
    pub(crate) fn require_text_pattern(
        &self,
        family: BackendFamily,
    ) -> Result<(), TranslationError> {
        let is_pattern = matches!(self.operator, Operator::Like | Operator::NotLike);
        if is_pattern && !matches!(self.column_kind, ColumnKind::Text | ColumnKind::Unknown) {
            let kind = self.column_kind.name();
            return Err(TranslationError::UnsupportedConditionShape {
                family,
                reason: format!("{} on {} column {}", self.operator, kind, self.column),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResolvedValue {
    None,
    Single(Scalar),
    List(Vec<Scalar>),
}

/// Reject identifiers no dialect can quote.
pub(crate) fn check_identifier(name: &str) -> Result<(), TranslationError> {
    if name.is_empty() || name.contains('\0') {
        return Err(TranslationError::UnescapableIdentifier(name.to_string()));
    }
    Ok(())
}

fn require_column<'s>(schema: &'s TableSchema, column: &str) -> Result<&'s str, TranslationError> {
    check_identifier(column)?;
    schema
        .find(column)
        .map(|c| c.column_type.as_str())
        .ok_or_else(|| TranslationError::UnknownColumn {
            table: schema.name.clone(),
            column: column.to_string(),
        })
}

pub(crate) fn check_sorts(sorts: &[Sort], schema: &TableSchema) -> Result<(), TranslationError> {
    for sort in sorts {
        require_column(schema, &sort.column)?;
    }
    Ok(())
}

pub(crate) fn check_page(page: &Page) -> Result<(), TranslationError> {
    if page.limit == 0 {
        return Err(TranslationError::InvalidPage);
    }
    Ok(())
}

/// Validate an atomic condition against `schema` and coerce its operand.
///
/// The schema's column type wins over the caller's declared type when the
/// schema knows it.
pub(crate) fn resolve_atom(
    atom: &AtomicCondition,
    schema: &TableSchema,
    family: BackendFamily,
) -> Result<ResolvedAtom, TranslationError> {
    let column_type = require_column(schema, &atom.column_key)?;

    if !family.operator_support(atom.operator).is_supported() {
        return Err(TranslationError::UnsupportedOperator { family, operator: atom.operator });
    }

    let declared = match column_type {
        "" => atom.declared_column_type.as_str(),
        known => known,
    };
    let column_kind = ColumnKind::from_declared(declared);
    let kind = match atom.operator {
        Operator::Like | Operator::NotLike => ColumnKind::Text,
        _ => column_kind,
    };

    let convert = |value: &Scalar| -> Result<Scalar, TranslationError> {
        if value.is_null() {
            return Err(TranslationError::NullOperand { column: atom.column_key.clone() });
        }
        coerce(value, kind).ok_or_else(|| TranslationError::Coercion {
            column: atom.column_key.clone(),
            value: value.to_string(),
            target: kind.name().to_string(),
        })
    };

    let value = match (atom.operator.arity(), &atom.value) {
        (Arity::None, _) => ResolvedValue::None,
        (Arity::Single, Operand::Scalar(v)) => ResolvedValue::Single(convert(v)?),
        (Arity::List, Operand::List(values)) => {
            if values.is_empty() {
                return Err(TranslationError::EmptyValueList {
                    column: atom.column_key.clone(),
                    operator: atom.operator,
                });
            }
            ResolvedValue::List(values.iter().map(convert).collect::<Result<Vec<_>, _>>()?)
        }
        (Arity::Single, Operand::List(_)) => {
            return Err(TranslationError::OperandShape {
                column: atom.column_key.clone(),
                operator: atom.operator,
                expected: "a single value",
            })
        }
        (Arity::List, Operand::Scalar(_)) => {
            return Err(TranslationError::OperandShape {
                column: atom.column_key.clone(),
                operator: atom.operator,
                expected: "a list of values",
            })
        }
    };

    Ok(ResolvedAtom {
        column: atom.column_key.clone(),
        operator: atom.operator,
        value,
        column_kind,
    })
}
