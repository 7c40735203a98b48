//! Key-value translator. The store has no boolean combinators, so only a
//! single top-level comparison can be pushed down.

use serde::Serialize;
use tracing::debug;

use super::{
    check_identifier, check_page, resolve_atom, DialectTranslator, NativeQuery, ResolvedValue,
};
use crate::ast::{Condition, QueryRequest, Scalar, TableSchema};
use crate::error::TranslationError;
use crate::operator::{BackendFamily, Operator};

/// One comparison applied to the fields stored under a key. A record that
/// lacks the field never matches, whatever the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValueFilter {
    pub column: String,
    pub operator: Operator,
    pub value: Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValueQuery {
    pub key: String,
    pub filter: Option<KeyValueFilter>,
    pub offset: u64,
    /// `None` for counts
    pub limit: Option<u64>,
    pub count_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeyValueTranslator;

impl KeyValueTranslator {
    pub fn new() -> Self {
        Self
    }

    fn filter(
        &self,
        condition: Option<&Condition>,
        schema: &TableSchema,
    ) -> Result<Option<KeyValueFilter>, TranslationError> {
        let atom = match condition {
            None => return Ok(None),
            Some(Condition::Atomic(atom)) => atom,
            Some(Condition::And(_)) => return Err(shape_error("AND")),
            Some(Condition::Or(_)) => return Err(shape_error("OR")),
        };

        let resolved = resolve_atom(atom, schema, BackendFamily::KeyValue)?;
        match resolved.value {
            ResolvedValue::Single(value) => Ok(Some(KeyValueFilter {
                column: resolved.column,
                operator: resolved.operator,
                value,
            })),
            // only single-valued operators are supported by this family
            _ => Err(TranslationError::UnsupportedOperator {
                family: BackendFamily::KeyValue,
                operator: resolved.operator,
            }),
        }
    }
}

fn shape_error(combinator: &str) -> TranslationError {
    TranslationError::UnsupportedConditionShape {
        family: BackendFamily::KeyValue,
        reason: format!("{} combinators are not available; use a single comparison", combinator),
    }
}

impl DialectTranslator for KeyValueTranslator {
    fn family(&self) -> BackendFamily {
        BackendFamily::KeyValue
    }

    fn translate(
        &self,
        request: &QueryRequest,
        schema: &TableSchema,
    ) -> Result<NativeQuery, TranslationError> {
        check_identifier(&request.table)?;
        check_page(&request.page)?;
        if !request.sorts.is_empty() {
            return Err(TranslationError::UnsupportedSort { family: BackendFamily::KeyValue });
        }

        let filter = self.filter(request.condition.as_ref(), schema)?;
        debug!(key = %request.table, filtered = filter.is_some(), "translated key-value query");
        Ok(NativeQuery::KeyValue(KeyValueQuery {
            key: request.table.clone(),
            filter,
            offset: request.page.offset,
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
        Ok(NativeQuery::KeyValue(KeyValueQuery {
            key: table.to_string(),
            filter,
            offset: 0,
            limit: None,
            count_only: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Sort;

    fn session() -> TableSchema {
        TableSchema::new("session:42").column("field", "string").column("value", "string")
    }

    #[test]
    fn test_or_is_unsupported_shape() {
        let condition = Condition::or(vec![
            Condition::atomic("field", Operator::Equal, "user", ""),
            Condition::atomic("field", Operator::Equal, "token", ""),
        ]);
        let request = QueryRequest::new("session:42").with_condition(condition);
        let err = KeyValueTranslator::new().translate(&request, &session()).unwrap_err();
        assert!(matches!(
            err,
            TranslationError::UnsupportedConditionShape { family: BackendFamily::KeyValue, .. }
        ));
    }

    #[test]
    fn test_empty_and_is_still_a_combinator() {
        let request = QueryRequest::new("session:42").with_condition(Condition::and(vec![]));
        assert!(matches!(
            KeyValueTranslator::new().translate(&request, &session()),
            Err(TranslationError::UnsupportedConditionShape { .. })
        ));
    }

    #[test]
    fn test_single_atomic_is_pushed_down() {
        let request = QueryRequest::new("session:42")
            .with_condition(Condition::atomic("field", Operator::NotEqual, "token", ""))
            .with_page(0, 25);
        let translated = KeyValueTranslator::new().translate(&request, &session());
        let Ok(NativeQuery::KeyValue(query)) = translated else {
            panic!("expected key-value query");
        };
        assert_eq!(
            query.filter,
            Some(KeyValueFilter {
                column: "field".into(),
                operator: Operator::NotEqual,
                value: Scalar::Text("token".into()),
            })
        );
        assert_eq!(query.limit, Some(25));
    }

    #[test]
    fn test_like_is_unsupported() {
        let request = QueryRequest::new("session:42")
            .with_condition(Condition::atomic("value", Operator::Like, "a%", ""));
        assert_eq!(
            KeyValueTranslator::new().translate(&request, &session()),
            Err(TranslationError::UnsupportedOperator {
                family: BackendFamily::KeyValue,
                operator: Operator::Like
            })
        );
    }

    #[test]
    fn test_sorting_is_unsupported() {
        let request = QueryRequest::new("session:42").with_sorts(vec![Sort::asc("field")]);
        assert_eq!(
            KeyValueTranslator::new().translate(&request, &session()),
            Err(TranslationError::UnsupportedSort { family: BackendFamily::KeyValue })
        );
    }
}
