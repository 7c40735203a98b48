//! SQL translator that renders conditions into parameterized statements using sea-query.

use sea_query::{
    Asterisk, BinOper, Cond, Condition as SqlCondition, Expr, Func, Iden, LikeExpr,
    MysqlQueryBuilder, Order, PostgresQueryBuilder, Query, SelectStatement, SimpleExpr,
    SqliteQueryBuilder, Value,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    check_identifier, check_page, check_sorts, resolve_atom, DialectTranslator, NativeQuery,
    ResolvedAtom, ResolvedValue, TranslatorConfig,
};
use crate::ast::{AtomicCondition, Condition, QueryRequest, Scalar, SortDirection, TableSchema};
use crate::error::TranslationError;
use crate::operator::{BackendFamily, Operator};

/// SQL flavour to render for. Identifier quoting, placeholders and the
/// case-sensitive pattern operator differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlDialect {
    Postgres,
    MySql,
    Sqlite,
    /// Backtick quoting and `?` placeholders like MySQL; LIKE is case-sensitive
    ClickHouse,
}

/// Table identifier for sea-query
#[derive(Debug, Clone)]
pub struct TableName(pub String);

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Column identifier wrapper
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Represents an optimization applied during translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Optimization {
    /// An OR chain of equalities on one column collapsed to IN
    OrToIn { column: String, value_count: usize },
    /// An IN list split into several IN predicates
    InSplit { column: String, total_values: usize, chunk_count: usize },
}

/// A parameterized statement; values are never interpolated into `sql`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
    pub optimizations: Vec<Optimization>,
}

/// Translator for relational engines
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SqlTranslator {
    dialect: SqlDialect,
    config: TranslatorConfig,
}

impl SqlTranslator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect, config: TranslatorConfig::default() }
    }

    pub fn with_config(dialect: SqlDialect, config: TranslatorConfig) -> Self {
        Self { dialect, config }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn build(&self, select: &SelectStatement) -> (String, Vec<Value>) {
        let (sql, values) = match self.dialect {
            SqlDialect::Postgres => select.build(PostgresQueryBuilder),
            SqlDialect::MySql | SqlDialect::ClickHouse => select.build(MysqlQueryBuilder),
            SqlDialect::Sqlite => select.build(SqliteQueryBuilder),
        };
        (sql, values.0)
    }

    /// Compile a condition tree into a grouped SQL condition
    fn compile_condition(
        &self,
        condition: &Condition,
        schema: &TableSchema,
        optimizations: &mut Vec<Optimization>,
    ) -> Result<SqlCondition, TranslationError> {
        let compiled = match condition {
            Condition::And(children) if children.is_empty() => Cond::all().add(Expr::cust("1 = 1")),
            Condition::Or(children) if children.is_empty() => Cond::all().add(Expr::cust("1 = 0")),
            Condition::And(children) => {
                let mut all = Cond::all();
                for child in children {
                    all = all.add(self.compile_condition(child, schema, optimizations)?);
                }
                all
            }
            Condition::Or(children) => {
                if let Some((column, values)) = self.try_optimize_or_to_in(children, schema)? {
                    optimizations.push(Optimization::OrToIn {
                        column: column.clone(),
                        value_count: values.len(),
                    });
                    self.compile_in_list(&column, Operator::In, values, optimizations)
                } else {
                    let mut any = Cond::any();
                    for child in children {
                        any = any.add(self.compile_condition(child, schema, optimizations)?);
                    }
                    any
                }
            }
            Condition::Atomic(atom) => {
                let resolved = resolve_atom(atom, schema, BackendFamily::Sql)?;
                resolved.require_text_pattern(BackendFamily::Sql)?;
                self.compile_atom(resolved, optimizations)
            }
        };
        Ok(compiled)
    }

    /// Collapse `a = x OR a = y OR ...` into `a IN (x, y, ...)` once it reaches the threshold.
    /// Returns the column and the bind values; the caller renders the list.
    fn try_optimize_or_to_in(
        &self,
        children: &[Condition],
        schema: &TableSchema,
    ) -> Result<Option<(String, Vec<Value>)>, TranslationError> {
        let threshold = self.config.or_to_in_threshold;
        if threshold == 0 || children.len() < threshold.max(2) {
            return Ok(None);
        }

        let mut atoms: Vec<&AtomicCondition> = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Condition::Atomic(atom) if atom.operator == Operator::Equal => atoms.push(atom),
                _ => return Ok(None),
            }
        }
        let column = &atoms[0].column_key;
        if atoms.iter().any(|a| &a.column_key != column) {
            return Ok(None);
        }

        let mut values = Vec::with_capacity(atoms.len());
        for atom in &atoms {
            let resolved = resolve_atom(atom, schema, BackendFamily::Sql)?;
            if let ResolvedValue::Single(v) = resolved.value {
                values.push(to_value(v));
            }
        }

        Ok(Some((column.clone(), values)))
    }

    /// Compile a single validated comparison
    fn compile_atom(
        &self,
        atom: ResolvedAtom,
        optimizations: &mut Vec<Optimization>,
    ) -> SqlCondition {
        let column = atom.column.clone();
        let col = || Expr::col(ColumnName(column.clone()));

        let expr = match (atom.operator, atom.value) {
            (Operator::IsNull, _) => col().is_null(),
            (Operator::IsNotNull, _) => col().is_not_null(),
            (op @ (Operator::In | Operator::NotIn), ResolvedValue::List(values)) => {
                let values: Vec<Value> = values.into_iter().map(to_value).collect();
                return self.compile_in_list(&column, op, values, optimizations);
            }
            (
                op @ (Operator::Like | Operator::NotLike),
                ResolvedValue::Single(Scalar::Text(pattern)),
            ) => pattern_match(self.dialect, &column, &pattern, op == Operator::NotLike),
            (op, ResolvedValue::Single(value)) => {
                let val = to_value(value);
                match op {
                    Operator::Equal => col().eq(val),
                    Operator::NotEqual => col().ne(val),
                    Operator::GreaterThan => col().gt(val),
                    Operator::GreaterOrEqual => col().gte(val),
                    Operator::LessThan => col().lt(val),
                    Operator::LessOrEqual => col().lte(val),
                    // resolve_atom guarantees the remaining operators carry lists or no value
                    _ => Expr::cust("1 = 0"),
                }
            }
            _ => Expr::cust("1 = 0"),
        };
        Cond::all().add(expr)
    }

    /// Render IN / NOT IN, splitting lists longer than `max_in_values`
    fn compile_in_list(
        &self,
        column: &str,
        op: Operator,
        values: Vec<Value>,
        optimizations: &mut Vec<Optimization>,
    ) -> SqlCondition {
        let col = || Expr::col(ColumnName(column.to_string()));
        let in_expr = |chunk: Vec<Value>| match op {
            Operator::NotIn => col().is_not_in(chunk),
            _ => col().is_in(chunk),
        };
        let chunk_size = self.config.max_in_values.max(1);

        if values.len() <= chunk_size {
            return Cond::all().add(in_expr(values));
        }

        let chunks: Vec<Vec<Value>> = values.chunks(chunk_size).map(|c| c.to_vec()).collect();
        optimizations.push(Optimization::InSplit {
            column: column.to_string(),
            total_values: values.len(),
            chunk_count: chunks.len(),
        });

        // x IN (a) OR x IN (b); x NOT IN (a) AND x NOT IN (b)
        let group = match op {
            Operator::NotIn => Cond::all(),
            _ => Cond::any(),
        };
        chunks.into_iter().fold(group, |group, chunk| group.add(in_expr(chunk)))
    }

    fn base_select(&self, table: &str) -> Result<SelectStatement, TranslationError> {
        check_identifier(table)?;
        let mut select = Query::select();
        select.from(TableName(table.to_string()));
        Ok(select)
    }
}

impl DialectTranslator for SqlTranslator {
    fn family(&self) -> BackendFamily {
        BackendFamily::Sql
    }

    fn translate(
        &self,
        request: &QueryRequest,
        schema: &TableSchema,
    ) -> Result<NativeQuery, TranslationError> {
        check_page(&request.page)?;
        check_sorts(&request.sorts, schema)?;

        let mut optimizations = Vec::new();
        let mut select = self.base_select(&request.table)?;
        select.column(Asterisk);

        if let Some(condition) = &request.condition {
            let compiled = self.compile_condition(condition, schema, &mut optimizations)?;
            select.cond_where(compiled);
        }

        for sort in &request.sorts {
            let order = match sort.direction {
                SortDirection::Ascending => Order::Asc,
                SortDirection::Descending => Order::Desc,
            };
            select.order_by(ColumnName(sort.column.clone()), order);
        }

        let (mut sql, params) = self.build(&select);
        // Page bounds are typed integers; rendering them inline keeps the
        // parameter list to condition values only.
        sql.push_str(&format!(" LIMIT {} OFFSET {}", request.page.limit, request.page.offset));

        debug!(
            dialect = ?self.dialect,
            table = %request.table,
            params = params.len(),
            "translated sql query"
        );
        Ok(NativeQuery::Sql(SqlStatement { sql, params, optimizations }))
    }

    fn translate_count(
        &self,
        table: &str,
        condition: Option<&Condition>,
        schema: &TableSchema,
    ) -> Result<NativeQuery, TranslationError> {
        let mut optimizations = Vec::new();
        let mut select = self.base_select(table)?;
        select.expr(Func::count(Expr::cust("*")));

        if let Some(condition) = condition {
            let compiled = self.compile_condition(condition, schema, &mut optimizations)?;
            select.cond_where(compiled);
        }

        let (sql, params) = self.build(&select);
        Ok(NativeQuery::Sql(SqlStatement { sql, params, optimizations }))
    }
}

/// Case-sensitive pattern match where only `%` is a wildcard.
///
/// Postgres LIKE is already case-sensitive. MySQL needs `LIKE BINARY` and
/// SQLite needs `GLOB`, since their LIKE folds ASCII case.
fn pattern_match(dialect: SqlDialect, column: &str, pattern: &str, negated: bool) -> SimpleExpr {
    let col = Expr::col(ColumnName(column.to_string()));
    match dialect {
        SqlDialect::Postgres | SqlDialect::ClickHouse => {
            let like = LikeExpr::new(escape_like(pattern));
            // ClickHouse has no ESCAPE clause; backslash is its fixed escape
            let like = match dialect {
                SqlDialect::Postgres => like.escape('\\'),
                _ => like,
            };
            match negated {
                true => col.not_like(like),
                false => col.like(like),
            }
        }
        SqlDialect::MySql => {
            let op = if negated { "NOT LIKE BINARY" } else { "LIKE BINARY" };
            col.binary(BinOper::Custom(op), Expr::val(escape_like(pattern)))
        }
        SqlDialect::Sqlite => {
            let op = if negated { "NOT GLOB" } else { "GLOB" };
            col.binary(BinOper::Custom(op), Expr::val(glob_pattern(pattern)))
        }
    }
}

/// Escape the characters LIKE would otherwise interpret, leaving `%`.
fn escape_like(pattern: &str) -> String {
    pattern.replace('\\', "\\\\").replace('_', "\\_")
}

/// Rewrite a `%` pattern as a GLOB: `%` becomes `*`, GLOB metacharacters become classes.
fn glob_pattern(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '%' => glob.push('*'),
            '*' => glob.push_str("[*]"),
            '?' => glob.push_str("[?]"),
            '[' => glob.push_str("[[]"),
            other => glob.push(other),
        }
    }
    glob
}

/// Convert a coerced scalar into a sea-query bind value
fn to_value(scalar: Scalar) -> Value {
    match scalar {
        Scalar::Null => Value::String(None),
        Scalar::Bool(b) => b.into(),
        Scalar::Int(i) => i.into(),
        Scalar::Float(f) => f.into(),
        Scalar::Text(s) => s.into(),
        Scalar::Bytes(b) => b.into(),
        Scalar::Timestamp(t) => t.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Sort;

    fn users() -> TableSchema {
        TableSchema::new("users")
            .column("age", "integer")
            .column("status", "text")
            .column("name", "varchar(64)")
            .column("id", "bigint")
    }

    fn scenario_a() -> Condition {
        Condition::and(vec![
            Condition::atomic("age", Operator::GreaterThan, Scalar::Int(18), "integer"),
            Condition::or(vec![
                Condition::atomic("status", Operator::Equal, "active", "text"),
                Condition::atomic("status", Operator::Equal, "pending", "text"),
            ]),
        ])
    }

    fn translate(translator: &SqlTranslator, request: &QueryRequest) -> SqlStatement {
        match translator.translate(request, &users()).unwrap() {
            NativeQuery::Sql(stmt) => stmt,
            other => panic!("expected sql, got {:?}", other),
        }
    }

    #[test]
    fn test_scenario_b_parameterized_and_grouped() {
        let translator = SqlTranslator::new(SqlDialect::Postgres);
        let request = QueryRequest::new("users").with_condition(scenario_a()).with_page(0, 50);
        let stmt = translate(&translator, &request);

        assert_eq!(stmt.params.len(), 3);
        assert_eq!(stmt.params[0], Value::BigInt(Some(18)));
        assert_eq!(stmt.params[1], Value::String(Some(Box::new("active".to_string()))));
        assert!(stmt.sql.contains(r#""age" > $1"#), "{}", stmt.sql);
        assert!(stmt.sql.contains(r#"("status" = $2 OR "status" = $3)"#), "{}", stmt.sql);
        assert!(!stmt.sql.contains("active"));
        assert!(!stmt.sql.contains("18"));
        assert!(stmt.sql.ends_with("LIMIT 50 OFFSET 0"));
    }

    #[test]
    fn test_mysql_placeholders_and_quoting() {
        let translator = SqlTranslator::new(SqlDialect::MySql);
        let request = QueryRequest::new("users").with_condition(scenario_a());
        let stmt = translate(&translator, &request);
        assert!(stmt.sql.contains("`age` > ?"), "{}", stmt.sql);
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn test_empty_or_matches_nothing() {
        let translator = SqlTranslator::new(SqlDialect::Sqlite);
        let request = QueryRequest::new("users").with_condition(Condition::or(vec![]));
        let stmt = translate(&translator, &request);
        assert!(stmt.sql.contains("1 = 0"), "{}", stmt.sql);
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_empty_and_matches_everything() {
        let translator = SqlTranslator::new(SqlDialect::Sqlite);
        let request = QueryRequest::new("users").with_condition(Condition::and(vec![]));
        let stmt = translate(&translator, &request);
        assert!(stmt.sql.contains("1 = 1"), "{}", stmt.sql);
    }

    #[test]
    fn test_empty_in_list_never_produces_sql() {
        let translator = SqlTranslator::new(SqlDialect::Postgres);
        let request = QueryRequest::new("users")
            .with_condition(Condition::atomic("id", Operator::In, Vec::<Scalar>::new(), "bigint"));
        let err = translator.translate(&request, &users()).unwrap_err();
        assert!(matches!(err, TranslationError::EmptyValueList { .. }));
    }

    #[test]
    fn test_injection_attempt_stays_in_params() {
        let translator = SqlTranslator::new(SqlDialect::Postgres);
        let hostile = "x'; DROP TABLE users; --";
        let request = QueryRequest::new("users")
            .with_condition(Condition::atomic("name", Operator::Equal, hostile, "text"));
        let stmt = translate(&translator, &request);
        assert!(!stmt.sql.contains("DROP TABLE"));
        assert_eq!(stmt.params, vec![Value::String(Some(Box::new(hostile.to_string())))]);
    }

    #[test]
    fn test_quoted_identifier_is_escaped() {
        let translator = SqlTranslator::new(SqlDialect::Postgres);
        let schema = TableSchema::new("odd").column(r#"we"ird"#, "text");
        let request = QueryRequest::new("odd")
            .with_condition(Condition::atomic(r#"we"ird"#, Operator::Equal, "v", "text"));
        let NativeQuery::Sql(stmt) = translator.translate(&request, &schema).unwrap() else {
            panic!("expected sql");
        };
        assert!(stmt.sql.contains(r#""we""ird""#), "{}", stmt.sql);
    }

    #[test]
    fn test_like_escapes_underscore() {
        let translator = SqlTranslator::new(SqlDialect::Postgres);
        let request = QueryRequest::new("users")
            .with_condition(Condition::atomic("name", Operator::Like, "a_b%", "text"));
        let stmt = translate(&translator, &request);
        assert!(stmt.sql.contains("LIKE"), "{}", stmt.sql);
        assert_eq!(stmt.params, vec![Value::String(Some(Box::new("a\\_b%".to_string())))]);
    }

    #[test]
    fn test_sqlite_pattern_uses_case_sensitive_glob() {
        let translator = SqlTranslator::new(SqlDialect::Sqlite);
        let request = QueryRequest::new("users")
            .with_condition(Condition::atomic("name", Operator::NotLike, "a*b_%?[", "text"));
        let stmt = translate(&translator, &request);
        assert!(stmt.sql.contains(r#""name" NOT GLOB ?"#), "{}", stmt.sql);
        assert!(!stmt.sql.contains("LIKE"), "{}", stmt.sql);
        assert_eq!(stmt.params, vec![Value::String(Some(Box::new("a[*]b_*[?][[]".to_string())))]);
    }

    #[test]
    fn test_mysql_pattern_uses_binary_like() {
        let translator = SqlTranslator::new(SqlDialect::MySql);
        let request = QueryRequest::new("users")
            .with_condition(Condition::atomic("name", Operator::Like, "A_%", "text"));
        let stmt = translate(&translator, &request);
        assert!(stmt.sql.contains("`name` LIKE BINARY ?"), "{}", stmt.sql);
        assert_eq!(stmt.params, vec![Value::String(Some(Box::new("A\\_%".to_string())))]);
    }

    #[test]
    fn test_clickhouse_like_without_escape_clause() {
        let translator = SqlTranslator::new(SqlDialect::ClickHouse);
        let request = QueryRequest::new("users")
            .with_condition(Condition::atomic("name", Operator::Like, "a_%", "text"));
        let stmt = translate(&translator, &request);
        assert!(stmt.sql.contains("`name` LIKE ?"), "{}", stmt.sql);
        assert!(!stmt.sql.contains("ESCAPE"), "{}", stmt.sql);
    }

    #[test]
    fn test_pattern_on_integer_column_rejected() {
        let translator = SqlTranslator::new(SqlDialect::Sqlite);
        let request = QueryRequest::new("users")
            .with_condition(Condition::atomic("age", Operator::Like, "1%", "integer"));
        assert!(matches!(
            translator.translate(&request, &users()),
            Err(TranslationError::UnsupportedConditionShape { family: BackendFamily::Sql, .. })
        ));
    }

    #[test]
    fn test_sorts_and_pagination() {
        let translator = SqlTranslator::new(SqlDialect::Postgres);
        let request = QueryRequest::new("users")
            .with_sorts(vec![Sort::desc("age"), Sort::asc("name")])
            .with_page(40, 20);
        let stmt = translate(&translator, &request);
        assert!(stmt.sql.contains(r#"ORDER BY "age" DESC, "name" ASC"#), "{}", stmt.sql);
        assert!(stmt.sql.ends_with("LIMIT 20 OFFSET 40"));
    }

    #[test]
    fn test_unknown_sort_column() {
        let translator = SqlTranslator::new(SqlDialect::Postgres);
        let request = QueryRequest::new("users").with_sorts(vec![Sort::asc("ghost")]);
        assert!(matches!(
            translator.translate(&request, &users()),
            Err(TranslationError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_or_to_in_optimization() {
        let config = TranslatorConfig { or_to_in_threshold: 3, ..Default::default() };
        let translator = SqlTranslator::with_config(SqlDialect::Postgres, config);
        let condition = Condition::or(
            ["Open", "Pending", "Review"]
                .iter()
                .map(|s| Condition::atomic("status", Operator::Equal, *s, "text"))
                .collect(),
        );
        let stmt = translate(&translator, &QueryRequest::new("users").with_condition(condition));

        assert_eq!(
            stmt.optimizations,
            vec![Optimization::OrToIn { column: "status".into(), value_count: 3 }]
        );
        assert!(stmt.sql.contains(r#""status" IN ($1, $2, $3)"#), "{}", stmt.sql);
    }

    #[test]
    fn test_collapsed_or_chain_is_split_too() {
        let config =
            TranslatorConfig { or_to_in_threshold: 3, max_in_values: 2, ..Default::default() };
        let translator = SqlTranslator::with_config(SqlDialect::Postgres, config);
        let condition = Condition::or(
            (1..=5)
                .map(|i| Condition::atomic("id", Operator::Equal, Scalar::Int(i), "bigint"))
                .collect(),
        );
        let stmt = translate(&translator, &QueryRequest::new("users").with_condition(condition));

        assert_eq!(
            stmt.optimizations,
            vec![
                Optimization::OrToIn { column: "id".into(), value_count: 5 },
                Optimization::InSplit { column: "id".into(), total_values: 5, chunk_count: 3 },
            ]
        );
        assert_eq!(stmt.sql.matches(" IN (").count(), 3, "{}", stmt.sql);
        assert_eq!(stmt.params.len(), 5);
    }

    #[test]
    fn test_large_not_in_is_split() {
        let config = TranslatorConfig { max_in_values: 2, ..Default::default() };
        let translator = SqlTranslator::with_config(SqlDialect::Postgres, config);
        let ids: Vec<Scalar> = (1..=5).map(Scalar::Int).collect();
        let request = QueryRequest::new("users")
            .with_condition(Condition::atomic("id", Operator::NotIn, ids, "bigint"));
        let stmt = translate(&translator, &request);

        assert_eq!(
            stmt.optimizations,
            vec![Optimization::InSplit { column: "id".into(), total_values: 5, chunk_count: 3 }]
        );
        assert_eq!(stmt.params.len(), 5);
        assert_eq!(stmt.sql.matches("NOT IN").count(), 3);
    }

    #[test]
    fn test_count_query() {
        let translator = SqlTranslator::new(SqlDialect::Postgres);
        let count = translator.translate_count("users", Some(&scenario_a()), &users());
        let Ok(NativeQuery::Sql(stmt)) = count else {
            panic!("expected sql");
        };
        assert!(stmt.sql.starts_with("SELECT COUNT(*)"), "{}", stmt.sql);
        assert_eq!(stmt.params.len(), 3);
        assert!(!stmt.sql.contains("LIMIT"));
    }

    #[test]
    fn test_zero_limit_rejected() {
        let translator = SqlTranslator::new(SqlDialect::Postgres);
        let request = QueryRequest::new("users").with_page(0, 0);
        assert_eq!(translator.translate(&request, &users()), Err(TranslationError::InvalidPage));
    }
}
