//! 通用查询条件的 AST 定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operator::Operator;

/// 查询条件表达式树, 由调用方构建, 翻译期间只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// 逻辑与运算, 空列表恒为真
    And(Vec<Condition>),
    /// 逻辑或运算, 空列表恒为假
    Or(Vec<Condition>),
    /// 单列比较, 这是条件的叶子节点
    Atomic(AtomicCondition),
}

/// 单列比较条件, 例如：`age > 18`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicCondition {
    pub column_key: String,
    pub operator: Operator,
    pub value: Operand,
    /// 调用方声明的列类型, 用于值的类型转换
    #[serde(default)]
    pub declared_column_type: String,
}

impl Condition {
    pub fn and(children: Vec<Condition>) -> Self {
        Condition::And(children)
    }

    pub fn or(children: Vec<Condition>) -> Self {
        Condition::Or(children)
    }

    pub fn atomic(
        column_key: impl Into<String>,
        operator: Operator,
        value: impl Into<Operand>,
        declared_column_type: impl Into<String>,
    ) -> Self {
        Condition::Atomic(AtomicCondition {
            column_key: column_key.into(),
            operator,
            value: value.into(),
            declared_column_type: declared_column_type.into(),
        })
    }

    /// 不带值的空值检查
    pub fn null_check(column_key: impl Into<String>, operator: Operator) -> Self {
        Self::atomic(column_key, operator, Scalar::Null, "")
    }

    /// 深度优先遍历所有叶子节点
    pub fn atoms(&self) -> Vec<&AtomicCondition> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<&'a AtomicCondition>) {
        match self {
            Condition::And(children) | Condition::Or(children) => {
                for child in children {
                    child.collect_atoms(out);
                }
            }
            Condition::Atomic(atom) => out.push(atom),
        }
    }
}

/// 比较操作数：单个标量或标量列表 (IN / NOT IN)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

/// 带类型标签的标量值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// 类型名, 用于错误信息
    pub fn kind_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Text(_) => "text",
            Scalar::Bytes(_) => "bytes",
            Scalar::Timestamp(_) => "timestamp",
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => write!(f, "{:?}", s),
            Scalar::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Scalar::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<Scalar> for Operand {
    fn from(value: Scalar) -> Self {
        Operand::Scalar(value)
    }
}

impl From<Vec<Scalar>> for Operand {
    fn from(values: Vec<Scalar>) -> Self {
        Operand::List(values)
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Operand::Scalar(Scalar::Text(value.to_string()))
    }
}

impl From<String> for Operand {
    fn from(value: String) -> Self {
        Operand::Scalar(Scalar::Text(value))
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Operand::Scalar(Scalar::Int(value))
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Scalar(Scalar::Float(value))
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Operand::Scalar(Scalar::Bool(value))
    }
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

/// 排序条件, 列表中第一项为主排序键
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub column: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(column: impl Into<String>) -> Self {
        Self { column: column.into(), direction: SortDirection::Ascending }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self { column: column.into(), direction: SortDirection::Descending }
    }

    pub fn reversed(&self) -> Self {
        Self { column: self.column.clone(), direction: self.direction.reverse() }
    }
}

/// 分页参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 100 }
    }
}

/// 一次查询请求：表/集合名, 条件树, 排序与分页
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub table: String,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub page: Page,
}

impl QueryRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into(), condition: None, sorts: Vec::new(), page: Page::default() }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_sorts(mut self, sorts: Vec<Sort>) -> Self {
        self.sorts = sorts;
        self
    }

    pub fn with_page(mut self, offset: u64, limit: u64) -> Self {
        self.page = Page::new(offset, limit);
        self
    }
}

/// 目标表的列定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: String,
}

/// 目标表结构, 由调用方在翻译前提供
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), columns: Vec::new() }
    }

    pub fn column(mut self, name: impl Into<String>, column_type: impl Into<String>) -> Self {
        self.columns.push(ColumnSchema { name: name.into(), column_type: column_type.into() });
        self
    }

    pub fn find(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}
