//! Comparison operators and the per-family operator table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Abstract comparison operator carried by an atomic condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

/// How many values an operator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    Single,
    List,
}

impl Operator {
    pub const ALL: [Operator; 12] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::GreaterThan,
        Operator::GreaterOrEqual,
        Operator::LessThan,
        Operator::LessOrEqual,
        Operator::Like,
        Operator::NotLike,
        Operator::In,
        Operator::NotIn,
        Operator::IsNull,
        Operator::IsNotNull,
    ];

    pub fn arity(self) -> Arity {
        match self {
            Operator::IsNull | Operator::IsNotNull => Arity::None,
            Operator::In | Operator::NotIn => Arity::List,
            _ => Arity::Single,
        }
    }

    /// Negated operators need a NULL guard outside SQL.
    pub fn is_negated(self) -> bool {
        matches!(self, Operator::NotEqual | Operator::NotLike | Operator::NotIn)
    }

    pub fn sql_symbol(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operator: {0}")]
pub struct UnknownOperator(pub String);

impl FromStr for Operator {
    type Err = UnknownOperator;

    /// Accepts the SQL spellings and the short mnemonics the frontend sends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
        let op = match normalized.as_str() {
            "=" | "==" | "EQ" | "EQUALS" => Operator::Equal,
            "!=" | "<>" | "NE" | "NOT EQUALS" => Operator::NotEqual,
            ">" | "GT" => Operator::GreaterThan,
            ">=" | "GTE" => Operator::GreaterOrEqual,
            "<" | "LT" => Operator::LessThan,
            "<=" | "LTE" => Operator::LessOrEqual,
            "LIKE" => Operator::Like,
            "NOT LIKE" => Operator::NotLike,
            "IN" => Operator::In,
            "NOT IN" | "NIN" => Operator::NotIn,
            "IS NULL" => Operator::IsNull,
            "IS NOT NULL" => Operator::IsNotNull,
            _ => return Err(UnknownOperator(s.to_string())),
        };
        Ok(op)
    }
}

/// Database family a translator targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendFamily {
    Sql,
    Document,
    Search,
    KeyValue,
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendFamily::Sql => "sql",
            BackendFamily::Document => "document",
            BackendFamily::Search => "search",
            BackendFamily::KeyValue => "key-value",
        };
        f.write_str(name)
    }
}

/// Whether a family can express an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorSupport {
    Native,
    /// Expressed through other native constructs, e.g. NOT IN with a NULL guard.
    Emulated,
    Unsupported,
}

impl OperatorSupport {
    pub fn is_supported(self) -> bool {
        !matches!(self, OperatorSupport::Unsupported)
    }
}

impl BackendFamily {
    pub fn operator_support(self, op: Operator) -> OperatorSupport {
        use Operator::*;
        use OperatorSupport::*;

        match self {
            BackendFamily::Sql => Native,
            BackendFamily::Document => match op {
                Like | NotEqual | NotLike | NotIn => Emulated,
                _ => Native,
            },
            BackendFamily::Search => match op {
                NotEqual | NotLike | NotIn | IsNull => Emulated,
                _ => Native,
            },
            BackendFamily::KeyValue => match op {
                Equal | NotEqual | GreaterThan | LessThan => Native,
                _ => Unsupported,
            },
        }
    }

    /// Whether the family has native AND/OR combinators.
    pub fn supports_boolean_logic(self) -> bool {
        !matches!(self, BackendFamily::KeyValue)
    }

    pub fn supported_operators(self) -> Vec<Operator> {
        Operator::ALL
            .iter()
            .copied()
            .filter(|op| self.operator_support(*op).is_supported())
            .collect()
    }
}
