//! Generic filter/sort/page requests translated into each database family's
//! native query, executed under a strict acquire/use/release discipline.

pub mod ast;
pub mod coerce;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod eval;
pub mod lifecycle;
pub mod operator;
pub mod rows;
pub mod translator;

pub use ast::{
    AtomicCondition, ColumnSchema, Condition, Operand, Page, QueryRequest, Scalar, Sort,
    SortDirection, TableSchema,
};
pub use config::{ConnectionConfig, DispatcherConfig};
pub use dispatcher::{Dispatcher, EngineKind};
pub use error::{ConfigError, DriverError, QueryError, QueryResult, TranslationError};
pub use lifecycle::{
    with_connection, BackendDriver, ConnectionOperation, ExecuteQuery, LifecycleManager,
};
pub use operator::{BackendFamily, Operator};
pub use rows::{NativeRows, Row};
pub use translator::{DialectTranslator, NativeQuery, Translator, TranslatorConfig};
