//! Engine selection and the two top-level operations: fetch rows and count rows.

use std::fmt;
use std::str::FromStr;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ast::{Condition, QueryRequest, TableSchema};
use crate::config::ConnectionConfig;
use crate::error::{ConfigError, QueryError, QueryResult};
use crate::lifecycle::{BackendDriver, LifecycleManager};
use crate::operator::BackendFamily;
use crate::rows::Row;
use crate::translator::{
    DialectTranslator, DocumentTranslator, KeyValueTranslator, NativeQuery, SearchTranslator,
    SqlDialect, SqlTranslator, Translator, TranslatorConfig,
};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Postgres,
    MySql,
    MariaDb,
    Sqlite3,
    ClickHouse,
    MongoDb,
    ElasticSearch,
    Redis,
}

impl EngineKind {
    pub const ALL: [EngineKind; 8] = [
        EngineKind::Postgres,
        EngineKind::MySql,
        EngineKind::MariaDb,
        EngineKind::Sqlite3,
        EngineKind::ClickHouse,
        EngineKind::MongoDb,
        EngineKind::ElasticSearch,
        EngineKind::Redis,
    ];

    pub fn family(self) -> BackendFamily {
        match self {
            EngineKind::Postgres
            | EngineKind::MySql
            | EngineKind::MariaDb
            | EngineKind::Sqlite3
            | EngineKind::ClickHouse => BackendFamily::Sql,
            EngineKind::MongoDb => BackendFamily::Document,
            EngineKind::ElasticSearch => BackendFamily::Search,
            EngineKind::Redis => BackendFamily::KeyValue,
        }
    }

    pub fn translator(self, config: &TranslatorConfig) -> Translator {
        let sql = |dialect| Translator::Sql(SqlTranslator::with_config(dialect, *config));
        match self {
            EngineKind::Postgres => sql(SqlDialect::Postgres),
            EngineKind::MySql | EngineKind::MariaDb => sql(SqlDialect::MySql),
            EngineKind::Sqlite3 => sql(SqlDialect::Sqlite),
            EngineKind::ClickHouse => sql(SqlDialect::ClickHouse),
            EngineKind::MongoDb => Translator::Document(DocumentTranslator::new()),
            EngineKind::ElasticSearch => Translator::Search(SearchTranslator::new(config)),
            EngineKind::Redis => Translator::KeyValue(KeyValueTranslator::new()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Postgres => "Postgres",
            EngineKind::MySql => "MySQL",
            EngineKind::MariaDb => "MariaDB",
            EngineKind::Sqlite3 => "Sqlite3",
            EngineKind::ClickHouse => "ClickHouse",
            EngineKind::MongoDb => "MongoDB",
            EngineKind::ElasticSearch => "ElasticSearch",
            EngineKind::Redis => "Redis",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(EngineKind::Postgres),
            "mysql" => Ok(EngineKind::MySql),
            "mariadb" => Ok(EngineKind::MariaDb),
            "sqlite3" | "sqlite" => Ok(EngineKind::Sqlite3),
            "clickhouse" => Ok(EngineKind::ClickHouse),
            "mongodb" | "mongo" => Ok(EngineKind::MongoDb),
            "elasticsearch" => Ok(EngineKind::ElasticSearch),
            "redis" => Ok(EngineKind::Redis),
            _ => Err(ConfigError::UnknownEngine(s.to_string())),
        }
    }
}

/// Routes requests for one engine to its translator and runs them.
///
/// Immutable once built; clone it freely across tasks.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    engine: EngineKind,
    translator: Translator,
}

impl Dispatcher {
    pub fn new(engine: EngineKind, config: &TranslatorConfig) -> Self {
        Self { engine, translator: engine.translator(config) }
    }

    /// Select the engine named by `connection`. Unknown tags and incomplete
    /// connection settings fail here, before any I/O.
    pub fn from_config(
        connection: &ConnectionConfig,
        config: &TranslatorConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(connection.validate()?, config))
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn family(&self) -> BackendFamily {
        self.translator.family()
    }

    /// Translate without executing.
    pub fn translate(
        &self,
        request: &QueryRequest,
        schema: &TableSchema,
    ) -> QueryResult<NativeQuery> {
        Ok(self.translator.translate(request, schema)?)
    }

    /// Fetch the rows matching `request`.
    ///
    /// Translation runs to completion first, so a request the backend cannot
    /// express never opens a connection.
    pub async fn get_rows<D>(
        &self,
        lifecycle: &LifecycleManager<D>,
        connection: &ConnectionConfig,
        request: &QueryRequest,
        schema: &TableSchema,
        cancel: &CancellationToken,
    ) -> QueryResult<Vec<Row>>
    where
        D: BackendDriver + ?Sized + 'static,
        D::Handle: 'static,
    {
        self.check_engine(connection)?;
        let query = self.translate(request, schema)?;
        debug!(engine = %self.engine, table = %request.table, "dispatching query");

        let native = lifecycle.execute(connection, cancel, &query).await?;
        Ok(native.into_rows())
    }

    /// Count the rows matching `condition`, ignoring sorts and pagination.
    pub async fn count_rows<D>(
        &self,
        lifecycle: &LifecycleManager<D>,
        connection: &ConnectionConfig,
        table: &str,
        condition: Option<&Condition>,
        schema: &TableSchema,
        cancel: &CancellationToken,
    ) -> QueryResult<u64>
    where
        D: BackendDriver + ?Sized + 'static,
        D::Handle: 'static,
    {
        self.check_engine(connection)?;
        let query = self.translator.translate_count(table, condition, schema)?;
        debug!(engine = %self.engine, table, "dispatching count");

        let native = lifecycle.execute(connection, cancel, &query).await?;
        native.count().ok_or_else(|| {
            QueryError::Execution("driver returned no count for a count query".into())
        })
    }

    fn check_engine(&self, connection: &ConnectionConfig) -> Result<(), ConfigError> {
        let configured = connection.validate()?;
        if configured != self.engine {
            return Err(ConfigError::InvalidOption {
                key: "engine".to_string(),
                value: format!("{} (dispatcher serves {})", connection.engine, self.engine),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Postgres", EngineKind::Postgres ; "postgres")]
    #[test_case("mysql", EngineKind::MySql ; "mysql lowercase")]
    #[test_case("MariaDB", EngineKind::MariaDb ; "mariadb")]
    #[test_case("Sqlite3", EngineKind::Sqlite3 ; "sqlite")]
    #[test_case("ClickHouse", EngineKind::ClickHouse ; "clickhouse")]
    #[test_case("MongoDB", EngineKind::MongoDb ; "mongo")]
    #[test_case("ElasticSearch", EngineKind::ElasticSearch ; "elastic")]
    #[test_case(" Redis ", EngineKind::Redis ; "redis padded")]
    fn test_engine_tags(tag: &str, expected: EngineKind) {
        assert_eq!(tag.parse::<EngineKind>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_engine_tag() {
        let err = "Cassandra".parse::<EngineKind>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEngine(tag) if tag == "Cassandra"));
    }

    #[test]
    fn test_every_engine_maps_to_its_family() {
        for engine in EngineKind::ALL {
            let dispatcher = Dispatcher::new(engine, &TranslatorConfig::default());
            assert_eq!(dispatcher.family(), engine.family());
            assert_eq!(engine.as_str().parse::<EngineKind>().unwrap(), engine);
        }
    }

    #[test]
    fn test_clickhouse_uses_its_own_sql_dialect() {
        let translator = EngineKind::ClickHouse.translator(&TranslatorConfig::default());
        let Translator::Sql(sql) = translator else {
            panic!("clickhouse must translate to sql");
        };
        assert_eq!(sql.dialect(), SqlDialect::ClickHouse);
    }

    #[test]
    fn test_from_config_validates_connection() {
        let config =
            ConnectionConfig::new("Postgres").with_hostname("db").with_option("port", "70000");
        let err = Dispatcher::from_config(&config, &TranslatorConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { key, .. } if key == "port"));

        let no_host = ConnectionConfig::new("MongoDB");
        let err = Dispatcher::from_config(&no_host, &TranslatorConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("hostname")));
    }

    #[test]
    fn test_dispatcher_is_shareable() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<Dispatcher>();
    }
}
