//! 配置模块，负责加载连接配置和调度器配置 (JSON)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::dispatcher::EngineKind;
use crate::error::ConfigError;
use crate::translator::TranslatorConfig;

/// 单个数据库的连接参数，由调用方持有，本库只读
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// 引擎标签，例如 `Postgres`、`MongoDB`
    pub engine: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    /// 引擎相关的附加选项 (port、sslmode 等)
    #[serde(default)]
    pub advanced: BTreeMap<String, String>,
}

// 密码不能出现在日志里
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("engine", &self.engine)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("database", &self.database)
            .field("advanced", &self.advanced)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            database: String::new(),
            advanced: BTreeMap::new(),
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.advanced.insert(key.into(), value.into());
        self
    }

    /// 从JSON文件加载连接配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }

    /// 解析引擎标签
    pub fn engine_kind(&self) -> Result<EngineKind, ConfigError> {
        if self.engine.trim().is_empty() {
            return Err(ConfigError::MissingField("engine"));
        }
        self.engine.parse()
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.advanced.get(key).map(String::as_str)
    }

    /// 高级选项中的端口号，未设置时返回 `None`
    pub fn port(&self) -> Result<Option<u16>, ConfigError> {
        match self.option("port") {
            None => Ok(None),
            Some(raw) => {
                raw.trim().parse::<u16>().map(Some).map_err(|_| ConfigError::InvalidOption {
                    key: "port".to_string(),
                    value: raw.to_string(),
                })
            }
        }
    }

    /// 连接前的完整性检查
    pub fn validate(&self) -> Result<EngineKind, ConfigError> {
        let engine = self.engine_kind()?;
        match engine {
            // 文件型数据库只需要路径
            EngineKind::Sqlite3 if self.database.is_empty() => {
                return Err(ConfigError::MissingField("database"))
            }
            EngineKind::Sqlite3 => {}
            _ if self.hostname.is_empty() => return Err(ConfigError::MissingField("hostname")),
            _ => {}
        }
        self.port()?;
        Ok(engine)
    }
}

/// 调度器配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub translator: TranslatorConfig,
    /// 单次操作超时 (毫秒)，为空表示不限时
    pub operation_timeout_ms: Option<u64>,
}

impl DispatcherConfig {
    /// 从JSON文件加载调度器配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
