use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use query_dispatcher::ast::{Condition, QueryRequest, Scalar, Sort, TableSchema};
use query_dispatcher::config::{ConnectionConfig, DispatcherConfig};
use query_dispatcher::dispatcher::{Dispatcher, EngineKind};
use query_dispatcher::error::DriverError;
use query_dispatcher::lifecycle::{BackendDriver, LifecycleManager};
use query_dispatcher::operator::Operator;
use query_dispatcher::rows::NativeRows;
use query_dispatcher::translator::{NativeQuery, Optimization, TranslatorConfig};

/// 演示用驱动：不连接真实数据库，只打印收到的SQL并返回固定结果
struct DemoDriver;

#[async_trait]
impl BackendDriver for DemoDriver {
    type Handle = String;

    async fn open(&self, config: &ConnectionConfig) -> Result<String, DriverError> {
        Ok(format!("{}@{}", config.username, config.hostname))
    }

    async fn execute(
        &self,
        handle: &mut String,
        query: &NativeQuery,
    ) -> Result<NativeRows, DriverError> {
        let NativeQuery::Sql(stmt) = query else {
            return Err(format!("demo driver only runs sql, got {}", query.family()).into());
        };
        println!("  [{}] 执行: {}", handle, stmt.sql);
        if stmt.sql.starts_with("SELECT COUNT") {
            return Ok(NativeRows::Count(2));
        }
        Ok(NativeRows::Tabular {
            columns: vec!["id".into(), "age".into(), "status".into()],
            rows: vec![
                vec![Scalar::Int(7), Scalar::Int(44), Scalar::Text("active".into())],
                vec![Scalar::Int(3), Scalar::Int(36), Scalar::Text("pending".into())],
            ],
        })
    }

    async fn close(&self, _handle: String) -> Result<(), DriverError> {
        Ok(())
    }
}

/// 加载调度器配置，失败时使用默认配置
fn load_config() -> DispatcherConfig {
    match DispatcherConfig::from_json_file("dispatcher.json") {
        Ok(config) => {
            println!("✅ 成功从JSON配置文件加载调度器配置");
            config
        }
        Err(e) => {
            println!("⚠️ 无法加载JSON配置文件 ({}), 使用默认配置", e);
            DispatcherConfig::default()
        }
    }
}

fn users_schema() -> TableSchema {
    TableSchema::new("users")
        .column("id", "bigint")
        .column("age", "integer")
        .column("status", "varchar(32)")
        .column("name", "text")
}

fn print_native(query: &NativeQuery) {
    match query {
        NativeQuery::Sql(stmt) => {
            println!("  SQL: {}", stmt.sql);
            println!("  参数: {:?}", stmt.params);
            for opt in &stmt.optimizations {
                match opt {
                    Optimization::OrToIn { column, value_count } => {
                        println!("  • 将{}字段的{}个OR条件合并为IN", column, value_count)
                    }
                    Optimization::InSplit { column, total_values, chunk_count } => {
                        println!(
                            "  • 将{}字段的{}个值拆分为{}个IN条件",
                            column, total_values, chunk_count
                        )
                    }
                }
            }
        }
        NativeQuery::Document(q) => {
            println!("  集合: {}", q.collection);
            println!("  过滤: {}", q.filter);
            println!("  排序: {:?}, skip={}, limit={:?}", q.sort, q.skip, q.limit);
        }
        NativeQuery::Search(q) => {
            println!("  索引: {}", q.index);
            println!("  请求体: {}", q.body);
        }
        NativeQuery::KeyValue(q) => {
            println!("  键: {}", q.key);
            println!("  过滤: {:?}", q.filter);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("--- Query Dispatcher: 通用条件到各数据库原生查询 ---");
    let config = load_config();
    println!("翻译配置: {:?}", config.translator);

    // 1. 示例条件: age > 18 AND (status = "active" OR status = "pending")
    let condition = Condition::and(vec![
        Condition::atomic("age", Operator::GreaterThan, Scalar::Int(18), "integer"),
        Condition::or(vec![
            Condition::atomic("status", Operator::Equal, "active", "text"),
            Condition::atomic("status", Operator::Equal, "pending", "text"),
        ]),
    ]);
    let request = QueryRequest::new("users")
        .with_condition(condition)
        .with_sorts(vec![Sort::desc("age")])
        .with_page(0, 50);
    let schema = users_schema();

    // 2. 对每种引擎进行翻译
    for engine in EngineKind::ALL {
        println!("\n[{}] ({})", engine, engine.family());
        let dispatcher = Dispatcher::new(engine, &config.translator);
        match dispatcher.translate(&request, &schema) {
            Ok(native) => print_native(&native),
            Err(e) => println!("  ✗ 翻译失败: {}", e),
        }
    }

    demonstrate_large_in_list()?;
    demonstrate_execution(&config, &request, &schema).await?;
    Ok(())
}

/// 演示完整的获取/使用/释放流程，超时取自调度器配置
async fn demonstrate_execution(
    config: &DispatcherConfig,
    request: &QueryRequest,
    schema: &TableSchema,
) -> Result<()> {
    println!("\n--- 执行演示 (超时: {:?}) ---", config.operation_timeout());

    let connection = ConnectionConfig::new("Postgres")
        .with_hostname("localhost")
        .with_credentials("viewer", "secret");
    let dispatcher = Dispatcher::from_config(&connection, &config.translator)?;
    let lifecycle = LifecycleManager::from_config(Arc::new(DemoDriver), config);
    let cancel = CancellationToken::new();

    let rows = dispatcher.get_rows(&lifecycle, &connection, request, schema, &cancel).await?;
    for row in &rows {
        println!("  行: {:?}", row);
    }
    let condition = request.condition.as_ref();
    let count = dispatcher
        .count_rows(&lifecycle, &connection, &request.table, condition, schema, &cancel)
        .await?;
    println!("  ✅ 共 {} 行匹配", count);
    Ok(())
}

/// 演示大量ID的IN查询拆分
fn demonstrate_large_in_list() -> Result<()> {
    println!("\n--- 大量ID处理场景演示 ---");

    // 使用较小的阈值来触发优化
    let translator = TranslatorConfig { max_in_values: 5, ..Default::default() };
    let dispatcher = Dispatcher::new(EngineKind::Postgres, &translator);

    let ids: Vec<Scalar> = (1..=20).map(Scalar::Int).collect();
    let request = QueryRequest::new("users")
        .with_condition(Condition::atomic("id", Operator::In, ids, "bigint"));

    let native = dispatcher.translate(&request, &users_schema())?;
    print_native(&native);
    Ok(())
}
