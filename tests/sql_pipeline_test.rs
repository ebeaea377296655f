use insightflow_lib::agent::MockAgent;
use insightflow_lib::config::{AgentProvider, AppConfig, AppConfigBuilder};
use insightflow_lib::database::{Database, SqliteDatabase};
use insightflow_lib::error::{AppError, ErrorKind};
use insightflow_lib::pipeline::{StageKey, StageStatus};
use insightflow_lib::sql_gate::LimitStyle;
use insightflow_lib::workflows::sql_insight_pipeline;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn seed_database(path: &Path) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    for statement in [
        "CREATE TABLE Customers (CustomerID INTEGER PRIMARY KEY, Name TEXT NOT NULL, Country TEXT)",
        "INSERT INTO Customers (Name, Country) VALUES \
         ('Alfreds', 'Germany'), ('Blauer See', 'Germany'), ('Bólido', 'Spain'), \
         ('Bon app', 'France'), ('Frankenversand', 'Germany')",
    ] {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;
}

async fn open_database(dir: &TempDir) -> (String, SqliteDatabase) {
    let path = dir.path().join("shop.db");
    seed_database(&path).await;
    let url = format!("sqlite://{}", path.display());
    let database = SqliteDatabase::connect(&url, true).await.unwrap();
    (url, database)
}

fn config(url: &str, style: LimitStyle) -> AppConfig {
    AppConfigBuilder::new()
        .database_url(url)
        .provider(AgentProvider::Mock)
        .limit_style(style)
        .build()
        .unwrap()
}

fn scripted_agent() -> MockAgent {
    MockAgent::new()
        .respond(
            "sql_writer",
            "```sql\nSELECT Country, COUNT(*) AS Customers FROM Customers \
             GROUP BY Country ORDER BY Customers DESC;\n```",
        )
        .respond(
            "chart_designer",
            r#"Here you go: {"chart_type": "bar", "x": "Country", "y": "Customers"}"#,
        )
        .respond("insight_writer", "Germany has the most customers.")
}

#[tokio::test]
async fn test_sql_pipeline_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (url, database) = open_database(&dir).await;
    let schema = database.load_schema().await.unwrap();
    let agent = Arc::new(scripted_agent());

    let pipeline = sql_insight_pipeline(
        agent.clone(),
        Arc::new(database),
        &schema,
        &config(&url, LimitStyle::Limit),
        None,
    )
    .unwrap();

    let run = pipeline
        .run("How many customers are there in each country?")
        .await
        .unwrap();
    assert!(run.is_success(), "{:?}", run.failure);
    assert_eq!(
        run.state.keys(),
        vec![
            StageKey::GeneratedSql,
            StageKey::QueryResult,
            StageKey::ChartSpec,
            StageKey::Explanation,
        ]
    );

    let result = run.state.query_result().unwrap();
    assert!(result.query.ends_with(" LIMIT 100"));
    assert_eq!(result.column_names(), vec!["Country", "Customers"]);
    assert_eq!(result.rows[0][0], "Germany");
    assert_eq!(result.rows[0][1], 3);
    assert_eq!(result.row_count(), 3);

    // The schema reaches the SQL writer, the table reaches the explanation
    let sql_prompt = &agent.prompts_for("sql_writer")[0];
    assert!(sql_prompt.contains("Customers"));
    assert!(sql_prompt.contains("Country"));

    let insight_prompt = &agent.prompts_for("insight_writer")[0];
    assert!(insight_prompt.contains(&result.to_markdown()));
    assert!(insight_prompt.contains("### chart_spec"));
}

#[tokio::test]
async fn test_top_style_on_sqlite_fails_at_execution() {
    let dir = TempDir::new().unwrap();
    let (url, database) = open_database(&dir).await;

    let pipeline = sql_insight_pipeline(
        Arc::new(scripted_agent()),
        Arc::new(database),
        &Default::default(),
        &config(&url, LimitStyle::Top),
        None,
    )
    .unwrap();

    let run = pipeline.run("Customers per country").await.unwrap();
    let failure = run.failure.clone().unwrap();

    assert_eq!(failure.stage_index, 1);
    assert_eq!(failure.kind, ErrorKind::Execution);
    assert!(failure.message.starts_with("query failed:"));
    assert_eq!(run.state.keys(), vec![StageKey::GeneratedSql]);
    assert_eq!(run.stage_results[2].status, StageStatus::NotRun);
}

#[tokio::test]
async fn test_chart_with_unknown_column_fails_stage() {
    let dir = TempDir::new().unwrap();
    let (url, database) = open_database(&dir).await;
    let agent = scripted_agent().respond(
        "chart_designer",
        r#"{"chart_type": "pie", "x": "Region", "y": "Customers"}"#,
    );

    let pipeline = sql_insight_pipeline(
        Arc::new(agent),
        Arc::new(database),
        &Default::default(),
        &config(&url, LimitStyle::Limit),
        None,
    )
    .unwrap();

    let run = pipeline.run("Customers per region").await.unwrap();
    let failure = run.failure.unwrap();
    assert_eq!(failure.stage_name, "chart_designer");
    assert_eq!(failure.kind, ErrorKind::Stage);
    assert!(failure.message.contains("Region"));
    assert_eq!(
        run.state.keys(),
        vec![StageKey::GeneratedSql, StageKey::QueryResult]
    );
}

#[tokio::test]
async fn test_slow_queries_time_out_and_free_the_pool() {
    let dir = TempDir::new().unwrap();
    let (_, database) = open_database(&dir).await;

    let slow = "WITH RECURSIVE counter(x) AS \
                (SELECT 1 UNION ALL SELECT x + 1 FROM counter WHERE x < 1000000000) \
                SELECT COUNT(*) FROM counter";

    // More timeouts than the pool has connections
    for _ in 0..6 {
        let err = database
            .execute(slow, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QueryTimeout(_)));
        assert!(err.to_string().starts_with("query failed: timed out"));
    }

    let result = database
        .execute("SELECT COUNT(*) AS n FROM Customers", Duration::from_secs(3))
        .await
        .unwrap();
    assert_eq!(result.rows[0][0], 5);
}

#[tokio::test]
async fn test_run_with_missing_database_is_config_error() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("missing.db").display());
    let config = config(&url, LimitStyle::Limit);

    let err = insightflow_lib::run(config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!dir.path().join("missing.db").exists());
}

#[tokio::test]
async fn test_prose_from_sql_writer_fails_without_writing_state() {
    let dir = TempDir::new().unwrap();
    let (url, database) = open_database(&dir).await;
    let agent = Arc::new(scripted_agent().respond("sql_writer", "Sorry, I cannot answer that."));

    let pipeline = sql_insight_pipeline(
        agent.clone(),
        Arc::new(database),
        &Default::default(),
        &config(&url, LimitStyle::Limit),
        None,
    )
    .unwrap();

    let run = pipeline.run("Tell me a joke").await.unwrap();
    let failure = run.failure.clone().unwrap();

    assert!(run.state.is_empty());
    assert_eq!(failure.stage_index, 0);
    assert_eq!(failure.stage_name, "sql_writer");
    assert_eq!(failure.kind, ErrorKind::Stage);
    assert!(agent.prompts_for("chart_designer").is_empty());
}
