pub mod agent;
pub mod assistant;
pub mod chart;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod logger;
pub mod pipeline;
pub mod sql_gate;
pub mod state_machine;
pub mod web;
pub mod workflows;

use agent::{AgentClient, AgentClientFactory};
use assistant::{HelperAssistant, ToolRegistry};
use config::AppConfig;
use database::{Database, SchemaDescription, SqliteDatabase};
use error::{AppError, AppResult};
use events::EventEmitter;
use logger::LogLevel;
use std::sync::Arc;
use web::AppState;

/// Build both pipelines, the helper assistant and the shared server state
pub fn build_app_state(
    agent: Arc<dyn AgentClient>,
    database: Arc<dyn Database>,
    schema: &SchemaDescription,
    config: &AppConfig,
) -> AppResult<AppState> {
    let events = EventEmitter::default();
    let sql_pipeline = workflows::sql_insight_pipeline(
        agent.clone(),
        database,
        schema,
        config,
        Some(events.clone()),
    )?;
    let code_pipeline =
        workflows::code_review_pipeline(agent.clone(), config, Some(events.clone()))?;
    let assistant = HelperAssistant::new(agent, ToolRegistry::standard(), config.stage_timeout());

    Ok(AppState {
        sql_pipeline: Arc::new(sql_pipeline),
        code_pipeline: Arc::new(code_pipeline),
        assistant: Arc::new(assistant),
        events,
    })
}

/// Connect, load the schema, pick the agent and serve HTTP until shutdown
///
/// Any startup failure is a configuration error.
pub async fn run(config: AppConfig) -> AppResult<()> {
    crate::app_log!(
        LogLevel::Info,
        "app",
        "Starting insightflow (provider: {:?}, model: {})",
        config.agent.provider,
        config.agent.model
    );

    let database =
        SqliteDatabase::connect(&config.database.url, config.database.read_only).await?;
    let schema = database
        .load_schema()
        .await
        .map_err(|e| AppError::ConfigError(format!("failed to load schema: {}", e)))?;
    if schema.is_empty() {
        crate::app_log!(
            LogLevel::Warn,
            "app",
            "Database {} has no tables",
            config.database.url
        );
    }

    let agent = AgentClientFactory::create(&config.agent)?;
    let state = build_app_state(agent, Arc::new(database), &schema, &config)?;

    web::serve(state, config.bind_addr).await
}
