//! Built-in pipelines
//!
//! - `sql_insight`: question → SQL → gated query → chart → explanation
//! - `code_review`: request → code → review → refactored code

use crate::agent::AgentClient;
use crate::config::AppConfig;
use crate::database::{Database, SchemaDescription};
use crate::error::AppResult;
use crate::events::EventEmitter;
use crate::pipeline::stages::{AgentStage, OutputFormat, QueryStage};
use crate::pipeline::{Pipeline, StageKey};
use crate::sql_gate::{LimitStyle, SafetyGate};
use serde::Serialize;
use std::sync::Arc;

pub const SQL_PIPELINE: &str = "sql_insight";
pub const CODE_PIPELINE: &str = "code_review";

pub const SQL_EXAMPLES: &[&str] = &[
    "Which ten products have the highest unit price?",
    "How many customers are there in each country?",
    "What is the total order value per month?",
    "Which employees handled the most orders?",
];

pub const CODE_EXAMPLES: &[&str] = &[
    "Write a function to calculate fibonacci numbers",
    "Create a class for a simple bank account with deposit and withdraw methods",
    "Write a function to check if a string is a palindrome",
    "Create a function to sort a list using quicksort algorithm",
];

pub const ASSISTANT_EXAMPLES: &[&str] = &[
    "Calculate 15 * 23 + 45",
    "What is the square root of 144?",
    "What's today's date?",
    "Calculate sin(pi/2)",
    "What day of the week is it?",
];

/// Example requests for both pipelines and the helper assistant
#[derive(Debug, Clone, Serialize)]
pub struct ExampleRequests {
    pub sql: Vec<&'static str>,
    pub code: Vec<&'static str>,
    pub assistant: Vec<&'static str>,
}

pub fn example_requests() -> ExampleRequests {
    ExampleRequests {
        sql: SQL_EXAMPLES.to_vec(),
        code: CODE_EXAMPLES.to_vec(),
        assistant: ASSISTANT_EXAMPLES.to_vec(),
    }
}

fn sql_writer_instruction(style: LimitStyle) -> String {
    let dialect = match style {
        LimitStyle::Limit => "SQLite",
        LimitStyle::Top => "SQL Server",
    };
    format!(
        "You translate questions into {} queries. Use only the tables and columns in the \
         schema. Answer with exactly one SELECT statement and nothing else.",
        dialect
    )
}

const CHART_DESIGNER_INSTRUCTION: &str = "You design one chart for the query result. Answer \
     with JSON only: {\"chart_type\": \"bar|line|pie|scatter|area\", \"x\": <column>, \
     \"y\": <column>, \"title\": <short title>}. Both columns must appear in the result.";

const INSIGHT_WRITER_INSTRUCTION: &str = "You explain query results to a non-technical reader. \
     Answer the user's question in a few sentences using only the data shown.";

const CODE_WRITER_INSTRUCTION: &str = "You write Python code for the user's request. Answer \
     with a single fenced code block.";

const CODE_REVIEWER_INSTRUCTION: &str = "You review the generated code. List concrete problems \
     and improvements as short bullet points.";

const CODE_REFACTORER_INSTRUCTION: &str = "You rewrite the generated code so that it addresses \
     every review comment. Answer with a single fenced code block.";

/// Question → SQL → gated query → chart → explanation
pub fn sql_insight_pipeline(
    agent: Arc<dyn AgentClient>,
    database: Arc<dyn Database>,
    schema: &SchemaDescription,
    config: &AppConfig,
    events: Option<EventEmitter>,
) -> AppResult<Pipeline> {
    let mut builder = Pipeline::builder(SQL_PIPELINE)
        .add_stage(
            AgentStage::new(
                "sql_writer",
                sql_writer_instruction(config.sql.limit_style),
                StageKey::GeneratedSql,
                agent.clone(),
            )
            .format(OutputFormat::Sql)
            .with_context("Database schema", &schema.render()),
        )
        .add_stage(QueryStage::new(
            "query_executor",
            SafetyGate::from_config(&config.sql),
            database,
            config.sql.query_timeout(),
        ))
        .add_stage(
            AgentStage::new(
                "chart_designer",
                CHART_DESIGNER_INSTRUCTION,
                StageKey::ChartSpec,
                agent.clone(),
            )
            .reading(StageKey::QueryResult)
            .format(OutputFormat::Chart),
        )
        .add_stage(
            AgentStage::new(
                "insight_writer",
                INSIGHT_WRITER_INSTRUCTION,
                StageKey::Explanation,
                agent,
            )
            .reading(StageKey::GeneratedSql)
            .reading(StageKey::QueryResult),
        )
        .stage_timeout(config.stage_timeout());

    if let Some(events) = events {
        builder = builder.events(events);
    }
    builder.build()
}

/// Request → code → review → refactored code
pub fn code_review_pipeline(
    agent: Arc<dyn AgentClient>,
    config: &AppConfig,
    events: Option<EventEmitter>,
) -> AppResult<Pipeline> {
    let mut builder = Pipeline::builder(CODE_PIPELINE)
        .add_stage(AgentStage::new(
            "code_writer",
            CODE_WRITER_INSTRUCTION,
            StageKey::GeneratedCode,
            agent.clone(),
        ))
        .add_stage(
            AgentStage::new(
                "code_reviewer",
                CODE_REVIEWER_INSTRUCTION,
                StageKey::ReviewComments,
                agent.clone(),
            )
            .reading(StageKey::GeneratedCode),
        )
        .add_stage(
            AgentStage::new(
                "code_refactorer",
                CODE_REFACTORER_INSTRUCTION,
                StageKey::RefactoredCode,
                agent,
            )
            .reading(StageKey::GeneratedCode)
            .reading(StageKey::ReviewComments),
        )
        .stage_timeout(config.stage_timeout());

    if let Some(events) = events {
        builder = builder.events(events);
    }
    builder.build()
}
