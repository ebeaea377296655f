use crate::agent::{AgentClient, AgentRequest};
use crate::chart::ChartSpec;
use crate::error::{AppError, AppResult};
use crate::logger::{LogLevel, LOGGER};
use crate::pipeline::{PipelineStage, PipelineState, StageInput, StageKey, StageOutput};
use async_trait::async_trait;
use std::sync::Arc;

/// Expected shape of a model's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Any non-empty text
    Text,
    /// A single SELECT statement, optionally fenced
    Sql,
    /// A JSON chart specification over the query result's columns
    Chart,
}

impl OutputFormat {
    /// Turn untrusted model text into a typed output, or reject it
    pub fn parse(&self, raw: &str, state: &PipelineState) -> AppResult<StageOutput> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(AppError::MalformedOutput("empty output".to_string()));
        }

        match self {
            OutputFormat::Text => Ok(StageOutput::Text(text.to_string())),
            OutputFormat::Sql => {
                let sql = strip_code_fence(text);
                if sql.is_empty() {
                    return Err(AppError::MalformedOutput("empty SQL block".to_string()));
                }
                if !starts_with_select(sql) {
                    return Err(AppError::MalformedOutput(format!(
                        "expected a SELECT statement, got: {}",
                        preview(sql)
                    )));
                }
                Ok(StageOutput::Sql(sql.to_string()))
            }
            OutputFormat::Chart => {
                let spec = ChartSpec::parse(strip_code_fence(text))?;
                if let Some(result) = state.query_result() {
                    spec.check_columns(result)?;
                }
                Ok(StageOutput::Chart(spec))
            }
        }
    }
}

fn starts_with_select(sql: &str) -> bool {
    sql.split(|c: char| !c.is_alphanumeric() && c != '_')
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("SELECT"))
}

/// First line of `text`, shortened for error messages
fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 60;
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > MAX_CHARS {
        format!("{}...", line.chars().take(MAX_CHARS).collect::<String>())
    } else {
        line.to_string()
    }
}

/// Body of the first fenced code block, or the whole text if there is none
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };

    let after = &trimmed[open + 3..];
    // Skip the language tag line
    let body = match after.find('\n') {
        Some(newline) => &after[newline + 1..],
        None => after,
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Stage that asks the remote agent for one answer
pub struct AgentStage {
    name: String,
    instruction: String,
    output_key: StageKey,
    reads: Vec<StageKey>,
    format: OutputFormat,
    context: Option<String>,
    agent: Arc<dyn AgentClient>,
}

impl AgentStage {
    pub fn new(
        name: impl Into<String>,
        instruction: impl Into<String>,
        output_key: StageKey,
        agent: Arc<dyn AgentClient>,
    ) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            output_key,
            reads: Vec::new(),
            format: OutputFormat::Text,
            context: None,
            agent,
        }
    }

    /// Declare a key this stage depends on
    pub fn reading(mut self, key: StageKey) -> Self {
        self.reads.push(key);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Fixed text placed before the prompt on every run
    pub fn with_context(mut self, label: &str, text: &str) -> Self {
        self.context = Some(format!("{}:\n{}", label, text.trim_end()));
        self
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }
}

#[async_trait]
impl PipelineStage for AgentStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> StageKey {
        self.output_key
    }

    fn reads(&self) -> &[StageKey] {
        &self.reads
    }

    async fn execute(&self, input: StageInput<'_>) -> AppResult<StageOutput> {
        let prompt = match &self.context {
            Some(context) => format!("{}\n\n{}", context, input.prompt),
            None => input.prompt.to_string(),
        };

        let raw = self
            .agent
            .invoke(&AgentRequest {
                stage_name: &self.name,
                instruction: &self.instruction,
                prompt: &prompt,
            })
            .await?;

        LOGGER.log(
            LogLevel::Debug,
            &format!(
                "Stage '{}' received {} chars from {}",
                self.name,
                raw.len(),
                self.agent.provider()
            ),
            "stage",
        );

        self.format.parse(&raw, input.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::MockAgent;
    use crate::chart::ChartType;
    use crate::database::{QueryResult, ResultColumn};

    fn state_with_result() -> PipelineState {
        let mut state = PipelineState::new();
        state
            .insert(
                StageKey::QueryResult,
                StageOutput::Table(QueryResult {
                    query: "SELECT Country, Total FROM Sales LIMIT 100".to_string(),
                    columns: vec![
                        ResultColumn {
                            name: "Country".to_string(),
                            type_name: "TEXT".to_string(),
                        },
                        ResultColumn {
                            name: "Total".to_string(),
                            type_name: "REAL".to_string(),
                        },
                    ],
                    rows: vec![],
                }),
            )
            .unwrap();
        state
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("Here:\n```\nSELECT 2\n```\nDone"), "SELECT 2");
        assert_eq!(strip_code_fence("```SELECT 3```"), "SELECT 3");
        assert_eq!(strip_code_fence("  SELECT 4  "), "SELECT 4");
        assert_eq!(strip_code_fence("```sql\nSELECT 5"), "SELECT 5");
    }

    #[test]
    fn test_empty_output_is_rejected() {
        for format in [OutputFormat::Text, OutputFormat::Sql, OutputFormat::Chart] {
            let err = format.parse("  \n ", &PipelineState::new()).unwrap_err();
            assert!(matches!(err, AppError::MalformedOutput(_)));
        }
    }

    #[test]
    fn test_sql_format() {
        let output = OutputFormat::Sql
            .parse("```sql\nSELECT Name FROM Products\n```", &PipelineState::new())
            .unwrap();
        assert_eq!(output, StageOutput::Sql("SELECT Name FROM Products".to_string()));

        assert!(OutputFormat::Sql.parse("```sql\n```", &PipelineState::new()).is_err());

        let output = OutputFormat::Sql
            .parse("select 1", &PipelineState::new())
            .unwrap();
        assert_eq!(output, StageOutput::Sql("select 1".to_string()));
    }

    #[test]
    fn test_sql_format_rejects_prose_and_other_statements() {
        for raw in [
            "Sorry, I cannot answer that.",
            "```sql\nDROP TABLE Products\n```",
            "SELECTION of products",
            "WITH x AS (SELECT 1) SELECT * FROM x",
        ] {
            let err = OutputFormat::Sql.parse(raw, &PipelineState::new()).unwrap_err();
            assert!(matches!(err, AppError::MalformedOutput(_)), "{}", raw);
            assert!(err.to_string().contains("expected a SELECT statement"), "{}", raw);
        }
    }

    #[test]
    fn test_chart_format_checks_columns() {
        let state = state_with_result();
        let output = OutputFormat::Chart
            .parse(
                "```json\n{\"chart_type\": \"pie\", \"x\": \"Country\", \"y\": \"Total\"}\n```",
                &state,
            )
            .unwrap();
        match output {
            StageOutput::Chart(spec) => assert_eq!(spec.chart_type, ChartType::Pie),
            other => panic!("expected chart, got {:?}", other),
        }

        let err = OutputFormat::Chart
            .parse(r#"{"chart_type": "bar", "x": "Region", "y": "Total"}"#, &state)
            .unwrap_err();
        assert!(err.to_string().contains("'Region'"));
    }

    #[tokio::test]
    async fn test_stage_sends_context_and_prompt() {
        let agent = Arc::new(MockAgent::new().respond("sql_writer", "SELECT 1"));
        let stage = AgentStage::new("sql_writer", "Write SQL", StageKey::GeneratedSql, agent.clone())
            .format(OutputFormat::Sql)
            .with_context("Database schema", "Products(Name TEXT)\n");

        let state = PipelineState::new();
        let prompt = state.render_prompt("list products");
        let output = stage
            .execute(StageInput {
                request: "list products",
                state: &state,
                prompt: &prompt,
            })
            .await
            .unwrap();

        assert_eq!(output, StageOutput::Sql("SELECT 1".to_string()));
        let calls = agent.calls();
        assert_eq!(calls[0].instruction, "Write SQL");
        assert!(calls[0]
            .prompt
            .starts_with("Database schema:\nProducts(Name TEXT)\n\nUser request:\nlist products"));
    }

    #[tokio::test]
    async fn test_stage_propagates_agent_error() {
        let agent = Arc::new(MockAgent::new().fail("insight_writer", "quota exceeded"));
        let stage = AgentStage::new("insight_writer", "Explain", StageKey::Explanation, agent);
        let state = PipelineState::new();

        let err = stage
            .execute(StageInput {
                request: "q",
                state: &state,
                prompt: "q",
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Agent error: quota exceeded");
    }
}
