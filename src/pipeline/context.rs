use crate::chart::ChartSpec;
use crate::database::QueryResult;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key under which a stage records its output
///
/// Each stage of a pipeline owns exactly one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    GeneratedSql,
    QueryResult,
    ChartSpec,
    Explanation,
    GeneratedCode,
    ReviewComments,
    RefactoredCode,
}

impl StageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::GeneratedSql => "generated_sql",
            StageKey::QueryResult => "query_result",
            StageKey::ChartSpec => "chart_spec",
            StageKey::Explanation => "explanation",
            StageKey::GeneratedCode => "generated_code",
            StageKey::ReviewComments => "review_comments",
            StageKey::RefactoredCode => "refactored_code",
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed value produced by a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StageOutput {
    Sql(String),
    Table(QueryResult),
    Chart(ChartSpec),
    Text(String),
}

impl StageOutput {
    /// Render for inclusion in a later stage's prompt
    pub fn render(&self) -> String {
        match self {
            StageOutput::Sql(sql) => format!("```sql\n{}\n```", sql),
            StageOutput::Table(result) => format!(
                "Executed query: {}\n\n{}",
                result.query,
                result.to_markdown()
            ),
            StageOutput::Chart(chart) => serde_json::to_string_pretty(chart)
                .unwrap_or_else(|_| format!("{:?}", chart)),
            StageOutput::Text(text) => text.clone(),
        }
    }
}

/// Ordered, append-only record of stage outputs for one run
///
/// Insertion order is execution order. Writing a key twice is an error, so
/// a stage can only ever see what strictly earlier stages produced.
///
/// # Example
/// ```
/// use insightflow_lib::pipeline::{PipelineState, StageKey, StageOutput};
///
/// let mut state = PipelineState::new();
/// state
///     .insert(StageKey::GeneratedSql, StageOutput::Sql("SELECT 1".into()))
///     .unwrap();
/// assert_eq!(state.sql(), Some("SELECT 1"));
/// assert!(state
///     .insert(StageKey::GeneratedSql, StageOutput::Sql("SELECT 2".into()))
///     .is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineState {
    entries: Vec<(StageKey, StageOutput)>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage output
    pub fn insert(&mut self, key: StageKey, value: StageOutput) -> AppResult<()> {
        if self.contains(key) {
            return Err(AppError::DuplicateStateKey(key.to_string()));
        }
        self.entries.push((key, value));
        Ok(())
    }

    pub fn get(&self, key: StageKey) -> Option<&StageOutput> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// Get a value or fail with `MissingStateKey`
    pub fn get_required(&self, key: StageKey) -> AppResult<&StageOutput> {
        self.get(key)
            .ok_or_else(|| AppError::MissingStateKey(key.to_string()))
    }

    pub fn contains(&self, key: StageKey) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<StageKey> {
        self.entries.iter().map(|(k, _)| *k).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageKey, &StageOutput)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sql(&self) -> Option<&str> {
        match self.get(StageKey::GeneratedSql) {
            Some(StageOutput::Sql(sql)) => Some(sql),
            _ => None,
        }
    }

    pub fn query_result(&self) -> Option<&QueryResult> {
        match self.get(StageKey::QueryResult) {
            Some(StageOutput::Table(result)) => Some(result),
            _ => None,
        }
    }

    pub fn chart(&self) -> Option<&ChartSpec> {
        match self.get(StageKey::ChartSpec) {
            Some(StageOutput::Chart(chart)) => Some(chart),
            _ => None,
        }
    }

    pub fn text(&self, key: StageKey) -> Option<&str> {
        match self.get(key) {
            Some(StageOutput::Text(text)) | Some(StageOutput::Sql(text)) => Some(text),
            _ => None,
        }
    }

    /// Build a prompt from the request and everything recorded so far
    pub fn render_prompt(&self, request: &str) -> String {
        let mut prompt = format!("User request:\n{}\n", request.trim());
        for (key, value) in self.iter() {
            prompt.push_str(&format!("\n### {}\n{}\n", key, value.render()));
        }
        prompt
    }
}
