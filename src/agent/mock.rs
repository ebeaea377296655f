use super::{AgentClient, AgentRequest};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Scripted behavior for one stage
#[derive(Debug, Clone)]
enum Script {
    Reply(String),
    Fail(String),
    Slow(Duration, String),
    Sequence(Vec<String>),
}

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub stage_name: String,
    pub instruction: String,
    pub prompt: String,
}

/// Mock agent for development and testing
///
/// Responses are scripted per stage name. Unscripted stages answer
/// `"<stage> output"`, so runs are deterministic.
#[derive(Debug, Default)]
pub struct MockAgent {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned answers for the built-in workflows, usable against any SQLite file
    pub fn demo() -> Self {
        Self::new()
            .respond(
                "sql_writer",
                "```sql\nSELECT type, COUNT(*) AS objects FROM sqlite_master GROUP BY type\n```",
            )
            .respond(
                "chart_designer",
                r#"{"chart_type": "bar", "x": "type", "y": "objects", "title": "Schema objects by type"}"#,
            )
            .respond(
                "insight_writer",
                "The database contains the schema objects listed above, grouped by type.",
            )
            .respond(
                "code_writer",
                "```python\ndef fibonacci(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a\n```",
            )
            .respond(
                "code_reviewer",
                "- Validate that n is non-negative.\n- Add a docstring.",
            )
            .respond(
                "code_refactorer",
                "```python\ndef fibonacci(n: int) -> int:\n    \"\"\"Return the n-th Fibonacci number.\"\"\"\n    if n < 0:\n        raise ValueError(\"n must be non-negative\")\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a\n```",
            )
            .respond_sequence(
                "helper_assistant",
                [
                    r#"{"tool": "calculate", "arguments": {"expression": "15 * 23 + 45"}}"#,
                    "15 * 23 + 45 = 420.",
                ],
            )
    }

    /// Answer `text` whenever `stage` is invoked
    pub fn respond(mut self, stage: &str, text: impl Into<String>) -> Self {
        self.scripts
            .insert(stage.to_string(), Script::Reply(text.into()));
        self
    }

    /// Fail every invocation of `stage` with an agent error
    pub fn fail(mut self, stage: &str, message: impl Into<String>) -> Self {
        self.scripts
            .insert(stage.to_string(), Script::Fail(message.into()));
        self
    }

    /// Answer `text` after sleeping for `delay`
    pub fn respond_after(mut self, stage: &str, delay: Duration, text: impl Into<String>) -> Self {
        self.scripts
            .insert(stage.to_string(), Script::Slow(delay, text.into()));
        self
    }

    /// Answer the n-th invocation of `stage` with the n-th reply; the last
    /// reply repeats once the sequence runs out
    pub fn respond_sequence<I, S>(mut self, stage: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies = replies.into_iter().map(Into::into).collect();
        self.scripts
            .insert(stage.to_string(), Script::Sequence(replies));
        self
    }

    /// All invocations so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Prompts sent to one stage, in order
    pub fn prompts_for(&self, stage: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.stage_name == stage)
            .map(|c| c.prompt)
            .collect()
    }
}

#[async_trait]
impl AgentClient for MockAgent {
    async fn invoke(&self, request: &AgentRequest<'_>) -> AppResult<String> {
        let mut seen = 0;
        if let Ok(mut calls) = self.calls.lock() {
            seen = calls
                .iter()
                .filter(|c| c.stage_name == request.stage_name)
                .count();
            calls.push(RecordedCall {
                stage_name: request.stage_name.to_string(),
                instruction: request.instruction.to_string(),
                prompt: request.prompt.to_string(),
            });
        }

        match self.scripts.get(request.stage_name) {
            Some(Script::Reply(text)) => Ok(text.clone()),
            Some(Script::Fail(message)) => Err(AppError::AgentError(message.clone())),
            Some(Script::Slow(delay, text)) => {
                sleep(*delay).await;
                Ok(text.clone())
            }
            Some(Script::Sequence(replies)) => match replies.get(seen).or(replies.last()) {
                Some(text) => Ok(text.clone()),
                None => Ok(format!("{} output", request.stage_name)),
            },
            None => Ok(format!("{} output", request.stage_name)),
        }
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}
