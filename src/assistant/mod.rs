//! Conversational helper with calculator and date/time tools
//!
//! Each message is answered by a short loop: the model either answers the
//! user directly or asks for one tool call as JSON
//! (`{"tool": "calculate", "arguments": {"expression": "2 + 2"}}`). Tool
//! results are appended to the transcript and the model is asked again.
//! Conversations are kept per session until reset.

pub mod calculator;
pub mod tools;

pub use tools::{Tool, ToolCall, ToolRegistry};

use crate::agent::{AgentClient, AgentRequest};
use crate::error::{AppError, AppResult};
use crate::logger::{LogLevel, LOGGER};
use crate::pipeline::stages::strip_code_fence;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Name the assistant uses when invoking the agent
pub const ASSISTANT_NAME: &str = "helper_assistant";

/// Tool calls allowed while answering one message
pub const MAX_TOOL_CALLS: usize = 4;

/// Sessions kept before the least recently used one is dropped
const MAX_SESSIONS: usize = 1000;

const INSTRUCTION: &str = "You are a helpful assistant with access to tools. Use them when \
     needed to answer the user's question. To call a tool, answer with JSON only: \
     {\"tool\": <name>, \"arguments\": {...}}. After a tool result, either call another tool \
     or answer the user. Answer in the same language as the user's question. Be friendly \
     and concise.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One entry of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    fn render(&self) -> String {
        match self.role {
            Role::User => format!("User: {}", self.content),
            Role::Assistant => format!("Assistant: {}", self.content),
            Role::Tool => format!("Tool result: {}", self.content),
        }
    }
}

/// A tool call made while answering, with its result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
    pub result: Value,
}

/// Answer to one user message
#[derive(Debug, Clone, Serialize)]
pub struct AssistantReply {
    pub session_id: Uuid,
    pub reply: String,
    pub tool_calls: Vec<ToolInvocation>,
}

struct Session {
    turns: Vec<Turn>,
    last_used: Instant,
}

/// Tool-using assistant with per-session history
pub struct HelperAssistant {
    agent: Arc<dyn AgentClient>,
    tools: ToolRegistry,
    instruction: String,
    timeout: Duration,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl HelperAssistant {
    pub fn new(agent: Arc<dyn AgentClient>, tools: ToolRegistry, timeout: Duration) -> Self {
        let instruction = format!("{}\n\nTools:\n{}", INSTRUCTION, tools.describe());
        Self {
            agent,
            tools,
            instruction,
            timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    fn lock_sessions(&self) -> AppResult<std::sync::MutexGuard<'_, HashMap<Uuid, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| AppError::GenericError("session store lock poisoned".to_string()))
    }

    /// Answer `message`, continuing `session_id` or starting a new session
    ///
    /// # Errors
    /// `SessionNotFound` for an unknown session id. Agent failures and
    /// timeouts are returned as is; the session is left unchanged.
    pub async fn send(&self, session_id: Option<Uuid>, message: &str) -> AppResult<AssistantReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AppError::InvalidRequest("message must not be empty".to_string()));
        }

        let (session_id, mut transcript) = match session_id {
            Some(id) => {
                let sessions = self.lock_sessions()?;
                let session = sessions
                    .get(&id)
                    .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
                (id, session.turns.clone())
            }
            None => (Uuid::new_v4(), Vec::new()),
        };
        transcript.push(Turn::new(Role::User, message));

        let mut tool_calls = Vec::new();
        let reply = loop {
            let raw = self.invoke(&transcript).await?;

            let Some(call) = parse_tool_call(&raw) else {
                let reply = raw.trim().to_string();
                if reply.is_empty() {
                    return Err(AppError::MalformedOutput("empty output".to_string()));
                }
                break reply;
            };

            if tool_calls.len() == MAX_TOOL_CALLS {
                return Err(AppError::MalformedOutput(format!(
                    "more than {} tool calls for one message",
                    MAX_TOOL_CALLS
                )));
            }

            let result = self.tools.call(&call);
            LOGGER.log(
                LogLevel::Info,
                &format!(
                    "Tool '{}' returned {} (session: {})",
                    call.tool, result["status"], session_id
                ),
                "assistant",
            );
            transcript.push(Turn::new(Role::Tool, format!("{} {}", call.tool, result)));
            tool_calls.push(ToolInvocation {
                tool: call.tool,
                arguments: call.arguments,
                result,
            });
        };
        transcript.push(Turn::new(Role::Assistant, reply.clone()));

        self.store(session_id, transcript)?;
        Ok(AssistantReply {
            session_id,
            reply,
            tool_calls,
        })
    }

    async fn invoke(&self, transcript: &[Turn]) -> AppResult<String> {
        let prompt = transcript
            .iter()
            .map(Turn::render)
            .collect::<Vec<_>>()
            .join("\n");
        let request = AgentRequest {
            stage_name: ASSISTANT_NAME,
            instruction: &self.instruction,
            prompt: &prompt,
        };

        match tokio::time::timeout(self.timeout, self.agent.invoke(&request)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StageTimeout(self.timeout)),
        }
    }

    fn store(&self, session_id: Uuid, turns: Vec<Turn>) -> AppResult<()> {
        let mut sessions = self.lock_sessions()?;
        if !sessions.contains_key(&session_id) && sessions.len() >= MAX_SESSIONS {
            if let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(id, _)| *id)
            {
                sessions.remove(&oldest);
            }
        }
        sessions.insert(
            session_id,
            Session {
                turns,
                last_used: Instant::now(),
            },
        );
        Ok(())
    }

    /// Conversation so far, oldest first
    pub fn history(&self, session_id: Uuid) -> AppResult<Vec<Turn>> {
        let sessions = self.lock_sessions()?;
        sessions
            .get(&session_id)
            .map(|s| s.turns.clone())
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))
    }

    /// Forget a session; returns whether it existed
    pub fn reset(&self, session_id: Uuid) -> AppResult<bool> {
        let existed = self.lock_sessions()?.remove(&session_id).is_some();
        if existed {
            LOGGER.log(
                LogLevel::Info,
                &format!("Session {} reset", session_id),
                "assistant",
            );
        }
        Ok(existed)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or_default()
    }
}

/// A tool request, when the whole answer is one JSON object naming a tool
pub fn parse_tool_call(raw: &str) -> Option<ToolCall> {
    let text = strip_code_fence(raw);
    if !text.starts_with('{') {
        return None;
    }
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::MockAgent;
    use serde_json::json;

    fn assistant(agent: MockAgent) -> (Arc<MockAgent>, HelperAssistant) {
        let agent = Arc::new(agent);
        let assistant =
            HelperAssistant::new(agent.clone(), ToolRegistry::standard(), Duration::from_secs(5));
        (agent, assistant)
    }

    const CALCULATE: &str =
        r#"{"tool": "calculate", "arguments": {"expression": "15 * 23 + 45"}}"#;

    #[test]
    fn test_parse_tool_call() {
        assert_eq!(
            parse_tool_call(&format!("```json\n{}\n```", CALCULATE)).unwrap().tool,
            "calculate"
        );
        assert!(parse_tool_call("The answer is 4.").is_none());
        assert!(parse_tool_call(r#"{"answer": 4}"#).is_none());
        assert_eq!(
            parse_tool_call(r#"{"tool": "get_current_datetime"}"#)
                .unwrap()
                .arguments,
            Value::Null
        );
    }

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let (agent, assistant) = assistant(
            MockAgent::new().respond_sequence(ASSISTANT_NAME, [CALCULATE, "It is 420."]),
        );

        let reply = assistant.send(None, "Calculate 15 * 23 + 45").await.unwrap();
        assert_eq!(reply.reply, "It is 420.");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].result["result"], json!(420));

        let prompts = agent.prompts_for(ASSISTANT_NAME);
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], "User: Calculate 15 * 23 + 45");
        assert!(prompts[1].contains("Tool result: calculate {"));
        assert!(prompts[1].contains("\"result\":420"));
        assert!(agent.calls()[0].instruction.contains("- get_current_datetime: "));
    }

    #[tokio::test]
    async fn test_session_is_reused_and_reset() {
        let (agent, assistant) =
            assistant(MockAgent::new().respond_sequence(ASSISTANT_NAME, ["Hi!", "Still here."]));

        let first = assistant.send(None, "Hello").await.unwrap();
        let second = assistant
            .send(Some(first.session_id), "Are you there?")
            .await
            .unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(
            agent.prompts_for(ASSISTANT_NAME)[1],
            "User: Hello\nAssistant: Hi!\nUser: Are you there?"
        );
        assert_eq!(assistant.history(first.session_id).unwrap().len(), 4);

        assert!(assistant.reset(first.session_id).unwrap());
        assert!(!assistant.reset(first.session_id).unwrap());
        let err = assistant
            .send(Some(first.session_id), "Hello again")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let (_, assistant) = assistant(MockAgent::new());
        let a = assistant.send(None, "one").await.unwrap();
        let b = assistant.send(None, "two").await.unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(assistant.session_count(), 2);
        assert_eq!(assistant.history(b.session_id).unwrap()[0].content, "two");
    }

    #[tokio::test]
    async fn test_tool_call_limit() {
        let (_, assistant) =
            assistant(MockAgent::new().respond(ASSISTANT_NAME, r#"{"tool": "get_current_datetime"}"#));

        let err = assistant.send(None, "What day is it?").await.unwrap_err();
        assert!(matches!(err, AppError::MalformedOutput(_)));
        assert_eq!(assistant.session_count(), 0);
    }

    #[tokio::test]
    async fn test_agent_failure_leaves_session_unchanged() {
        let (_, assistant) =
            assistant(MockAgent::new().respond_sequence(ASSISTANT_NAME, ["Hi!"]));
        let first = assistant.send(None, "Hello").await.unwrap();

        let failing = HelperAssistant::new(
            Arc::new(MockAgent::new().fail(ASSISTANT_NAME, "quota exceeded")),
            ToolRegistry::standard(),
            Duration::from_secs(5),
        );
        assert!(failing.send(None, "Hello").await.is_err());
        assert_eq!(failing.session_count(), 0);
        assert_eq!(assistant.history(first.session_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (agent, assistant) = assistant(MockAgent::new());
        let err = assistant.send(None, "   ").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert!(agent.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_timeout() {
        let agent = Arc::new(MockAgent::new().respond_after(
            ASSISTANT_NAME,
            tokio::time::Duration::from_secs(60),
            "late",
        ));
        let assistant =
            HelperAssistant::new(agent, ToolRegistry::standard(), Duration::from_secs(1));
        let err = assistant.send(None, "Hello").await.unwrap_err();
        assert!(matches!(err, AppError::StageTimeout(_)));
    }
}
