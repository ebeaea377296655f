//! Remote agent collaborator
//!
//! A stage hands the agent an instruction and a prompt and gets back the
//! complete final text of the answer. Streaming fragments never reach the
//! pipeline.

pub mod factory;
pub mod gemini;
pub mod mock;
pub mod ollama;

pub use factory::AgentClientFactory;
pub use gemini::GeminiClient;
pub use mock::MockAgent;
pub use ollama::OllamaClient;

use crate::error::AppResult;
use async_trait::async_trait;

/// One invocation of a named stage
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    pub stage_name: &'a str,
    pub instruction: &'a str,
    pub prompt: &'a str,
}

/// Trait for remote model implementations
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Run one stage and return its final text
    async fn invoke(&self, request: &AgentRequest<'_>) -> AppResult<String>;

    /// Short provider name for logs
    fn provider(&self) -> &'static str;
}
