use super::{AgentClient, GeminiClient, MockAgent, OllamaClient};
use crate::config::{AgentConfig, AgentProvider};
use crate::error::{AppError, AppResult};
use std::sync::Arc;

/// Factory for creating agent clients
///
/// Picks the implementation named by the configured provider.
pub struct AgentClientFactory;

impl AgentClientFactory {
    /// Create an agent client from configuration
    ///
    /// # Errors
    /// Returns `AppError::ConfigError` if Gemini is selected without an API
    /// key, or if the HTTP client cannot be initialized.
    pub fn create(config: &AgentConfig) -> AppResult<Arc<dyn AgentClient>> {
        match config.provider {
            AgentProvider::Mock => Ok(Arc::new(MockAgent::demo())),
            AgentProvider::Gemini => {
                let api_key = config.api_key.as_deref().ok_or_else(|| {
                    AppError::ConfigError(
                        "GOOGLE_API_KEY is required for the gemini provider".to_string(),
                    )
                })?;
                let client = GeminiClient::new(api_key, &config.model)
                    .map_err(|e| AppError::ConfigError(e.to_string()))?;
                Ok(Arc::new(client))
            }
            AgentProvider::Ollama => {
                let client = OllamaClient::new(&config.base_url, &config.model)
                    .map_err(|e| AppError::ConfigError(e.to_string()))?;
                Ok(Arc::new(client))
            }
        }
    }
}
