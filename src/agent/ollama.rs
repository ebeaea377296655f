use super::{AgentClient, AgentRequest};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ollama chat client (`/api/chat`, `stream: false`)
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    pub base_url: String,
    pub model: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        })
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Body<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct Resp {
    message: RespMsg,
}

#[derive(Deserialize)]
struct RespMsg {
    content: String,
}

fn parse_response(text: &str) -> AppResult<String> {
    let parsed: Resp = serde_json::from_str(text).map_err(|e| {
        AppError::AgentError(format!("failed to parse ollama response: {}: {}", e, text))
    })?;
    Ok(parsed.message.content)
}

#[async_trait]
impl AgentClient for OllamaClient {
    async fn invoke(&self, request: &AgentRequest<'_>) -> AppResult<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = Body {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: request.instruction,
                },
                Msg {
                    role: "user",
                    content: request.prompt,
                },
            ],
            stream: false,
        };

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(AppError::AgentError(format!("ollama error {}: {}", status, text)));
        }
        parse_response(&text)
    }

    fn provider(&self) -> &'static str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let text = r#"{"model":"llama3","message":{"role":"assistant","content":"hello"},"done":true}"#;
        assert_eq!(parse_response(text).unwrap(), "hello");
    }

    #[test]
    fn test_parse_error_mentions_body() {
        let err = parse_response("not json").unwrap_err();
        assert!(err.to_string().contains("not json"));
    }

    #[test]
    fn test_request_body_shape() {
        let body = Body {
            model: "llama3",
            messages: vec![Msg {
                role: "system",
                content: "be brief",
            }],
            stream: false,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][0]["role"], "system");
    }
}
