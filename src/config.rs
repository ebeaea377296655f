//! Application configuration
//!
//! Values come from environment variables (a `.env` file is loaded by the
//! binary before this runs) and may be overridden from the command line.
//! [`AppConfigBuilder`] validates the result.

use crate::error::{AppError, AppResult};
use crate::sql_gate::LimitStyle;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default maximum number of rows returned by an approved query
pub const DEFAULT_ROW_LIMIT: u32 = 100;

/// Default wall-clock bound for one query execution
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Default wall-clock bound for one stage invocation
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7860";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Statements that never reach the database
pub const DEFAULT_FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "REPLACE", "MERGE",
    "GRANT", "REVOKE", "EXEC", "EXECUTE", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX",
];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database connection
    pub database: DatabaseConfig,

    /// Remote model selection
    pub agent: AgentConfig,

    /// Safety gate and query execution limits
    pub sql: SqlGuardConfig,

    /// Upper bound on a single stage invocation, in seconds
    pub stage_timeout_secs: u64,

    /// HTTP bind address
    pub bind_addr: SocketAddr,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://data/shop.db`
    pub url: String,

    /// Open the database read-only
    pub read_only: bool,
}

/// Remote model provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentProvider {
    /// Google Gemini `generateContent`
    Gemini,

    /// Local Ollama server
    Ollama,

    /// Scripted responses, no network
    Mock,
}

impl AgentProvider {
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            "mock" => Ok(Self::Mock),
            other => Err(AppError::ConfigError(format!(
                "unknown agent provider '{}' (expected gemini, ollama or mock)",
                other
            ))),
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub provider: AgentProvider,

    /// Model name passed to the provider
    pub model: String,

    /// API key (Gemini only). Never serialized.
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Base URL for Ollama
    pub base_url: String,
}

/// Safety gate configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SqlGuardConfig {
    /// Maximum rows an approved query may return
    pub row_limit: u32,

    /// Query execution timeout, in seconds
    pub query_timeout_secs: u64,

    /// Keywords that cause rejection when they appear as standalone tokens
    pub forbidden_keywords: Vec<String>,

    /// Syntax used for the row-limit rewrite
    pub limit_style: LimitStyle,
}

impl SqlGuardConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl Default for SqlGuardConfig {
    fn default() -> Self {
        Self {
            row_limit: DEFAULT_ROW_LIMIT,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            forbidden_keywords: DEFAULT_FORBIDDEN_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            limit_style: LimitStyle::Limit,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: AgentProvider::Gemini,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key: None,
            base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
        }
    }
}

impl AppConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Build configuration from the process environment
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// Unset or blank variables fall back to defaults; `DATABASE_URL` is
    /// required, and so is `GOOGLE_API_KEY` when the provider is Gemini.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = AppConfigBuilder::new();

        if let Some(url) = get("DATABASE_URL") {
            builder = builder.database_url(url);
        }
        if let Some(value) = get("DATABASE_READ_ONLY") {
            builder = builder.read_only(parse_bool("DATABASE_READ_ONLY", &value)?);
        }
        if let Some(value) = get("AGENT_PROVIDER") {
            builder = builder.provider(AgentProvider::parse(&value)?);
        }
        if let Some(key) = get("GOOGLE_API_KEY") {
            builder = builder.api_key(key);
        }
        if let Some(model) = get("AGENT_MODEL") {
            builder = builder.model(model);
        }
        if let Some(url) = get("OLLAMA_BASE_URL") {
            builder = builder.base_url(url);
        }
        if let Some(value) = get("SQL_ROW_LIMIT") {
            builder = builder.row_limit(parse_number("SQL_ROW_LIMIT", &value)?);
        }
        if let Some(value) = get("SQL_QUERY_TIMEOUT_SECS") {
            builder = builder.query_timeout_secs(parse_number("SQL_QUERY_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("SQL_FORBIDDEN_KEYWORDS") {
            builder = builder.forbidden_keywords(value.split(',').map(str::to_string));
        }
        if let Some(value) = get("SQL_LIMIT_STYLE") {
            builder = builder.limit_style(LimitStyle::parse(&value)?);
        }
        if let Some(value) = get("STAGE_TIMEOUT_SECS") {
            builder = builder.stage_timeout_secs(parse_number("STAGE_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("BIND_ADDR") {
            builder = builder.bind_addr(&value)?;
        }

        builder.build()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::ConfigError(format!("{} must be a number, got '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> AppResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::ConfigError(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}

/// Builder for constructing AppConfig instances with a fluent API
///
/// # Example
/// ```
/// use insightflow_lib::config::{AgentProvider, AppConfigBuilder};
///
/// let config = AppConfigBuilder::new()
///     .database_url("sqlite://shop.db")
///     .provider(AgentProvider::Mock)
///     .row_limit(50)
///     .build()
///     .unwrap();
/// assert_eq!(config.sql.row_limit, 50);
/// ```
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    database_url: Option<String>,
    read_only: Option<bool>,
    agent: AgentConfig,
    model_set: bool,
    sql: SqlGuardConfig,
    stage_timeout_secs: Option<u64>,
    bind_addr: Option<SocketAddr>,
}

impl AppConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn provider(mut self, provider: AgentProvider) -> Self {
        self.agent.provider = provider;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.agent.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.agent.model = model.into();
        self.model_set = true;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.agent.base_url = url.into();
        self
    }

    pub fn row_limit(mut self, limit: u32) -> Self {
        self.sql.row_limit = limit;
        self
    }

    pub fn query_timeout_secs(mut self, secs: u64) -> Self {
        self.sql.query_timeout_secs = secs;
        self
    }

    pub fn forbidden_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sql.forbidden_keywords = keywords
            .into_iter()
            .map(|k| k.into().trim().to_ascii_uppercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    pub fn limit_style(mut self, style: LimitStyle) -> Self {
        self.sql.limit_style = style;
        self
    }

    pub fn stage_timeout_secs(mut self, secs: u64) -> Self {
        self.stage_timeout_secs = Some(secs);
        self
    }

    /// Set the bind address from its textual form
    pub fn bind_addr(mut self, addr: &str) -> AppResult<Self> {
        let parsed = addr.trim().parse().map_err(|_| {
            AppError::BuilderError(format!("invalid bind address '{}'", addr))
        })?;
        self.bind_addr = Some(parsed);
        Ok(self)
    }

    /// Build the AppConfig instance
    ///
    /// # Errors
    /// Returns `AppError::ConfigError` if required values are missing and
    /// `AppError::BuilderError` if a value is out of range.
    pub fn build(mut self) -> AppResult<AppConfig> {
        let url = self
            .database_url
            .ok_or_else(|| AppError::ConfigError("DATABASE_URL is not set".to_string()))?;

        if self.agent.provider == AgentProvider::Gemini && self.agent.api_key.is_none() {
            return Err(AppError::ConfigError(
                "GOOGLE_API_KEY is required for the gemini provider".to_string(),
            ));
        }
        if self.agent.provider == AgentProvider::Ollama && !self.model_set {
            return Err(AppError::ConfigError(
                "AGENT_MODEL is required for the ollama provider".to_string(),
            ));
        }

        if self.sql.row_limit == 0 {
            return Err(AppError::BuilderError(
                "row limit must be greater than zero".to_string(),
            ));
        }
        if self.sql.query_timeout_secs == 0 {
            return Err(AppError::BuilderError(
                "query timeout must be greater than zero".to_string(),
            ));
        }
        if self.sql.forbidden_keywords.is_empty() {
            return Err(AppError::BuilderError(
                "forbidden keyword list must not be empty".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        self.sql
            .forbidden_keywords
            .retain(|keyword| seen.insert(keyword.clone()));

        let stage_timeout_secs = self.stage_timeout_secs.unwrap_or(DEFAULT_STAGE_TIMEOUT_SECS);
        if stage_timeout_secs == 0 {
            return Err(AppError::BuilderError(
                "stage timeout must be greater than zero".to_string(),
            ));
        }

        let bind_addr = match self.bind_addr {
            Some(addr) => addr,
            None => DEFAULT_BIND_ADDR
                .parse()
                .map_err(|_| AppError::BuilderError("invalid default bind address".into()))?,
        };

        Ok(AppConfig {
            database: DatabaseConfig {
                url,
                read_only: self.read_only.unwrap_or(true),
            },
            agent: self.agent,
            sql: self.sql,
            stage_timeout_secs,
            bind_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_from_minimal_env() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite://shop.db"),
            ("GOOGLE_API_KEY", "key"),
        ]))
        .unwrap();

        assert_eq!(config.database.url, "sqlite://shop.db");
        assert!(config.database.read_only);
        assert_eq!(config.agent.provider, AgentProvider::Gemini);
        assert_eq!(config.agent.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.sql.row_limit, DEFAULT_ROW_LIMIT);
        assert_eq!(config.sql.query_timeout(), Duration::from_secs(30));
        assert_eq!(config.sql.limit_style, LimitStyle::Limit);
        assert!(config.sql.forbidden_keywords.contains(&"DROP".to_string()));
        assert_eq!(config.stage_timeout(), Duration::from_secs(120));
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
    }

    #[test]
    fn test_missing_database_url() {
        let err = AppConfig::from_lookup(lookup_from(&[("GOOGLE_API_KEY", "key")])).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_missing_api_key_for_gemini() {
        let err =
            AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "sqlite://x.db")])).unwrap_err();
        assert!(err.to_string().contains("GOOGLE_API_KEY"));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite://x.db"),
            ("DATABASE_READ_ONLY", "false"),
            ("AGENT_PROVIDER", "mock"),
            ("SQL_ROW_LIMIT", "25"),
            ("SQL_QUERY_TIMEOUT_SECS", "5"),
            ("SQL_FORBIDDEN_KEYWORDS", "drop, delete ,"),
            ("SQL_LIMIT_STYLE", "top"),
            ("STAGE_TIMEOUT_SECS", "10"),
            ("BIND_ADDR", "0.0.0.0:9000"),
        ]))
        .unwrap();

        assert!(!config.database.read_only);
        assert_eq!(config.agent.provider, AgentProvider::Mock);
        assert_eq!(config.sql.row_limit, 25);
        assert_eq!(config.sql.query_timeout_secs, 5);
        assert_eq!(config.sql.forbidden_keywords, vec!["DROP", "DELETE"]);
        assert_eq!(config.sql.limit_style, LimitStyle::Top);
        assert_eq!(config.stage_timeout_secs, 10);
        assert_eq!(config.bind_addr.port(), 9000);
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite://x.db"),
            ("AGENT_PROVIDER", "mock"),
            ("SQL_ROW_LIMIT", "  "),
        ]))
        .unwrap();
        assert_eq!(config.sql.row_limit, DEFAULT_ROW_LIMIT);
    }

    #[test]
    fn test_invalid_number() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite://x.db"),
            ("AGENT_PROVIDER", "mock"),
            ("SQL_ROW_LIMIT", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SQL_ROW_LIMIT"));
    }

    #[test]
    fn test_unknown_provider() {
        assert!(AgentProvider::parse("openai").is_err());
        assert_eq!(AgentProvider::parse(" Ollama ").unwrap(), AgentProvider::Ollama);
    }

    #[test]
    fn test_ollama_requires_model() {
        let result = AppConfigBuilder::new()
            .database_url("sqlite://x.db")
            .provider(AgentProvider::Ollama)
            .build();
        assert!(result.is_err());

        let config = AppConfigBuilder::new()
            .database_url("sqlite://x.db")
            .provider(AgentProvider::Ollama)
            .model("llama3.1")
            .build()
            .unwrap();
        assert_eq!(config.agent.model, "llama3.1");
    }

    #[test]
    fn test_builder_rejects_zero_limits() {
        let base = || {
            AppConfigBuilder::new()
                .database_url("sqlite://x.db")
                .provider(AgentProvider::Mock)
        };
        assert!(matches!(
            base().row_limit(0).build(),
            Err(AppError::BuilderError(_))
        ));
        assert!(base().query_timeout_secs(0).build().is_err());
        assert!(base().stage_timeout_secs(0).build().is_err());
        assert!(base()
            .forbidden_keywords(Vec::<String>::new())
            .build()
            .is_err());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = AppConfigBuilder::new()
            .database_url("sqlite://x.db")
            .api_key("secret")
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
