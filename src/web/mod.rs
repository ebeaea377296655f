//! HTTP front end
//!
//! Thin JSON layer over the two pipelines and the helper assistant, plus an
//! SSE progress stream and access to the buffered logs.

pub mod handlers;
pub mod report;

pub use report::RunReport;

use crate::assistant::HelperAssistant;
use crate::error::{AppError, AppResult};
use crate::events::EventEmitter;
use crate::logger::{LogLevel, LOGGER};
use crate::pipeline::Pipeline;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared, read-only server state
#[derive(Clone)]
pub struct AppState {
    pub sql_pipeline: Arc<Pipeline>,
    pub code_pipeline: Arc<Pipeline>,
    pub assistant: Arc<HelperAssistant>,
    pub events: EventEmitter,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/examples", get(handlers::examples))
        .route("/api/sql/runs", post(handlers::run_sql))
        .route("/api/code/runs", post(handlers::run_code))
        .route("/api/assistant/messages", post(handlers::assistant_message))
        .route(
            "/api/assistant/sessions/:id",
            delete(handlers::reset_assistant_session),
        )
        .route("/api/events", get(handlers::event_stream))
        .route("/api/logs", get(handlers::get_logs).delete(handlers::clear_logs))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C
pub async fn serve(state: AppState, addr: SocketAddr) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        LOGGER.log(
            LogLevel::Error,
            &format!("Failed to bind {}: {}", addr, e),
            "web",
        );
        AppError::ConfigError(format!("failed to bind {}: {}", addr, e))
    })?;

    LOGGER.log(
        LogLevel::Info,
        &format!("Listening on http://{}", listener.local_addr()?),
        "web",
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    LOGGER.log(LogLevel::Info, "Server stopped gracefully", "web");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        LOGGER.log(
            LogLevel::Warn,
            "Could not install Ctrl-C handler",
            "web",
        );
        std::future::pending::<()>().await;
    }
}
