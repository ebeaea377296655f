use super::report::RunReport;
use super::AppState;
use crate::assistant::AssistantReply;
use crate::error::{AppError, ErrorKind};
use crate::logger::{LogEntry, LogLevel, LOGGER};
use crate::pipeline::Pipeline;
use crate::workflows::{example_requests, ExampleRequests};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// Error returned by handlers as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match (&err, err.kind()) {
            (AppError::SessionNotFound(_), _) => StatusCode::NOT_FOUND,
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::Stage) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SqlRunRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct CodeRunRequest {
    pub request: String,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub level: Option<String>,
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn examples() -> Json<ExampleRequests> {
    Json(example_requests())
}

pub async fn run_sql(
    State(state): State<AppState>,
    Json(body): Json<SqlRunRequest>,
) -> Result<Json<RunReport>, ApiError> {
    run_pipeline(&state.sql_pipeline, &body.question).await
}

pub async fn run_code(
    State(state): State<AppState>,
    Json(body): Json<CodeRunRequest>,
) -> Result<Json<RunReport>, ApiError> {
    run_pipeline(&state.code_pipeline, &body.request).await
}

/// Each request gets a fresh run; stage failures are reported, not raised
async fn run_pipeline(pipeline: &Pipeline, request: &str) -> Result<Json<RunReport>, ApiError> {
    if request.trim().is_empty() {
        return Err(ApiError::bad_request("request must not be empty"));
    }

    let run = pipeline.run(request).await?;
    Ok(Json(RunReport::from(&run)))
}

/// Send one message to the helper assistant, continuing a session if given
pub async fn assistant_message(
    State(state): State<AppState>,
    Json(body): Json<AssistantMessage>,
) -> Result<Json<AssistantReply>, ApiError> {
    let reply = state.assistant.send(body.session_id, &body.message).await?;
    Ok(Json(reply))
}

pub async fn reset_assistant_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.assistant.reset(session_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::SessionNotFound(session_id.to_string()).into())
    }
}

/// Server-sent stream of pipeline progress events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|msg| match msg {
        Ok(event) => Event::default()
            .event(event.name())
            .json_data(&event)
            .ok()
            .map(Ok),
        // Lagged receivers skip what they missed
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(10)))
}

pub async fn get_logs(Query(query): Query<LogQuery>) -> Result<Json<Vec<LogEntry>>, ApiError> {
    let min_level = match query.level.as_deref() {
        Some(level) => LogLevel::parse(level)
            .ok_or_else(|| ApiError::bad_request(format!("unknown log level '{}'", level)))?,
        None => LogLevel::Debug,
    };

    let logs = LOGGER
        .get_logs()
        .into_iter()
        .filter(|entry| entry.level >= min_level)
        .collect();
    Ok(Json(logs))
}

pub async fn clear_logs() -> StatusCode {
    LOGGER.clear_logs();
    StatusCode::NO_CONTENT
}
