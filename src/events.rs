use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Event names for the SSE stream
pub mod event_names {
    pub const PIPELINE_STARTED: &str = "pipeline:started";
    pub const PIPELINE_STAGE_STARTED: &str = "pipeline:stage-started";
    pub const PIPELINE_STAGE_COMPLETED: &str = "pipeline:stage-completed";
    pub const PIPELINE_COMPLETED: &str = "pipeline:completed";
    pub const PIPELINE_FAILED: &str = "pipeline:failed";
}

/// Default number of events buffered for slow subscribers
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Pipeline started event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStartedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub total_stages: usize,
    pub timestamp: String,
}

/// Pipeline stage started event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStageStartedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage_name: String,
    pub stage_index: usize,
    pub total_stages: usize,
    pub timestamp: String,
}

/// Pipeline stage completed event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStageCompletedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage_name: String,
    pub output_key: String,
    pub stage_index: usize,
    pub total_stages: usize,
    pub duration_ms: u64,
    pub timestamp: String,
}

/// Pipeline completed event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCompletedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub total_duration_ms: u64,
    pub stages_completed: usize,
    pub timestamp: String,
}

/// Pipeline failed event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineFailedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub failed_stage: String,
    pub stage_index: usize,
    pub error: String,
    pub timestamp: String,
}

/// Any pipeline progress event
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PipelineEvent {
    Started(PipelineStartedEvent),
    StageStarted(PipelineStageStartedEvent),
    StageCompleted(PipelineStageCompletedEvent),
    Completed(PipelineCompletedEvent),
    Failed(PipelineFailedEvent),
}

impl PipelineEvent {
    /// Name used as the SSE event type
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Started(_) => event_names::PIPELINE_STARTED,
            PipelineEvent::StageStarted(_) => event_names::PIPELINE_STAGE_STARTED,
            PipelineEvent::StageCompleted(_) => event_names::PIPELINE_STAGE_COMPLETED,
            PipelineEvent::Completed(_) => event_names::PIPELINE_COMPLETED,
            PipelineEvent::Failed(_) => event_names::PIPELINE_FAILED,
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            PipelineEvent::Started(e) => e.run_id,
            PipelineEvent::StageStarted(e) => e.run_id,
            PipelineEvent::StageCompleted(e) => e.run_id,
            PipelineEvent::Completed(e) => e.run_id,
            PipelineEvent::Failed(e) => e.run_id,
        }
    }
}

/// Helper for publishing pipeline events
///
/// Events go to a broadcast channel. Having no subscriber is not an error.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Emit pipeline started event
    pub fn pipeline_started(&self, run_id: Uuid, pipeline_name: &str, total_stages: usize) {
        self.emit(PipelineEvent::Started(PipelineStartedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            total_stages,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }));
    }

    /// Emit pipeline stage started event
    pub fn pipeline_stage_started(
        &self,
        run_id: Uuid,
        pipeline_name: &str,
        stage_name: &str,
        stage_index: usize,
        total_stages: usize,
    ) {
        self.emit(PipelineEvent::StageStarted(PipelineStageStartedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            stage_name: stage_name.to_string(),
            stage_index,
            total_stages,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }));
    }

    /// Emit pipeline stage completed event
    #[allow(clippy::too_many_arguments)]
    pub fn pipeline_stage_completed(
        &self,
        run_id: Uuid,
        pipeline_name: &str,
        stage_name: &str,
        output_key: &str,
        stage_index: usize,
        total_stages: usize,
        duration_ms: u64,
    ) {
        self.emit(PipelineEvent::StageCompleted(PipelineStageCompletedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            stage_name: stage_name.to_string(),
            output_key: output_key.to_string(),
            stage_index,
            total_stages,
            duration_ms,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }));
    }

    /// Emit pipeline completed event
    pub fn pipeline_completed(
        &self,
        run_id: Uuid,
        pipeline_name: &str,
        total_duration_ms: u64,
        stages_completed: usize,
    ) {
        self.emit(PipelineEvent::Completed(PipelineCompletedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            total_duration_ms,
            stages_completed,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }));
    }

    /// Emit pipeline failed event
    pub fn pipeline_failed(
        &self,
        run_id: Uuid,
        pipeline_name: &str,
        failed_stage: &str,
        stage_index: usize,
        error: &str,
    ) {
        self.emit(PipelineEvent::Failed(PipelineFailedEvent {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            failed_stage: failed_stage.to_string(),
            stage_index,
            error: error.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }));
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
