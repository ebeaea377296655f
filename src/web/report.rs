use crate::pipeline::{PipelineRun, StageKey, StageOutput, StageStatus};
use serde::Serialize;
use uuid::Uuid;

/// JSON view of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,

    /// "completed" or "failed"
    pub status: String,

    /// Stage outputs in execution order
    pub outputs: Vec<ReportOutput>,

    pub stages: Vec<StageReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportOutput {
    pub key: StageKey,
    pub output: StageOutput,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub key: StageKey,
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&PipelineRun> for RunReport {
    fn from(run: &PipelineRun) -> Self {
        Self {
            run_id: run.run_id,
            pipeline: run.pipeline_name.clone(),
            status: run.status.state_name().to_ascii_lowercase(),
            outputs: run
                .state
                .iter()
                .map(|(key, output)| ReportOutput {
                    key,
                    output: output.clone(),
                })
                .collect(),
            stages: run
                .stage_results
                .iter()
                .map(|r| StageReport {
                    name: r.stage_name.clone(),
                    key: r.output_key,
                    status: r.status,
                    duration_ms: r.duration.as_millis() as u64,
                    error: r.error.clone(),
                })
                .collect(),
            error: run.error().map(str::to_string),
            duration_ms: run.total_duration.as_millis() as u64,
        }
    }
}
