use crate::error::{AppResult, ErrorKind};
use crate::state_machine::RunState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::context::{PipelineState, StageKey, StageOutput};

/// What a stage sees when it runs
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    /// The user's original request
    pub request: &'a str,

    /// Outputs of every earlier stage
    pub state: &'a PipelineState,

    /// Request plus rendered state, ready to send to a model
    pub prompt: &'a str,
}

/// A single stage in a pipeline
///
/// Each stage turns the accumulated state into one typed output, which the
/// executor records under the stage's key.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use insightflow_lib::error::AppResult;
/// use insightflow_lib::pipeline::{PipelineStage, StageInput, StageKey, StageOutput};
///
/// struct Shout;
///
/// #[async_trait]
/// impl PipelineStage for Shout {
///     fn name(&self) -> &str {
///         "shout"
///     }
///
///     fn output_key(&self) -> StageKey {
///         StageKey::GeneratedCode
///     }
///
///     async fn execute(&self, input: StageInput<'_>) -> AppResult<StageOutput> {
///         Ok(StageOutput::Text(input.request.to_uppercase()))
///     }
/// }
/// ```
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Get stage name for logging and progress tracking
    fn name(&self) -> &str;

    /// Key this stage writes
    fn output_key(&self) -> StageKey;

    /// Keys this stage requires from earlier stages
    fn reads(&self) -> &[StageKey] {
        &[]
    }

    /// Called before execute() - checks that every declared read is present
    fn pre_execute(&self, state: &PipelineState) -> AppResult<()> {
        for key in self.reads() {
            state.get_required(*key)?;
        }
        Ok(())
    }

    /// Execute this stage
    ///
    /// An error stops the pipeline; nothing is written for this stage.
    async fn execute(&self, input: StageInput<'_>) -> AppResult<StageOutput>;
}

/// Outcome of one stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    NotRun,
}

/// Result of a pipeline stage execution
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name
    pub stage_name: String,

    /// Key the stage writes
    pub output_key: StageKey,

    pub status: StageStatus,

    /// User-facing error message if failed
    pub error: Option<String>,

    /// Duration of execution
    pub duration: Duration,
}

impl StageResult {
    /// Create a successful stage result
    pub fn success(stage_name: impl Into<String>, output_key: StageKey, duration: Duration) -> Self {
        Self {
            stage_name: stage_name.into(),
            output_key,
            status: StageStatus::Completed,
            error: None,
            duration,
        }
    }

    /// Create a failed stage result
    pub fn failure(
        stage_name: impl Into<String>,
        output_key: StageKey,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            output_key,
            status: StageStatus::Failed,
            error: Some(error.into()),
            duration,
        }
    }

    /// Create a result for a stage after the failing one
    pub fn not_run(stage_name: impl Into<String>, output_key: StageKey) -> Self {
        Self {
            stage_name: stage_name.into(),
            output_key,
            status: StageStatus::NotRun,
            error: None,
            duration: Duration::from_secs(0),
        }
    }
}

/// Where and why a run stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage_index: usize,
    pub stage_name: String,
    pub kind: ErrorKind,

    /// "query rejected: ...", "query failed: ..." or "stage <name> failed: ..."
    pub message: String,
}

/// Result of a complete pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    pub request: String,

    /// Outputs of every stage that completed, in order
    pub state: PipelineState,

    /// Terminal lifecycle state
    pub status: RunState,

    /// Results from each stage, including stages that never ran
    pub stage_results: Vec<StageResult>,

    /// Total duration
    pub total_duration: Duration,

    pub failure: Option<RunFailure>,
}

impl PipelineRun {
    pub fn is_success(&self) -> bool {
        self.status == RunState::Completed
    }

    /// Get the number of stages that completed
    pub fn completed_stages(&self) -> usize {
        self.stage_results
            .iter()
            .filter(|r| r.status == StageStatus::Completed)
            .count()
    }

    /// Get the stage that failed (if any)
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stage_results
            .iter()
            .find(|r| r.status == StageStatus::Failed)
    }

    pub fn output(&self, key: StageKey) -> Option<&StageOutput> {
        self.state.get(key)
    }

    /// User-facing error message if failed
    pub fn error(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_result_success() {
        let result = StageResult::success("sql_writer", StageKey::GeneratedSql, Duration::from_secs(1));
        assert_eq!(result.status, StageStatus::Completed);
        assert!(result.error.is_none());
        assert_eq!(result.stage_name, "sql_writer");
    }

    #[test]
    fn test_stage_result_failure() {
        let result = StageResult::failure(
            "sql_writer",
            StageKey::GeneratedSql,
            "stage sql_writer failed: Agent error: 503",
            Duration::from_secs(1),
        );
        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(
            result.error.as_deref(),
            Some("stage sql_writer failed: Agent error: 503")
        );
    }

    #[test]
    fn test_stage_result_not_run() {
        let result = StageResult::not_run("insight_writer", StageKey::Explanation);
        assert_eq!(result.status, StageStatus::NotRun);
        assert_eq!(result.duration, Duration::from_secs(0));
    }

    #[test]
    fn test_pipeline_run_accessors() {
        let run = PipelineRun {
            run_id: Uuid::new_v4(),
            pipeline_name: "code_review".to_string(),
            request: "fibonacci".to_string(),
            state: PipelineState::new(),
            status: RunState::Failed {
                stage_index: 1,
                reason: "stage code_reviewer failed: Agent error: boom".to_string(),
            },
            stage_results: vec![
                StageResult::success("code_writer", StageKey::GeneratedCode, Duration::from_secs(1)),
                StageResult::failure(
                    "code_reviewer",
                    StageKey::ReviewComments,
                    "stage code_reviewer failed: Agent error: boom",
                    Duration::from_secs(1),
                ),
                StageResult::not_run("code_refactorer", StageKey::RefactoredCode),
            ],
            total_duration: Duration::from_secs(2),
            failure: Some(RunFailure {
                stage_index: 1,
                stage_name: "code_reviewer".to_string(),
                kind: ErrorKind::Stage,
                message: "stage code_reviewer failed: Agent error: boom".to_string(),
            }),
        };

        assert!(!run.is_success());
        assert_eq!(run.completed_stages(), 1);
        assert_eq!(run.failed_stage().unwrap().stage_name, "code_reviewer");
        assert!(run.error().unwrap().starts_with("stage code_reviewer failed"));
    }
}
