use super::context::{PipelineState, StageOutput};
use super::core::{PipelineRun, PipelineStage, RunFailure, StageInput, StageResult};
use crate::config::DEFAULT_STAGE_TIMEOUT_SECS;
use crate::error::{AppError, AppResult};
use crate::events::EventEmitter;
use crate::logger::{LogLevel, LOGGER};
use crate::state_machine::RunState;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Pipeline executor that runs stages sequentially
///
/// A pipeline is immutable once built and can be shared across concurrent
/// runs; every run gets its own state.
///
/// # Example
/// ```ignore
/// let pipeline = Pipeline::builder("code_review")
///     .add_stage(writer)
///     .add_stage(reviewer)
///     .build()?;
///
/// let run = pipeline.run("Write a palindrome check").await?;
/// ```
pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn PipelineStage>>,
    stage_timeout: Duration,
    events: Option<EventEmitter>,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Get the pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    /// Run every stage against `request`
    ///
    /// Stages execute strictly in order. The first failure stops the run;
    /// the returned `PipelineRun` then holds the outputs of the stages before
    /// it and a failure record. `Err` is reserved for internal faults.
    pub async fn run(&self, request: &str) -> AppResult<PipelineRun> {
        let run_id = Uuid::new_v4();
        let total = self.stages.len();

        LOGGER.log(
            LogLevel::Info,
            &format!(
                "Starting pipeline '{}' with {} stages (run: {})",
                self.name, total, run_id
            ),
            "pipeline",
        );

        if let Some(events) = &self.events {
            events.pipeline_started(run_id, &self.name, total);
        }

        let pipeline_start = Instant::now();
        let mut state = PipelineState::new();
        let mut stage_results = Vec::with_capacity(total);
        let mut status = RunState::Pending.start()?;

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_name = stage.name();
            let output_key = stage.output_key();

            LOGGER.log(
                LogLevel::Info,
                &format!(
                    "Executing stage {}/{}: {} (run: {})",
                    index + 1,
                    total,
                    stage_name,
                    run_id
                ),
                "pipeline",
            );

            if let Some(events) = &self.events {
                events.pipeline_stage_started(run_id, &self.name, stage_name, index, total);
            }

            let stage_start = Instant::now();
            let result = self.execute_stage(stage.as_ref(), request, &state).await;
            let outcome = result.and_then(|output| state.insert(output_key, output));
            let duration = stage_start.elapsed();

            match outcome {
                Ok(()) => {
                    LOGGER.log(
                        LogLevel::Info,
                        &format!(
                            "Stage '{}' completed successfully in {:.2}s (run: {})",
                            stage_name,
                            duration.as_secs_f64(),
                            run_id
                        ),
                        "pipeline",
                    );

                    if let Some(events) = &self.events {
                        events.pipeline_stage_completed(
                            run_id,
                            &self.name,
                            stage_name,
                            output_key.as_str(),
                            index,
                            total,
                            duration.as_millis() as u64,
                        );
                    }

                    stage_results.push(StageResult::success(stage_name, output_key, duration));
                    status = status.advance(total)?;
                }
                Err(e) => {
                    let message = e.user_message(stage_name);
                    LOGGER.log(
                        LogLevel::Error,
                        &format!("Stage '{}' failed: {} (run: {})", stage_name, e, run_id),
                        "pipeline",
                    );

                    if let Some(events) = &self.events {
                        events.pipeline_failed(run_id, &self.name, stage_name, index, &message);
                    }

                    stage_results.push(StageResult::failure(
                        stage_name,
                        output_key,
                        message.clone(),
                        duration,
                    ));
                    stage_results.extend(
                        self.stages[index + 1..]
                            .iter()
                            .map(|s| StageResult::not_run(s.name(), s.output_key())),
                    );

                    return Ok(PipelineRun {
                        run_id,
                        pipeline_name: self.name.clone(),
                        request: request.to_string(),
                        state,
                        status: status.fail(message.clone())?,
                        stage_results,
                        total_duration: pipeline_start.elapsed(),
                        failure: Some(RunFailure {
                            stage_index: index,
                            stage_name: stage_name.to_string(),
                            kind: e.kind(),
                            message,
                        }),
                    });
                }
            }
        }

        let total_duration = pipeline_start.elapsed();
        LOGGER.log(
            LogLevel::Info,
            &format!(
                "Pipeline '{}' completed successfully in {:.2}s (run: {})",
                self.name,
                total_duration.as_secs_f64(),
                run_id
            ),
            "pipeline",
        );

        if let Some(events) = &self.events {
            events.pipeline_completed(
                run_id,
                &self.name,
                total_duration.as_millis() as u64,
                stage_results.len(),
            );
        }

        Ok(PipelineRun {
            run_id,
            pipeline_name: self.name.clone(),
            request: request.to_string(),
            state,
            status,
            stage_results,
            total_duration,
            failure: None,
        })
    }

    async fn execute_stage(
        &self,
        stage: &dyn PipelineStage,
        request: &str,
        state: &PipelineState,
    ) -> AppResult<StageOutput> {
        stage.pre_execute(state)?;

        let prompt = state.render_prompt(request);
        let input = StageInput {
            request,
            state,
            prompt: &prompt,
        };

        match tokio::time::timeout(self.stage_timeout, stage.execute(input)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StageTimeout(self.stage_timeout)),
        }
    }
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Box<dyn PipelineStage>>,
    stage_timeout: Duration,
    events: Option<EventEmitter>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            events: None,
        }
    }

    /// Add a stage to the pipeline
    pub fn add_stage<S: PipelineStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Add a boxed stage to the pipeline
    pub fn add_boxed_stage(mut self, stage: Box<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Bound every stage invocation
    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Publish progress events
    pub fn events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the pipeline
    ///
    /// # Errors
    /// Returns `AppError::PipelineDefinition` if there are no stages, if two
    /// stages write the same key, or if a stage reads a key that no earlier
    /// stage writes.
    pub fn build(self) -> AppResult<Pipeline> {
        if self.stages.is_empty() {
            return Err(AppError::PipelineDefinition(format!(
                "pipeline '{}' has no stages",
                self.name
            )));
        }
        if self.stage_timeout.is_zero() {
            return Err(AppError::PipelineDefinition(
                "stage timeout must be greater than zero".to_string(),
            ));
        }

        let mut written = HashSet::new();
        for stage in &self.stages {
            for key in stage.reads() {
                if !written.contains(key) {
                    return Err(AppError::PipelineDefinition(format!(
                        "stage '{}' reads '{}' which no earlier stage writes",
                        stage.name(),
                        key
                    )));
                }
            }
            if !written.insert(stage.output_key()) {
                return Err(AppError::PipelineDefinition(format!(
                    "stage '{}' writes '{}' which another stage already writes",
                    stage.name(),
                    stage.output_key()
                )));
            }
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
            stage_timeout: self.stage_timeout,
            events: self.events,
        })
    }

    /// Build and wrap for sharing across concurrent runs
    pub fn build_shared(self) -> AppResult<Arc<Pipeline>> {
        self.build().map(Arc::new)
    }
}
