//! Sequential hand-off pipeline
//!
//! A pipeline runs an ordered list of stages. Each stage receives the user's
//! request plus every output recorded so far, and its own output is appended
//! to the run's `PipelineState` under the stage's key. The first failure stops
//! the run and the partial state is returned with a failure record.
//!
//! # Example
//! ```
//! use insightflow_lib::agent::MockAgent;
//! use insightflow_lib::pipeline::stages::AgentStage;
//! use insightflow_lib::pipeline::{Pipeline, StageKey};
//! use std::sync::Arc;
//!
//! let agent = Arc::new(MockAgent::new());
//! let pipeline = Pipeline::builder("code_review")
//!     .add_stage(AgentStage::new("code_writer", "Write code", StageKey::GeneratedCode, agent.clone()))
//!     .add_stage(
//!         AgentStage::new("code_reviewer", "Review code", StageKey::ReviewComments, agent)
//!             .reading(StageKey::GeneratedCode),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let run = runtime.block_on(pipeline.run("fibonacci")).unwrap();
//! assert!(run.is_success());
//! ```

pub mod context;
pub mod core;
pub mod executor;
pub mod stages;

// Re-export main types
pub use context::{PipelineState, StageKey, StageOutput};
pub use core::{PipelineRun, PipelineStage, RunFailure, StageInput, StageResult, StageStatus};
pub use executor::{Pipeline, PipelineBuilder};
