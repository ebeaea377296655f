//! Pipeline stages
//!
//! - `AgentStage` - asks the remote agent for one typed answer
//! - `QueryStage` - gates and executes the generated SQL

pub mod agent;
pub mod query;

pub use agent::{strip_code_fence, AgentStage, OutputFormat};
pub use query::QueryStage;
