use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Pending,
    Running { stage_index: usize },
    Completed,
    Failed { stage_index: usize, reason: String },
}

impl RunState {
    /// Get the current state as a string
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running { .. } => "Running",
            Self::Completed => "Completed",
            Self::Failed { .. } => "Failed",
        }
    }

    /// Check if the run is still executing stages
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// Index of the running or failed stage
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            Self::Running { stage_index } | Self::Failed { stage_index, .. } => Some(*stage_index),
            _ => None,
        }
    }

    /// Transition to Running the first stage (only from Pending)
    pub fn start(self) -> AppResult<Self> {
        match self {
            Self::Pending => Ok(Self::Running { stage_index: 0 }),
            _ => Err(self.invalid("start")),
        }
    }

    /// Record that the running stage finished (only from Running)
    ///
    /// Moves to the next stage, or to Completed after the last of
    /// `total_stages`.
    pub fn advance(self, total_stages: usize) -> AppResult<Self> {
        match self {
            Self::Running { stage_index } if stage_index + 1 < total_stages => Ok(Self::Running {
                stage_index: stage_index + 1,
            }),
            Self::Running { stage_index } if stage_index + 1 == total_stages => Ok(Self::Completed),
            _ => Err(self.invalid("advance")),
        }
    }

    /// Transition to Failed at the running stage (only from Running)
    pub fn fail(self, reason: impl Into<String>) -> AppResult<Self> {
        match self {
            Self::Running { stage_index } => Ok(Self::Failed {
                stage_index,
                reason: reason.into(),
            }),
            _ => Err(self.invalid("fail")),
        }
    }

    fn invalid(&self, action: &str) -> AppError {
        AppError::InvalidStateTransition(format!(
            "Cannot {} from {} state",
            action,
            self.state_name()
        ))
    }
}
