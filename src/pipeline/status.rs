use crate::types::StepId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a pipeline ended in [`PipelineStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    UserCancelled,
    /// A step with an abort policy failed.
    Aborted { step: StepId },
    NoStepSucceeded,
    /// A step ran out of retries and steps downstream of it never ran.
    RetriesExhausted { step: StepId },
    PlanInvalid { reason: String },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::UserCancelled => f.write_str("user cancelled"),
            FailureCause::Aborted { step } => write!(f, "aborted after step '{}' failed", step),
            FailureCause::NoStepSucceeded => f.write_str("no step succeeded"),
            FailureCause::RetriesExhausted { step } => {
                write!(f, "step '{}' exhausted its retries", step)
            }
            FailureCause::PlanInvalid { reason } => write!(f, "invalid plan: {}", reason),
        }
    }
}

/// Lifecycle status of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    InProgress,
    Succeeded,
    PartiallySucceeded,
    /// Stopped before dispatching anything; the user must supply more input.
    NeedsInput,
    Failed { cause: FailureCause },
}

impl PipelineStatus {
    pub fn failed(cause: FailureCause) -> Self {
        PipelineStatus::Failed { cause }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineStatus::Pending | PipelineStatus::InProgress)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Pending => f.write_str("pending"),
            PipelineStatus::InProgress => f.write_str("in progress"),
            PipelineStatus::Succeeded => f.write_str("succeeded"),
            PipelineStatus::PartiallySucceeded => f.write_str("partially succeeded"),
            PipelineStatus::NeedsInput => f.write_str("needs input"),
            PipelineStatus::Failed { cause } => write!(f, "failed ({})", cause),
        }
    }
}

/// Where the coordinator's state machine currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CoordinatorPhase {
    Pending,
    Planning,
    Dispatching { steps: Vec<StepId> },
    AwaitingResult { steps: Vec<StepId> },
    Retrying { step: StepId, attempt: u32 },
    Advancing,
    Aborting,
    NeedsInput,
    Synthesizing,
    Terminal,
}
