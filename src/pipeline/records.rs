use crate::types::{CorrelationId, PipelineId, StepId};
use crate::workers::{WorkerFailure, WorkerKind, WorkerOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    Failed { failure: WorkerFailure },
}

/// One dispatch of a worker for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub correlation_id: CorrelationId,
    /// 1-based.
    pub attempt: u32,
    pub worker: WorkerKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Accepted)
    }
}

/// Final outcome of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded {
        output: WorkerOutput,
        /// Set when a degraded fallback worker produced the output.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<WorkerKind>,
    },
    /// Satisfied by an accepted result from an earlier pipeline.
    Reused {
        output: WorkerOutput,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<PipelineId>,
    },
    Failed {
        failure: WorkerFailure,
    },
    Skipped {
        blocked_by: StepId,
    },
    NeedsInput {
        prompt: String,
    },
}

impl StepOutcome {
    pub fn succeeded(output: WorkerOutput) -> Self {
        StepOutcome::Succeeded {
            output,
            fallback: None,
        }
    }

    /// Output usable by dependents.
    pub fn output(&self) -> Option<&WorkerOutput> {
        match self {
            StepOutcome::Succeeded { output, .. } | StepOutcome::Reused { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Succeeded { .. } => "succeeded",
            StepOutcome::Reused { .. } => "reused",
            StepOutcome::Failed { .. } => "failed",
            StepOutcome::Skipped { .. } => "skipped",
            StepOutcome::NeedsInput { .. } => "needs input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerKind>,
    pub outcome: StepOutcome,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

impl StepRecord {
    pub fn resolved(step_id: StepId, worker: WorkerKind, outcome: StepOutcome) -> Self {
        Self {
            step_id,
            worker: Some(worker),
            outcome,
            attempts: Vec::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<AttemptRecord>) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn failed_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| !a.is_accepted()).count()
    }

    pub fn accepted_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| a.is_accepted()).count()
    }
}
