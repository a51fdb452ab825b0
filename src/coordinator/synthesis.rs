use crate::gateway::ArtifactRef;
use crate::pipeline::{PipelineState, PipelineStatus, StepOutcome};
use crate::types::{PipelineId, StepId};
use crate::workers::WorkerKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Reused,
    Failed,
    Skipped,
    NeedsInput,
    NotRun,
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Succeeded => "succeeded",
            StageOutcome::Reused => "reused",
            StageOutcome::Failed => "failed",
            StageOutcome::Skipped => "skipped",
            StageOutcome::NeedsInput => "needs input",
            StageOutcome::NotRun => "not run",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub step_id: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerKind>,
    pub outcome: StageOutcome,
    pub detail: String,
}

/// What the user sees once a pipeline is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub pipeline_id: PipelineId,
    pub status: PipelineStatus,
    /// Every planned step, in plan order.
    pub stages: Vec<StageSummary>,
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
    pub message: String,
}

impl FinalResponse {
    pub fn stage(&self, step_id: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.step_id.as_str() == step_id)
    }

    /// Stages that did not contribute output.
    pub fn unfinished_stages(&self) -> Vec<&StageSummary> {
        self.stages
            .iter()
            .filter(|s| {
                matches!(
                    s.outcome,
                    StageOutcome::Failed | StageOutcome::Skipped | StageOutcome::NotRun
                )
            })
            .collect()
    }
}

/// Assemble the final response from a pipeline's records.
///
/// Partial results are always reported with every failed, skipped or
/// unreached stage named explicitly.
pub fn synthesize(state: &PipelineState) -> FinalResponse {
    let mut stages = Vec::new();

    if let Some(plan) = &state.plan {
        for step in &plan.steps {
            let summary = match state.record_for(&step.id) {
                Some(record) => {
                    let (outcome, detail) = match &record.outcome {
                        StepOutcome::Succeeded { output, fallback } => {
                            let detail = match fallback {
                                Some(worker) => {
                                    format!("{} (degraded: produced by {})", output.summary_line(), worker)
                                }
                                None => output.summary_line(),
                            };
                            (StageOutcome::Succeeded, detail)
                        }
                        StepOutcome::Reused { output, .. } => (
                            StageOutcome::Reused,
                            format!("{} (from an earlier request)", output.summary_line()),
                        ),
                        StepOutcome::Failed { failure } => (StageOutcome::Failed, failure.to_string()),
                        StepOutcome::Skipped { blocked_by } => (
                            StageOutcome::Skipped,
                            format!("blocked by failed step '{}'", blocked_by),
                        ),
                        StepOutcome::NeedsInput { prompt } => (StageOutcome::NeedsInput, prompt.clone()),
                    };
                    StageSummary {
                        step_id: step.id.clone(),
                        worker: record.worker.or_else(|| step.provides()),
                        outcome,
                        detail,
                    }
                }
                None => StageSummary {
                    step_id: step.id.clone(),
                    worker: step.provides(),
                    outcome: StageOutcome::NotRun,
                    detail: "never dispatched".to_string(),
                },
            };
            stages.push(summary);
        }
    }

    let artifacts = state.artifacts();
    let message = render_message(state, &stages, &artifacts);

    FinalResponse {
        pipeline_id: state.id,
        status: state.status.clone(),
        stages,
        artifacts,
        clarification: state.pending_clarification.clone(),
        message,
    }
}

fn render_message(state: &PipelineState, stages: &[StageSummary], artifacts: &[ArtifactRef]) -> String {
    let headline = match &state.status {
        PipelineStatus::Succeeded => "All requested steps completed.".to_string(),
        PipelineStatus::PartiallySucceeded => {
            "Some steps completed; the rest are listed below.".to_string()
        }
        PipelineStatus::NeedsInput => "More information is needed before continuing.".to_string(),
        PipelineStatus::Failed { cause } => format!("The request could not be completed: {}.", cause),
        PipelineStatus::Pending | PipelineStatus::InProgress => "The request is still running.".to_string(),
    };

    let mut message = headline;
    if let Some(prompt) = &state.pending_clarification {
        message.push('\n');
        message.push_str(prompt);
    }
    for stage in stages {
        message.push_str(&format!(
            "\n- {}: {} ({})",
            stage.step_id,
            stage.outcome.label(),
            stage.detail
        ));
    }
    if !artifacts.is_empty() {
        message.push_str("\nArtifacts:");
        for artifact in artifacts {
            message.push_str(&format!("\n- {}", artifact));
        }
    }
    message
}
