//! Context Scoping
//!
//! Each worker invocation receives a [`ScopedContext`] built from exactly
//! three sources: the step's instructions, the accepted outputs of the
//! steps it declares as dependencies, and a fixed set of [`SessionFacts`].
//! Nothing else from the pipeline (other steps' outputs, earlier requests,
//! reasoning traces) is reachable from inside a worker.

use crate::gateway::{ArtifactKind, ArtifactRef};
use crate::pipeline::PipelineState;
use crate::planning::Step;
use crate::types::{AppError, PipelineId, Result, StepId};
use crate::workers::{AnalysisFindings, Hypothesis, WorkerKind, WorkerOutput};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Session-level facts every worker may see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFacts {
    pub pipeline_id: PipelineId,
    #[serde(default)]
    pub active_dataset: Option<String>,
}

impl SessionFacts {
    pub fn new(pipeline_id: PipelineId, active_dataset: Option<String>) -> Self {
        Self {
            pipeline_id,
            active_dataset,
        }
    }
}

/// The minimal input assembled for one step.
///
/// Two dispatches of the same step see identical contexts, which is what
/// makes retries idempotent from the worker's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedContext {
    pub step_id: StepId,
    pub worker: WorkerKind,
    pub instructions: String,
    /// Text of the request this pipeline is serving.
    pub objective: String,
    /// Outputs of declared dependencies only, keyed by step id.
    pub inputs: BTreeMap<StepId, WorkerOutput>,
    pub session: SessionFacts,
}

impl ScopedContext {
    pub fn new(step_id: impl Into<StepId>, worker: WorkerKind, objective: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            worker,
            instructions: String::new(),
            objective: objective.into(),
            inputs: BTreeMap::new(),
            session: SessionFacts::new(PipelineId::new(), None),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_input(mut self, step_id: impl Into<StepId>, output: WorkerOutput) -> Self {
        self.inputs.insert(step_id.into(), output);
        self
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.session.active_dataset = Some(dataset.into());
        self
    }

    /// Same inputs and session, dispatched to a degraded substitute worker.
    pub fn for_fallback(&self, worker: WorkerKind, instructions: &str) -> Self {
        Self {
            worker,
            instructions: instructions.to_string(),
            ..self.clone()
        }
    }

    /// First input produced by a worker of `kind`, in step-id order.
    pub fn input_of(&self, kind: WorkerKind) -> Option<&WorkerOutput> {
        self.inputs.values().find(|output| output.kind() == kind)
    }

    pub fn hypotheses(&self) -> Option<&[Hypothesis]> {
        self.input_of(WorkerKind::Ideation)
            .and_then(WorkerOutput::hypotheses)
    }

    pub fn findings(&self) -> Option<&AnalysisFindings> {
        self.input_of(WorkerKind::Analysis)
            .and_then(WorkerOutput::findings)
    }

    pub fn charts(&self) -> Vec<&ArtifactRef> {
        self.inputs
            .values()
            .flat_map(WorkerOutput::artifacts)
            .filter(|artifact| artifact.kind == ArtifactKind::Chart)
            .collect()
    }

    /// Dataset an upstream analysis used, falling back to the session's.
    pub fn dataset(&self) -> Option<&str> {
        self.findings()
            .map(|f| f.dataset.as_str())
            .or(self.session.active_dataset.as_deref())
    }
}

/// Derives scoped contexts from pipeline state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextScoper;

impl ContextScoper {
    pub fn new() -> Self {
        Self
    }

    /// Build the context for a dispatch step.
    ///
    /// Fails if the step does not dispatch a worker or if any declared
    /// dependency has no accepted output yet.
    pub fn scope(&self, step: &Step, state: &PipelineState) -> Result<ScopedContext> {
        let worker = step.worker().ok_or_else(|| {
            AppError::InvalidPlan(format!("step '{}' does not dispatch a worker", step.id))
        })?;

        let mut inputs = BTreeMap::new();
        for dependency in &step.depends_on {
            let output = state.accepted_output(dependency).ok_or_else(|| {
                AppError::Internal(format!(
                    "step '{}' scoped before dependency '{}' resolved",
                    step.id, dependency
                ))
            })?;
            inputs.insert(dependency.clone(), output.clone());
        }

        tracing::debug!(
            step_id = %step.id,
            worker = %worker,
            inputs = inputs.len(),
            "Scoped context for step"
        );

        Ok(ScopedContext {
            step_id: step.id.clone(),
            worker,
            instructions: step.instructions.clone(),
            objective: state.request.text.clone(),
            inputs,
            session: state.session.clone(),
        })
    }
}
