use super::Intent;
use crate::types::{AppError, PipelineId, Result, StepId};
use crate::workers::{WorkerKind, WorkerOutput};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What a step does when the coordinator reaches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Dispatch {
        worker: WorkerKind,
    },
    /// Already satisfied by an accepted result from an earlier pipeline.
    Reuse {
        worker: WorkerKind,
        output: WorkerOutput,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<PipelineId>,
    },
    /// Stop and ask the user for missing input.
    Clarify {
        prompt: String,
    },
}

/// How a failed step affects the rest of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Dependents are skipped; independent steps continue.
    #[default]
    SkipDependents,
    AbortPipeline,
    /// Run a degraded substitute with the same inputs.
    Fallback {
        worker: WorkerKind,
        #[serde(default)]
        instructions: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub action: StepAction,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub instructions: String,
}

impl Step {
    pub fn dispatch(id: &str, worker: WorkerKind) -> Self {
        Self::with_action(id, StepAction::Dispatch { worker })
    }

    pub fn reuse(id: &str, output: WorkerOutput, from: Option<PipelineId>) -> Self {
        Self::with_action(
            id,
            StepAction::Reuse {
                worker: output.kind(),
                output,
                from,
            },
        )
    }

    pub fn clarify(id: &str, prompt: impl Into<String>) -> Self {
        Self::with_action(
            id,
            StepAction::Clarify {
                prompt: prompt.into(),
            },
        )
    }

    fn with_action(id: &str, action: StepAction) -> Self {
        Self {
            id: StepId::from(id),
            action,
            depends_on: Vec::new(),
            on_failure: FailurePolicy::default(),
            instructions: String::new(),
        }
    }

    pub fn after(mut self, dependencies: &[&str]) -> Self {
        self.depends_on = dependencies.iter().map(|d| StepId::from(*d)).collect();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Worker this step dispatches to, if it dispatches at all.
    pub fn worker(&self) -> Option<WorkerKind> {
        match &self.action {
            StepAction::Dispatch { worker } => Some(*worker),
            _ => None,
        }
    }

    /// Worker kind whose output this step provides (dispatched or reused).
    pub fn provides(&self) -> Option<WorkerKind> {
        match &self.action {
            StepAction::Dispatch { worker } | StepAction::Reuse { worker, .. } => Some(*worker),
            StepAction::Clarify { .. } => None,
        }
    }
}

/// Ordered steps selected to satisfy one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub intent: Intent,
    pub steps: Vec<Step>,
}

impl ExecutionPlan {
    pub fn new(intent: Intent, steps: Vec<Step>) -> Self {
        Self { intent, steps }
    }

    /// Structural checks: non-empty, unique ids, dependencies only on
    /// earlier steps (which makes every valid plan acyclic), nothing
    /// depending on a clarification step, fallbacks only on dispatch steps.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(AppError::InvalidPlan("plan has no steps".to_string()));
        }

        let mut seen: HashSet<&StepId> = HashSet::new();
        for step in &self.steps {
            for dependency in &step.depends_on {
                if dependency == &step.id {
                    return Err(AppError::InvalidPlan(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                if !seen.contains(dependency) {
                    return Err(AppError::InvalidPlan(format!(
                        "step '{}' depends on '{}', which is not an earlier step",
                        step.id, dependency
                    )));
                }
                if let Some(StepAction::Clarify { .. }) = self.step(dependency).map(|s| &s.action) {
                    return Err(AppError::InvalidPlan(format!(
                        "step '{}' depends on clarification step '{}'",
                        step.id, dependency
                    )));
                }
            }

            if matches!(step.on_failure, FailurePolicy::Fallback { .. }) && step.worker().is_none() {
                return Err(AppError::InvalidPlan(format!(
                    "step '{}' declares a fallback but dispatches no worker",
                    step.id
                )));
            }

            if !seen.insert(&step.id) {
                return Err(AppError::InvalidPlan(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }
        Ok(())
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn position(&self, id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| &s.id == id)
    }

    /// Steps that (transitively) depend on `id`, in plan order.
    pub fn dependents_of(&self, id: &StepId) -> Vec<&Step> {
        let mut blocked: HashSet<&StepId> = HashSet::new();
        blocked.insert(id);
        let mut result = Vec::new();
        for step in &self.steps {
            if step.depends_on.iter().any(|d| blocked.contains(d)) {
                blocked.insert(&step.id);
                result.push(step);
            }
        }
        result
    }

    /// The clarification prompt, when this plan only asks the user for input.
    pub fn clarification(&self) -> Option<&str> {
        self.steps.iter().find_map(|s| match &s.action {
            StepAction::Clarify { prompt } => Some(prompt.as_str()),
            _ => None,
        })
    }

    pub fn dispatch_count(&self) -> usize {
        self.steps.iter().filter(|s| s.worker().is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> ExecutionPlan {
        ExecutionPlan::new(
            Intent::WritingRequest,
            vec![
                Step::dispatch("analysis", WorkerKind::Analysis),
                Step::dispatch("visualization", WorkerKind::Visualization).after(&["analysis"]),
                Step::dispatch("writer", WorkerKind::Writer).after(&["analysis", "visualization"]),
            ],
        )
    }

    #[test]
    fn test_valid_plan() {
        assert!(linear().validate().is_ok());
    }

    #[test]
    fn test_forward_reference_rejected() {
        let plan = ExecutionPlan::new(
            Intent::VisualizationRequest,
            vec![
                Step::dispatch("visualization", WorkerKind::Visualization).after(&["analysis"]),
                Step::dispatch("analysis", WorkerKind::Analysis),
            ],
        );
        assert!(matches!(plan.validate(), Err(AppError::InvalidPlan(_))));
    }

    #[test]
    fn test_self_reference_and_duplicates_rejected() {
        let cyclic = ExecutionPlan::new(
            Intent::AnalysisRequest,
            vec![Step::dispatch("analysis", WorkerKind::Analysis).after(&["analysis"])],
        );
        assert!(cyclic.validate().is_err());

        let duplicated = ExecutionPlan::new(
            Intent::AnalysisRequest,
            vec![
                Step::dispatch("analysis", WorkerKind::Analysis),
                Step::dispatch("analysis", WorkerKind::Analysis),
            ],
        );
        assert!(duplicated.validate().is_err());
        assert!(ExecutionPlan::new(Intent::IdeationStart, vec![]).validate().is_err());
    }

    #[test]
    fn test_nothing_may_depend_on_clarification() {
        let plan = ExecutionPlan::new(
            Intent::AnalysisRequest,
            vec![
                Step::clarify("clarify", "which hypothesis?"),
                Step::dispatch("analysis", WorkerKind::Analysis).after(&["clarify"]),
            ],
        );
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_dependents_are_transitive() {
        let plan = linear();
        let dependents: Vec<&str> = plan
            .dependents_of(&StepId::from("analysis"))
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(dependents, vec!["visualization", "writer"]);
    }

    #[test]
    fn test_failure_policy_from_toml_shape() {
        let policy: FailurePolicy = serde_json::from_value(serde_json::json!({
            "policy": "fallback",
            "worker": "writer",
            "instructions": "describe the results in prose"
        }))
        .unwrap();
        assert_eq!(
            policy,
            FailurePolicy::Fallback {
                worker: WorkerKind::Writer,
                instructions: "describe the results in prose".to_string()
            }
        );
    }
}
