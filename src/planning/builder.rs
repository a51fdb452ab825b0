use super::plan::{ExecutionPlan, FailurePolicy, Step};
use super::Intent;
use crate::pipeline::PipelineState;
use crate::types::{AppError, Request, Result};
use crate::utils::toml_config::HypatiaConfig;
use crate::workers::{Hypothesis, WorkerKind};
use std::collections::HashMap;

type Template = &'static [(WorkerKind, &'static [WorkerKind])];

/// Canonical step list per intent: each entry is a worker and the workers
/// whose outputs it consumes.
const PLAN_TABLE: &[(Intent, Template)] = &[
    (Intent::IdeationStart, &[(WorkerKind::Ideation, &[])]),
    (Intent::AnalysisRequest, &[(WorkerKind::Analysis, &[])]),
    (
        Intent::VisualizationRequest,
        &[
            (WorkerKind::Analysis, &[]),
            (WorkerKind::Visualization, &[WorkerKind::Analysis]),
        ],
    ),
    (
        Intent::WritingRequest,
        &[
            (WorkerKind::Analysis, &[]),
            (WorkerKind::Visualization, &[WorkerKind::Analysis]),
            (
                WorkerKind::Writer,
                &[WorkerKind::Analysis, WorkerKind::Visualization],
            ),
        ],
    ),
    (
        Intent::MixedPipeline,
        &[
            (WorkerKind::Ideation, &[]),
            (WorkerKind::Analysis, &[WorkerKind::Ideation]),
            (WorkerKind::Visualization, &[WorkerKind::Analysis]),
            (
                WorkerKind::Writer,
                &[WorkerKind::Analysis, WorkerKind::Visualization],
            ),
        ],
    ),
];

pub fn canonical_template(intent: Intent) -> Template {
    PLAN_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == intent)
        .map(|(_, template)| *template)
        .unwrap_or(&[])
}

/// Find a hypothesis reference (`H2`, `hypothesis 2`, `hypothesis #2`) and
/// normalise it to `H<n>`.
pub fn hypothesis_reference(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | ';' | ':' | '?' | '!' | '(' | ')'))
        .filter(|w| !w.is_empty())
        .collect();

    for (i, word) in words.iter().enumerate() {
        if let Some(digits) = word.strip_prefix('h') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return Some(hypothesis_id(digits));
            }
        }
        if word.starts_with("hypothes") {
            if let Some(next) = words.get(i + 1) {
                let digits = next.trim_start_matches('#');
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    return Some(hypothesis_id(digits));
                }
            }
        }
    }
    None
}

fn hypothesis_id(digits: &str) -> String {
    let trimmed = digits.trim_start_matches('0');
    format!("H{}", if trimmed.is_empty() { "0" } else { trimmed })
}

/// Builds validated execution plans from an intent and optional prior state.
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    policies: HashMap<WorkerKind, FailurePolicy>,
    instructions: HashMap<WorkerKind, String>,
    clarify_missing_input: bool,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            policies: HashMap::new(),
            instructions: HashMap::new(),
            clarify_missing_input: true,
        }
    }

    /// Per-worker failure policies and standing instructions from config.
    pub fn from_config(config: &HypatiaConfig) -> Self {
        let mut builder = Self::new();
        for kind in WorkerKind::ALL {
            if let Some(settings) = config.workers.get(kind.as_str()) {
                if let Some(policy) = &settings.on_failure {
                    builder = builder.with_policy(kind, policy.clone());
                }
                if let Some(instructions) = &settings.instructions {
                    builder = builder.with_instructions(kind, instructions.clone());
                }
            }
        }
        builder
    }

    pub fn with_policy(mut self, worker: WorkerKind, policy: FailurePolicy) -> Self {
        self.policies.insert(worker, policy);
        self
    }

    pub fn with_instructions(mut self, worker: WorkerKind, instructions: impl Into<String>) -> Self {
        self.instructions.insert(worker, instructions.into());
        self
    }

    /// Report missing upstream data as [`AppError::PlanUnsatisfiable`]
    /// instead of planning a clarification step.
    pub fn without_clarification(mut self) -> Self {
        self.clarify_missing_input = false;
        self
    }

    pub fn build(
        &self,
        intent: Intent,
        request: &Request,
        prior: Option<&PipelineState>,
    ) -> Result<ExecutionPlan> {
        let mut template: Vec<(WorkerKind, Vec<WorkerKind>)> = canonical_template(intent)
            .iter()
            .map(|(kind, deps)| (*kind, deps.to_vec()))
            .collect();
        let plans = |template: &[(WorkerKind, Vec<WorkerKind>)], kind: WorkerKind| {
            template.iter().any(|(k, _)| *k == kind)
        };

        let reference = hypothesis_reference(&request.text);
        let prior_hypotheses: Option<&[Hypothesis]> = prior
            .and_then(|state| state.latest_output(WorkerKind::Ideation))
            .and_then(|output| output.hypotheses());

        // A named hypothesis must already exist unless this plan generates it.
        if let Some(reference) = &reference {
            if plans(&template, WorkerKind::Analysis) && !plans(&template, WorkerKind::Ideation) {
                let found = prior_hypotheses
                    .map(|list| list.iter().any(|h| h.id.eq_ignore_ascii_case(reference)))
                    .unwrap_or(false);
                if !found {
                    return self.missing_input(intent, clarification_prompt(reference, prior_hypotheses));
                }
                template.insert(0, (WorkerKind::Ideation, Vec::new()));
                for (kind, deps) in template.iter_mut() {
                    if *kind == WorkerKind::Analysis {
                        deps.insert(0, WorkerKind::Ideation);
                    }
                }
            }
        }

        let mut steps = Vec::with_capacity(template.len());
        let mut pruning = prior.is_some();
        let last = template.len().saturating_sub(1);

        for (index, (kind, deps)) in template.iter().enumerate() {
            let dep_names: Vec<&str> = deps.iter().map(|d| d.as_str()).collect();
            // A named hypothesis is always tested afresh.
            let retest = *kind == WorkerKind::Analysis && reference.is_some();
            let reusable = if pruning && index < last && !retest {
                prior.and_then(|state| state.latest_output(*kind))
            } else {
                None
            };

            let step = match reusable {
                Some(output) => {
                    Step::reuse(kind.as_str(), output.clone(), prior.map(|s| s.id)).after(&dep_names)
                }
                None => {
                    pruning = false;
                    Step::dispatch(kind.as_str(), *kind)
                        .after(&dep_names)
                        .with_instructions(self.instructions_for(*kind, reference.as_deref()))
                        .on_failure(self.policies.get(kind).cloned().unwrap_or_default())
                }
            };
            steps.push(step);
        }

        let plan = ExecutionPlan::new(intent, steps);
        plan.validate()?;

        tracing::info!(
            intent = %intent,
            steps = plan.steps.len(),
            dispatched = plan.dispatch_count(),
            "Built execution plan"
        );
        Ok(plan)
    }

    fn instructions_for(&self, kind: WorkerKind, reference: Option<&str>) -> String {
        let mut instructions = self.instructions.get(&kind).cloned().unwrap_or_default();
        if kind == WorkerKind::Analysis {
            if let Some(reference) = reference {
                if !instructions.is_empty() {
                    instructions.push(' ');
                }
                instructions.push_str(&format!("Test hypothesis {}.", reference));
            }
        }
        instructions
    }

    fn missing_input(&self, intent: Intent, prompt: String) -> Result<ExecutionPlan> {
        if !self.clarify_missing_input {
            return Err(AppError::PlanUnsatisfiable(prompt));
        }
        tracing::info!(intent = %intent, "Plan needs user input before dispatch");
        let plan = ExecutionPlan::new(intent, vec![Step::clarify("clarify", prompt)]);
        plan.validate()?;
        Ok(plan)
    }
}

fn clarification_prompt(reference: &str, available: Option<&[Hypothesis]>) -> String {
    match available {
        Some(list) if !list.is_empty() => {
            let ids: Vec<&str> = list.iter().map(|h| h.id.as_str()).collect();
            format!(
                "Hypothesis {} was not found. Available hypotheses: {}. Which one should be tested?",
                reference,
                ids.join(", ")
            )
        }
        _ => format!(
            "Hypothesis {} was referenced, but no hypotheses have been generated yet. \
             Ask for research ideas first, or state the hypothesis to test.",
            reference
        ),
    }
}
