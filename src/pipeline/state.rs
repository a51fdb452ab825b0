use super::records::{StepOutcome, StepRecord};
use super::status::{CoordinatorPhase, PipelineStatus};
use crate::context::SessionFacts;
use crate::gateway::ArtifactRef;
use crate::planning::{ExecutionPlan, Intent};
use crate::types::{PipelineId, Request, StepId};
use crate::workers::{WorkerKind, WorkerOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Running aggregate for one request.
///
/// Owned by a single coordinator run; every mutation goes through
/// [`record`](PipelineState::record), [`set_phase`](PipelineState::set_phase)
/// and [`finish`](PipelineState::finish).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub id: PipelineId,
    pub request: Request,
    pub intent: Option<Intent>,
    pub plan: Option<ExecutionPlan>,
    pub session: SessionFacts,
    /// One record per resolved step, in plan order.
    pub records: Vec<StepRecord>,
    /// Plan index of the first step without a record.
    pub cursor: usize,
    pub status: PipelineStatus,
    pub phase: CoordinatorPhase,
    pub pending_clarification: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn new(request: Request, default_dataset: Option<String>) -> Self {
        Self::with_id(PipelineId::new(), request, default_dataset)
    }

    /// The request's own dataset wins over the configured default.
    pub fn with_id(id: PipelineId, request: Request, default_dataset: Option<String>) -> Self {
        let dataset = request.dataset.clone().or(default_dataset);
        Self {
            id,
            session: SessionFacts::new(id, dataset),
            request,
            intent: None,
            plan: None,
            records: Vec::new(),
            cursor: 0,
            status: PipelineStatus::Pending,
            phase: CoordinatorPhase::Pending,
            pending_clarification: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn set_plan(&mut self, plan: ExecutionPlan) {
        self.intent = Some(plan.intent);
        self.plan = Some(plan);
        self.cursor = 0;
    }

    pub fn set_phase(&mut self, phase: CoordinatorPhase) {
        self.phase = phase;
    }

    /// Record a step's final outcome.
    ///
    /// A step resolves once; later records for the same step are dropped and
    /// `false` is returned.
    pub fn record(&mut self, record: StepRecord) -> bool {
        if self.record_for(&record.step_id).is_some() {
            tracing::warn!(
                pipeline_id = %self.id,
                step_id = %record.step_id,
                "Ignoring duplicate step record"
            );
            return false;
        }

        if let StepOutcome::NeedsInput { prompt } = &record.outcome {
            self.pending_clarification = Some(prompt.clone());
        }
        self.records.push(record);

        if let Some(plan) = &self.plan {
            self.records
                .sort_by_key(|r| plan.position(&r.step_id).unwrap_or(usize::MAX));
            self.cursor = plan
                .steps
                .iter()
                .position(|step| !self.records.iter().any(|r| r.step_id == step.id))
                .unwrap_or(plan.steps.len());
        }
        true
    }

    pub fn finish(&mut self, status: PipelineStatus) {
        tracing::info!(pipeline_id = %self.id, status = %status, "Pipeline reached terminal state");
        self.status = status;
        self.phase = CoordinatorPhase::Terminal;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn record_for(&self, step_id: &StepId) -> Option<&StepRecord> {
        self.records.iter().find(|r| &r.step_id == step_id)
    }

    pub fn is_resolved(&self, step_id: &StepId) -> bool {
        self.record_for(step_id).is_some()
    }

    /// Output of a succeeded or reused step.
    pub fn accepted_output(&self, step_id: &StepId) -> Option<&WorkerOutput> {
        self.record_for(step_id).and_then(|r| r.outcome.output())
    }

    /// Latest accepted output of `kind`, used to satisfy follow-up requests.
    pub fn latest_output(&self, kind: WorkerKind) -> Option<&WorkerOutput> {
        self.records
            .iter()
            .rev()
            .filter_map(|r| r.outcome.output())
            .find(|output| output.kind() == kind)
    }

    /// Steps with an accepted output, in plan order.
    pub fn completed_steps(&self) -> Vec<StepId> {
        self.records
            .iter()
            .filter(|r| r.outcome.output().is_some())
            .map(|r| r.step_id.clone())
            .collect()
    }

    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        self.records
            .iter()
            .filter_map(|r| r.outcome.output())
            .flat_map(|output| output.artifacts().into_iter().cloned())
            .collect()
    }
}
