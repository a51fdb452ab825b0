//! Coordinator state machine.
//!
//! One [`Coordinator::drive`] call owns a pipeline from classification to
//! synthesis. Independent ready steps in the same dependency level run
//! concurrently; every result is recorded back into [`PipelineState`] by the
//! driving task alone, in plan order.

use super::retry::RetryPolicy;
use super::synthesis::{synthesize, FinalResponse};
use super::validation::validate_output;
use crate::context::{ContextScoper, ScopedContext};
use crate::pipeline::{
    AttemptOutcome, AttemptRecord, CoordinatorPhase, FailureCause, PipelineState, PipelineStatus,
    StepOutcome, StepRecord,
};
use crate::planning::{
    ExecutionPlan, FailurePolicy, Intent, IntentClassifier, PlanBuilder, Step, StepAction,
};
use crate::types::{AppError, CorrelationId, Request, StepId};
use crate::utils::toml_config::HypatiaConfig;
use crate::workers::{FailureKind, WorkerFailure, WorkerOutput, WorkerRegistry};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A finished pipeline and its synthesized response.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub state: PipelineState,
    pub response: FinalResponse,
}

/// Progress reported by in-flight steps to the driving task.
#[derive(Debug)]
enum StepEvent {
    Retrying { step: StepId, attempt: u32 },
}

pub struct Coordinator {
    workers: WorkerRegistry,
    classifier: Arc<dyn IntentClassifier>,
    planner: PlanBuilder,
    scoper: ContextScoper,
    retry: RetryPolicy,
    step_timeout: Duration,
    max_concurrent_steps: usize,
    default_dataset: Option<String>,
}

impl Coordinator {
    pub fn new(workers: WorkerRegistry, classifier: Arc<dyn IntentClassifier>) -> Self {
        Self::from_config(&HypatiaConfig::default(), workers, classifier)
    }

    /// Snapshot coordinator settings from `config`.
    pub fn from_config(
        config: &HypatiaConfig,
        workers: WorkerRegistry,
        classifier: Arc<dyn IntentClassifier>,
    ) -> Self {
        Self {
            workers,
            classifier,
            planner: PlanBuilder::from_config(config),
            scoper: ContextScoper::new(),
            retry: RetryPolicy::from(&config.coordinator),
            step_timeout: config.coordinator.step_timeout(),
            max_concurrent_steps: config.coordinator.max_concurrent_steps.max(1),
            default_dataset: config.session.default_dataset.clone(),
        }
    }

    pub fn with_planner(mut self, planner: PlanBuilder) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_steps(mut self, limit: usize) -> Self {
        self.max_concurrent_steps = limit.max(1);
        self
    }

    pub fn with_default_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.default_dataset = Some(dataset.into());
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn default_dataset(&self) -> Option<&str> {
        self.default_dataset.as_deref()
    }

    /// Run a request to completion without cancellation or progress updates.
    pub async fn run(&self, request: Request, prior: Option<&PipelineState>) -> PipelineRun {
        let state = PipelineState::new(request, self.default_dataset.clone());
        self.drive(state, prior, CancellationToken::new(), None).await
    }

    /// Drive `state` to a terminal status.
    ///
    /// A snapshot is published on `updates` after every transition. Tripping
    /// `cancel` stops further dispatch and marks in-flight attempts cancelled.
    pub async fn drive(
        &self,
        mut state: PipelineState,
        prior: Option<&PipelineState>,
        cancel: CancellationToken,
        updates: Option<&watch::Sender<PipelineState>>,
    ) -> PipelineRun {
        info!(pipeline_id = %state.id, request = %state.request.text, "Starting pipeline");

        state.status = PipelineStatus::InProgress;
        state.set_phase(CoordinatorPhase::Planning);
        publish(updates, &state);

        let status = self.execute(&mut state, prior, &cancel, updates).await;
        self.conclude(state, status, updates)
    }

    /// Run a caller-built plan, skipping classification and planning.
    pub async fn run_plan(&self, request: Request, plan: ExecutionPlan) -> PipelineRun {
        let mut state = PipelineState::new(request, self.default_dataset.clone());
        info!(pipeline_id = %state.id, steps = plan.steps.len(), "Starting pipeline from a given plan");

        state.status = PipelineStatus::InProgress;
        state.intent = Some(plan.intent);
        state.set_phase(CoordinatorPhase::Planning);

        let status = match plan.validate() {
            Ok(()) => {
                self.execute_plan(&mut state, plan, &CancellationToken::new(), None)
                    .await
            }
            Err(e) => {
                error!(pipeline_id = %state.id, error = %e, "Rejected invalid plan");
                PipelineStatus::failed(FailureCause::PlanInvalid {
                    reason: e.to_string(),
                })
            }
        };
        self.conclude(state, status, None)
    }

    fn conclude(
        &self,
        mut state: PipelineState,
        status: PipelineStatus,
        updates: Option<&watch::Sender<PipelineState>>,
    ) -> PipelineRun {
        state.set_phase(CoordinatorPhase::Synthesizing);
        publish(updates, &state);
        state.finish(status);
        let response = synthesize(&state);
        publish(updates, &state);

        PipelineRun { state, response }
    }

    async fn execute(
        &self,
        state: &mut PipelineState,
        prior: Option<&PipelineState>,
        cancel: &CancellationToken,
        updates: Option<&watch::Sender<PipelineState>>,
    ) -> PipelineStatus {
        if cancel.is_cancelled() {
            return PipelineStatus::failed(FailureCause::UserCancelled);
        }

        let intent = self.classify(&state.request, prior).await;
        state.intent = Some(intent);

        let plan = match self.planner.build(intent, &state.request, prior) {
            Ok(plan) => plan,
            Err(AppError::PlanUnsatisfiable(prompt)) => {
                info!(pipeline_id = %state.id, "Plan needs more input from the user");
                state.pending_clarification = Some(prompt);
                state.set_phase(CoordinatorPhase::NeedsInput);
                return PipelineStatus::NeedsInput;
            }
            Err(e) => {
                error!(pipeline_id = %state.id, error = %e, "Could not build a plan");
                return PipelineStatus::failed(FailureCause::PlanInvalid {
                    reason: e.to_string(),
                });
            }
        };

        self.execute_plan(state, plan, cancel, updates).await
    }

    /// Dispatch an already-built plan level by level.
    async fn execute_plan(
        &self,
        state: &mut PipelineState,
        plan: ExecutionPlan,
        cancel: &CancellationToken,
        updates: Option<&watch::Sender<PipelineState>>,
    ) -> PipelineStatus {
        if let Err(reason) = self.check_workers(&plan) {
            error!(pipeline_id = %state.id, reason = %reason, "Plan names an unregistered worker");
            state.set_plan(plan);
            return PipelineStatus::failed(FailureCause::PlanInvalid { reason });
        }

        state.set_plan(plan.clone());
        publish(updates, state);

        if let Some(step) = plan
            .steps
            .iter()
            .find(|s| matches!(s.action, StepAction::Clarify { .. }))
        {
            if let StepAction::Clarify { prompt } = &step.action {
                state.record(StepRecord {
                    step_id: step.id.clone(),
                    worker: None,
                    outcome: StepOutcome::NeedsInput {
                        prompt: prompt.clone(),
                    },
                    attempts: Vec::new(),
                });
            }
            state.set_phase(CoordinatorPhase::NeedsInput);
            publish(updates, state);
            return PipelineStatus::NeedsInput;
        }

        loop {
            if cancel.is_cancelled() {
                info!(pipeline_id = %state.id, "Pipeline cancelled before next dispatch");
                return PipelineStatus::failed(FailureCause::UserCancelled);
            }

            self.resolve_passive_steps(state, &plan);

            let ready: Vec<&Step> = plan
                .steps
                .iter()
                .filter(|step| {
                    step.worker().is_some()
                        && !state.is_resolved(&step.id)
                        && step
                            .depends_on
                            .iter()
                            .all(|d| state.accepted_output(d).is_some())
                })
                .take(self.max_concurrent_steps)
                .collect();
            if ready.is_empty() {
                break;
            }

            let ids: Vec<StepId> = ready.iter().map(|s| s.id.clone()).collect();
            state.set_phase(CoordinatorPhase::Dispatching { steps: ids.clone() });
            publish(updates, state);

            let mut dispatches = Vec::with_capacity(ready.len());
            for step in ready {
                match self.scoper.scope(step, state) {
                    Ok(context) => dispatches.push((step, context)),
                    Err(e) => {
                        error!(step_id = %step.id, error = %e, "Failed to scope step context");
                        state.record(StepRecord {
                            step_id: step.id.clone(),
                            worker: step.worker(),
                            outcome: StepOutcome::Failed {
                                failure: WorkerFailure::new(FailureKind::ToolPermanent, e.to_string()),
                            },
                            attempts: Vec::new(),
                        });
                    }
                }
            }

            state.set_phase(CoordinatorPhase::AwaitingResult { steps: ids });
            publish(updates, state);

            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let level = join_all(
                dispatches
                    .into_iter()
                    .map(|(step, context)| self.run_step(step, context, cancel, events_tx.clone())),
            );
            drop(events_tx);
            tokio::pin!(level);

            let records = loop {
                tokio::select! {
                    records = &mut level => break records,
                    Some(event) = events_rx.recv() => match event {
                        StepEvent::Retrying { step, attempt } => {
                            state.set_phase(CoordinatorPhase::Retrying { step, attempt });
                            publish(updates, state);
                        }
                    },
                }
            };

            let mut aborted_by: Option<StepId> = None;
            let mut cancelled = false;
            for record in records {
                if let StepOutcome::Failed { failure } = &record.outcome {
                    if failure.kind == FailureKind::UserCancelled {
                        cancelled = true;
                    } else if aborted_by.is_none()
                        && matches!(
                            plan.step(&record.step_id).map(|s| &s.on_failure),
                            Some(FailurePolicy::AbortPipeline)
                        )
                    {
                        aborted_by = Some(record.step_id.clone());
                    }
                }
                state.record(record);
            }
            publish(updates, state);

            if cancelled || cancel.is_cancelled() {
                info!(pipeline_id = %state.id, "Pipeline cancelled during dispatch");
                return PipelineStatus::failed(FailureCause::UserCancelled);
            }

            if let Some(step) = aborted_by {
                warn!(pipeline_id = %state.id, step_id = %step, "Step failed under abort policy");
                state.set_phase(CoordinatorPhase::Aborting);
                for remaining in &plan.steps {
                    if !state.is_resolved(&remaining.id) {
                        state.record(StepRecord {
                            step_id: remaining.id.clone(),
                            worker: remaining.provides(),
                            outcome: StepOutcome::Skipped {
                                blocked_by: step.clone(),
                            },
                            attempts: Vec::new(),
                        });
                    }
                }
                publish(updates, state);
                return PipelineStatus::failed(FailureCause::Aborted { step });
            }

            state.set_phase(CoordinatorPhase::Advancing);
            publish(updates, state);
        }

        terminal_status(state, &plan)
    }

    /// Ambiguity and classifier outages both start at ideation.
    async fn classify(&self, request: &Request, prior: Option<&PipelineState>) -> Intent {
        match self.classifier.classify(request, prior).await {
            Ok(intent) => {
                debug!(intent = %intent, "Classified request");
                intent
            }
            Err(AppError::ClassificationAmbiguous(detail)) => {
                info!(detail = %detail, "Ambiguous intent, starting with ideation");
                Intent::default()
            }
            Err(e) => {
                warn!(error = %e, "Intent classification failed, starting with ideation");
                Intent::default()
            }
        }
    }

    fn check_workers(&self, plan: &ExecutionPlan) -> std::result::Result<(), String> {
        for step in &plan.steps {
            let fallback = match &step.on_failure {
                FailurePolicy::Fallback { worker, .. } => Some(*worker),
                _ => None,
            };
            for kind in step.worker().into_iter().chain(fallback) {
                if !self.workers.contains(kind) {
                    return Err(format!("step '{}' needs a {} worker", step.id, kind));
                }
            }
        }
        Ok(())
    }

    /// Record reuse steps whose inputs are satisfied and skip steps blocked
    /// by a dependency that resolved without output.
    fn resolve_passive_steps(&self, state: &mut PipelineState, plan: &ExecutionPlan) {
        for step in &plan.steps {
            if state.is_resolved(&step.id) {
                continue;
            }

            let blocker = step
                .depends_on
                .iter()
                .find(|d| state.is_resolved(d) && state.accepted_output(d).is_none())
                .cloned();
            if let Some(blocked_by) = blocker {
                debug!(step_id = %step.id, blocked_by = %blocked_by, "Skipping step");
                state.record(StepRecord {
                    step_id: step.id.clone(),
                    worker: step.provides(),
                    outcome: StepOutcome::Skipped { blocked_by },
                    attempts: Vec::new(),
                });
                continue;
            }

            if let StepAction::Reuse { worker, output, from } = &step.action {
                if step.depends_on.iter().all(|d| state.accepted_output(d).is_some()) {
                    debug!(step_id = %step.id, "Reusing output from earlier pipeline");
                    state.record(StepRecord::resolved(
                        step.id.clone(),
                        *worker,
                        StepOutcome::Reused {
                            output: output.clone(),
                            from: *from,
                        },
                    ));
                }
            }
        }
    }

    /// Run one step, including retries and its fallback policy.
    async fn run_step(
        &self,
        step: &Step,
        context: ScopedContext,
        cancel: &CancellationToken,
        events: mpsc::UnboundedSender<StepEvent>,
    ) -> StepRecord {
        let worker = context.worker;
        let mut attempts = Vec::new();

        let outcome = match self
            .attempt_with_retries(&step.id, &context, cancel, &events, &mut attempts)
            .await
        {
            Ok(output) => StepOutcome::succeeded(output),
            Err(failure) if failure.kind == FailureKind::UserCancelled => {
                StepOutcome::Failed { failure }
            }
            Err(failure) => match &step.on_failure {
                FailurePolicy::Fallback {
                    worker: substitute,
                    instructions,
                } => {
                    warn!(
                        step_id = %step.id,
                        worker = %worker,
                        fallback = %substitute,
                        error = %failure,
                        "Step failed, running fallback worker"
                    );
                    let fallback_context = context.for_fallback(*substitute, instructions);
                    match self
                        .attempt_with_retries(&step.id, &fallback_context, cancel, &events, &mut attempts)
                        .await
                    {
                        Ok(output) => StepOutcome::Succeeded {
                            output,
                            fallback: Some(*substitute),
                        },
                        Err(second) if second.kind == FailureKind::UserCancelled => {
                            StepOutcome::Failed { failure: second }
                        }
                        Err(second) => StepOutcome::Failed {
                            failure: WorkerFailure::new(
                                failure.kind,
                                format!(
                                    "{}; fallback {} also failed: {}",
                                    failure.detail, substitute, second
                                ),
                            ),
                        },
                    }
                }
                _ => StepOutcome::Failed { failure },
            },
        };

        info!(
            step_id = %step.id,
            worker = %worker,
            outcome = outcome.label(),
            attempts = attempts.len(),
            "Step resolved"
        );
        StepRecord::resolved(step.id.clone(), worker, outcome).with_attempts(attempts)
    }

    /// Dispatch `context.worker` until it produces valid output, fails
    /// permanently, runs out of retries or the pipeline is cancelled.
    async fn attempt_with_retries(
        &self,
        step_id: &StepId,
        context: &ScopedContext,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<StepEvent>,
        attempts: &mut Vec<AttemptRecord>,
    ) -> std::result::Result<WorkerOutput, WorkerFailure> {
        let worker = self.workers.get(context.worker).ok_or_else(|| {
            WorkerFailure::new(
                FailureKind::CapabilityUnavailable,
                format!("no {} worker registered", context.worker),
            )
        })?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let correlation_id = CorrelationId::new();
            let started_at = Utc::now();
            debug!(
                step_id = %step_id,
                worker = %context.worker,
                attempt,
                correlation_id = %correlation_id,
                "Dispatching worker"
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(WorkerFailure::cancelled()),
                outcome = tokio::time::timeout(self.step_timeout, worker.run(context)) => match outcome {
                    Ok(Ok(output)) => validate_output(context.worker, output),
                    Ok(Err(failure)) => Err(failure),
                    Err(_) => Err(WorkerFailure::transient(format!(
                        "worker did not respond within {:?}",
                        self.step_timeout
                    ))),
                },
            };

            attempts.push(AttemptRecord {
                correlation_id,
                attempt,
                worker: context.worker,
                started_at,
                finished_at: Utc::now(),
                outcome: match &result {
                    Ok(_) => AttemptOutcome::Accepted,
                    Err(failure) => AttemptOutcome::Failed {
                        failure: failure.clone(),
                    },
                },
            });

            let failure = match result {
                Ok(output) => return Ok(output),
                Err(failure) => failure,
            };
            if !self.retry.should_retry(&failure, attempt) {
                return Err(failure);
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                step_id = %step_id,
                worker = %context.worker,
                attempt,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Retrying step after retryable failure"
            );
            let _ = events.send(StepEvent::Retrying {
                step: step_id.clone(),
                attempt: attempt + 1,
            });

            tokio::select! {
                _ = cancel.cancelled() => return Err(WorkerFailure::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn publish(updates: Option<&watch::Sender<PipelineState>>, state: &PipelineState) {
    if let Some(tx) = updates {
        tx.send_replace(state.clone());
    }
}

/// A retryable failure that blocked downstream steps fails the pipeline.
/// Otherwise every step succeeded or was reused: succeeded. Some new output
/// plus any failure: partial. Nothing new produced: failed.
fn terminal_status(state: &PipelineState, plan: &ExecutionPlan) -> PipelineStatus {
    let exhausted = state.records.iter().find(|record| match &record.outcome {
        StepOutcome::Failed { failure } => {
            failure.kind.is_retryable() && !plan.dependents_of(&record.step_id).is_empty()
        }
        _ => false,
    });
    if let Some(record) = exhausted {
        return PipelineStatus::failed(FailureCause::RetriesExhausted {
            step: record.step_id.clone(),
        });
    }

    let mut produced = 0;
    let mut unfinished = 0;
    for record in &state.records {
        match record.outcome {
            StepOutcome::Succeeded { .. } => produced += 1,
            StepOutcome::Reused { .. } => {}
            _ => unfinished += 1,
        }
    }

    if unfinished == 0 && state.records.len() == plan.steps.len() {
        PipelineStatus::Succeeded
    } else if produced > 0 {
        PipelineStatus::PartiallySucceeded
    } else {
        PipelineStatus::failed(FailureCause::NoStepSucceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::KeywordClassifier;
    use crate::workers::{AnalysisFindings, Worker, WorkerKind};
    use async_trait::async_trait;
    use crate::gateway::Capability;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Analysis worker that fails transiently a fixed number of times.
    struct FlakyAnalysis {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Worker for FlakyAnalysis {
        fn kind(&self) -> WorkerKind {
            WorkerKind::Analysis
        }

        fn allowed_capabilities(&self) -> &'static [Capability] {
            &[Capability::Reason, Capability::QueryTable]
        }

        async fn run(&self, _context: &ScopedContext) -> Result<WorkerOutput, WorkerFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(WorkerFailure::transient("warehouse timeout"));
            }
            Ok(WorkerOutput::Analysis(AnalysisFindings {
                summary: "no difference".into(),
                statistics: vec![],
                p_value: Some(0.4),
                dataset: "tcga.clinical".into(),
            }))
        }
    }

    fn coordinator(failures: u32) -> Coordinator {
        let workers = WorkerRegistry::new().with_worker(Arc::new(FlakyAnalysis {
            failures,
            calls: AtomicU32::new(0),
        }));
        Coordinator::new(workers, Arc::new(KeywordClassifier::new()))
            .with_retry_policy(RetryPolicy::immediate(2))
    }

    #[tokio::test]
    async fn test_retries_until_accepted() {
        let run = coordinator(2).run(Request::new("compare survival by age"), None).await;

        assert_eq!(run.state.status, PipelineStatus::Succeeded);
        let record = run.state.record_for(&"analysis".into()).unwrap();
        assert_eq!(record.attempts.len(), 3);
        assert_eq!(record.accepted_attempts(), 1);
        assert_eq!(record.failed_attempts(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_pipeline() {
        let run = coordinator(10).run(Request::new("compare survival by age"), None).await;

        assert_eq!(
            run.state.status,
            PipelineStatus::failed(FailureCause::NoStepSucceeded)
        );
        let record = run.state.record_for(&"analysis".into()).unwrap();
        assert_eq!(record.attempts.len(), 3);
        assert_eq!(record.accepted_attempts(), 0);
    }

    #[tokio::test]
    async fn test_missing_worker_is_invalid_plan() {
        let run = coordinator(0).run(Request::new("plot survival"), None).await;
        assert!(matches!(
            run.state.status,
            PipelineStatus::Failed {
                cause: FailureCause::PlanInvalid { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let coordinator = coordinator(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let state = PipelineState::new(Request::new("compare survival by age"), None);

        let run = coordinator.drive(state, None, cancel, None).await;
        assert_eq!(
            run.state.status,
            PipelineStatus::failed(FailureCause::UserCancelled)
        );
        assert!(run.state.records.is_empty());
    }
}
