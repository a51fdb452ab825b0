//! Pipeline Service
//!
//! The outward surface: submit requests, poll status, cancel, and export the
//! audit trail. Each submitted pipeline runs on its own tokio task with a
//! configuration snapshot taken at submission, so reloads only affect new
//! requests.

use super::engine::Coordinator;
use super::synthesis::{synthesize, FinalResponse};
use crate::gateway::{ArtifactRef, CapabilityGateway, GatewayConfig, ToolGateway};
use crate::llm::LLMClient;
use crate::pipeline::{CoordinatorPhase, PipelineState, PipelineStatus};
use crate::planning::{Intent, IntentClassifier, KeywordClassifier, ReasoningClassifier};
use crate::tools::ToolRegistry;
use crate::types::{AppError, PipelineId, Request, Result, StepId};
use crate::utils::toml_config::{ClassifierKind, HypatiaConfigManager};
use crate::workers::WorkerRegistry;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Point-in-time view of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub pipeline_id: PipelineId,
    pub status: PipelineStatus,
    pub phase: CoordinatorPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub completed_steps: Vec<StepId>,
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_clarification: Option<String>,
    /// Present once the pipeline is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<FinalResponse>,
}

impl From<&PipelineState> for StatusReport {
    fn from(state: &PipelineState) -> Self {
        Self {
            pipeline_id: state.id,
            status: state.status.clone(),
            phase: state.phase.clone(),
            intent: state.intent,
            completed_steps: state.completed_steps(),
            artifacts: state.artifacts(),
            pending_clarification: state.pending_clarification.clone(),
            response: state.is_terminal().then(|| synthesize(state)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Requested,
    AlreadyTerminal,
}

#[derive(Clone)]
struct PipelineEntry {
    state: watch::Receiver<PipelineState>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct PipelineService {
    config: HypatiaConfigManager,
    workers: WorkerRegistry,
    classifier: Arc<dyn IntentClassifier>,
    pipelines: Arc<RwLock<HashMap<PipelineId, PipelineEntry>>>,
    /// Terminal pipelines, oldest first.
    finished: Arc<Mutex<VecDeque<PipelineId>>>,
}

impl PipelineService {
    pub fn new(
        config: HypatiaConfigManager,
        workers: WorkerRegistry,
        classifier: Arc<dyn IntentClassifier>,
    ) -> Self {
        Self {
            config,
            workers,
            classifier,
            pipelines: Arc::new(RwLock::new(HashMap::new())),
            finished: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Wire the built-in workers over a tool-calling gateway.
    pub fn standard(
        config: HypatiaConfigManager,
        llm: Arc<dyn LLMClient>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let snapshot = config.config();
        let gateway: Arc<dyn CapabilityGateway> = Arc::new(ToolGateway::new(
            Arc::clone(&llm),
            tools,
            GatewayConfig::from(&snapshot.gateway),
        ));
        let workers = WorkerRegistry::standard(gateway, &snapshot);
        let classifier: Arc<dyn IntentClassifier> = match snapshot.coordinator.classifier {
            ClassifierKind::Keyword => Arc::new(KeywordClassifier::new()),
            ClassifierKind::Reasoning => Arc::new(ReasoningClassifier::new(llm)),
        };
        Self::new(config, workers, classifier)
    }

    pub fn config(&self) -> &HypatiaConfigManager {
        &self.config
    }

    /// Start a pipeline and return its id immediately.
    ///
    /// `prior` (or the request's own `prior_pipeline`) must name a retained,
    /// terminal pipeline. Outside a tokio runtime nothing is registered and
    /// an internal error is returned.
    pub fn submit(&self, mut request: Request, prior: Option<PipelineId>) -> Result<PipelineId> {
        if request.text.trim().is_empty() {
            return Err(AppError::InvalidInput("request text is empty".to_string()));
        }
        if request.dataset.as_deref().is_some_and(|d| d.contains('`')) {
            return Err(AppError::InvalidInput(
                "dataset name must not contain a backtick".to_string(),
            ));
        }
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Internal(format!("no tokio runtime to drive the pipeline: {}", e)))?;
        if prior.is_some() {
            request.prior_pipeline = prior;
        }
        let prior_state = match request.prior_pipeline {
            Some(id) => Some(self.terminal_state(id)?),
            None => None,
        };

        let config = self.config.config();
        let coordinator = Coordinator::from_config(
            &config,
            self.workers.clone(),
            Arc::clone(&self.classifier),
        );
        let state = PipelineState::new(request, coordinator.default_dataset().map(str::to_string));
        let id = state.id;

        let (tx, rx) = watch::channel(state.clone());
        let cancel = CancellationToken::new();
        self.pipelines.write().insert(
            id,
            PipelineEntry {
                state: rx,
                cancel: cancel.clone(),
            },
        );

        let retained = config.coordinator.retained_pipelines;
        let pipelines = Arc::clone(&self.pipelines);
        let finished = Arc::clone(&self.finished);
        runtime.spawn(async move {
            let run = coordinator
                .drive(state, prior_state.as_ref(), cancel, Some(&tx))
                .await;
            tx.send_replace(run.state);

            let mut finished = finished.lock();
            finished.push_back(id);
            while finished.len() > retained {
                if let Some(evicted) = finished.pop_front() {
                    pipelines.write().remove(&evicted);
                    debug!(pipeline_id = %evicted, "Evicted finished pipeline");
                }
            }
        });

        info!(pipeline_id = %id, follow_up = prior.is_some(), "Submitted pipeline");
        Ok(id)
    }

    pub fn get_status(&self, id: PipelineId) -> Result<StatusReport> {
        let entry = self.entry(id)?;
        let state = entry.state.borrow();
        Ok(StatusReport::from(&*state))
    }

    /// Request cancellation; in-flight attempts are marked cancelled and
    /// nothing further is dispatched.
    pub fn cancel(&self, id: PipelineId) -> Result<CancelOutcome> {
        let entry = self.entry(id)?;
        if entry.state.borrow().is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        info!(pipeline_id = %id, "Cancellation requested");
        entry.cancel.cancel();
        Ok(CancelOutcome::Requested)
    }

    /// Latest snapshot of the full pipeline state.
    pub fn state(&self, id: PipelineId) -> Result<PipelineState> {
        Ok(self.entry(id)?.state.borrow().clone())
    }

    pub fn final_response(&self, id: PipelineId) -> Result<Option<FinalResponse>> {
        let entry = self.entry(id)?;
        let state = entry.state.borrow();
        Ok(state.is_terminal().then(|| synthesize(&state)))
    }

    /// Full audit trail: plan, every attempt with correlation ids, outcomes.
    pub fn audit_json(&self, id: PipelineId) -> Result<String> {
        let state = self.state(id)?;
        serde_json::to_string_pretty(&state)
            .map_err(|e| AppError::Internal(format!("failed to serialize pipeline {}: {}", id, e)))
    }

    /// Wait until the pipeline is terminal.
    pub async fn wait(&self, id: PipelineId) -> Result<PipelineState> {
        let mut rx = self.entry(id)?.state;
        let state = rx
            .wait_for(|state| state.is_terminal())
            .await
            .map_err(|_| AppError::Internal(format!("pipeline {} stopped without finishing", id)))?
            .clone();
        Ok(state)
    }

    pub fn pipeline_ids(&self) -> Vec<PipelineId> {
        self.pipelines.read().keys().copied().collect()
    }

    fn entry(&self, id: PipelineId) -> Result<PipelineEntry> {
        self.pipelines
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("pipeline {}", id)))
    }

    fn terminal_state(&self, id: PipelineId) -> Result<PipelineState> {
        let state = self.state(id)?;
        if !state.is_terminal() {
            return Err(AppError::InvalidInput(format!(
                "pipeline {} is still running",
                id
            )));
        }
        Ok(state)
    }
}
