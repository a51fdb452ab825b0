//! Mock implementations for testing.
//!
//! Scripted workers, gateways and LLM clients shared across the integration
//! tests. Each mock records how it was called so tests can assert on
//! dispatch counts and on the exact context a worker saw.

use async_trait::async_trait;
use hypatia::context::ScopedContext;
use hypatia::gateway::{
    ArtifactKind, ArtifactRef, Capability, CapabilityGateway, CodeOutput, DocumentSection,
    GatewayError, GatewayResult, LiteratureHit, Reasoning, ReasoningRequest, TableResult,
};
use hypatia::llm::{ConversationMessage, LLMClient, LLMResponse};
use hypatia::types::{AppError, Result, ToolDefinition};
use hypatia::workers::{
    AnalysisFindings, Hypothesis, Statistic, Worker, WorkerFailure, WorkerKind, WorkerOutput,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============= Canned outputs =============

pub fn hypotheses_output(count: usize) -> WorkerOutput {
    WorkerOutput::Ideation {
        hypotheses: (1..=count)
            .map(|n| Hypothesis {
                id: format!("H{}", n),
                statement: format!("statement {}", n),
                rationale: "prior cohort studies".to_string(),
                data_available: true,
            })
            .collect(),
    }
}

pub fn findings_output() -> WorkerOutput {
    WorkerOutput::Analysis(AnalysisFindings {
        summary: "older patients show shorter survival".to_string(),
        statistics: vec![Statistic {
            name: "hazard_ratio".to_string(),
            value: 1.8,
        }],
        p_value: Some(0.003),
        dataset: "tcga.clinical".to_string(),
    })
}

pub fn chart_output() -> WorkerOutput {
    WorkerOutput::Visualization {
        artifacts: vec![ArtifactRef::new("gs://charts/km_by_age.png", ArtifactKind::Chart)],
    }
}

/// A chart returned inline instead of as a storage reference.
pub fn inline_chart_output() -> WorkerOutput {
    WorkerOutput::Visualization {
        artifacts: vec![ArtifactRef::new("<svg><rect/></svg>", ArtifactKind::Chart)],
    }
}

pub fn document_output() -> WorkerOutput {
    WorkerOutput::Writer {
        document: ArtifactRef::new("gs://docs/report.docx", ArtifactKind::Document),
    }
}

// ============= Scripted worker =============

/// Worker that replays a script of results, one per attempt.
///
/// Once the script is exhausted the last entry repeats.
pub struct ScriptedWorker {
    kind: WorkerKind,
    script: Mutex<VecDeque<std::result::Result<WorkerOutput, WorkerFailure>>>,
    last: Mutex<Option<std::result::Result<WorkerOutput, WorkerFailure>>>,
    delay: Option<Duration>,
    first_delay: Option<Duration>,
    calls: AtomicU32,
    contexts: Mutex<Vec<ScopedContext>>,
}

impl ScriptedWorker {
    pub fn new(
        kind: WorkerKind,
        script: Vec<std::result::Result<WorkerOutput, WorkerFailure>>,
    ) -> Self {
        Self {
            kind,
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            delay: None,
            first_delay: None,
            calls: AtomicU32::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Always succeeds with `output`.
    pub fn succeeding(kind: WorkerKind, output: WorkerOutput) -> Self {
        Self::new(kind, vec![Ok(output)])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Only the first call sleeps; later calls answer at once.
    pub fn with_first_call_delay(mut self, delay: Duration) -> Self {
        self.first_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<ScopedContext> {
        self.contexts.lock().clone()
    }

    fn next_result(&self) -> std::result::Result<WorkerOutput, WorkerFailure> {
        let next = self.script.lock().pop_front();
        match next {
            Some(result) => {
                *self.last.lock() = Some(result.clone());
                result
            }
            None => self
                .last
                .lock()
                .clone()
                .unwrap_or_else(|| Err(WorkerFailure::transient("empty script"))),
        }
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn kind(&self) -> WorkerKind {
        self.kind
    }

    fn allowed_capabilities(&self) -> &'static [Capability] {
        &[Capability::Reason]
    }

    async fn run(&self, context: &ScopedContext) -> std::result::Result<WorkerOutput, WorkerFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.contexts.lock().push(context.clone());
        let delay = match self.first_delay {
            Some(first) if call == 1 => Some(first),
            _ => self.delay,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.next_result()
    }
}

// ============= Scripted gateway =============

/// Gateway with canned backend results and a queue of reasoning replies.
#[derive(Default)]
pub struct ScriptedGateway {
    reasoning: Mutex<VecDeque<GatewayResult<Reasoning>>>,
    pub table: Mutex<TableResult>,
    pub hits: Mutex<Vec<LiteratureHit>>,
    pub code_output: Mutex<CodeOutput>,
    calls: Mutex<Vec<String>>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reasoning reply carrying `structured` as its JSON output.
    pub fn reply(self, structured: Value) -> Self {
        self.reasoning.lock().push_back(Ok(Reasoning {
            text: structured.to_string(),
            structured_output: Some(structured),
            tool_calls_made: Vec::new(),
        }));
        self
    }

    pub fn reply_error(self, error: GatewayError) -> Self {
        self.reasoning.lock().push_back(Err(error));
        self
    }

    pub fn with_table(self, table: TableResult) -> Self {
        *self.table.lock() = table;
        self
    }

    pub fn with_code_output(self, output: CodeOutput) -> Self {
        *self.code_output.lock() = output;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl CapabilityGateway for ScriptedGateway {
    async fn reason(&self, request: ReasoningRequest) -> GatewayResult<Reasoning> {
        self.log("reason".to_string());
        self.requests.lock().push(request);
        self.reasoning
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Unavailable("no scripted reply".to_string())))
    }

    async fn query_table(&self, query: &str) -> GatewayResult<TableResult> {
        self.log(format!("query_table:{}", query));
        Ok(self.table.lock().clone())
    }

    async fn search_literature(&self, query: &str) -> GatewayResult<Vec<LiteratureHit>> {
        self.log(format!("search_literature:{}", query));
        Ok(self.hits.lock().clone())
    }

    async fn execute_code(&self, _source: &str, data_refs: &[String]) -> GatewayResult<CodeOutput> {
        self.log(format!("execute_code:{}", data_refs.join(",")));
        Ok(self.code_output.lock().clone())
    }

    async fn save_artifact(&self, _bytes: Vec<u8>, kind: ArtifactKind) -> GatewayResult<ArtifactRef> {
        self.log("save_artifact".to_string());
        Ok(ArtifactRef::new("gs://artifacts/saved.json", kind))
    }

    async fn create_document(
        &self,
        sections: &[DocumentSection],
        artifacts: &[ArtifactRef],
    ) -> GatewayResult<ArtifactRef> {
        self.log(format!(
            "create_document:{}:{}",
            sections.len(),
            artifacts.len()
        ));
        Ok(ArtifactRef::new("gs://docs/report.docx", ArtifactKind::Document))
    }
}

// ============= Scripted LLM =============

/// LLM client replaying fixed replies, optionally with tool calls.
#[derive(Clone)]
pub struct ScriptedLLM {
    replies: Arc<Mutex<VecDeque<LLMResponse>>>,
    offered_tools: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedLLM {
    pub fn new(replies: Vec<&str>) -> Self {
        Self::from_responses(
            replies
                .into_iter()
                .map(|content| LLMResponse {
                    content: content.to_string(),
                    tool_calls: Vec::new(),
                    finish_reason: "stop".to_string(),
                })
                .collect(),
        )
    }

    pub fn from_responses(responses: Vec<LLMResponse>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(responses.into_iter().collect())),
            offered_tools: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always returns an error.
    pub fn failing() -> Self {
        Self::from_responses(Vec::new())
    }

    /// Tool names offered on each tool-enabled generation, in order.
    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered_tools.lock().clone()
    }

    fn next(&self) -> Result<LLMResponse> {
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| AppError::LLM("Mock LLM failure".to_string()))
    }
}

#[async_trait]
impl LLMClient for ScriptedLLM {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(self.next()?.content)
    }

    async fn generate_with_system(&self, _system: &str, _prompt: &str) -> Result<String> {
        Ok(self.next()?.content)
    }

    async fn generate_with_tools(
        &self,
        _messages: &[ConversationMessage],
        tools: &[ToolDefinition],
    ) -> Result<LLMResponse> {
        self.offered_tools
            .lock()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        self.next()
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
