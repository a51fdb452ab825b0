use super::{base_prompt, decode_structured, Worker, WorkerFailure, WorkerKind, WorkerOutput};
use crate::context::ScopedContext;
use crate::gateway::{ArtifactKind, Capability, CapabilityGateway, ReasoningRequest, ScopedGateway};
use crate::workers::FailureKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

pub const VISUALIZATION_CAPABILITIES: &[Capability] = &[
    Capability::Reason,
    Capability::ExecuteCode,
    Capability::SaveArtifact,
];

const SYSTEM_PROMPT: &str = r#"You are the visualization worker of a research assistant.
Write a self-contained Python snippet that renders one publication-quality chart
of the analysis result and writes it to a new file. Never modify input data.

Respond with JSON only: {"code": "...", "title": "..."}"#;

#[derive(Deserialize)]
struct ChartDraft {
    code: String,
    #[serde(default)]
    title: String,
}

/// Renders charts of analysis findings in the code sandbox.
pub struct VisualizationWorker {
    gateway: ScopedGateway,
    system_prompt: String,
}

impl VisualizationWorker {
    pub fn new(gateway: Arc<dyn CapabilityGateway>) -> Self {
        Self {
            gateway: ScopedGateway::new(gateway, VISUALIZATION_CAPABILITIES),
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

#[async_trait]
impl Worker for VisualizationWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Visualization
    }

    fn allowed_capabilities(&self) -> &'static [Capability] {
        VISUALIZATION_CAPABILITIES
    }

    async fn run(&self, context: &ScopedContext) -> Result<WorkerOutput, WorkerFailure> {
        let findings = context.findings().ok_or_else(|| {
            WorkerFailure::new(
                FailureKind::ToolPermanent,
                "visualization needs analysis findings as input",
            )
        })?;

        let statistics: Vec<String> = findings
            .statistics
            .iter()
            .map(|s| format!("{} = {}", s.name, s.value))
            .collect();
        let prompt = format!(
            "{}\nFindings: {}\nStatistics: {}\nDataset: {}\n",
            base_prompt(context),
            findings.summary,
            statistics.join(", "),
            findings.dataset
        );

        let reasoning = self
            .gateway
            .reason(ReasoningRequest::new(&self.system_prompt, prompt))
            .await?;
        let chart: ChartDraft = decode_structured(&reasoning, "chart code")?;

        let output = self
            .gateway
            .execute_code(&chart.code, &[findings.dataset.clone()])
            .await?;

        let mut artifacts = output.artifacts;
        if artifacts.is_empty() {
            tracing::debug!(
                step_id = %context.step_id,
                title = %chart.title,
                "Sandbox returned no artifact, storing chart spec"
            );
            artifacts.push(
                self.gateway
                    .save_artifact(chart.code.into_bytes(), ArtifactKind::Chart)
                    .await?,
            );
        }

        Ok(WorkerOutput::Visualization { artifacts })
    }
}
