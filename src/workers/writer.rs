use super::{base_prompt, decode_structured, Worker, WorkerFailure, WorkerKind, WorkerOutput};
use crate::context::ScopedContext;
use crate::gateway::{
    ArtifactRef, Capability, CapabilityGateway, DocumentSection, ReasoningRequest, ScopedGateway,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

pub const WRITER_CAPABILITIES: &[Capability] = &[Capability::Reason, Capability::CreateDocument];

const SYSTEM_PROMPT: &str = r#"You are the writer worker of a research assistant.
Draft a concise research report with Introduction, Methods, Results and
Discussion sections. Report statistics exactly as given; never invent numbers.
Refer to figures by their number in the order listed.

Respond with JSON only: {"sections": [{"heading": "...", "body": "..."}]}"#;

#[derive(Deserialize)]
struct ReportDraft {
    sections: Vec<DocumentSection>,
}

/// Drafts a report and stores it as a document with embedded charts.
pub struct WriterWorker {
    gateway: ScopedGateway,
    system_prompt: String,
}

impl WriterWorker {
    pub fn new(gateway: Arc<dyn CapabilityGateway>) -> Self {
        Self {
            gateway: ScopedGateway::new(gateway, WRITER_CAPABILITIES),
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn prompt(context: &ScopedContext, charts: &[ArtifactRef]) -> String {
        let mut prompt = base_prompt(context);

        if let Some(hypotheses) = context.hypotheses() {
            prompt.push_str("\nHypotheses:\n");
            for h in hypotheses {
                prompt.push_str(&format!("- {}: {}\n", h.id, h.statement));
            }
        }

        if let Some(findings) = context.findings() {
            prompt.push_str(&format!("\nFindings: {}\n", findings.summary));
            for s in &findings.statistics {
                prompt.push_str(&format!("- {} = {}\n", s.name, s.value));
            }
            if let Some(p) = findings.p_value {
                prompt.push_str(&format!("- p-value = {}\n", p));
            }
            prompt.push_str(&format!("Dataset: {}\n", findings.dataset));
        }

        if !charts.is_empty() {
            prompt.push_str("\nFigures:\n");
            for (i, chart) in charts.iter().enumerate() {
                prompt.push_str(&format!("Figure {}: {}\n", i + 1, chart));
            }
        }
        prompt
    }
}

#[async_trait]
impl Worker for WriterWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Writer
    }

    fn allowed_capabilities(&self) -> &'static [Capability] {
        WRITER_CAPABILITIES
    }

    async fn run(&self, context: &ScopedContext) -> Result<WorkerOutput, WorkerFailure> {
        let charts: Vec<ArtifactRef> = context.charts().into_iter().cloned().collect();

        let reasoning = self
            .gateway
            .reason(ReasoningRequest::new(
                &self.system_prompt,
                Self::prompt(context, &charts),
            ))
            .await?;
        let draft: ReportDraft = decode_structured(&reasoning, "report sections")?;
        if draft.sections.is_empty() {
            return Err(WorkerFailure::invalid_output("report has no sections"));
        }

        let document = self.gateway.create_document(&draft.sections, &charts).await?;
        Ok(WorkerOutput::Writer { document })
    }
}
