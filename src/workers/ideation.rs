use super::{
    base_prompt, decode_structured, FailureKind, Hypothesis, Worker, WorkerFailure, WorkerKind,
    WorkerOutput,
};
use crate::context::ScopedContext;
use crate::gateway::{
    Capability, CapabilityGateway, LiteratureHit, ReasoningRequest, ScopedGateway, TableResult,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

pub const IDEATION_CAPABILITIES: &[Capability] = &[
    Capability::Reason,
    Capability::SearchLiterature,
    Capability::QueryTable,
];

const SYSTEM_PROMPT: &str = r#"You are the ideation worker of a research assistant.
Generate 3-5 testable research hypotheses grounded in the literature and in the
data that is actually available. Rank them best first. For each hypothesis give a
falsifiable statement, a short rationale from the literature, and whether the
required data is available in the dataset shown.

Respond with JSON only:
{"hypotheses": [{"statement": "...", "rationale": "...", "data_available": true}]}"#;

/// Literature hits forwarded to the model.
const MAX_HITS: usize = 8;

/// Tools the model may call for follow-up searches while drafting.
const REASONING_TOOLS: &[Capability] = &[Capability::SearchLiterature, Capability::QueryTable];

#[derive(Deserialize)]
struct Draft {
    hypotheses: Vec<DraftHypothesis>,
}

#[derive(Deserialize)]
struct DraftHypothesis {
    #[serde(default)]
    id: Option<String>,
    statement: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    data_available: bool,
}

/// Proposes ranked hypotheses from a literature search and a look at the data.
pub struct IdeationWorker {
    gateway: ScopedGateway,
    system_prompt: String,
}

impl IdeationWorker {
    pub fn new(gateway: Arc<dyn CapabilityGateway>) -> Self {
        Self {
            gateway: ScopedGateway::new(gateway, IDEATION_CAPABILITIES),
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sample a few rows so the model sees column names and value shapes.
    async fn inspect_dataset(&self, dataset: Option<&str>) -> Result<Option<TableResult>, WorkerFailure> {
        match dataset {
            Some(dataset) if dataset.contains('`') => Err(WorkerFailure::new(
                FailureKind::ToolPermanent,
                format!("dataset name {:?} contains a backtick", dataset),
            )),
            Some(dataset) => {
                let query = format!("SELECT * FROM `{}` LIMIT 5", dataset);
                Ok(Some(self.gateway.query_table(&query).await?))
            }
            None => Ok(None),
        }
    }

    fn prompt(context: &ScopedContext, hits: &[LiteratureHit], table: Option<&TableResult>) -> String {
        let mut prompt = base_prompt(context);

        if hits.is_empty() {
            prompt.push_str("\nNo literature results were found.\n");
        } else {
            prompt.push_str("\nLiterature:\n");
            for hit in hits.iter().take(MAX_HITS) {
                prompt.push_str(&format!("- {} ({}): {}\n", hit.title, hit.source, hit.snippet));
            }
        }

        match table {
            Some(table) => prompt.push_str(&format!(
                "\nAvailable columns: {}\n",
                table.columns.join(", ")
            )),
            None => prompt.push_str("\nNo dataset is active; mark data availability as false.\n"),
        }
        prompt
    }
}

#[async_trait]
impl Worker for IdeationWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Ideation
    }

    fn allowed_capabilities(&self) -> &'static [Capability] {
        IDEATION_CAPABILITIES
    }

    async fn run(&self, context: &ScopedContext) -> Result<WorkerOutput, WorkerFailure> {
        let (hits, table) = tokio::join!(
            self.gateway.search_literature(&context.objective),
            self.inspect_dataset(context.dataset())
        );
        let hits = hits?;
        let table = table?;

        let reasoning = self
            .gateway
            .reason(
                ReasoningRequest::new(
                    &self.system_prompt,
                    Self::prompt(context, &hits, table.as_ref()),
                )
                .with_tools(REASONING_TOOLS),
            )
            .await?;
        let draft: Draft = decode_structured(&reasoning, "hypotheses")?;

        let hypotheses = draft
            .hypotheses
            .into_iter()
            .enumerate()
            .map(|(rank, h)| Hypothesis {
                id: h
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("H{}", rank + 1)),
                statement: h.statement,
                rationale: h.rationale,
                data_available: h.data_available,
            })
            .collect();

        Ok(WorkerOutput::Ideation { hypotheses })
    }
}
