use super::{
    base_prompt, decode_structured, AnalysisFindings, Statistic, Worker, WorkerFailure, WorkerKind,
    WorkerOutput,
};
use crate::context::ScopedContext;
use crate::gateway::{Capability, CapabilityGateway, ReasoningRequest, ScopedGateway, TableResult};
use crate::planning::hypothesis_reference;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

pub const ANALYSIS_CAPABILITIES: &[Capability] = &[Capability::Reason, Capability::QueryTable];

const SYSTEM_PROMPT: &str = r#"You are the analysis worker of a research assistant.
You test hypotheses with SQL against the research data warehouse. Prefer
aggregate queries that compute the statistics needed for the test directly."#;

const QUERY_FORMAT: &str = r#"Write ONE SQL query that retrieves what is needed to test the target.
Respond with JSON only: {"query": "...", "dataset": "<fully qualified table>"}"#;

const FINDINGS_FORMAT: &str = r#"Interpret the query result. Report the primary statistical result.
Respond with JSON only:
{"summary": "...", "statistics": [{"name": "...", "value": 0.0}], "p_value": 0.05}
Use null for p_value when no test was performed."#;

/// Rows shown to the model when interpreting a result.
const MAX_ROWS: usize = 50;

#[derive(Deserialize)]
struct QueryDraft {
    query: String,
    #[serde(default)]
    dataset: Option<String>,
}

#[derive(Deserialize)]
struct FindingsDraft {
    summary: String,
    #[serde(default)]
    statistics: Vec<Statistic>,
    #[serde(default)]
    p_value: Option<f64>,
}

/// Runs a statistical test for a hypothesis (or the request objective).
pub struct AnalysisWorker {
    gateway: ScopedGateway,
    system_prompt: String,
}

impl AnalysisWorker {
    pub fn new(gateway: Arc<dyn CapabilityGateway>) -> Self {
        Self {
            gateway: ScopedGateway::new(gateway, ANALYSIS_CAPABILITIES),
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// The hypothesis named in the instructions, else the top-ranked one,
    /// else the objective itself.
    pub fn target(context: &ScopedContext) -> String {
        let Some(hypotheses) = context.hypotheses() else {
            return context.objective.clone();
        };

        if let Some(reference) = hypothesis_reference(&context.instructions) {
            if let Some(h) = hypotheses.iter().find(|h| h.id.eq_ignore_ascii_case(&reference)) {
                return format!("{}: {}", h.id, h.statement);
            }
            tracing::warn!(
                step_id = %context.step_id,
                reference = %reference,
                "Referenced hypothesis not among inputs, using top-ranked"
            );
        }

        hypotheses
            .first()
            .map(|h| format!("{}: {}", h.id, h.statement))
            .unwrap_or_else(|| context.objective.clone())
    }

    fn render_rows(table: &TableResult) -> String {
        let mut rendered = format!("columns: {}\n", table.columns.join(", "));
        for row in table.rows.iter().take(MAX_ROWS) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            rendered.push_str(&cells.join(" | "));
            rendered.push('\n');
        }
        if table.rows.len() > MAX_ROWS {
            rendered.push_str(&format!("... {} more rows\n", table.rows.len() - MAX_ROWS));
        }
        rendered
    }
}

#[async_trait]
impl Worker for AnalysisWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Analysis
    }

    fn allowed_capabilities(&self) -> &'static [Capability] {
        ANALYSIS_CAPABILITIES
    }

    async fn run(&self, context: &ScopedContext) -> Result<WorkerOutput, WorkerFailure> {
        let target = Self::target(context);
        let prompt = format!("{}\nTarget: {}\n\n", base_prompt(context), target);

        // The model may sample the table before committing to a query.
        let planned = self
            .gateway
            .reason(
                ReasoningRequest::new(&self.system_prompt, format!("{}{}", prompt, QUERY_FORMAT))
                    .with_tools(&[Capability::QueryTable]),
            )
            .await?;
        let query: QueryDraft = decode_structured(&planned, "query")?;

        let table = self.gateway.query_table(&query.query).await?;

        let interpreted = self
            .gateway
            .reason(ReasoningRequest::new(
                &self.system_prompt,
                format!(
                    "{}Query:\n{}\n\nResult:\n{}\n{}",
                    prompt,
                    query.query,
                    Self::render_rows(&table),
                    FINDINGS_FORMAT
                ),
            ))
            .await?;
        let findings: FindingsDraft = decode_structured(&interpreted, "findings")?;

        let dataset = table
            .source
            .clone()
            .or(query.dataset)
            .or_else(|| context.dataset().map(str::to_string))
            .unwrap_or_default();

        Ok(WorkerOutput::Analysis(AnalysisFindings {
            summary: findings.summary,
            statistics: findings.statistics,
            p_value: findings.p_value,
            dataset,
        }))
    }
}
