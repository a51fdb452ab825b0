//! Research Workers
//!
//! A worker performs one research capability (ideation, analysis,
//! visualization, writing) over a [`ScopedContext`]. Internally it may make
//! any number of gateway calls; to the coordinator it is one opaque
//! `run(context)` returning a typed [`WorkerOutput`] or a classified
//! [`WorkerFailure`].
//!
//! Every worker holds a [`ScopedGateway`](crate::gateway::ScopedGateway)
//! limited to its `const` capability set, so a misbehaving worker cannot
//! reach tools it was never meant to use.

/// Analysis worker.
pub mod analysis;
/// Ideation worker.
pub mod ideation;
/// Worker lookup by kind.
pub mod registry;
/// Visualization worker.
pub mod visualization;
/// Writer worker.
pub mod writer;

pub use analysis::AnalysisWorker;
pub use ideation::IdeationWorker;
pub use registry::WorkerRegistry;
pub use visualization::VisualizationWorker;
pub use writer::WriterWorker;

use crate::context::ScopedContext;
use crate::gateway::{ArtifactRef, Capability, GatewayError, Reasoning};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Ideation,
    Analysis,
    Visualization,
    Writer,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 4] = [
        WorkerKind::Ideation,
        WorkerKind::Analysis,
        WorkerKind::Visualization,
        WorkerKind::Writer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Ideation => "ideation",
            WorkerKind::Analysis => "analysis",
            WorkerKind::Visualization => "visualization",
            WorkerKind::Writer => "writer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "ideation" => Some(WorkerKind::Ideation),
            "analysis" => Some(WorkerKind::Analysis),
            "visualization" | "viz" => Some(WorkerKind::Visualization),
            "writer" | "writing" => Some(WorkerKind::Writer),
            _ => None,
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============= Output Contracts =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// `H1`, `H2`, ... in rank order.
    pub id: String,
    pub statement: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub data_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFindings {
    pub summary: String,
    #[serde(default)]
    pub statistics: Vec<Statistic>,
    #[serde(default)]
    pub p_value: Option<f64>,
    /// Dataset the query actually ran against.
    pub dataset: String,
}

/// Structured result of one worker run. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerOutput {
    Ideation { hypotheses: Vec<Hypothesis> },
    Analysis(AnalysisFindings),
    Visualization { artifacts: Vec<ArtifactRef> },
    Writer { document: ArtifactRef },
}

impl WorkerOutput {
    pub fn kind(&self) -> WorkerKind {
        match self {
            WorkerOutput::Ideation { .. } => WorkerKind::Ideation,
            WorkerOutput::Analysis(_) => WorkerKind::Analysis,
            WorkerOutput::Visualization { .. } => WorkerKind::Visualization,
            WorkerOutput::Writer { .. } => WorkerKind::Writer,
        }
    }

    pub fn artifacts(&self) -> Vec<&ArtifactRef> {
        match self {
            WorkerOutput::Visualization { artifacts } => artifacts.iter().collect(),
            WorkerOutput::Writer { document } => vec![document],
            _ => Vec::new(),
        }
    }

    pub fn hypotheses(&self) -> Option<&[Hypothesis]> {
        match self {
            WorkerOutput::Ideation { hypotheses } => Some(hypotheses),
            _ => None,
        }
    }

    pub fn findings(&self) -> Option<&AnalysisFindings> {
        match self {
            WorkerOutput::Analysis(findings) => Some(findings),
            _ => None,
        }
    }

    /// One-line description used in the synthesized response.
    pub fn summary_line(&self) -> String {
        match self {
            WorkerOutput::Ideation { hypotheses } => {
                format!("{} ranked hypotheses", hypotheses.len())
            }
            WorkerOutput::Analysis(findings) => match findings.p_value {
                Some(p) => format!("{} (p = {:.4})", findings.summary, p),
                None => findings.summary.clone(),
            },
            WorkerOutput::Visualization { artifacts } => format!("{} chart(s)", artifacts.len()),
            WorkerOutput::Writer { document } => format!("document at {}", document),
        }
    }
}

// ============= Failures =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientToolFailure,
    CapabilityUnavailable,
    ToolPermanent,
    InvalidOutputShape,
    UserCancelled,
}

impl FailureKind {
    /// Failures worth re-dispatching with the same context.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::TransientToolFailure | FailureKind::CapabilityUnavailable
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::TransientToolFailure => "transient tool failure",
            FailureKind::CapabilityUnavailable => "capability unavailable",
            FailureKind::ToolPermanent => "permanent tool failure",
            FailureKind::InvalidOutputShape => "invalid output shape",
            FailureKind::UserCancelled => "user cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct WorkerFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl WorkerFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::TransientToolFailure, detail)
    }

    pub fn invalid_output(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidOutputShape, detail)
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::UserCancelled, "pipeline cancelled by user")
    }
}

impl From<GatewayError> for WorkerFailure {
    fn from(err: GatewayError) -> Self {
        let kind = match &err {
            GatewayError::Timeout(_) | GatewayError::RateLimited(_) => {
                FailureKind::TransientToolFailure
            }
            GatewayError::Unavailable(_) => FailureKind::CapabilityUnavailable,
            GatewayError::Malformed { .. } => FailureKind::InvalidOutputShape,
            GatewayError::Syntax(_)
            | GatewayError::Permission(_)
            | GatewayError::Runtime(_)
            | GatewayError::NotPermitted(_) => FailureKind::ToolPermanent,
        };
        Self::new(kind, err.to_string())
    }
}

// ============= Worker Trait =============

/// A unit performing one research capability.
///
/// Implementations must tolerate repeated invocation with an identical
/// context: the coordinator re-dispatches after transient failures.
#[async_trait]
pub trait Worker: Send + Sync {
    fn kind(&self) -> WorkerKind;

    /// Gateway operations this worker may call.
    fn allowed_capabilities(&self) -> &'static [Capability];

    async fn run(&self, context: &ScopedContext) -> Result<WorkerOutput, WorkerFailure>;
}

/// Decode the structured part of a reasoning result.
///
/// Missing or mismatched JSON means the model did not honour the output
/// contract, which is an invalid-output-shape failure.
pub(crate) fn decode_structured<T: DeserializeOwned>(
    reasoning: &Reasoning,
    what: &str,
) -> Result<T, WorkerFailure> {
    let value = reasoning.structured_output.clone().ok_or_else(|| {
        WorkerFailure::invalid_output(format!("reasoning returned no structured {}", what))
    })?;
    serde_json::from_value(value)
        .map_err(|e| WorkerFailure::invalid_output(format!("unreadable {}: {}", what, e)))
}

/// Compose the user-facing prompt shared by every worker.
pub(crate) fn base_prompt(context: &ScopedContext) -> String {
    let mut prompt = format!("Research objective: {}\n", context.objective);
    if !context.instructions.is_empty() {
        prompt.push_str(&format!("Step instructions: {}\n", context.instructions));
    }
    if let Some(dataset) = context.dataset() {
        prompt.push_str(&format!("Active dataset: {}\n", dataset));
    }
    prompt
}
