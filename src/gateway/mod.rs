//! Capability Gateway
//!
//! The single doorway through which workers reach anything external: the
//! reasoning capability and the backend tools (table queries, literature
//! search, code execution, artifact storage, document creation).
//!
//! The gateway normalises three things for its callers:
//!
//! - **Result shapes** - every operation returns a typed value; backend JSON
//!   that does not decode becomes [`GatewayError::Malformed`].
//! - **Errors** - failures are classified so the coordinator can tell a
//!   retryable hiccup ([`GatewayError::is_transient`]) from a permanent one.
//! - **Latency** - calls are bounded by a timeout and an in-flight limit.
//!
//! The gateway is shared and stateless from the coordinator's point of view;
//! it is safe to use from many pipelines at once.

/// Per-worker allowed-capability wrapper.
pub mod scoped;
/// JSON extraction from free-form reasoning output.
pub mod structured;
/// Registry-backed gateway implementation.
pub mod tool_gateway;

pub use scoped::ScopedGateway;
pub use tool_gateway::{GatewayConfig, ToolGateway};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Operations exposed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Reason,
    QueryTable,
    SearchLiterature,
    ExecuteCode,
    SaveArtifact,
    CreateDocument,
}

impl Capability {
    /// Capabilities backed by registered tools (everything except reasoning).
    pub const TOOLS: [Capability; 5] = [
        Capability::QueryTable,
        Capability::SearchLiterature,
        Capability::ExecuteCode,
        Capability::SaveArtifact,
        Capability::CreateDocument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Reason => "reason",
            Capability::QueryTable => "query_table",
            Capability::SearchLiterature => "search_literature",
            Capability::ExecuteCode => "execute_code",
            Capability::SaveArtifact => "save_artifact",
            Capability::CreateDocument => "create_document",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "reason" => Some(Capability::Reason),
            "query_table" => Some(Capability::QueryTable),
            "search_literature" => Some(Capability::SearchLiterature),
            "execute_code" => Some(Capability::ExecuteCode),
            "save_artifact" => Some(Capability::SaveArtifact),
            "create_document" => Some(Capability::CreateDocument),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============= Request / Result Types =============

/// Input to the reasoning capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub system: String,
    pub prompt: String,
    /// Tool-backed capabilities the model may call while reasoning.
    #[serde(default)]
    pub allowed_tools: Vec<Capability>,
}

impl ReasoningRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            allowed_tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: &[Capability]) -> Self {
        self.allowed_tools = tools.to_vec();
        self
    }
}

/// Output of the reasoning capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reasoning {
    pub text: String,
    /// First JSON object found in the model output, if any.
    #[serde(default)]
    pub structured_output: Option<Value>,
    /// Names of the tools invoked while reasoning, in call order.
    #[serde(default)]
    pub tool_calls_made: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    /// Fully qualified table the rows were read from, when the engine reports it.
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteratureHit {
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Chart,
    Document,
    Dataset,
    Other,
}

/// Location of externally stored output. Never the content itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub location: String,
    pub kind: ArtifactKind,
}

impl ArtifactRef {
    pub fn new(location: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            location: location.into(),
            kind,
        }
    }

    /// `scheme://path` with a non-empty path and no whitespace.
    pub fn is_well_formed(&self) -> bool {
        let Some((scheme, rest)) = self.location.split_once("://") else {
            return false;
        };
        let scheme_ok = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
        scheme_ok && !rest.is_empty() && !self.location.chars().any(char::is_whitespace)
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSection {
    pub heading: String,
    pub body: String,
}

// ============= Errors =============

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("query syntax error: {0}")]
    Syntax(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("capability call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("malformed result from {capability}: {detail}")]
    Malformed {
        capability: Capability,
        detail: String,
    },

    #[error("capability '{0}' is not permitted for this worker")]
    NotPermitted(String),
}

impl GatewayError {
    /// Timeouts and rate limits clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::RateLimited(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }

    pub fn malformed(capability: Capability, detail: impl Into<String>) -> Self {
        GatewayError::Malformed {
            capability,
            detail: detail.into(),
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Uniform interface to the reasoning capability and external tools.
///
/// Every call except [`execute_code`](CapabilityGateway::execute_code) with a
/// side-effecting snippet is safe to repeat, which is what lets the
/// coordinator re-dispatch a step after a transient failure.
#[async_trait]
pub trait CapabilityGateway: Send + Sync {
    async fn reason(&self, request: ReasoningRequest) -> GatewayResult<Reasoning>;

    async fn query_table(&self, query: &str) -> GatewayResult<TableResult>;

    async fn search_literature(&self, query: &str) -> GatewayResult<Vec<LiteratureHit>>;

    async fn execute_code(&self, snippet: &str, data_refs: &[String]) -> GatewayResult<CodeOutput>;

    async fn save_artifact(&self, bytes: Vec<u8>, kind: ArtifactKind) -> GatewayResult<ArtifactRef>;

    async fn create_document(
        &self,
        sections: &[DocumentSection],
        embedded_artifacts: &[ArtifactRef],
    ) -> GatewayResult<ArtifactRef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_names_round_trip() {
        for capability in Capability::TOOLS {
            assert_eq!(Capability::from_name(capability.as_str()), Some(capability));
        }
        assert_eq!(Capability::from_name("reason"), Some(Capability::Reason));
        assert_eq!(Capability::from_name("drop_table"), None);
    }

    #[test]
    fn test_artifact_reference_shape() {
        assert!(ArtifactRef::new("gs://bucket/charts/km.png", ArtifactKind::Chart).is_well_formed());
        assert!(ArtifactRef::new("https://docs.example.org/d/42", ArtifactKind::Document)
            .is_well_formed());
        assert!(!ArtifactRef::new("<svg>...</svg>", ArtifactKind::Chart).is_well_formed());
        assert!(!ArtifactRef::new("gs://", ArtifactKind::Chart).is_well_formed());
        assert!(!ArtifactRef::new("gs://bucket/a b.png", ArtifactKind::Chart).is_well_formed());
        assert!(!ArtifactRef::new("://missing-scheme", ArtifactKind::Chart).is_well_formed());
    }

    #[test]
    fn test_error_classification() {
        assert!(GatewayError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(GatewayError::RateLimited("429".into()).is_transient());
        assert!(!GatewayError::Syntax("near FROM".into()).is_transient());
        assert!(GatewayError::Unavailable("down".into()).is_unavailable());
        assert!(!GatewayError::Permission("no".into()).is_unavailable());
    }
}
