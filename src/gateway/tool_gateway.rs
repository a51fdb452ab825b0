//! Registry-backed capability gateway.
//!
//! [`ToolGateway`] routes the reasoning capability to an [`LLMClient`] and
//! every other capability to the [`ToolRegistry`] entry of the same name.
//! While reasoning, the model may request tool calls; the gateway runs them
//! (bounded by `max_tool_iterations`) and feeds the results back.

use super::structured::extract_json_object;
use super::{
    ArtifactKind, ArtifactRef, Capability, CapabilityGateway, CodeOutput, DocumentSection,
    GatewayError, GatewayResult, LiteratureHit, Reasoning, ReasoningRequest, TableResult,
};
use crate::llm::{ConversationMessage, LLMClient, LLMResponse};
use crate::tools::ToolRegistry;
use crate::types::{AppError, ToolCall};
use crate::utils::toml_config::GatewaySettings;
use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Limits applied to every gateway call.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Concurrent calls allowed across all pipelines sharing this gateway.
    pub max_in_flight: usize,
    pub call_timeout: Duration,
    /// Model turns allowed to request tools before the loop is cut off.
    pub max_tool_iterations: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            call_timeout: Duration::from_secs(60),
            max_tool_iterations: 5,
        }
    }
}

impl From<&GatewaySettings> for GatewayConfig {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            max_in_flight: settings.max_in_flight,
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
            max_tool_iterations: settings.max_tool_iterations,
        }
    }
}

pub struct ToolGateway {
    llm: Arc<dyn LLMClient>,
    registry: Arc<ToolRegistry>,
    permits: Arc<Semaphore>,
    config: GatewayConfig,
}

impl ToolGateway {
    pub fn new(llm: Arc<dyn LLMClient>, registry: Arc<ToolRegistry>, config: GatewayConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            llm,
            registry,
            permits,
            config,
        }
    }

    pub fn with_defaults(llm: Arc<dyn LLMClient>, registry: Arc<ToolRegistry>) -> Self {
        Self::new(llm, registry, GatewayConfig::default())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run one registered tool under the in-flight limit and call timeout.
    async fn call_tool(&self, capability: Capability, args: Value) -> GatewayResult<Value> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GatewayError::Unavailable("gateway is shut down".to_string()))?;

        let start = Instant::now();
        let result = timeout(
            self.config.call_timeout,
            self.registry.execute(capability.as_str(), args),
        )
        .await;

        match result {
            Ok(Ok(value)) => {
                tracing::debug!(
                    capability = %capability,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Capability call completed"
                );
                Ok(value)
            }
            Ok(Err(e)) => {
                let err = classify_tool_error(e);
                tracing::warn!(capability = %capability, error = %err, "Capability call failed");
                Err(err)
            }
            Err(_) => {
                tracing::warn!(capability = %capability, "Capability call timed out");
                Err(GatewayError::Timeout(self.config.call_timeout))
            }
        }
    }

    async fn generate(
        &self,
        messages: &[ConversationMessage],
        tools: &[crate::types::ToolDefinition],
    ) -> GatewayResult<LLMResponse> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GatewayError::Unavailable("gateway is shut down".to_string()))?;

        match timeout(
            self.config.call_timeout,
            self.llm.generate_with_tools(messages, tools),
        )
        .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(AppError::Gateway(e))) => Err(e),
            Ok(Err(e)) => Err(GatewayError::Unavailable(e.to_string())),
            Err(_) => Err(GatewayError::Timeout(self.config.call_timeout)),
        }
    }

    /// Execute the tool calls of one model turn.
    ///
    /// Permanent tool failures are reported back to the model so it can
    /// correct itself; transient and permission failures end the reasoning.
    async fn run_tool_calls(
        &self,
        calls: &[ToolCall],
        allowed: &[Capability],
    ) -> GatewayResult<Vec<(String, Value)>> {
        let mut resolved = Vec::with_capacity(calls.len());
        for call in calls {
            match Capability::from_name(&call.name) {
                Some(cap) if cap != Capability::Reason && allowed.contains(&cap) => {
                    resolved.push((call, cap))
                }
                _ => return Err(GatewayError::NotPermitted(call.name.clone())),
            }
        }

        let futures = resolved
            .iter()
            .map(|(call, cap)| self.call_tool(*cap, call.arguments.clone()));
        let results = join_all(futures).await;

        let mut outputs = Vec::with_capacity(results.len());
        for ((call, _), result) in resolved.iter().zip(results) {
            match result {
                Ok(value) => outputs.push((call.id.clone(), value)),
                Err(e) if e.is_transient() || e.is_unavailable() => return Err(e),
                Err(e) => outputs.push((call.id.clone(), json!({ "error": e.to_string() }))),
            }
        }
        Ok(outputs)
    }
}

/// Keep the classification a tool reported; anything else is a runtime failure.
fn classify_tool_error(err: AppError) -> GatewayError {
    match err {
        AppError::Gateway(e) => e,
        AppError::NotFound(msg) => GatewayError::Unavailable(msg),
        other => GatewayError::Runtime(other.to_string()),
    }
}

fn decode<T: DeserializeOwned>(capability: Capability, value: Value) -> GatewayResult<T> {
    serde_json::from_value(value).map_err(|e| GatewayError::malformed(capability, e.to_string()))
}

/// Storage backends answer with at least a location; the kind is optional.
#[derive(Deserialize)]
struct StoredLocation {
    location: String,
    #[serde(default)]
    kind: Option<ArtifactKind>,
}

fn decode_location(
    capability: Capability,
    value: Value,
    default_kind: ArtifactKind,
) -> GatewayResult<ArtifactRef> {
    let stored: StoredLocation = decode(capability, value)?;
    let artifact = ArtifactRef::new(stored.location, stored.kind.unwrap_or(default_kind));
    if !artifact.is_well_formed() {
        return Err(GatewayError::malformed(
            capability,
            format!("'{}' is not a storage reference", artifact.location),
        ));
    }
    Ok(artifact)
}

#[async_trait]
impl CapabilityGateway for ToolGateway {
    async fn reason(&self, request: ReasoningRequest) -> GatewayResult<Reasoning> {
        let allowed: Vec<Capability> = request
            .allowed_tools
            .iter()
            .copied()
            .filter(|c| *c != Capability::Reason)
            .collect();
        let names: Vec<&str> = allowed.iter().map(|c| c.as_str()).collect();
        let tools = self.registry.definitions_for(&names);

        let mut messages = vec![
            ConversationMessage::system(&request.system),
            ConversationMessage::user(&request.prompt),
        ];
        let mut tool_calls_made = Vec::new();
        let mut last_content = String::new();

        for iteration in 0..self.config.max_tool_iterations.max(1) {
            let response = self.generate(&messages, &tools).await?;
            last_content = response.content.clone();

            if response.tool_calls.is_empty() {
                tracing::debug!(
                    iterations = iteration + 1,
                    tools_called = tool_calls_made.len(),
                    "Reasoning completed"
                );
                return Ok(Reasoning {
                    structured_output: extract_json_object(&response.content),
                    text: response.content,
                    tool_calls_made,
                });
            }

            messages.push(ConversationMessage::assistant(
                &response.content,
                response.tool_calls.clone(),
            ));
            tool_calls_made.extend(response.tool_calls.iter().map(|c| c.name.clone()));

            for (call_id, value) in self.run_tool_calls(&response.tool_calls, &allowed).await? {
                messages.push(ConversationMessage::tool_result(call_id, &value));
            }
        }

        tracing::warn!(
            max_iterations = self.config.max_tool_iterations,
            "Reasoning hit the tool iteration limit"
        );
        Ok(Reasoning {
            structured_output: extract_json_object(&last_content),
            text: last_content,
            tool_calls_made,
        })
    }

    async fn query_table(&self, query: &str) -> GatewayResult<TableResult> {
        let value = self
            .call_tool(Capability::QueryTable, json!({ "query": query }))
            .await?;
        decode(Capability::QueryTable, value)
    }

    async fn search_literature(&self, query: &str) -> GatewayResult<Vec<LiteratureHit>> {
        let value = self
            .call_tool(Capability::SearchLiterature, json!({ "query": query }))
            .await?;
        // Accept both a bare list and `{"hits": [...]}`.
        match value {
            Value::Object(mut map) if map.contains_key("hits") => decode(
                Capability::SearchLiterature,
                map.remove("hits").unwrap_or(Value::Null),
            ),
            other => decode(Capability::SearchLiterature, other),
        }
    }

    async fn execute_code(&self, snippet: &str, data_refs: &[String]) -> GatewayResult<CodeOutput> {
        let value = self
            .call_tool(
                Capability::ExecuteCode,
                json!({ "code": snippet, "data_refs": data_refs }),
            )
            .await?;
        decode(Capability::ExecuteCode, value)
    }

    async fn save_artifact(&self, bytes: Vec<u8>, kind: ArtifactKind) -> GatewayResult<ArtifactRef> {
        let value = self
            .call_tool(
                Capability::SaveArtifact,
                json!({ "bytes": bytes, "kind": kind }),
            )
            .await?;
        decode_location(Capability::SaveArtifact, value, kind)
    }

    async fn create_document(
        &self,
        sections: &[DocumentSection],
        embedded_artifacts: &[ArtifactRef],
    ) -> GatewayResult<ArtifactRef> {
        let value = self
            .call_tool(
                Capability::CreateDocument,
                json!({ "sections": sections, "artifacts": embedded_artifacts }),
            )
            .await?;
        decode_location(Capability::CreateDocument, value, ArtifactKind::Document)
    }
}
