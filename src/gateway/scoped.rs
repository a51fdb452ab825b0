use super::{
    ArtifactKind, ArtifactRef, Capability, CapabilityGateway, CodeOutput, DocumentSection,
    GatewayError, GatewayResult, LiteratureHit, Reasoning, ReasoningRequest, TableResult,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Gateway view restricted to one worker's allowed capabilities.
///
/// Calls outside the set fail with [`GatewayError::NotPermitted`] before
/// reaching the backend, and reasoning requests have their tool list
/// narrowed to the same set.
#[derive(Clone)]
pub struct ScopedGateway {
    inner: Arc<dyn CapabilityGateway>,
    allowed: &'static [Capability],
}

impl ScopedGateway {
    pub fn new(inner: Arc<dyn CapabilityGateway>, allowed: &'static [Capability]) -> Self {
        Self { inner, allowed }
    }

    pub fn allowed(&self) -> &'static [Capability] {
        self.allowed
    }

    fn check(&self, capability: Capability) -> GatewayResult<()> {
        if self.allowed.contains(&capability) {
            Ok(())
        } else {
            tracing::warn!(capability = %capability, "Blocked capability outside worker scope");
            Err(GatewayError::NotPermitted(capability.as_str().to_string()))
        }
    }
}

#[async_trait]
impl CapabilityGateway for ScopedGateway {
    async fn reason(&self, mut request: ReasoningRequest) -> GatewayResult<Reasoning> {
        self.check(Capability::Reason)?;
        request.allowed_tools.retain(|c| self.allowed.contains(c));
        self.inner.reason(request).await
    }

    async fn query_table(&self, query: &str) -> GatewayResult<TableResult> {
        self.check(Capability::QueryTable)?;
        self.inner.query_table(query).await
    }

    async fn search_literature(&self, query: &str) -> GatewayResult<Vec<LiteratureHit>> {
        self.check(Capability::SearchLiterature)?;
        self.inner.search_literature(query).await
    }

    async fn execute_code(&self, snippet: &str, data_refs: &[String]) -> GatewayResult<CodeOutput> {
        self.check(Capability::ExecuteCode)?;
        self.inner.execute_code(snippet, data_refs).await
    }

    async fn save_artifact(&self, bytes: Vec<u8>, kind: ArtifactKind) -> GatewayResult<ArtifactRef> {
        self.check(Capability::SaveArtifact)?;
        self.inner.save_artifact(bytes, kind).await
    }

    async fn create_document(
        &self,
        sections: &[DocumentSection],
        embedded_artifacts: &[ArtifactRef],
    ) -> GatewayResult<ArtifactRef> {
        self.check(Capability::CreateDocument)?;
        self.inner.create_document(sections, embedded_artifacts).await
    }
}
