//! Worker Registry
//!
//! Maps each [`WorkerKind`] to the worker instance the coordinator
//! dispatches to. [`WorkerRegistry::standard`] wires the four built-in
//! workers to a shared gateway, applying system-prompt overrides from
//! `[workers.<kind>]` in `hypatia.toml`.

use super::{AnalysisWorker, IdeationWorker, VisualizationWorker, Worker, WorkerKind, WriterWorker};
use crate::gateway::CapabilityGateway;
use crate::utils::toml_config::HypatiaConfig;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerKind, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    /// The built-in reasoning-backed workers over one shared gateway.
    pub fn standard(gateway: Arc<dyn CapabilityGateway>, config: &HypatiaConfig) -> Self {
        let prompt = |kind: WorkerKind| config.system_prompt_for(kind).map(str::to_string);

        let mut ideation = IdeationWorker::new(Arc::clone(&gateway));
        if let Some(p) = prompt(WorkerKind::Ideation) {
            ideation = ideation.with_system_prompt(p);
        }
        let mut analysis = AnalysisWorker::new(Arc::clone(&gateway));
        if let Some(p) = prompt(WorkerKind::Analysis) {
            analysis = analysis.with_system_prompt(p);
        }
        let mut visualization = VisualizationWorker::new(Arc::clone(&gateway));
        if let Some(p) = prompt(WorkerKind::Visualization) {
            visualization = visualization.with_system_prompt(p);
        }
        let mut writer = WriterWorker::new(gateway);
        if let Some(p) = prompt(WorkerKind::Writer) {
            writer = writer.with_system_prompt(p);
        }

        Self::new()
            .with_worker(Arc::new(ideation))
            .with_worker(Arc::new(analysis))
            .with_worker(Arc::new(visualization))
            .with_worker(Arc::new(writer))
    }

    /// Register a worker under its own kind, replacing any previous one.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.kind(), worker);
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, kind: WorkerKind) -> Option<Arc<dyn Worker>> {
        self.workers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: WorkerKind) -> bool {
        self.workers.contains_key(&kind)
    }

    /// Registered kinds in pipeline order.
    pub fn kinds(&self) -> Vec<WorkerKind> {
        let mut kinds: Vec<WorkerKind> = self.workers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        ArtifactKind, ArtifactRef, Capability, CodeOutput, DocumentSection, GatewayResult,
        LiteratureHit, Reasoning, ReasoningRequest, TableResult,
    };
    use crate::workers::analysis::ANALYSIS_CAPABILITIES;
    use crate::workers::ideation::IDEATION_CAPABILITIES;
    use crate::workers::visualization::VISUALIZATION_CAPABILITIES;
    use crate::workers::writer::WRITER_CAPABILITIES;
    use async_trait::async_trait;

    struct NullGateway;

    #[async_trait]
    impl CapabilityGateway for NullGateway {
        async fn reason(&self, _r: ReasoningRequest) -> GatewayResult<Reasoning> {
            Ok(Reasoning::default())
        }

        async fn query_table(&self, _q: &str) -> GatewayResult<TableResult> {
            Ok(TableResult::default())
        }

        async fn search_literature(&self, _q: &str) -> GatewayResult<Vec<LiteratureHit>> {
            Ok(Vec::new())
        }

        async fn execute_code(&self, _s: &str, _d: &[String]) -> GatewayResult<CodeOutput> {
            Ok(CodeOutput::default())
        }

        async fn save_artifact(&self, _b: Vec<u8>, kind: ArtifactKind) -> GatewayResult<ArtifactRef> {
            Ok(ArtifactRef::new("mem://a", kind))
        }

        async fn create_document(
            &self,
            _s: &[DocumentSection],
            _a: &[ArtifactRef],
        ) -> GatewayResult<ArtifactRef> {
            Ok(ArtifactRef::new("mem://d", ArtifactKind::Document))
        }
    }

    #[test]
    fn test_standard_registry_has_every_kind() {
        let registry = WorkerRegistry::standard(Arc::new(NullGateway), &HypatiaConfig::default());
        assert_eq!(registry.kinds(), WorkerKind::ALL.to_vec());
        for kind in WorkerKind::ALL {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_allowed_capabilities_are_disjoint_where_it_matters() {
        assert!(!ANALYSIS_CAPABILITIES.contains(&Capability::ExecuteCode));
        assert!(!IDEATION_CAPABILITIES.contains(&Capability::CreateDocument));
        assert!(!WRITER_CAPABILITIES.contains(&Capability::QueryTable));
        assert!(VISUALIZATION_CAPABILITIES.contains(&Capability::SaveArtifact));
        for caps in [
            ANALYSIS_CAPABILITIES,
            IDEATION_CAPABILITIES,
            VISUALIZATION_CAPABILITIES,
            WRITER_CAPABILITIES,
        ] {
            assert!(caps.contains(&Capability::Reason));
        }
    }
}
