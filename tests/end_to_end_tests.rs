//! Full-stack runs: service → coordinator → built-in workers → tool gateway
//! → scripted LLM and canned backend tools.

mod common;

use async_trait::async_trait;
use common::mocks::ScriptedLLM;
use hypatia::planning::{Intent, IntentClassifier, ReasoningClassifier};
use hypatia::tools::{Tool, ToolRegistry};
use hypatia::types::{AppError, Request, Result, ToolCall};
use hypatia::utils::toml_config::{ClassifierKind, HypatiaConfig, HypatiaConfigManager};
use hypatia::{LLMResponse, PipelineService, PipelineStatus};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Backend tool answering every call with a fixed JSON value.
struct CannedTool {
    name: &'static str,
    response: Value,
}

#[async_trait]
impl Tool for CannedTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "canned backend"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _args: Value) -> Result<Value> {
        Ok(self.response.clone())
    }
}

fn tools() -> Arc<ToolRegistry> {
    Arc::new(
        ToolRegistry::new()
            .with_tool(Arc::new(CannedTool {
                name: "search_literature",
                response: json!([
                    {"title": "Age and survival", "snippet": "older cohorts...", "source": "pubmed:1"}
                ]),
            }))
            .with_tool(Arc::new(CannedTool {
                name: "query_table",
                response: json!({"columns": ["age", "days"], "rows": [[61, 400]]}),
            })),
    )
}

fn fast_config() -> HypatiaConfig {
    let mut config = HypatiaConfig::default();
    config.coordinator.retry_backoff_ms = 0;
    config.coordinator.max_backoff_ms = 0;
    config
}

#[tokio::test]
async fn test_open_question_runs_ideation_through_gateway() {
    let llm = ScriptedLLM::new(vec![
        r#"Here are my suggestions:
{"hypotheses": [
  {"statement": "Age predicts survival", "rationale": "cohort data", "data_available": true},
  {"statement": "Stage predicts survival", "rationale": "staging", "data_available": true},
  {"statement": "Sex modifies treatment effect", "rationale": "trials", "data_available": false}
]}"#,
    ]);
    let service = PipelineService::standard(
        HypatiaConfigManager::from_config(fast_config()),
        Arc::new(llm),
        tools(),
    );

    let id = service
        .submit(Request::new("what should I investigate?"), None)
        .unwrap();
    let state = tokio::time::timeout(Duration::from_secs(10), service.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state.intent, Some(Intent::IdeationStart));
    assert_eq!(state.status, PipelineStatus::Succeeded);
    let hypotheses = state.latest_output(hypatia::WorkerKind::Ideation).unwrap().hypotheses().unwrap();
    assert_eq!(hypotheses.len(), 3);
    assert_eq!(hypotheses[2].id, "H3");
    assert!(state.artifacts().is_empty());
}

#[tokio::test]
async fn test_ideation_model_may_search_while_drafting() {
    let llm = ScriptedLLM::from_responses(vec![
        LLMResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "search_literature".to_string(),
                arguments: json!({"query": "survival by stage"}),
            }],
            finish_reason: "tool_calls".to_string(),
        },
        LLMResponse {
            content: r#"{"hypotheses": [{"statement": "Stage predicts survival"}]}"#.to_string(),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
        },
    ]);
    let service = PipelineService::standard(
        HypatiaConfigManager::from_config(fast_config()),
        Arc::new(llm.clone()),
        tools(),
    );

    let id = service
        .submit(Request::new("what should I investigate?"), None)
        .unwrap();
    let state = tokio::time::timeout(Duration::from_secs(10), service.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state.status, PipelineStatus::Succeeded);
    let offered = llm.offered_tools();
    assert_eq!(offered.len(), 2);
    assert!(offered[0].contains(&"search_literature".to_string()));
    assert!(offered[0].contains(&"query_table".to_string()));
    assert!(!offered[0].contains(&"execute_code".to_string()));
}

#[tokio::test]
async fn test_unparseable_model_output_is_invalid_shape() {
    let llm = ScriptedLLM::new(vec!["I would rather not answer in JSON."]);
    let service = PipelineService::standard(
        HypatiaConfigManager::from_config(fast_config()),
        Arc::new(llm),
        tools(),
    );

    let id = service
        .submit(Request::new("what should I investigate?"), None)
        .unwrap();
    let state = tokio::time::timeout(Duration::from_secs(10), service.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(state.status, PipelineStatus::Failed { .. }));
    let record = &state.records[0];
    assert_eq!(record.attempts.len(), 1, "shape failures are not retried");
}

#[tokio::test]
async fn test_reasoning_classifier_parses_and_flags_ambiguity() {
    let request = Request::new("Could you look at survival?");

    let classifier = ReasoningClassifier::new(Arc::new(ScriptedLLM::new(vec!["Intent: analysis"])));
    assert_eq!(
        classifier.classify(&request, None).await.unwrap(),
        Intent::AnalysisRequest
    );

    let confused = ReasoningClassifier::new(Arc::new(ScriptedLLM::new(vec!["no idea, sorry"])));
    assert!(matches!(
        confused.classify(&request, None).await,
        Err(AppError::ClassificationAmbiguous(_))
    ));

    let offline = ReasoningClassifier::new(Arc::new(ScriptedLLM::failing()));
    assert!(matches!(
        offline.classify(&request, None).await,
        Err(AppError::ClassificationAmbiguous(_))
    ));
}

#[tokio::test]
async fn test_reasoning_classifier_outage_falls_back_to_ideation() {
    let mut config = fast_config();
    config.coordinator.classifier = ClassifierKind::Reasoning;
    // First reply is consumed by the classifier, second by ideation.
    let llm = ScriptedLLM::new(vec![
        "hmm",
        r#"{"hypotheses": [{"statement": "Age predicts survival"}]}"#,
    ]);
    let service = PipelineService::standard(
        HypatiaConfigManager::from_config(config),
        Arc::new(llm),
        tools(),
    );

    let id = service.submit(Request::new("survival?"), None).unwrap();
    let state = tokio::time::timeout(Duration::from_secs(10), service.wait(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state.intent, Some(Intent::IdeationStart));
    assert_eq!(state.status, PipelineStatus::Succeeded);
}
