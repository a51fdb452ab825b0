//! Intent classification.
//!
//! [`KeywordClassifier`] is the deterministic default; [`ReasoningClassifier`]
//! asks the reasoning capability and reports
//! [`AppError::ClassificationAmbiguous`] when it cannot parse the answer.
//! The coordinator maps ambiguity onto [`Intent::IdeationStart`].

use super::Intent;
use crate::llm::LLMClient;
use crate::pipeline::PipelineState;
use crate::types::{AppError, Request, Result};
use crate::workers::WorkerKind;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, request: &Request, prior: Option<&PipelineState>) -> Result<Intent>;
}

const IDEATION_STEMS: &[&str] = &[
    "brainstorm", "idea", "investigat", "explor", "suggest", "generat", "propos",
];
const ANALYSIS_STEMS: &[&str] = &[
    "test", "analy", "compar", "correlat", "statistic", "significan", "regress", "quantif",
];
const VISUALIZATION_STEMS: &[&str] = &[
    "plot", "chart", "visuali", "graph", "figure", "heatmap", "histogram",
];
const WRITING_STEMS: &[&str] = &["writ", "draft", "report", "manuscript", "document", "paper"];

/// Matches research-action verbs by word prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Pure classification of request text.
    ///
    /// No action verb means ideation. Ideation combined with any other
    /// action is a mixed pipeline; otherwise the most downstream action wins
    /// because its canonical plan already contains the upstream steps.
    pub fn detect(text: &str) -> Intent {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let mentions = |stems: &[&str]| {
            words
                .iter()
                .any(|word| stems.iter().any(|stem| word.starts_with(stem)))
        };

        let ideation = mentions(IDEATION_STEMS);
        let analysis = mentions(ANALYSIS_STEMS);
        let visualization = mentions(VISUALIZATION_STEMS);
        let writing = mentions(WRITING_STEMS);

        match (ideation, analysis, visualization, writing) {
            (_, false, false, false) => Intent::IdeationStart,
            (true, _, _, _) => Intent::MixedPipeline,
            (false, _, _, true) => Intent::WritingRequest,
            (false, _, true, false) => Intent::VisualizationRequest,
            (false, true, false, false) => Intent::AnalysisRequest,
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, request: &Request, _prior: Option<&PipelineState>) -> Result<Intent> {
        let intent = Self::detect(&request.text);
        tracing::debug!(intent = %intent, "Keyword classification");
        Ok(intent)
    }
}

/// Classifies with the reasoning capability.
pub struct ReasoningClassifier {
    llm: Arc<dyn LLMClient>,
}

impl ReasoningClassifier {
    pub fn new(llm: Arc<dyn LLMClient>) -> Self {
        Self { llm }
    }

    fn system_prompt() -> String {
        r#"You are the intent classifier of a research assistant.
Classify the user's request into exactly ONE of these intents:

- ideation: the user wants research directions or hypotheses
- analysis: the user wants a statistical test or data analysis
- visualization: the user wants a chart or plot of results
- writing: the user wants a report, manuscript or document drafted
- mixed: the user wants the whole pipeline, from hypotheses to report

Respond with ONLY the intent name (lowercase, one word)."#
            .to_string()
    }

    /// Robust parse of the model's answer: exact match, then word match,
    /// then containment.
    pub fn parse_intent(output: &str) -> Option<Intent> {
        let trimmed = output.trim().to_lowercase();

        if let Some(intent) = Intent::from_label(&trimmed) {
            return Some(intent);
        }

        for word in trimmed.split(|c: char| c.is_whitespace() || c == ':' || c == ',' || c == '.') {
            if let Some(intent) = Intent::from_label(word.trim()) {
                return Some(intent);
            }
        }

        Intent::ALL
            .iter()
            .copied()
            .find(|intent| trimmed.contains(intent.label()))
    }
}

#[async_trait]
impl IntentClassifier for ReasoningClassifier {
    async fn classify(&self, request: &Request, prior: Option<&PipelineState>) -> Result<Intent> {
        let mut prompt = format!("Request: {}", request.text);
        if prior
            .and_then(|state| state.latest_output(WorkerKind::Ideation))
            .is_some()
        {
            prompt.push_str("\n(Hypotheses from an earlier turn are available.)");
        }

        let response = match self.llm.generate_with_system(&Self::system_prompt(), &prompt).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Reasoning classifier unavailable");
                return Err(AppError::ClassificationAmbiguous(e.to_string()));
            }
        };

        Self::parse_intent(&response).ok_or_else(|| {
            tracing::debug!(output = %response, "Could not parse intent from classifier output");
            AppError::ClassificationAmbiguous(response)
        })
    }
}
