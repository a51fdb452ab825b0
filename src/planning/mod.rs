//! Intent Classification and Plan Building
//!
//! A request is classified into an [`Intent`]; the intent selects a
//! canonical step list from a lookup table, which [`PlanBuilder`] then
//! adjusts for prior state (reusing results from an earlier pipeline) and
//! for missing input (a clarification step instead of a dispatch).
//!
//! Plan execution never consults the reasoning capability to decide what
//! runs next: the plan is data, validated once at build time.

/// Plan construction.
pub mod builder;
/// Intent classifiers.
pub mod intent;
/// Plan and step types.
pub mod plan;

pub use builder::{canonical_template, hypothesis_reference, PlanBuilder};
pub use intent::{IntentClassifier, KeywordClassifier, ReasoningClassifier};
pub use plan::{ExecutionPlan, FailurePolicy, Step, StepAction};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Also the default when classification is ambiguous.
    #[default]
    IdeationStart,
    AnalysisRequest,
    VisualizationRequest,
    WritingRequest,
    MixedPipeline,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::IdeationStart,
        Intent::AnalysisRequest,
        Intent::VisualizationRequest,
        Intent::WritingRequest,
        Intent::MixedPipeline,
    ];

    /// Short label used by the reasoning classifier.
    pub fn label(&self) -> &'static str {
        match self {
            Intent::IdeationStart => "ideation",
            Intent::AnalysisRequest => "analysis",
            Intent::VisualizationRequest => "visualization",
            Intent::WritingRequest => "writing",
            Intent::MixedPipeline => "mixed",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "ideation" | "ideation-start" | "ideation_start" => Some(Intent::IdeationStart),
            "analysis" | "analysis-request" | "analysis_request" => Some(Intent::AnalysisRequest),
            "visualization" | "visualization-request" | "visualization_request" => {
                Some(Intent::VisualizationRequest)
            }
            "writing" | "writing-request" | "writing_request" => Some(Intent::WritingRequest),
            "mixed" | "mixed-pipeline" | "mixed_pipeline" => Some(Intent::MixedPipeline),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
