//! Pipeline Coordinator
//!
//! Turns a user request into a running pipeline:
//!
//! 1. classify the request into an [`Intent`](crate::planning::Intent)
//! 2. build and validate an [`ExecutionPlan`](crate::planning::ExecutionPlan)
//! 3. dispatch ready steps to workers with scoped context, retrying
//!    transient failures and applying each step's failure policy
//! 4. validate every output before it becomes visible to dependents
//! 5. synthesize a [`FinalResponse`] that names every stage's outcome
//!
//! [`PipelineService`] hosts many concurrent pipelines behind
//! submit / status / cancel.
//!
//! # Example
//!
//! ```ignore
//! let service = PipelineService::standard(config, llm, tools);
//! let id = service.submit(Request::new("Brainstorm survival hypotheses"), None)?;
//! let state = service.wait(id).await?;
//! println!("{}", service.get_status(id)?.response.unwrap().message);
//! ```

pub mod engine;
pub mod retry;
pub mod service;
pub mod synthesis;
pub mod validation;

pub use engine::{Coordinator, PipelineRun};
pub use retry::RetryPolicy;
pub use service::{CancelOutcome, PipelineService, StatusReport};
pub use synthesis::{synthesize, FinalResponse, StageOutcome, StageSummary};
pub use validation::validate_output;
