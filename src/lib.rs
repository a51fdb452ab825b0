//! # Hypatia - Research Pipeline Coordinator
//!
//! Hypatia turns a natural-language research request into a pipeline of
//! specialised reasoning workers (ideation, analysis, visualization and
//! writing), runs them with retries and failure policies, and synthesizes a
//! single response that reports every stage honestly.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hypatia::{HypatiaConfigManager, PipelineService, Request, ToolRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> hypatia::Result<()> {
//!     hypatia::init_tracing("info", false)?;
//!
//!     let config = HypatiaConfigManager::new("hypatia.toml")?;
//!     let tools = Arc::new(ToolRegistry::new()); // register backend tools here
//!     let service = PipelineService::standard(config, my_llm_client(), tools);
//!
//!     let first = service.submit(Request::new("Brainstorm hypotheses about survival"), None)?;
//!     service.wait(first).await?;
//!
//!     let second = service.submit(Request::new("Test H2 and plot it"), Some(first))?;
//!     service.wait(second).await?;
//!     println!("{}", service.get_status(second)?.response.unwrap().message);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`planning`] - intent classification and execution plans
//! - [`coordinator`] - the state machine, retry policy, validation, synthesis
//!   and the [`PipelineService`] surface
//! - [`workers`] - the four specialised workers and their output contracts
//! - [`gateway`] - the capability gateway workers use to reach tools
//! - [`context`] - per-step context scoping
//! - [`pipeline`] - pipeline state, step records and the audit trail
//! - [`llm`] / [`tools`] - the reasoning client and backend tool seams
//! - [`utils`] - `hypatia.toml` configuration and tracing setup
//!
//! ## Configuration
//!
//! `hypatia.toml` holds coordinator limits (retries, timeouts, concurrency),
//! gateway limits, the session's default dataset and per-worker prompt and
//! failure-policy overrides. Each pipeline snapshots the configuration when
//! it is submitted.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Per-step context scoping.
pub mod context;
/// Coordinator state machine and pipeline service.
pub mod coordinator;
/// Capability gateway between workers and external tools.
pub mod gateway;
/// Reasoning client abstraction.
pub mod llm;
/// Pipeline state and audit records.
pub mod pipeline;
/// Intent classification and plan building.
pub mod planning;
/// Backend tool registry.
pub mod tools;
/// Core types (ids, requests, errors).
pub mod types;
/// Configuration and telemetry.
pub mod utils;
/// Specialised workers.
pub mod workers;

// Re-export commonly used types
pub use coordinator::{
    CancelOutcome, Coordinator, FinalResponse, PipelineRun, PipelineService, RetryPolicy,
    StatusReport,
};
pub use gateway::{CapabilityGateway, GatewayError, ToolGateway};
pub use llm::{LLMClient, LLMResponse};
pub use pipeline::{PipelineState, PipelineStatus};
pub use planning::{ExecutionPlan, Intent, IntentClassifier, KeywordClassifier, PlanBuilder};
pub use tools::registry::ToolRegistry;
pub use types::{AppError, PipelineId, Request, Result};
pub use utils::telemetry::init_tracing;
pub use utils::toml_config::{HypatiaConfig, HypatiaConfigManager};
pub use workers::{Worker, WorkerKind, WorkerOutput, WorkerRegistry};
