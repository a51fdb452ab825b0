//! Pipeline State
//!
//! The per-request aggregate the coordinator folds every step outcome into:
//! plan, step records (with every dispatch attempt), current phase and
//! terminal status. Retained copies double as the audit trail and as prior
//! state for follow-up requests.

pub mod records;
pub mod state;
pub mod status;

pub use records::{AttemptOutcome, AttemptRecord, StepOutcome, StepRecord};
pub use state::PipelineState;
pub use status::{CoordinatorPhase, FailureCause, PipelineStatus};
