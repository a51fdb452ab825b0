//! Reasoning Capability Abstractions
//!
//! This module defines the narrow interface through which the pipeline reaches
//! the external reasoning capability. Concrete providers live outside this
//! crate; anything implementing [`LLMClient`] can be plugged into the
//! [`ToolGateway`](crate::gateway::ToolGateway) or the
//! [`ReasoningClassifier`](crate::planning::ReasoningClassifier).

/// Core LLM client trait and conversation types.
pub mod client;

pub use client::{ConversationMessage, LLMClient, LLMResponse, MessageRole};
