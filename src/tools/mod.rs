//! Backend Tool Adapters
//!
//! Tools are the registered backends behind the capability gateway. Each tool
//! is registered under the name of the [`Capability`](crate::gateway::Capability)
//! it serves (`query_table`, `search_literature`, `execute_code`,
//! `save_artifact`, `create_document`) and exchanges JSON with the gateway.
//!
//! ```ignore
//! let mut registry = ToolRegistry::new();
//! registry.register(Arc::new(WarehouseQueryTool::new(client)));
//! let gateway = ToolGateway::new(llm, Arc::new(registry), GatewayConfig::default());
//! ```

/// Tool registry for managing available backends.
pub mod registry;

pub use registry::{Tool, ToolRegistry};
