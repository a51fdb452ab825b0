use crate::types::{AppError, Result, ToolDefinition};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A backend capability adapter (warehouse query engine, literature index,
/// code sandbox, object store, document service).
///
/// Tools speak JSON; the gateway turns their output into typed results.
/// Failures should be reported as [`AppError::Gateway`] so they keep their
/// transient/permanent classification.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, args: Value) -> Result<Value>;
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Builder-style registration.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Definitions restricted to `names`, skipping any that are not registered.
    pub fn definitions_for(&self, names: &[&str]) -> Vec<ToolDefinition> {
        self.get_tool_definitions()
            .into_iter()
            .filter(|def| names.contains(&def.name.as_str()))
            .collect()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<Value> {
        if let Some(tool) = self.tools.get(name) {
            tool.execute(args).await
        } else {
            Err(AppError::NotFound(format!("Tool not found: {}", name)))
        }
    }

    /// Get a list of all registered tool names
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Check if a tool is registered
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool(&'static str);

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "Echoes its arguments"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, args: Value) -> Result<Value> {
            Ok(json!({ "echo": args }))
        }
    }

    #[test]
    fn test_registry_creation() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.tool_names().len(), 0);
    }

    #[test]
    fn test_definitions_are_sorted_and_filterable() {
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(EchoTool("search_literature")))
            .with_tool(Arc::new(EchoTool("query_table")));

        let all = registry.get_tool_definitions();
        assert_eq!(all[0].name, "query_table");
        assert_eq!(all[1].name, "search_literature");

        let filtered = registry.definitions_for(&["query_table", "execute_code"]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "query_table");
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let registry = ToolRegistry::new().with_tool(Arc::new(EchoTool("query_table")));
        let value = registry
            .execute("query_table", json!({ "query": "SELECT 1" }))
            .await
            .unwrap();
        assert_eq!(value["echo"]["query"], "SELECT 1");
    }

    #[tokio::test]
    async fn test_nonexistent_tool() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nonexistent_tool", json!({})).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
