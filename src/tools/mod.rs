//! Tool system exposed to the stage agents
//!
//! Every tool describes itself with a JSON Schema for its parameters, is
//! initialized once with an optional configuration object, and executes
//! against parameters that have already been validated against that schema.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub mod builtin;

/// Tool interface
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and JSON Schema of the parameters
    fn describe(&self) -> ToolDescription;

    /// Called once before the tool is registered
    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError>;

    /// Receives parameters matching the schema from `describe()`
    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError>;

    /// Release clients and other resources
    async fn shutdown(&mut self) -> Result<(), ToolError> {
        Ok(())
    }
}

/// Tool description handed to the model
#[derive(Debug, Clone)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The set of tools available to one agent
pub struct ToolSystem {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolSystem {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Initialize a tool and register it under its described name
    pub async fn register(
        &mut self,
        mut tool: Box<dyn Tool>,
        config: Option<&Value>,
    ) -> Result<(), ToolError> {
        tool.initialize(config).await?;
        let name = tool.describe().name;
        if self.tools.contains_key(&name) {
            return Err(ToolError::InitializationError(format!(
                "tool '{name}' registered twice"
            )));
        }
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Builder-style `register`
    pub async fn with_tool(
        mut self,
        tool: Box<dyn Tool>,
        config: Option<&Value>,
    ) -> Result<Self, ToolError> {
        self.register(tool, config).await?;
        Ok(self)
    }

    /// Get tool description
    pub fn describe_tool(&self, tool_name: &str) -> Option<ToolDescription> {
        self.tools.get(tool_name).map(|tool| tool.describe())
    }

    /// Descriptions of every registered tool, sorted by name
    pub fn descriptions(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> =
            self.tools.values().map(|tool| tool.describe()).collect();
        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    /// Execute tool with validated parameters
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        parameters: &Value,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        Self::validate_parameters(&tool.describe(), parameters)?;

        tool.execute(parameters).await
    }

    /// Validate parameters against the tool's schema
    fn validate_parameters(
        description: &ToolDescription,
        parameters: &Value,
    ) -> Result<(), ToolError> {
        let validator = jsonschema::validator_for(&description.parameters)
            .map_err(|e| ToolError::SchemaError(format!("Schema compilation error: {e}")))?;

        validator.validate(parameters).map_err(|errors| {
            let error_messages: Vec<String> = errors
                .map(|e| format!("At '{}': {}", e.instance_path, e))
                .collect();
            ToolError::ValidationError(error_messages.join("; "))
        })
    }

    /// Get list of available tools
    pub fn list_tools(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Shutdown all tools
    pub async fn shutdown(&mut self) -> Result<(), ToolError> {
        for tool in self.tools.values_mut() {
            tool.shutdown().await?;
        }
        Ok(())
    }
}

impl Default for ToolSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Tool system errors
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Tool initialization failed: {0}")]
    InitializationError(String),
    #[error("Parameter validation failed: {0}")]
    ValidationError(String),
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

#[cfg(test)]
mod tests {
    use super::builtin::RandomSleepTool;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_tool_system_creation() {
        let tool_system = ToolSystem::new();
        assert!(tool_system.is_empty());
        assert!(tool_system.descriptions().is_empty());
    }

    #[tokio::test]
    async fn test_register_tool() {
        let tool_system = ToolSystem::new()
            .with_tool(Box::new(RandomSleepTool::new()), None)
            .await
            .unwrap();

        assert_eq!(tool_system.list_tools(), vec!["random_sleep".to_string()]);
        assert!(tool_system.describe_tool("random_sleep").is_some());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let mut tool_system = ToolSystem::new();
        tool_system
            .register(Box::new(RandomSleepTool::new()), None)
            .await
            .unwrap();
        let result = tool_system
            .register(Box::new(RandomSleepTool::new()), None)
            .await;
        assert!(matches!(result, Err(ToolError::InitializationError(_))));
    }

    #[tokio::test]
    async fn test_tool_execution_unknown_tool() {
        let tool_system = ToolSystem::new();
        let params = json!({"test": "value"});

        let result = tool_system.execute_tool("unknown", &params).await;
        assert!(matches!(result, Err(ToolError::UnknownTool(_))));
    }

    #[tokio::test]
    async fn test_parameters_validated_before_execution() {
        let tool_system = ToolSystem::new()
            .with_tool(Box::new(RandomSleepTool::new()), None)
            .await
            .unwrap();

        let result = tool_system
            .execute_tool("random_sleep", &json!({"min_seconds": "one"}))
            .await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));
    }
}
