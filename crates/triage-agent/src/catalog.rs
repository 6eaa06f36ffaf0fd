//! The tool catalog bound to the chat model.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use triage_ai::{Tool, ToolCall};

use crate::gateway::{GatewayError, ToolDefinition, ToolGateway};

/// Name of the reserved pseudo-tool the model calls to finish a run.
pub const END_TOOL_NAME: &str = "end_graph";

/// Definition of the reserved end tool.
pub fn end_tool() -> Tool {
    Tool::new(
        END_TOOL_NAME,
        "Use this function to report the end of the graph execution",
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Pass here the summary of the execution and actions taken, if any. In case of errors or issues, please provide a detailed description."
                }
            },
            "required": ["summary"]
        }),
    )
}

/// Convert a discovered tool into a function definition.
///
/// The service describes parameters as a flat list; every parameter is exposed
/// to the model as a string.
pub fn to_api_tool(def: &ToolDefinition) -> Tool {
    let properties: serde_json::Map<String, serde_json::Value> = def
        .parameters
        .iter()
        .map(|p| {
            (
                p.name.clone(),
                serde_json::json!({ "type": "string", "description": p.description }),
            )
        })
        .collect();

    Tool::new(
        def.name.clone(),
        def.description.clone(),
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": def.required,
        }),
    )
}

/// Discovered tools plus the reserved end tool, with compiled argument validators.
#[derive(Clone)]
pub struct ToolCatalog {
    tools: Vec<Tool>,
    validators: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolCatalog {
    /// Build a catalog from discovered definitions. The end tool is always appended.
    pub fn new(definitions: &[ToolDefinition]) -> Self {
        let mut tools: Vec<Tool> = definitions
            .iter()
            .filter(|d| d.name != END_TOOL_NAME)
            .map(to_api_tool)
            .collect();
        tools.push(end_tool());

        let mut validators = HashMap::new();
        for tool in &tools {
            match jsonschema::validator_for(&tool.parameters) {
                Ok(validator) => {
                    validators.insert(tool.name.clone(), Arc::new(validator));
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid parameter schema for '{}', skipping validation: {}",
                        tool.name,
                        e
                    );
                }
            }
        }

        Self { tools, validators }
    }

    /// Ask the tool service for its catalog.
    pub async fn discover(gateway: &dyn ToolGateway) -> Result<Self, GatewayError> {
        let definitions = gateway.list_tools().await?;
        tracing::info!(count = definitions.len(), "discovered tools");
        Ok(Self::new(&definitions))
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Check a call against the catalog. Returns `Some(error_message)` when the
    /// tool is unknown or its arguments do not match the schema.
    pub fn validate(&self, call: &ToolCall) -> Option<String> {
        if self.get(&call.name).is_none() {
            return Some(format!("Tool not found: {}", call.name));
        }
        let validator = self.validators.get(&call.name)?;
        let errors: Vec<String> = validator
            .iter_errors(&call.arguments)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();

        if errors.is_empty() {
            None
        } else {
            Some(format!(
                "Tool argument validation failed:\n{}",
                errors.join("\n")
            ))
        }
    }
}

impl fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCatalog")
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
