// ABOUTME: Central registry mapping tool names to implementations
// ABOUTME: Validates input against each tool's schema and turns every failure into an error result
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Tool Registry
//!
//! Central registry for chat tools, providing:
//! - Tool registration and lookup
//! - Schema listing for the model's tool catalog
//! - Execution that never fails: unknown tools, invalid input, and tool
//!   errors all come back as error results the model can read

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::{ToolCall, ToolResult, ToolSchema};
use crate::logging::AppLogger;

use super::context::ToolExecutionContext;
use super::implementations::{CalculatorTool, CurrentTimeTool};
use super::traits::ChatTool;

/// Central registry for chat tools
///
/// Built once at startup and then shared immutably behind an `Arc`.
///
/// # Example
///
/// ```
/// use streamchat_server::tools::registry::ToolRegistry;
///
/// let registry = ToolRegistry::with_builtin_tools();
/// assert!(registry.contains("calculator"));
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ChatTool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Create a registry holding the built-in tools
    #[must_use]
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register_builtin_tools();
        registry
    }

    /// Register a tool
    ///
    /// # Returns
    ///
    /// `true` if the tool was registered, `false` if a tool with the same name exists
    pub fn register(&mut self, tool: Arc<dyn ChatTool>) -> bool {
        let name = tool.name().to_owned();

        if self.tools.contains_key(&name) {
            warn!("Tool '{}' is already registered, skipping", name);
            return false;
        }

        debug!("Registering tool '{}'", name);
        self.tools.insert(name, tool);
        true
    }

    /// Register the calculator and clock tools
    pub fn register_builtin_tools(&mut self) {
        self.register(Arc::new(CalculatorTool));
        self.register(Arc::new(CurrentTimeTool));
        info!("Registered {} built-in tools", self.len());
    }

    /// Get a tool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ChatTool>> {
        self.tools.get(name)
    }

    /// Check if a tool is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get the number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// List all tool names, sorted
    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Tool catalog advertised to the model, sorted by name
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|tool| tool.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute one tool call
    ///
    /// Never fails. The returned result always answers `call.id`; unknown
    /// tools, invalid input, and execution errors produce `is_error` results
    /// with an `{"error": ...}` payload.
    pub async fn execute(&self, call: &ToolCall, context: &ToolExecutionContext) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "Model requested unknown tool");
            return ToolResult::error(&call.id, format!("Unknown tool: {}", call.name));
        };

        if let Err(reason) = validate_input(&tool.input_schema(), &call.input) {
            debug!(tool = %call.name, reason = %reason, "Rejected tool input");
            return ToolResult::error(&call.id, format!("Invalid input for {}: {reason}", call.name));
        }

        let started = Instant::now();
        let outcome = tool.execute(call.input.clone(), context).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        AppLogger::log_tool_call(
            context.conversation_id.as_deref(),
            &call.name,
            outcome.is_ok(),
            duration_ms,
        );

        match outcome {
            Ok(content) => ToolResult::success(&call.id, content),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult::error(&call.id, e.message)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

/// Check an input object against the subset of JSON Schema tools declare
///
/// Enforces that the input is an object, that every `required` key is
/// present, and that present properties match their declared `type`.
///
/// # Errors
///
/// Returns a human-readable reason when the input does not conform
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), String> {
    let Some(object) = input.as_object() else {
        return Err("input must be a JSON object".to_owned());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required field '{key}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in object {
            let expected = properties
                .get(key)
                .and_then(|property| property.get("type"))
                .and_then(Value::as_str);
            if let Some(expected) = expected {
                if !matches_type(expected, value) {
                    return Err(format!("field '{key}' must be of type {expected}"));
                }
            }
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_input_requires_object_and_keys() {
        let schema = json!({
            "type": "object",
            "properties": {"expression": {"type": "string"}},
            "required": ["expression"]
        });
        assert!(validate_input(&schema, &json!({"expression": "1+1"})).is_ok());
        assert!(validate_input(&schema, &json!({})).is_err());
        assert!(validate_input(&schema, &json!("1+1")).is_err());
        assert!(validate_input(&schema, &json!({"expression": 2})).is_err());
    }

    #[test]
    fn test_builtin_catalog_is_sorted() {
        let registry = ToolRegistry::with_builtin_tools();
        let names: Vec<String> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["calculator".to_owned(), "current_time".to_owned()]);
    }
}
