// ABOUTME: Defines the ChatTool trait implemented by every tool the model may call
// ABOUTME: Tools are registered by name in the ToolRegistry and executed with a context
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Chat Tool Trait
//!
//! All tools implement [`ChatTool`]:
//! - metadata advertised to the model (name, description, input schema)
//! - async execution with a [`ToolExecutionContext`]
//!
//! Tools return `AppResult<Value>`; the registry turns errors into error
//! results so a failing tool never aborts the conversation.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AppResult;
use crate::llm::ToolSchema;

use super::context::ToolExecutionContext;

/// A tool the model can invoke mid-answer
///
/// # Example
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use streamchat_server::errors::AppResult;
/// use streamchat_server::tools::{ChatTool, ToolExecutionContext};
///
/// struct EchoTool;
///
/// #[async_trait]
/// impl ChatTool for EchoTool {
///     fn name(&self) -> &'static str {
///         "echo"
///     }
///
///     fn description(&self) -> &'static str {
///         "Repeat the given text"
///     }
///
///     fn input_schema(&self) -> Value {
///         json!({
///             "type": "object",
///             "properties": {"text": {"type": "string"}},
///             "required": ["text"]
///         })
///     }
///
///     async fn execute(&self, input: Value, _context: &ToolExecutionContext) -> AppResult<Value> {
///         Ok(json!({"echo": input["text"]}))
///     }
/// }
/// ```
#[async_trait]
pub trait ChatTool: Send + Sync {
    /// Unique name the model uses to call the tool
    fn name(&self) -> &'static str;

    /// Description that helps the model decide when to call the tool
    fn description(&self) -> &'static str;

    /// JSON Schema for the input object
    ///
    /// `required` keys are checked before `execute` is called.
    fn input_schema(&self) -> Value;

    /// Execute the tool
    ///
    /// # Errors
    ///
    /// Returns `AppError` for invalid arguments or execution failures
    async fn execute(&self, input: Value, context: &ToolExecutionContext) -> AppResult<Value>;

    /// Schema advertised to the model
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            input_schema: self.input_schema(),
        }
    }
}
