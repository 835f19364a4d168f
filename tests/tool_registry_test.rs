// ABOUTME: Integration tests for the tool registry and built-in tools
// ABOUTME: Verifies schemas, input validation, and the never-failing execute contract
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{test_registry, WebSearchTool};
use serde_json::{json, Value};
use streamchat_server::llm::ToolCall;
use streamchat_server::tools::{ToolExecutionContext, ToolRegistry};

fn call(name: &str, input: Value) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_owned(),
        input,
    }
}

fn context() -> ToolExecutionContext {
    ToolExecutionContext::new("user-1")
}

#[test]
fn test_builtin_tools_are_registered() {
    let registry = ToolRegistry::with_builtin_tools();
    assert!(registry.contains("calculator"));
    assert!(registry.contains("current_time"));
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let mut registry = ToolRegistry::new();
    assert!(registry.register(Arc::new(WebSearchTool)));
    assert!(!registry.register(Arc::new(WebSearchTool)));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_schemas_describe_every_tool() {
    let registry = test_registry();
    let schemas = registry.schemas();
    assert_eq!(schemas.len(), registry.len());
    for schema in &schemas {
        assert!(!schema.description.is_empty(), "{} lacks a description", schema.name);
        assert_eq!(schema.input_schema["type"], json!("object"));
    }
}

#[tokio::test]
async fn test_calculator_evaluates_precedence() {
    let registry = test_registry();
    let result = registry
        .execute(&call("calculator", json!({"expression": "2 + 3 * (4 - 1)"})), &context())
        .await;
    assert!(!result.is_error);
    assert_eq!(result.tool_use_id, "call_calculator");
    assert_eq!(result.content["result"], json!(11));
}

#[tokio::test]
async fn test_calculator_division_by_zero_is_error_result() {
    let registry = test_registry();
    let result = registry
        .execute(&call("calculator", json!({"expression": "1/0"})), &context())
        .await;
    assert!(result.is_error);
    assert_eq!(result.content["error"], json!("Division by zero"));
}

#[tokio::test]
async fn test_calculator_rejects_pathological_nesting() {
    let registry = test_registry();

    // Fits in a chat message, far too deep for a recursive parser
    let parens = format!("{}1{}", "(".repeat(3_900), ")".repeat(3_900));
    let huge = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
    let signs = format!("{}1", "-".repeat(500));
    let powers = ["2"; 300].join("^");

    for expression in [parens, huge, signs, powers] {
        let result = registry
            .execute(&call("calculator", json!({ "expression": expression })), &context())
            .await;
        assert!(result.is_error);
        let message = result.content["error"].as_str().unwrap();
        assert!(
            message == "Expression nested too deeply" || message.starts_with("Expression is longer"),
            "{message}"
        );
    }

    // The registry keeps serving after rejecting them
    let result = registry
        .execute(&call("calculator", json!({"expression": "((((2))))^3"})), &context())
        .await;
    assert_eq!(result.content["result"], json!(8));
}

#[tokio::test]
async fn test_current_time_with_offset() {
    let registry = test_registry();
    let result = registry
        .execute(&call("current_time", json!({"utc_offset_hours": 2})), &context())
        .await;
    assert!(!result.is_error);
    assert!(result.content["utc"].as_str().unwrap().ends_with("+00:00"));
    assert!(result.content["local"].as_str().unwrap().ends_with("+02:00"));
}

#[tokio::test]
async fn test_current_time_rejects_out_of_range_offset() {
    let registry = test_registry();
    let result = registry
        .execute(&call("current_time", json!({"utc_offset_hours": 30})), &context())
        .await;
    assert!(result.is_error);
}

#[tokio::test]
async fn test_wrong_input_type_is_rejected_before_execution() {
    let registry = test_registry();
    let result = registry
        .execute(&call("calculator", json!({"expression": 4})), &context())
        .await;
    assert!(result.is_error);
    assert_eq!(
        result.content["error"],
        json!("Invalid input for calculator: field 'expression' must be of type string")
    );
}

#[tokio::test]
async fn test_non_object_input_is_rejected() {
    let registry = test_registry();
    let result = registry
        .execute(&call("web_search", json!("just a string")), &context())
        .await;
    assert!(result.is_error);
    assert_eq!(
        result.content["error"],
        json!("Invalid input for web_search: input must be a JSON object")
    );
}
