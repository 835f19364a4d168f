// ABOUTME: Tool system for model-invoked functions
// ABOUTME: Trait, execution context, registry, and built-in implementations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Tools the model can call during a conversation
//!
//! The registry is the single entry point: it looks tools up by name,
//! validates their input, and answers every call with a result.

pub mod context;
pub mod implementations;
pub mod registry;
pub mod traits;

pub use context::ToolExecutionContext;
pub use registry::ToolRegistry;
pub use traits::ChatTool;
