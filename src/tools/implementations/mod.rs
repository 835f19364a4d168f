// ABOUTME: Built-in tool implementations available to every conversation
// ABOUTME: Arithmetic evaluation and current date/time lookup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Built-in tools

mod calculator;
mod current_time;

pub use calculator::{evaluate_expression, CalculatorTool};
pub use current_time::CurrentTimeTool;
