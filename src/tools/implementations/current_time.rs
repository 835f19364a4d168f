// ABOUTME: Clock tool reporting the current date and time
// ABOUTME: Optional UTC offset in hours shifts the local rendering
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{json, Value};

use crate::errors::{AppError, AppResult};
use crate::tools::context::ToolExecutionContext;
use crate::tools::traits::ChatTool;

const SECONDS_PER_HOUR: f64 = 3_600.0;

/// Reports the current date and time
pub struct CurrentTimeTool;

#[async_trait]
impl ChatTool for CurrentTimeTool {
    fn name(&self) -> &'static str {
        "current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current date and time. Optionally pass utc_offset_hours (e.g. -5 or 5.5) for local time."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "number",
                    "description": "Offset from UTC in hours, between -12 and 14"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, input: Value, _context: &ToolExecutionContext) -> AppResult<Value> {
        let now = Utc::now();
        let offset_hours = input
            .get("utc_offset_hours")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        if !(-12.0..=14.0).contains(&offset_hours) {
            return Err(AppError::out_of_range(format!(
                "utc_offset_hours must be between -12 and 14, got {offset_hours}"
            )));
        }

        #[allow(clippy::cast_possible_truncation)]
        let offset_seconds = (offset_hours * SECONDS_PER_HOUR).round() as i32;
        let offset = FixedOffset::east_opt(offset_seconds)
            .ok_or_else(|| AppError::out_of_range("Invalid UTC offset"))?;
        let local = now.with_timezone(&offset);

        Ok(json!({
            "utc": now.to_rfc3339(),
            "local": local.to_rfc3339(),
            "weekday": local.format("%A").to_string(),
            "unix_seconds": now.timestamp(),
        }))
    }
}
