// ABOUTME: Re-exports the unified error system from the core crate
// ABOUTME: Keeps `crate::errors::AppError` paths stable for every module
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Unified error handling re-exported from `streamchat-core`

pub use streamchat_core::errors::{
    AppError, AppResult, ErrorCode, ErrorResponse, ErrorResponseDetails,
};
