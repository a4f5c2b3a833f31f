// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod error;
mod schema;

pub use error::ConfigError;
pub use schema::{
    CompactionSettings, DrainMode, LoopConfig, ReasoningLevel, ThinkingBudgets,
    DEFAULT_MAX_RETRY_DELAY_MS,
};
