// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Mapping from the engine's internal reasoning level to provider-agnostic
//! stream options.  The mapping is part of the loop's contract because it
//! affects cost and latency.

use runa_config::{LoopConfig, ReasoningLevel, ThinkingBudgets};

use crate::{ReasoningEffort, StreamOptions};

/// Whether the model accepts `xhigh` reasoning effort.
///
/// Matches on the model id; only gpt-5.2 variants accept it today.
pub fn supports_xhigh(model_id: &str) -> bool {
    model_id.contains("gpt-5.2")
}

/// Normalize the internal level to the effort sent on the wire.
///
/// `minimal` is normalized up to `low` for broader provider support, and
/// `xhigh` degrades to `high` on models that do not accept it.
pub fn effort_for(level: ReasoningLevel, model_id: &str) -> Option<ReasoningEffort> {
    match level {
        ReasoningLevel::Off => None,
        ReasoningLevel::Minimal | ReasoningLevel::Low => Some(ReasoningEffort::Low),
        ReasoningLevel::Medium => Some(ReasoningEffort::Medium),
        ReasoningLevel::High => Some(ReasoningEffort::High),
        ReasoningLevel::XHigh => Some(if supports_xhigh(model_id) {
            ReasoningEffort::XHigh
        } else {
            ReasoningEffort::High
        }),
    }
}

/// Pick the explicit token budget for the level, when budgets are configured.
///
/// `xhigh` borrows the `high` allowance; `off` never sends a budget.
pub fn budget_for(level: ReasoningLevel, budgets: Option<ThinkingBudgets>) -> Option<u32> {
    let b = budgets?;
    match level {
        ReasoningLevel::Off => None,
        ReasoningLevel::Minimal => Some(b.minimal),
        ReasoningLevel::Low => Some(b.low),
        ReasoningLevel::Medium => Some(b.medium),
        ReasoningLevel::High | ReasoningLevel::XHigh => Some(b.high),
    }
}

/// Assemble the per-request options from a loop configuration.
pub fn stream_options(config: &LoopConfig) -> StreamOptions {
    StreamOptions {
        reasoning_effort: effort_for(config.reasoning_level, &config.model_id),
        thinking_budget: budget_for(config.reasoning_level, config.thinking_budgets),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        session_id: config.session_id.clone(),
        api_key: config.api_key.clone(),
        max_retry_delay_ms: config.max_retry_delay_ms,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
