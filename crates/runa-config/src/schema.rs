// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Default cap on provider-requested retry delays, in milliseconds.
/// A value of `0` disables the cap entirely.
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 60_000;

fn default_true() -> bool {
    true
}

fn default_reserve_tokens() -> usize {
    16_384
}

fn default_keep_recent_tokens() -> usize {
    20_000
}

fn default_max_retry_delay_ms() -> u64 {
    DEFAULT_MAX_RETRY_DELAY_MS
}

/// Abstract intensity of the model's internal deliberation.
///
/// Mapped to provider-specific options by `runa-model`; see
/// `runa_model::reasoning` for the mapping rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    #[default]
    Off,
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

/// Per-level token allowances for providers that price reasoning separately.
///
/// `xhigh` deliberately has no budget of its own — providers that accept an
/// explicit budget use the `high` allowance for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThinkingBudgets {
    pub minimal: u32,
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

/// Discharge policy for the steering and follow-up queues.
///
/// `OneAtATime` (the default) hands the engine the oldest queued message and
/// leaves the rest for the next drain point, preserving the user's pacing.
/// `All` empties the queue in enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrainMode {
    #[default]
    OneAtATime,
    All,
}

/// Configuration recognized by the turn engine.
///
/// The field set is closed: deserializing a document with a key that is not
/// listed here fails validation.  Mapping from external configuration
/// formats (files, environment, CLI flags) is the caller's responsibility;
/// this crate only defines the schema and the strict deserializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopConfig {
    /// Model identifier forwarded verbatim to the stream layer.
    pub model_id: String,
    /// Reasoning intensity requested from the model.
    #[serde(default)]
    pub reasoning_level: ReasoningLevel,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Maximum tokens to request in a single completion.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Opaque session identifier used only for provider-side cache affinity.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Explicit API key; resolution from the environment belongs to the caller.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Explicit reasoning-token budgets per level.
    #[serde(default)]
    pub thinking_budgets: Option<ThinkingBudgets>,
    /// Cap on provider-requested retry delays in milliseconds.
    /// `0` disables the cap.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl LoopConfig {
    /// Minimal configuration for the given model, everything else defaulted.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            reasoning_level: ReasoningLevel::default(),
            temperature: None,
            max_tokens: None,
            session_id: None,
            api_key: None,
            thinking_budgets: None,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
        }
    }

    /// Strict YAML deserialization.  Unknown keys fail with
    /// [`ConfigError::Invalid`] rather than being silently dropped.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(classify_yaml_error)
    }

    /// Strict JSON deserialization with the same unknown-key policy.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("unknown field") {
                ConfigError::Invalid(msg)
            } else {
                ConfigError::Parse(msg)
            }
        })
    }
}

/// Bounded-context maintenance settings.
///
/// The trigger rule is `tokens > context_window - reserve_tokens` (strict);
/// `keep_recent_tokens` bounds the suffix retained verbatim across a
/// compaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompactionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tokens reserved for the prompt and the model's response.
    #[serde(default = "default_reserve_tokens")]
    pub reserve_tokens: usize,
    /// Recent conversation tokens to keep verbatim.
    #[serde(default = "default_keep_recent_tokens")]
    pub keep_recent_tokens: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reserve_tokens: default_reserve_tokens(),
            keep_recent_tokens: default_keep_recent_tokens(),
        }
    }
}

impl CompactionSettings {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(classify_yaml_error)
    }
}

fn classify_yaml_error(e: serde_yaml::Error) -> ConfigError {
    let msg = e.to_string();
    if msg.contains("unknown field") {
        ConfigError::Invalid(msg)
    } else {
        ConfigError::Parse(msg)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
