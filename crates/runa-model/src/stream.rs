// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use runa_config::DEFAULT_MAX_RETRY_DELAY_MS;

use crate::{AssistantMessage, Message, ToolCall};

/// A tool description sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

/// Provider-agnostic reasoning effort, already normalized from the engine's
/// internal level (see [`crate::reasoning`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    XHigh,
}

/// Options forwarded with every stream request.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Explicit reasoning-token budget for providers that price reasoning
    /// separately.
    pub thinking_budget: Option<u32>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Opaque identifier for provider-side cache affinity.
    pub session_id: Option<String>,
    pub api_key: Option<String>,
    /// Cap on provider-requested retry delays in milliseconds; `0` disables
    /// the cap.  A delay over the cap fails the stream with an error event.
    pub max_retry_delay_ms: u64,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            reasoning_effort: None,
            thinking_budget: None,
            temperature: None,
            max_tokens: None,
            session_id: None,
            api_key: None,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
        }
    }
}

/// A complete request handed to the stream capability.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub model_id: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolManifest>,
    pub options: StreamOptions,
    /// When false the provider completes in one shot and the stream carries
    /// only `Start` and a terminal event.  Used for summarization calls.
    pub stream: bool,
}

/// A normalized event from the model provider.
///
/// Every delta carries the updated `partial` so observers can snapshot the
/// in-progress assistant message without reconstructing state.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The provider accepted the request; `partial` is the empty in-progress
    /// assistant message.
    Start { partial: AssistantMessage },
    /// An incremental update to the in-progress message.
    Delta {
        partial: AssistantMessage,
        delta: StreamDelta,
    },
    /// The stream finished normally.  `message.stop_reason` is one of
    /// `stop`, `length`, `tool_use`, `sensitive`.
    Done { message: AssistantMessage },
    /// The provider failed.  `message` has `stop_reason = error` and a
    /// populated `error_message`; it supersedes any accumulated partial.
    Error { message: AssistantMessage },
}

/// The granular payload of a [`StreamEvent::Delta`].
///
/// `index` addresses the content block being updated within the partial.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    TextStart { index: usize },
    TextDelta { index: usize, delta: String },
    TextEnd { index: usize, content: String },
    ThinkingStart { index: usize },
    ThinkingDelta { index: usize, delta: String },
    ThinkingEnd { index: usize, content: String },
    ToolCallStart { index: usize },
    /// Raw argument JSON fragment; the assembled call arrives in
    /// `ToolCallEnd`.
    ToolCallDelta { index: usize, delta: String },
    ToolCallEnd { index: usize, tool_call: ToolCall },
}
