// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use runa_model::{
    AssistantContent, AssistantMessage, Message, StopReason, ToolResultContent, UserContent,
};
use serde_json::Value;

/// Byte surrogate for one image block (~1200 tokens).
const IMAGE_SURROGATE_BYTES: usize = 4_800;

/// Estimated context usage for a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEstimate {
    /// Total estimated tokens: authoritative prefix plus estimated suffix.
    pub tokens: usize,
    /// Tokens reported by the provider at the anchor message.
    pub usage_tokens: usize,
    /// Estimated tokens for messages after the anchor.
    pub trailing_tokens: usize,
    /// Index of the anchor message, when one exists.
    pub last_usage_index: Option<usize>,
}

/// Conservative byte-level token estimate for one message: `ceil(bytes / 4)`.
///
/// Sums visible text across variants, counts tool-call arguments at their
/// serialized size, and treats each image as a fixed surrogate.
pub fn estimate_message(message: &Message) -> usize {
    let bytes = match message {
        Message::User(m) => m
            .content
            .iter()
            .map(|c| match c {
                UserContent::Text { text } => text.len(),
                UserContent::Image { .. } => IMAGE_SURROGATE_BYTES,
            })
            .sum(),
        Message::Assistant(m) => m
            .content
            .iter()
            .map(|c| match c {
                AssistantContent::Text { text } => text.len(),
                AssistantContent::Thinking { thinking } => thinking.len(),
                AssistantContent::ToolCall(tc) => {
                    tc.name.len() + Value::Object(tc.arguments.clone()).to_string().len()
                }
            })
            .sum(),
        Message::ToolResult(m) => m
            .content
            .iter()
            .map(|c| match c {
                ToolResultContent::Text { text } => text.len(),
                ToolResultContent::Image { .. } => IMAGE_SURROGATE_BYTES,
            })
            .sum(),
        Message::Custom(m) => m.content.len(),
    };
    (bytes + 3) / 4
}

/// Usage from an assistant message, unless the message is a terminal
/// failure (aborted/error usage does not describe a real context state).
fn anchor_usage(message: &Message) -> Option<&AssistantMessage> {
    let m = message.as_assistant()?;
    if matches!(m.stop_reason, StopReason::Aborted | StopReason::Error) {
        return None;
    }
    m.usage.as_ref().map(|_| m)
}

/// Estimate the context footprint of a conversation.
///
/// Usage counters are authoritative but lag behind the tail: the newest
/// assistant message with valid usage anchors the estimate, and everything
/// after it is byte-estimated.  Without an anchor the whole conversation is
/// byte-estimated.
pub fn estimate_context(messages: &[Message]) -> ContextEstimate {
    let anchor = messages
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, m)| anchor_usage(m).map(|a| (i, a)));

    let Some((last_usage_index, assistant)) = anchor else {
        let estimated = messages.iter().map(estimate_message).sum();
        return ContextEstimate {
            tokens: estimated,
            usage_tokens: 0,
            trailing_tokens: estimated,
            last_usage_index: None,
        };
    };

    let usage_tokens = assistant
        .usage
        .map(|u| u.context_total() as usize)
        .unwrap_or(0);
    let trailing_tokens = messages[last_usage_index + 1..]
        .iter()
        .map(estimate_message)
        .sum();

    ContextEstimate {
        tokens: usage_tokens + trailing_tokens,
        usage_tokens,
        trailing_tokens,
        last_usage_index: Some(last_usage_index),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
