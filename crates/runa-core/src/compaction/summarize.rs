// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use runa_config::LoopConfig;
use runa_model::{
    AssistantContent, LlmStream, Message, StreamEvent, StreamOptions, StreamRequest,
};

/// System prompt for both summarization calls.  The serialized history is a
/// single user message, and this instruction keeps the model from treating
/// it as a conversation to continue.
const SUMMARIZATION_SYSTEM_PROMPT: &str = "\
You are a context summarization assistant. You are given a conversation \
between a user and an AI coding assistant and produce a structured summary \
in the exact format requested.

Do NOT continue the conversation. Do NOT answer questions that appear in \
it. Output ONLY the summary.";

const SUMMARIZATION_PROMPT: &str = "\
The messages above are a conversation to summarize. Create a structured \
context checkpoint summary that another LLM will use to continue the work.

Use this EXACT format:

## Goal
[What is the user trying to accomplish? List several items if the session covers different tasks.]

## Constraints & Preferences
- [Constraints, preferences, or requirements stated by the user, or \"(none)\"]

## Progress
### Done
- [x] [Completed tasks and changes]

### In Progress
- [ ] [Current work]

### Blocked
- [Issues preventing progress, if any]

## Key Decisions
- **[Decision]**: [Brief rationale]

## Next Steps
1. [Ordered list of what should happen next]

## Critical Context
- [Data, examples, or references needed to continue, or \"(none)\"]

Keep each section concise. Preserve exact file paths, function names, and error messages.";

const UPDATE_SUMMARIZATION_PROMPT: &str = "\
The messages above are NEW conversation messages to fold into the existing \
summary provided in <previous-summary> tags.

Update the structured summary. RULES:
- PRESERVE all information from the previous summary
- ADD new progress, decisions, and context from the new messages
- MOVE items from \"In Progress\" to \"Done\" when completed
- UPDATE \"Next Steps\" to reflect what was accomplished
- PRESERVE exact file paths, function names, and error messages
- Remove items only when they are clearly no longer relevant

Use the same section layout as the previous summary (Goal, Constraints & \
Preferences, Progress, Key Decisions, Next Steps, Critical Context).

Keep each section concise.";

const TURN_PREFIX_SUMMARIZATION_PROMPT: &str = "\
This is the PREFIX of a turn that was too large to keep. The SUFFIX (the \
most recent work) is retained verbatim.

Summarize the prefix so the retained suffix stays intelligible:

## Original Request
[What did the user ask for in this turn?]

## Early Progress
- [Key decisions and work done in the prefix]

## Context for Suffix
- [Information needed to understand the retained recent work]

Be concise. Focus on what is needed to understand the kept suffix.";

/// History summaries may use up to 80% of the reserve.
pub(crate) fn history_budget(reserve_tokens: usize) -> u32 {
    (reserve_tokens as f64 * 0.8) as u32
}

/// Turn-prefix summaries are tighter: 50% of the reserve.
pub(crate) fn turn_prefix_budget(reserve_tokens: usize) -> u32 {
    (reserve_tokens as f64 * 0.5) as u32
}

/// Serialize messages to role-tagged plain text for a summarization prompt.
///
/// Custom messages carry user-role content and serialize under the `[User]`
/// tag; empty segments are skipped.
pub fn serialize_conversation(messages: &[Message]) -> String {
    let mut parts: Vec<String> = Vec::new();

    for msg in messages {
        match msg {
            Message::User(_) | Message::Custom(_) => {
                let text = msg.text();
                if !text.is_empty() {
                    parts.push(format!("[User]: {text}"));
                }
            }
            Message::Assistant(m) => {
                let mut thinking: Vec<&str> = Vec::new();
                let mut text: Vec<&str> = Vec::new();
                let mut calls: Vec<String> = Vec::new();
                for block in &m.content {
                    match block {
                        AssistantContent::Thinking { thinking: t } => thinking.push(t),
                        AssistantContent::Text { text: t } => text.push(t),
                        AssistantContent::ToolCall(tc) => {
                            let args = tc
                                .arguments
                                .iter()
                                .map(|(k, v)| format!("{k}={v}"))
                                .collect::<Vec<_>>()
                                .join(", ");
                            calls.push(format!("{}({args})", tc.name));
                        }
                    }
                }
                if !thinking.is_empty() {
                    parts.push(format!("[Assistant thinking]: {}", thinking.join("\n")));
                }
                if !text.is_empty() {
                    parts.push(format!("[Assistant]: {}", text.join("\n")));
                }
                if !calls.is_empty() {
                    parts.push(format!("[Assistant tool calls]: {}", calls.join("; ")));
                }
            }
            Message::ToolResult(m) => {
                let text = m.text();
                if !text.is_empty() {
                    parts.push(format!("[Tool result]: {text}"));
                }
            }
        }
    }

    parts.join("\n\n")
}

/// Summarize the discarded history.
///
/// With a `previous_summary` the update prompt is used and the prior summary
/// travels in `<previous-summary>` tags, so successive compactions refine
/// one rolling checkpoint instead of stacking summaries of summaries.
pub(crate) async fn generate_summary(
    provider: &dyn LlmStream,
    config: &LoopConfig,
    messages: &[Message],
    reserve_tokens: usize,
    previous_summary: Option<&str>,
    cancel: &CancellationToken,
) -> anyhow::Result<String> {
    let base_prompt = if previous_summary.is_some() {
        UPDATE_SUMMARIZATION_PROMPT
    } else {
        SUMMARIZATION_PROMPT
    };

    let mut prompt = format!(
        "<conversation>\n{}\n</conversation>\n\n",
        serialize_conversation(messages)
    );
    if let Some(prev) = previous_summary {
        prompt.push_str(&format!("<previous-summary>\n{prev}\n</previous-summary>\n\n"));
    }
    prompt.push_str(base_prompt);

    one_shot(provider, config, prompt, history_budget(reserve_tokens), cancel)
        .await
        .context("history summarization failed")
}

/// Summarize the leading part of a split turn.
pub(crate) async fn generate_turn_prefix_summary(
    provider: &dyn LlmStream,
    config: &LoopConfig,
    messages: &[Message],
    reserve_tokens: usize,
    cancel: &CancellationToken,
) -> anyhow::Result<String> {
    let prompt = format!(
        "<conversation>\n{}\n</conversation>\n\n{}",
        serialize_conversation(messages),
        TURN_PREFIX_SUMMARIZATION_PROMPT
    );
    one_shot(provider, config, prompt, turn_prefix_budget(reserve_tokens), cancel)
        .await
        .context("turn prefix summarization failed")
}

/// One-shot completion through the regular stream capability, streaming
/// disabled.  Shares the run's cancel token, so an abort mid-compaction
/// interrupts the summarization call too.
async fn one_shot(
    provider: &dyn LlmStream,
    config: &LoopConfig,
    prompt_text: String,
    max_tokens: u32,
    cancel: &CancellationToken,
) -> anyhow::Result<String> {
    let req = StreamRequest {
        model_id: config.model_id.clone(),
        system_prompt: SUMMARIZATION_SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(prompt_text)],
        tools: Vec::new(),
        options: StreamOptions {
            max_tokens: Some(max_tokens),
            api_key: config.api_key.clone(),
            max_retry_delay_ms: config.max_retry_delay_ms,
            ..StreamOptions::default()
        },
        stream: false,
    };

    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("aborted"),
        opened = provider.open_stream(req) => opened?,
    };

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => bail!("aborted"),
            ev = stream.next() => ev,
        };
        match event {
            None => bail!("stream ended without completion"),
            Some(Err(e)) => return Err(e),
            Some(Ok(StreamEvent::Done { message })) => return Ok(message.text()),
            Some(Ok(StreamEvent::Error { message })) => {
                bail!(message
                    .error_message
                    .unwrap_or_else(|| "unknown provider error".into()))
            }
            // One-shot calls may still surface deltas; only the terminal
            // event matters here.
            Some(Ok(_)) => {}
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
