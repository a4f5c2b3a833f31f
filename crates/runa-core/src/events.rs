// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::{Map, Value};

use runa_model::{AssistantMessage, Message, StreamDelta};
use runa_tools::ToolResult;

/// Lifecycle events emitted by the engine during a run.
///
/// The stream is totally ordered and append-only: `AgentStart` precedes
/// everything, `AgentEnd` follows everything, and no event supersedes a
/// prior one.  Messages inside events are immutable snapshots — observers
/// that need the in-progress assistant message must copy it at receipt and
/// must not retain it across further events.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A run began (one `prompt()` or `continue_run()` invocation).
    AgentStart,
    /// One assistant response (plus its tool executions) began.
    TurnStart,
    /// A message entered the conversation: a discharged prompt, the partial
    /// assistant message at stream start, or a tool result.
    MessageStart { message: Message },
    /// The streaming assistant message grew; `message` is the updated
    /// partial, `delta` the granular change.
    MessageUpdate {
        message: AssistantMessage,
        delta: StreamDelta,
    },
    /// The message reached its final form and was appended to the history.
    MessageEnd { message: Message },
    /// A tool call is about to execute (or was skipped by steering, in which
    /// case the matching end event carries `is_error = true`).
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: Map<String, Value>,
    },
    /// Intermediate output surfaced by a running tool.
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        partial: ToolResult,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: ToolResult,
        is_error: bool,
    },
    /// The turn finished; `tool_results` are the result messages produced by
    /// this turn's tool calls, in execution order.
    TurnEnd {
        message: AssistantMessage,
        tool_results: Vec<Message>,
    },
    /// Context compaction began (before the next stream request).
    CompactionStart,
    /// Compaction finished; the prefix was replaced by a checkpoint carrying
    /// `summary`.
    CompactionEnd {
        tokens_before: usize,
        summary: String,
    },
    /// The run finished; `new_messages` is everything appended during it.
    AgentEnd { new_messages: Vec<Message> },
}
