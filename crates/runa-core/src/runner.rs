// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use runa_model::{AssistantMessage, Message, ToolCall, ToolResultMessage};
use runa_tools::{ProgressSink, ToolRegistry, ToolResult};

use crate::events::AgentEvent;
use crate::queue::MessageSource;

/// Outcome of executing one assistant message's tool calls.
pub(crate) struct ToolBatchOutcome {
    /// One tool-result message per tool call, in call order.
    pub results: Vec<Message>,
    /// Steering messages that interrupted the batch, if any.
    pub steering: Option<Vec<Message>>,
}

/// Execute all tool calls of one assistant message, strictly serially.
///
/// After every completed call the steering source is polled; a non-empty
/// drain skips the remaining calls (each still gets its synthesized result
/// so every `ToolCall` is answered).  A tripped cancel token stops new calls
/// from starting, but the call→result pairing is preserved with synthesized
/// results — without execution events, since nothing executed.
pub(crate) async fn run_tool_batch(
    assistant: &AssistantMessage,
    tools: &ToolRegistry,
    steering: &dyn MessageSource,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<AgentEvent>,
) -> ToolBatchOutcome {
    let calls = assistant.tool_calls();
    let mut results: Vec<Message> = Vec::with_capacity(calls.len());
    let mut steering_msgs: Option<Vec<Message>> = None;

    for i in 0..calls.len() {
        let tc = calls[i];
        if cancel.is_cancelled() {
            for &skip in &calls[i..] {
                let msg = skipped_result(skip);
                emit_result_message(tx, &msg).await;
                results.push(msg);
            }
            break;
        }

        let _ = tx
            .send(AgentEvent::ToolExecutionStart {
                tool_call_id: tc.id.clone(),
                tool_name: tc.name.clone(),
                arguments: tc.arguments.clone(),
            })
            .await;

        let (result, is_error) = execute_one(tc, tools, cancel, tx).await;

        let _ = tx
            .send(AgentEvent::ToolExecutionEnd {
                tool_call_id: tc.id.clone(),
                tool_name: tc.name.clone(),
                result: result.clone(),
                is_error,
            })
            .await;

        let msg = Message::ToolResult(ToolResultMessage {
            tool_call_id: tc.id.clone(),
            tool_name: tc.name.clone(),
            content: result.content,
            is_error,
        });
        emit_result_message(tx, &msg).await;
        results.push(msg);

        let injected = steering.poll();
        if !injected.is_empty() {
            steering_msgs = Some(injected);
            for &skip in &calls[i + 1..] {
                let _ = tx
                    .send(AgentEvent::ToolExecutionStart {
                        tool_call_id: skip.id.clone(),
                        tool_name: skip.name.clone(),
                        arguments: skip.arguments.clone(),
                    })
                    .await;
                let result = ToolResult::text("Skipped");
                let _ = tx
                    .send(AgentEvent::ToolExecutionEnd {
                        tool_call_id: skip.id.clone(),
                        tool_name: skip.name.clone(),
                        result: result.clone(),
                        is_error: true,
                    })
                    .await;
                let msg = skipped_result(skip);
                emit_result_message(tx, &msg).await;
                results.push(msg);
            }
            break;
        }
    }

    ToolBatchOutcome {
        results,
        steering: steering_msgs,
    }
}

/// Run one tool body, relaying progress updates as they arrive.
/// Lookup misses and body failures become error results; they never abort
/// the run.
async fn execute_one(
    tc: &ToolCall,
    tools: &ToolRegistry,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<AgentEvent>,
) -> (ToolResult, bool) {
    let Some(tool) = tools.get(&tc.name) else {
        warn!(tool_name = %tc.name, tool_call_id = %tc.id, "model requested unknown tool");
        return (ToolResult::text(format!("Tool not found: {}", tc.name)), true);
    };

    let (sink, mut progress_rx) = ProgressSink::channel();
    let output = {
        let fut = tool.execute(&tc.id, &tc.arguments, cancel, &sink);
        tokio::pin!(fut);
        loop {
            tokio::select! {
                Some(partial) = progress_rx.recv() => {
                    let _ = tx
                        .send(AgentEvent::ToolExecutionUpdate {
                            tool_call_id: tc.id.clone(),
                            tool_name: tc.name.clone(),
                            partial,
                        })
                        .await;
                }
                output = &mut fut => break output,
            }
        }
    };
    drop(sink);
    // Relay any updates that raced with completion.
    while let Ok(partial) = progress_rx.try_recv() {
        let _ = tx
            .send(AgentEvent::ToolExecutionUpdate {
                tool_call_id: tc.id.clone(),
                tool_name: tc.name.clone(),
                partial,
            })
            .await;
    }

    match output {
        Ok(result) => (result, false),
        Err(e) => {
            warn!(tool_name = %tc.name, tool_call_id = %tc.id, error = %e, "tool failed");
            (ToolResult::text(e.to_string()), true)
        }
    }
}

fn skipped_result(tc: &ToolCall) -> Message {
    Message::ToolResult(ToolResultMessage {
        tool_call_id: tc.id.clone(),
        tool_name: tc.name.clone(),
        content: ToolResult::text("Skipped").content,
        is_error: true,
    })
}

async fn emit_result_message(tx: &mpsc::Sender<AgentEvent>, msg: &Message) {
    let _ = tx
        .send(AgentEvent::MessageStart {
            message: msg.clone(),
        })
        .await;
    let _ = tx
        .send(AgentEvent::MessageEnd {
            message: msg.clone(),
        })
        .await;
}
