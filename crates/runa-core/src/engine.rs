// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use runa_config::{CompactionSettings, LoopConfig};
use runa_model::{
    reasoning, AssistantMessage, LlmStream, Message, StreamEvent, StreamRequest,
};
use runa_tools::ToolRegistry;

use crate::compaction::{
    estimate_context, run_compaction, should_compact, splice_summary, CompactorState,
};
use crate::events::AgentEvent;
use crate::queue::MessageSource;
use crate::runner::run_tool_batch;
use crate::transform::ContextTransform;

/// Everything one run needs, owned or shared by clone.
///
/// The engine takes the message list by value: during the run it is the
/// exclusive owner, and the final list (including any compaction splices) is
/// handed back through the return value.  Observers only ever see snapshots
/// in events.
pub(crate) struct RunParams {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    /// New prompt messages; empty for a continue run.
    pub prompts: Vec<Message>,
    pub provider: Arc<dyn LlmStream>,
    pub tools: Arc<ToolRegistry>,
    pub config: LoopConfig,
    pub settings: CompactionSettings,
    pub context_window: usize,
    pub compactor: Arc<Mutex<CompactorState>>,
    pub transform: Option<Arc<dyn ContextTransform>>,
    pub steering: Arc<dyn MessageSource>,
    pub follow_up: Arc<dyn MessageSource>,
    pub cancel: CancellationToken,
}

/// The outermost control loop: stream an assistant turn, dispatch its tool
/// calls, drain the queues, re-enter until nothing is left to do.
///
/// Returns the final message list.  `Err` is reserved for failures that are
/// fatal to the run (summarization failure, a broken transform); provider
/// errors and aborts terminate through the normal event path.
pub(crate) async fn run_loop(
    params: RunParams,
    tx: mpsc::Sender<AgentEvent>,
) -> anyhow::Result<Vec<Message>> {
    let RunParams {
        system_prompt,
        mut messages,
        prompts,
        provider,
        tools,
        config,
        settings,
        context_window,
        compactor,
        transform,
        steering,
        follow_up,
        cancel,
    } = params;

    let run_id = Uuid::new_v4();
    debug!(%run_id, model = %config.model_id, prompts = prompts.len(), "run started");

    send(&tx, AgentEvent::AgentStart).await;
    send(&tx, AgentEvent::TurnStart).await;

    let mut new_messages: Vec<Message> = Vec::new();
    for prompt in prompts {
        send(&tx, AgentEvent::MessageStart { message: prompt.clone() }).await;
        send(&tx, AgentEvent::MessageEnd { message: prompt.clone() }).await;
        messages.push(prompt.clone());
        new_messages.push(prompt);
    }

    let mut first_turn = true;
    let mut pending = steering.poll();

    // Outer loop: re-entered when follow-up messages arrive after a natural
    // stop.  Inner loop: one assistant turn per iteration.
    'outer: loop {
        let mut has_tool_calls = true;

        while has_tool_calls || !pending.is_empty() {
            if !first_turn {
                send(&tx, AgentEvent::TurnStart).await;
            }
            first_turn = false;

            for msg in pending.drain(..) {
                send(&tx, AgentEvent::MessageStart { message: msg.clone() }).await;
                send(&tx, AgentEvent::MessageEnd { message: msg.clone() }).await;
                messages.push(msg.clone());
                new_messages.push(msg);
            }

            // Check-and-compact before the stream request.  Skipped once the
            // run is cancelled — the stream consumer below synthesizes the
            // terminal aborted message.
            if !cancel.is_cancelled() {
                let estimate = estimate_context(&messages);
                if should_compact(estimate.tokens, context_window, &settings) {
                    send(&tx, AgentEvent::CompactionStart).await;
                    match run_compaction(
                        provider.as_ref(),
                        &config,
                        &settings,
                        &compactor,
                        &messages,
                        &cancel,
                    )
                    .await
                    {
                        Ok(result) => {
                            splice_summary(&mut messages, &result);
                            debug!(
                                %run_id,
                                tokens_before = result.tokens_before,
                                "context compacted"
                            );
                            send(
                                &tx,
                                AgentEvent::CompactionEnd {
                                    tokens_before: result.tokens_before,
                                    summary: result.summary,
                                },
                            )
                            .await;
                        }
                        Err(e) if cancel.is_cancelled() => {
                            debug!(%run_id, error = %e, "compaction interrupted by abort");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            let assistant = stream_turn(
                TurnInputs {
                    provider: provider.as_ref(),
                    config: &config,
                    system_prompt: &system_prompt,
                    tools: &tools,
                    transform: transform.as_deref(),
                    cancel: &cancel,
                },
                &mut messages,
                &tx,
            )
            .await?;
            new_messages.push(Message::Assistant(assistant.clone()));

            if assistant.is_terminal_failure() {
                send(&tx, AgentEvent::TurnEnd { message: assistant, tool_results: vec![] }).await;
                send(&tx, AgentEvent::AgentEnd { new_messages }).await;
                return Ok(messages);
            }

            has_tool_calls = !assistant.tool_calls().is_empty();
            let mut tool_results: Vec<Message> = Vec::new();
            let mut steering_after_tools: Option<Vec<Message>> = None;
            if has_tool_calls {
                let outcome =
                    run_tool_batch(&assistant, &tools, steering.as_ref(), &cancel, &tx).await;
                for msg in outcome.results {
                    messages.push(msg.clone());
                    new_messages.push(msg.clone());
                    tool_results.push(msg);
                }
                steering_after_tools = outcome.steering;
            }

            send(&tx, AgentEvent::TurnEnd { message: assistant, tool_results }).await;

            pending = match steering_after_tools {
                Some(msgs) => msgs,
                None => steering.poll(),
            };
        }

        let follow = follow_up.poll();
        if follow.is_empty() {
            break 'outer;
        }
        pending = follow;
    }

    debug!(%run_id, appended = new_messages.len(), "run finished");
    send(&tx, AgentEvent::AgentEnd { new_messages }).await;
    Ok(messages)
}

struct TurnInputs<'a> {
    provider: &'a dyn LlmStream,
    config: &'a LoopConfig,
    system_prompt: &'a str,
    tools: &'a ToolRegistry,
    transform: Option<&'a dyn ContextTransform>,
    cancel: &'a CancellationToken,
}

/// Stream one assistant turn, folding deltas into the conversation tail.
///
/// Always produces a terminal assistant message: the provider's final
/// message, its error payload (which supersedes any accumulated partial), or
/// a synthesized `aborted` message when the token trips or the stream ends
/// without a terminal event.
async fn stream_turn(
    inputs: TurnInputs<'_>,
    messages: &mut Vec<Message>,
    tx: &mpsc::Sender<AgentEvent>,
) -> anyhow::Result<AssistantMessage> {
    let mut ctx_messages = messages.clone();
    if let Some(t) = inputs.transform {
        ctx_messages = t.transform(ctx_messages, inputs.cancel).await?;
    }
    // Application-defined messages never reach the provider.
    let llm_messages: Vec<Message> = ctx_messages
        .into_iter()
        .filter(|m| !matches!(m, Message::Custom(_)))
        .collect();

    let req = StreamRequest {
        model_id: inputs.config.model_id.clone(),
        system_prompt: inputs.system_prompt.to_string(),
        messages: llm_messages,
        tools: inputs.tools.manifests(),
        options: reasoning::stream_options(inputs.config),
        stream: true,
    };

    let mut started = false;

    let opened = tokio::select! {
        biased;
        _ = inputs.cancel.cancelled() => None,
        r = inputs.provider.open_stream(req) => Some(r),
    };
    let mut stream = match opened {
        None => return Ok(finalize(messages, tx, AssistantMessage::aborted(), started).await),
        Some(Err(e)) => {
            warn!(error = %e, "failed to open model stream");
            return Ok(
                finalize(messages, tx, AssistantMessage::from_error(e.to_string()), started).await,
            );
        }
        Some(Ok(s)) => s,
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = inputs.cancel.cancelled() => None,
            ev = stream.next() => Some(ev),
        };
        match next {
            None => return Ok(finalize(messages, tx, AssistantMessage::aborted(), started).await),
            Some(None) => {
                // The provider hung up without done/error; an incomplete
                // tail must not masquerade as a finished turn.
                warn!("stream ended without a terminal event");
                return Ok(finalize(messages, tx, AssistantMessage::aborted(), started).await);
            }
            Some(Some(Err(e))) => {
                warn!(error = %e, "stream transport error");
                return Ok(finalize(
                    messages,
                    tx,
                    AssistantMessage::from_error(e.to_string()),
                    started,
                )
                .await);
            }
            Some(Some(Ok(event))) => match event {
                StreamEvent::Start { partial } => {
                    started = true;
                    messages.push(Message::Assistant(partial.clone()));
                    send(tx, AgentEvent::MessageStart { message: Message::Assistant(partial) })
                        .await;
                }
                StreamEvent::Delta { partial, delta } => {
                    if started {
                        if let Some(last) = messages.last_mut() {
                            *last = Message::Assistant(partial.clone());
                        }
                        send(tx, AgentEvent::MessageUpdate { message: partial, delta }).await;
                    }
                }
                StreamEvent::Done { message } => {
                    return Ok(finalize(messages, tx, message, started).await)
                }
                StreamEvent::Error { message } => {
                    return Ok(finalize(messages, tx, message, started).await)
                }
            },
        }
    }
}

/// Commit the terminal assistant message to the conversation tail and emit
/// its closing events.
async fn finalize(
    messages: &mut Vec<Message>,
    tx: &mpsc::Sender<AgentEvent>,
    final_msg: AssistantMessage,
    started: bool,
) -> AssistantMessage {
    let wrapped = Message::Assistant(final_msg.clone());
    if started {
        if let Some(last) = messages.last_mut() {
            *last = wrapped.clone();
        }
    } else {
        messages.push(wrapped.clone());
        send(tx, AgentEvent::MessageStart { message: wrapped.clone() }).await;
    }
    send(tx, AgentEvent::MessageEnd { message: wrapped }).await;
    final_msg
}

async fn send(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    let _ = tx.send(event).await;
}
