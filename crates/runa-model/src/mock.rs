// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use crate::{
    AssistantContent, AssistantMessage, EventStream, LlmStream, MessageAccumulator, StopReason,
    StreamDelta, StreamEvent, StreamRequest, ToolCall, Usage,
};

/// One scripted provider action.  Scripts are written in this compact form
/// and expanded into the full [`StreamEvent`] grammar (start, block
/// start/delta/end, terminal) with correct partial snapshots.
#[derive(Debug, Clone)]
pub enum ScriptEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// A complete tool call; expanded into start → delta → end.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// Usage attached to the final message of this script.
    Usage(Usage),
    Done(StopReason),
    /// Terminal provider failure.
    Error(String),
}

/// A pre-scripted stream capability.  Each `open_stream` call pops the next
/// script from the front of the queue, so tests can specify exact event
/// sequences — including tool calls and provider errors — without network
/// access.
///
/// Every request is recorded in `requests` so tests can inspect what was
/// sent (message list after compaction, reasoning options, one-shot
/// summarization calls).
pub struct ScriptedStream {
    scripts: Mutex<VecDeque<Vec<ScriptEvent>>>,
    pub requests: Arc<Mutex<Vec<StreamRequest>>>,
}

impl ScriptedStream {
    /// Build a provider from an ordered list of call scripts.
    pub fn new(scripts: Vec<Vec<ScriptEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider whose every call streams a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    /// Convenience: a tool call on the first stream, text on the second.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ScriptEvent::ToolCall {
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments,
                },
                ScriptEvent::Done(StopReason::ToolUse),
            ],
            Self::text_script(final_text),
        ])
    }

    /// A single-reply script: one text delta then `Done(stop)`.
    pub fn text_script(reply: impl Into<String>) -> Vec<ScriptEvent> {
        vec![
            ScriptEvent::TextDelta(reply.into()),
            ScriptEvent::Done(StopReason::Stop),
        ]
    }

    /// The request sent by the most recent `open_stream` call.
    pub fn last_request(&self) -> Option<StreamRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmStream for ScriptedStream {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn open_stream(&self, req: StreamRequest) -> anyhow::Result<EventStream> {
        self.requests.lock().unwrap().push(req);
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            tracing::warn!("scripted stream exhausted; falling back to placeholder reply");
            Self::text_script("[no more scripts]")
        });
        let events: Vec<anyhow::Result<StreamEvent>> =
            expand_script(script).into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Kind of the currently open streaming block during expansion.
#[derive(Clone, Copy)]
enum OpenBlock {
    Text(usize),
    Thinking(usize),
}

/// Expand a compact script into full stream events with partial snapshots.
///
/// A script with no terminal `Done`/`Error` expands to a stream that simply
/// ends — the consumer is expected to treat that as an interrupted stream.
fn expand_script(script: Vec<ScriptEvent>) -> Vec<StreamEvent> {
    let mut acc = MessageAccumulator::new();
    let mut out = vec![StreamEvent::Start {
        partial: acc.partial().clone(),
    }];
    let mut open: Option<OpenBlock> = None;
    let mut usage: Option<Usage> = None;

    fn push(acc: &mut MessageAccumulator, out: &mut Vec<StreamEvent>, delta: StreamDelta) {
        acc.apply(&delta);
        out.push(StreamEvent::Delta {
            partial: acc.partial().clone(),
            delta,
        });
    }

    fn close(
        acc: &mut MessageAccumulator,
        out: &mut Vec<StreamEvent>,
        open: &mut Option<OpenBlock>,
    ) {
        let delta = match open.take() {
            None => return,
            Some(OpenBlock::Text(index)) => {
                let content = match &acc.partial().content[index] {
                    AssistantContent::Text { text } => text.clone(),
                    _ => String::new(),
                };
                StreamDelta::TextEnd { index, content }
            }
            Some(OpenBlock::Thinking(index)) => {
                let content = match &acc.partial().content[index] {
                    AssistantContent::Thinking { thinking } => thinking.clone(),
                    _ => String::new(),
                };
                StreamDelta::ThinkingEnd { index, content }
            }
        };
        acc.apply(&delta);
        out.push(StreamEvent::Delta {
            partial: acc.partial().clone(),
            delta,
        });
    }

    for ev in script {
        match ev {
            ScriptEvent::TextDelta(text) => {
                let index = match open {
                    Some(OpenBlock::Text(i)) => i,
                    _ => {
                        close(&mut acc, &mut out, &mut open);
                        let i = acc.partial().content.len();
                        push(&mut acc, &mut out, StreamDelta::TextStart { index: i });
                        open = Some(OpenBlock::Text(i));
                        i
                    }
                };
                push(&mut acc, &mut out, StreamDelta::TextDelta { index, delta: text });
            }
            ScriptEvent::ThinkingDelta(text) => {
                let index = match open {
                    Some(OpenBlock::Thinking(i)) => i,
                    _ => {
                        close(&mut acc, &mut out, &mut open);
                        let i = acc.partial().content.len();
                        push(&mut acc, &mut out, StreamDelta::ThinkingStart { index: i });
                        open = Some(OpenBlock::Thinking(i));
                        i
                    }
                };
                push(&mut acc, &mut out, StreamDelta::ThinkingDelta { index, delta: text });
            }
            ScriptEvent::ToolCall { id, name, arguments } => {
                close(&mut acc, &mut out, &mut open);
                let index = acc.partial().content.len();
                let args = arguments.as_object().cloned().unwrap_or_default();
                push(&mut acc, &mut out, StreamDelta::ToolCallStart { index });
                push(
                    &mut acc,
                    &mut out,
                    StreamDelta::ToolCallDelta {
                        index,
                        delta: Value::Object(args.clone()).to_string(),
                    },
                );
                push(
                    &mut acc,
                    &mut out,
                    StreamDelta::ToolCallEnd {
                        index,
                        tool_call: ToolCall { id, name, arguments: args },
                    },
                );
            }
            ScriptEvent::Usage(u) => usage = Some(u),
            ScriptEvent::Done(reason) => {
                close(&mut acc, &mut out, &mut open);
                let message = std::mem::take(&mut acc).finish(reason, usage.take());
                out.push(StreamEvent::Done { message });
                return out;
            }
            ScriptEvent::Error(msg) => {
                out.push(StreamEvent::Error {
                    message: AssistantMessage::from_error(msg),
                });
                return out;
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
