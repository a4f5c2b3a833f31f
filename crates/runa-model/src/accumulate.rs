// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Map;

use crate::{AssistantContent, AssistantMessage, StopReason, StreamDelta, ToolCall, Usage};

/// Folds [`StreamDelta`]s into a growing [`AssistantMessage`].
///
/// Providers use this to build the `partial` snapshot attached to every
/// delta event.  Snapshots are monotone: applying a delta never shrinks the
/// content list, and the text of an existing block only ever grows by
/// appending.
#[derive(Debug)]
pub struct MessageAccumulator {
    partial: AssistantMessage,
}

impl Default for MessageAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self {
            partial: AssistantMessage::partial(),
        }
    }

    pub fn partial(&self) -> &AssistantMessage {
        &self.partial
    }

    pub fn apply(&mut self, delta: &StreamDelta) {
        match delta {
            StreamDelta::TextStart { index } => {
                self.set_block(*index, AssistantContent::Text { text: String::new() });
            }
            StreamDelta::TextDelta { index, delta } => {
                match self.block_mut(*index) {
                    Some(AssistantContent::Text { text }) => text.push_str(delta),
                    _ => self.set_block(
                        *index,
                        AssistantContent::Text { text: delta.clone() },
                    ),
                }
            }
            StreamDelta::TextEnd { index, content } => {
                self.set_block(*index, AssistantContent::Text { text: content.clone() });
            }
            StreamDelta::ThinkingStart { index } => {
                self.set_block(*index, AssistantContent::Thinking { thinking: String::new() });
            }
            StreamDelta::ThinkingDelta { index, delta } => {
                match self.block_mut(*index) {
                    Some(AssistantContent::Thinking { thinking }) => thinking.push_str(delta),
                    _ => self.set_block(
                        *index,
                        AssistantContent::Thinking { thinking: delta.clone() },
                    ),
                }
            }
            StreamDelta::ThinkingEnd { index, content } => {
                self.set_block(
                    *index,
                    AssistantContent::Thinking { thinking: content.clone() },
                );
            }
            StreamDelta::ToolCallStart { index } => {
                self.set_block(
                    *index,
                    AssistantContent::ToolCall(ToolCall {
                        id: String::new(),
                        name: String::new(),
                        arguments: Map::new(),
                    }),
                );
            }
            // Raw argument fragments are not reflected in the partial; the
            // assembled call replaces the placeholder at ToolCallEnd.
            StreamDelta::ToolCallDelta { .. } => {}
            StreamDelta::ToolCallEnd { index, tool_call } => {
                self.set_block(*index, AssistantContent::ToolCall(tool_call.clone()));
            }
        }
    }

    /// Seal the accumulated content into a final message.
    pub fn finish(self, stop_reason: StopReason, usage: Option<Usage>) -> AssistantMessage {
        AssistantMessage {
            content: self.partial.content,
            stop_reason,
            usage,
            error_message: None,
        }
    }

    fn block_mut(&mut self, index: usize) -> Option<&mut AssistantContent> {
        self.partial.content.get_mut(index)
    }

    fn set_block(&mut self, index: usize, block: AssistantContent) {
        while self.partial.content.len() <= index {
            self.partial.content.push(AssistantContent::Text { text: String::new() });
        }
        self.partial.content[index] = block;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
