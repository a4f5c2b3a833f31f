// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use runa_model::ToolResultContent;

use crate::ProgressSink;

/// The result of executing a tool.
///
/// Error classification does not live here: a tool signals failure by
/// returning `Err`, and the runner turns that into an error-flagged result
/// message.  `details` carries tool-specific data that rides along with the
/// result without entering the conversation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: Vec<ToolResultContent>,
    pub details: Option<Value>,
}

impl ToolResult {
    /// Plain-text result.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::text(content)],
            details: None,
        }
    }

    /// Concatenated text blocks, for display and assertions.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolResultContent::Text { text } => Some(text.as_str()),
                ToolResultContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Trait that every tool offered to the model must implement.
///
/// `execute` is cooperative: implementations must observe `cancel` promptly
/// at their own await points and bail out (an `Err` is fine) once it trips.
/// Failures are reported by returning `Err`; the runner converts them into
/// error results visible to the model, so a failing tool never aborts the
/// run.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;
    async fn execute(
        &self,
        call_id: &str,
        arguments: &Map<String, Value>,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> anyhow::Result<ToolResult>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
