// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tokio::sync::mpsc;

use crate::ToolResult;

/// Handle a tool uses to surface intermediate output while it runs.
///
/// The runner drains the paired receiver and republishes each partial as a
/// `tool_execution_update` event.  Updates sent after the receiver is gone
/// are dropped silently; progress is best-effort by contract.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ToolResult>>,
}

impl ProgressSink {
    /// Create a connected sink and the receiver the runner drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ToolResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every update.  For tests and direct tool invocation.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Publish a partial result snapshot.
    pub fn update(&self, partial: ToolResult) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(partial);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
