// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use runa_model::Message;

/// Hook invoked immediately before messages are handed to the stream layer.
///
/// The returned list replaces the conversation for that one request only —
/// the engine's own history is untouched.  Implementations may prune,
/// reorder, or redact, but must preserve the tool-call/tool-result pairing
/// invariant, and should observe `cancel` if they do anything slow.
#[async_trait]
pub trait ContextTransform: Send + Sync {
    async fn transform(
        &self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Message>>;
}
