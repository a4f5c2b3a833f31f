// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{StreamEvent, StreamRequest};

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// The single capability through which the engine talks to a model provider.
///
/// Implementations adapt a concrete wire protocol into the normalized
/// [`StreamEvent`] grammar.  The engine never sees provider-specific payloads;
/// retry handling (including the `max_retry_delay_ms` cap) lives behind this
/// trait.
#[async_trait]
pub trait LlmStream: Send + Sync {
    /// Human-readable name for status display and logging.
    fn name(&self) -> &str;

    /// Open a completion stream.
    ///
    /// An `Err` here is equivalent to an immediate `Error` event: the caller
    /// converts it into a terminal assistant message with
    /// `stop_reason = error`.
    async fn open_stream(&self, req: StreamRequest) -> anyhow::Result<EventStream>;
}
