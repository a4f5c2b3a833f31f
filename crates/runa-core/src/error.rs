// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Errors surfaced to the caller of [`crate::Agent`].
///
/// Provider errors and tool failures never appear here — they are recovered
/// inside the run and reported through the event stream.  The variants below
/// either fail fast before any event is emitted (caller-state violations) or
/// terminate the run after a final `agent_end` (summarization and other
/// internal failures).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("already streaming; use steer() or wait for the run to finish")]
    AlreadyStreaming,

    #[error("no messages to continue from")]
    NoMessages,

    #[error("cannot continue from an assistant message")]
    ContinueFromAssistant,

    #[error("cannot mutate messages while a run is active")]
    MutationWhileStreaming,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
