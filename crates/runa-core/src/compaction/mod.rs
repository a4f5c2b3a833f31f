// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bounded-context maintenance.
//!
//! When the estimated token footprint of the conversation approaches the
//! model's window, a cut point is chosen, the prefix is summarized by a
//! secondary model call, and the summary replaces the prefix as a synthetic
//! checkpoint message.  Everything here is purely in-memory except the
//! summarization calls, which go through the same stream capability as the
//! main loop and honor the same cancel token.

mod compact;
mod cut_point;
mod file_ops;
mod summarize;
mod tokens;

pub use compact::{
    run_compaction, should_compact, splice_summary, Checkpoint, CompactionResult, CompactorState,
};
pub use cut_point::{find_cut_point, CutPoint};
pub use file_ops::{extract_file_ops, file_lists, format_file_operations, FileOperations};
pub use summarize::serialize_conversation;
pub use tokens::{estimate_context, estimate_message, ContextEstimate};
