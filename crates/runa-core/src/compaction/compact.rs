// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use runa_config::{CompactionSettings, LoopConfig};
use runa_model::{LlmStream, Message};

use super::cut_point::find_cut_point;
use super::file_ops::{extract_file_ops, file_lists, format_file_operations, FileOperations};
use super::summarize::{generate_summary, generate_turn_prefix_summary};
use super::tokens::estimate_context;

/// Metadata carried forward from one compaction to the next.
///
/// The summary seeds the update prompt; the file lists accumulate so a path
/// read before the previous checkpoint is still reported after the next one.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub summary: String,
    pub read_files: Vec<String>,
    pub modified_files: Vec<String>,
}

/// Rolling compactor state, shared between the agent and its running loop.
#[derive(Debug, Default)]
pub struct CompactorState {
    pub previous: Option<Checkpoint>,
}

/// Outcome of one compaction pass, ready to splice.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// Merged summary text, including the file-operation tags.
    pub summary: String,
    /// Index of the first message kept verbatim.
    pub first_kept_index: usize,
    /// Estimated context tokens at the time the pass started.
    pub tokens_before: usize,
    pub read_files: Vec<String>,
    pub modified_files: Vec<String>,
}

/// Trigger rule.  Strict: a footprint exactly at the threshold does not
/// trigger.
pub fn should_compact(
    context_tokens: usize,
    context_window: usize,
    settings: &CompactionSettings,
) -> bool {
    settings.enabled && context_tokens > context_window.saturating_sub(settings.reserve_tokens)
}

/// Run one compaction pass over `messages`.
///
/// Chooses the cut point, produces the history summary (and, for a split
/// turn, the turn-prefix summary), merges in the tracked file operations,
/// and records the new checkpoint in `state`.  The caller splices the result
/// with [`splice_summary`] before the next stream request.
pub async fn run_compaction(
    provider: &dyn LlmStream,
    config: &LoopConfig,
    settings: &CompactionSettings,
    state: &Mutex<CompactorState>,
    messages: &[Message],
    cancel: &CancellationToken,
) -> anyhow::Result<CompactionResult> {
    let previous = state.lock().unwrap().previous.clone();
    // After a splice the checkpoint sits at index 0; the path to consider
    // starts right after it.
    let start_index = usize::from(previous.is_some());

    let tokens_before = estimate_context(messages).tokens;
    let cut = find_cut_point(messages, start_index, settings.keep_recent_tokens);

    let history_end = match cut.turn_start_index {
        Some(turn_start) if cut.is_split_turn => turn_start,
        _ => cut.first_kept_index,
    };
    let history = &messages[start_index..history_end];
    let turn_prefix: &[Message] = if cut.is_split_turn {
        &messages[history_end..cut.first_kept_index]
    } else {
        &[]
    };

    debug!(
        tokens_before,
        first_kept_index = cut.first_kept_index,
        is_split_turn = cut.is_split_turn,
        "compacting conversation prefix"
    );

    // File operations: seed with the previous checkpoint's lists, then sweep
    // every message that is about to be discarded.
    let mut ops = FileOperations::default();
    if let Some(prev) = &previous {
        ops.read.extend(prev.read_files.iter().cloned());
        ops.edited.extend(prev.modified_files.iter().cloned());
    }
    for msg in history.iter().chain(turn_prefix.iter()) {
        extract_file_ops(msg, &mut ops);
    }

    let previous_summary = previous.as_ref().map(|p| p.summary.as_str());
    let mut summary = if cut.is_split_turn && !turn_prefix.is_empty() {
        let history_summary = if history.is_empty() {
            "No prior history.".to_string()
        } else {
            generate_summary(
                provider,
                config,
                history,
                settings.reserve_tokens,
                previous_summary,
                cancel,
            )
            .await?
        };
        let prefix_summary = generate_turn_prefix_summary(
            provider,
            config,
            turn_prefix,
            settings.reserve_tokens,
            cancel,
        )
        .await?;
        format!("{history_summary}\n\n---\n\n**Turn Context (split turn):**\n\n{prefix_summary}")
    } else {
        generate_summary(
            provider,
            config,
            history,
            settings.reserve_tokens,
            previous_summary,
            cancel,
        )
        .await?
    };

    let (read_files, modified_files) = file_lists(&ops);
    summary.push_str(&format_file_operations(&read_files, &modified_files));

    state.lock().unwrap().previous = Some(Checkpoint {
        summary: summary.clone(),
        read_files: read_files.clone(),
        modified_files: modified_files.clone(),
    });

    Ok(CompactionResult {
        summary,
        first_kept_index: cut.first_kept_index,
        tokens_before,
        read_files,
        modified_files,
    })
}

/// Replace the discarded prefix with a single synthetic checkpoint message.
/// Everything from `first_kept_index` on is preserved unchanged.
pub fn splice_summary(messages: &mut Vec<Message>, result: &CompactionResult) {
    let checkpoint = Message::user(format!(
        "[Context Checkpoint - {} tokens compacted]\n\n{}",
        result.tokens_before, result.summary
    ));
    let tail = messages.split_off(result.first_kept_index);
    messages.clear();
    messages.push(checkpoint);
    messages.extend(tail);
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
