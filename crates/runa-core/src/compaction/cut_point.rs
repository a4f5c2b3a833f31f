// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use runa_model::Message;

use super::tokens::estimate_message;

/// Result of cut-point selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutPoint {
    /// Index of the first message to keep.
    pub first_kept_index: usize,
    /// Index of the user message that opens the turn being split, when the
    /// cut lands inside a turn.
    pub turn_start_index: Option<usize>,
    /// True when the cut point is an assistant message rather than a turn
    /// boundary.
    pub is_split_turn: bool,
}

/// Indices at which the history may be cut: user, assistant, and custom
/// messages.  Never a tool result — a result must remain attached to its
/// call, and cutting at the assistant that issued the calls keeps the whole
/// group in the suffix.
fn valid_cut_points(messages: &[Message], start_index: usize) -> Vec<usize> {
    (start_index..messages.len())
        .filter(|&i| !matches!(messages[i], Message::ToolResult(_)))
        .collect()
}

/// The user (or custom) message that opens the turn containing `from_index`,
/// searching backward but not past `start_index`.
fn find_turn_start(messages: &[Message], from_index: usize, start_index: usize) -> Option<usize> {
    (start_index..from_index)
        .rev()
        .find(|&i| matches!(messages[i], Message::User(_) | Message::Custom(_)))
}

/// Choose the cut point that keeps roughly `keep_recent_tokens` of recent
/// history.
///
/// Walks backward from the newest message accumulating estimated sizes; once
/// the running total reaches the budget, cuts at the nearest valid cut point
/// at or after that message.  When the budget is never reached, everything
/// from the oldest valid cut point is kept.
pub fn find_cut_point(
    messages: &[Message],
    start_index: usize,
    keep_recent_tokens: usize,
) -> CutPoint {
    let cut_points = valid_cut_points(messages, start_index);

    let Some(&oldest) = cut_points.first() else {
        return CutPoint {
            first_kept_index: start_index,
            turn_start_index: None,
            is_split_turn: false,
        };
    };

    let mut cut_index = oldest;
    let mut accumulated = 0usize;
    for i in (start_index..messages.len()).rev() {
        accumulated += estimate_message(&messages[i]);
        if accumulated >= keep_recent_tokens {
            if let Some(&c) = cut_points.iter().find(|&&c| c >= i) {
                cut_index = c;
            }
            break;
        }
    }

    // A cut at an assistant message splits its turn; the suffix then needs a
    // separate prefix summary anchored at the turn's opening user message.
    let is_assistant_cut = messages[cut_index].is_assistant();
    let turn_start_index = if is_assistant_cut {
        find_turn_start(messages, cut_index, start_index)
    } else {
        None
    };

    CutPoint {
        first_kept_index: cut_index,
        turn_start_index,
        is_split_turn: is_assistant_cut && turn_start_index.is_some(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
