// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeSet;

use runa_model::{AssistantContent, Message};

/// File paths touched by tool calls in a discarded prefix.
///
/// Tracked so that a compaction checkpoint can tell the model which files it
/// already knows about; a modified file supersedes read-only status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOperations {
    pub read: BTreeSet<String>,
    pub written: BTreeSet<String>,
    pub edited: BTreeSet<String>,
}

/// Record file operations from the tool calls of one assistant message.
///
/// Only calls named `Read`/`Write`/`Edit` whose arguments carry a string
/// `path` field are tracked; everything else is ignored.
pub fn extract_file_ops(message: &Message, ops: &mut FileOperations) {
    let Some(assistant) = message.as_assistant() else {
        return;
    };
    for block in &assistant.content {
        let AssistantContent::ToolCall(tc) = block else {
            continue;
        };
        let Some(path) = tc.arguments.get("path").and_then(|v| v.as_str()) else {
            continue;
        };
        match tc.name.as_str() {
            "Read" => {
                ops.read.insert(path.to_string());
            }
            "Write" => {
                ops.written.insert(path.to_string());
            }
            "Edit" => {
                ops.edited.insert(path.to_string());
            }
            _ => {}
        }
    }
}

/// Final `(read_only, modified)` lists: modified is the union of written and
/// edited; a path in both camps reports as modified only.
pub fn file_lists(ops: &FileOperations) -> (Vec<String>, Vec<String>) {
    let modified: BTreeSet<&String> = ops.written.union(&ops.edited).collect();
    let read_only = ops
        .read
        .iter()
        .filter(|p| !modified.contains(p))
        .cloned()
        .collect();
    let modified_files = modified.into_iter().cloned().collect();
    (read_only, modified_files)
}

/// Render the lists as delimited tags for appending to a summary.
/// Empty when no files were touched.
pub fn format_file_operations(read_files: &[String], modified_files: &[String]) -> String {
    let mut sections = Vec::new();
    if !read_files.is_empty() {
        sections.push(format!("<read-files>\n{}\n</read-files>", read_files.join("\n")));
    }
    if !modified_files.is_empty() {
        sections.push(format!(
            "<modified-files>\n{}\n</modified-files>",
            modified_files.join("\n")
        ));
    }
    if sections.is_empty() {
        String::new()
    } else {
        format!("\n\n{}", sections.join("\n\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
