// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end scenarios for the turn engine.
//!
//! Every test drives the public `Agent` API against a `ScriptedStream`, so
//! each scenario is deterministic and needs no network access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use runa_config::{CompactionSettings, LoopConfig, ReasoningLevel};
use runa_model::{Message, ReasoningEffort, ScriptEvent, ScriptedStream, StopReason};
use runa_tools::{ProgressSink, Tool, ToolRegistry, ToolResult};

use crate::{Agent, AgentEvent, ContextTransform};

// ─── Helpers ─────────────────────────────────────────────────────────────────

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes the text argument"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn execute(
        &self,
        _call_id: &str,
        arguments: &Map<String, Value>,
        _cancel: &CancellationToken,
        _progress: &ProgressSink,
    ) -> anyhow::Result<ToolResult> {
        let text = arguments.get("text").and_then(|v| v.as_str()).unwrap_or("");
        Ok(ToolResult::text(text))
    }
}

struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "broken"
    }
    fn description(&self) -> &str {
        "always fails"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    async fn execute(
        &self,
        _call_id: &str,
        _arguments: &Map<String, Value>,
        _cancel: &CancellationToken,
        _progress: &ProgressSink,
    ) -> anyhow::Result<ToolResult> {
        anyhow::bail!("disk on fire")
    }
}

struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "writes content to path"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }
    async fn execute(
        &self,
        _call_id: &str,
        arguments: &Map<String, Value>,
        _cancel: &CancellationToken,
        _progress: &ProgressSink,
    ) -> anyhow::Result<ToolResult> {
        let path = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing 'path'"))?;
        let content = arguments
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        std::fs::write(path, content)?;
        Ok(ToolResult::text(format!("wrote {path}")))
    }
}

fn echo_registry() -> Arc<ToolRegistry> {
    let mut reg = ToolRegistry::new();
    reg.register(EchoTool);
    Arc::new(reg)
}

fn agent_with(provider: ScriptedStream, tools: Arc<ToolRegistry>) -> Agent {
    Agent::new(
        Arc::new(provider),
        tools,
        LoopConfig::new("mock/model"),
        128_000,
    )
}

/// Subscribe a recorder; every event lands in the returned vec.
fn record(agent: &Agent) -> Arc<Mutex<Vec<AgentEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    agent.subscribe(move |ev| sink.lock().unwrap().push(ev.clone()));
    events
}

fn kind(ev: &AgentEvent) -> &'static str {
    match ev {
        AgentEvent::AgentStart => "agent_start",
        AgentEvent::TurnStart => "turn_start",
        AgentEvent::MessageStart { .. } => "message_start",
        AgentEvent::MessageUpdate { .. } => "message_update",
        AgentEvent::MessageEnd { .. } => "message_end",
        AgentEvent::ToolExecutionStart { .. } => "tool_execution_start",
        AgentEvent::ToolExecutionUpdate { .. } => "tool_execution_update",
        AgentEvent::ToolExecutionEnd { .. } => "tool_execution_end",
        AgentEvent::TurnEnd { .. } => "turn_end",
        AgentEvent::CompactionStart => "compaction_start",
        AgentEvent::CompactionEnd { .. } => "compaction_end",
        AgentEvent::AgentEnd { .. } => "agent_end",
    }
}

fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(kind).collect()
}

/// Universal event-ordering invariants: `agent_start` first, `agent_end`
/// last, and exactly one assistant `message_end` between each
/// `turn_start`/`turn_end` pair.
fn assert_well_formed(events: &[AgentEvent]) {
    assert_eq!(kind(&events[0]), "agent_start");
    assert_eq!(kind(events.last().unwrap()), "agent_end");
    let mut in_turn = false;
    let mut assistant_ends = 0;
    for ev in events {
        match ev {
            AgentEvent::TurnStart => {
                assert!(!in_turn, "nested turn_start");
                in_turn = true;
                assistant_ends = 0;
            }
            AgentEvent::MessageEnd { message: Message::Assistant(_) } => {
                assert!(in_turn, "assistant message_end outside a turn");
                assistant_ends += 1;
            }
            AgentEvent::TurnEnd { .. } => {
                assert!(in_turn, "turn_end without turn_start");
                assert_eq!(assistant_ends, 1, "exactly one assistant message per turn");
                in_turn = false;
            }
            _ => {}
        }
    }
    assert!(!in_turn, "turn left open");
}

fn assistant_end_messages(events: &[AgentEvent]) -> Vec<runa_model::AssistantMessage> {
    events
        .iter()
        .filter_map(|ev| match ev {
            AgentEvent::MessageEnd { message: Message::Assistant(m) } => Some(m.clone()),
            _ => None,
        })
        .collect()
}

// ─── S1: single text turn ────────────────────────────────────────────────────

#[tokio::test]
async fn s1_single_text_turn() {
    let provider = ScriptedStream::new(vec![vec![
        ScriptEvent::TextDelta("Hel".into()),
        ScriptEvent::TextDelta("lo.".into()),
        ScriptEvent::Done(StopReason::Stop),
    ]]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    let events = record(&agent);

    agent.prompt("hi").await.unwrap();

    let events = events.lock().unwrap();
    assert_well_formed(&events);
    let ks = kinds(&events);
    assert_eq!(&ks[..4], &["agent_start", "turn_start", "message_start", "message_end"]);
    assert_eq!(ks[4], "message_start", "assistant stream opens after the prompt");
    assert!(ks[5..ks.len() - 3].iter().all(|k| *k == "message_update"));
    assert_eq!(&ks[ks.len() - 3..], &["message_end", "turn_end", "agent_end"]);
    assert!(!ks.contains(&"tool_execution_start"), "no tools in this run");

    let finals = assistant_end_messages(&events);
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].text(), "Hello.");
    assert_eq!(finals[0].stop_reason, StopReason::Stop);

    match events.last().unwrap() {
        AgentEvent::AgentEnd { new_messages } => {
            assert_eq!(new_messages.len(), 2, "user + assistant");
        }
        _ => unreachable!(),
    }

    assert_eq!(agent.messages().len(), 2);
    assert!(!agent.is_streaming());
    assert!(agent.state().error.is_none());
    assert!(agent.state().pending_tool_calls.is_empty());
}

#[tokio::test]
async fn s1_partial_snapshots_grow_monotonically() {
    let provider = ScriptedStream::new(vec![vec![
        ScriptEvent::TextDelta("a".into()),
        ScriptEvent::TextDelta("b".into()),
        ScriptEvent::TextDelta("c".into()),
        ScriptEvent::Done(StopReason::Stop),
    ]]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    let events = record(&agent);

    agent.prompt("go").await.unwrap();

    let mut prev = String::new();
    for ev in events.lock().unwrap().iter() {
        if let AgentEvent::MessageUpdate { message, .. } = ev {
            let now = message.text();
            assert!(now.starts_with(&prev), "{now:?} must extend {prev:?}");
            prev = now;
        }
    }
    assert_eq!(prev, "abc");
}

// ─── S2: one tool round-trip ─────────────────────────────────────────────────

#[tokio::test]
async fn s2_tool_round_trip() {
    let provider = ScriptedStream::tool_then_text("c1", "echo", json!({"text": "hi"}), "hi");
    let mut agent = agent_with(provider, echo_registry());
    let events = record(&agent);

    agent.prompt("please echo").await.unwrap();

    let events = events.lock().unwrap();
    assert_well_formed(&events);

    let ks = kinds(&events);
    let exec_start = ks.iter().position(|k| *k == "tool_execution_start").unwrap();
    let exec_end = ks.iter().position(|k| *k == "tool_execution_end").unwrap();
    let first_turn_end = ks.iter().position(|k| *k == "turn_end").unwrap();
    assert!(exec_start < exec_end && exec_end < first_turn_end);
    assert_eq!(ks.iter().filter(|k| **k == "turn_start").count(), 2);
    assert_eq!(ks.iter().filter(|k| **k == "turn_end").count(), 2);

    // The tool result is bracketed by message events and lands in history
    // before the second assistant message.
    let msgs = agent.messages();
    assert_eq!(msgs.len(), 4, "user, assistant(tool_use), tool_result, assistant");
    let tr = msgs[2].as_tool_result().expect("third message is the tool result");
    assert_eq!(tr.tool_call_id, "c1");
    assert_eq!(tr.tool_name, "echo");
    assert!(!tr.is_error);
    assert_eq!(tr.text(), "hi");

    let finals = assistant_end_messages(&events);
    assert_eq!(finals.len(), 2);
    assert_eq!(finals[0].stop_reason, StopReason::ToolUse);
    assert_eq!(finals[1].text(), "hi");
}

#[tokio::test]
async fn tool_call_result_pairing_holds_in_history() {
    // Two tool calls in one assistant message.
    let provider = ScriptedStream::new(vec![
        vec![
            ScriptEvent::ToolCall { id: "c1".into(), name: "echo".into(), arguments: json!({"text": "a"}) },
            ScriptEvent::ToolCall { id: "c2".into(), name: "echo".into(), arguments: json!({"text": "b"}) },
            ScriptEvent::Done(StopReason::ToolUse),
        ],
        ScriptedStream::text_script("done"),
    ]);
    let mut agent = agent_with(provider, echo_registry());

    agent.prompt("run both").await.unwrap();

    let msgs = agent.messages();
    let assistant_idx = msgs.iter().position(|m| m.is_assistant()).unwrap();
    let calls = msgs[assistant_idx].as_assistant().unwrap().tool_calls();
    assert_eq!(calls.len(), 2);
    for (offset, call) in calls.iter().enumerate() {
        let tr = msgs[assistant_idx + 1 + offset].as_tool_result().unwrap();
        assert_eq!(tr.tool_call_id, call.id, "results follow calls in order");
    }
}

// ─── S3: abort mid-stream ────────────────────────────────────────────────────

#[tokio::test]
async fn s3_abort_during_streaming() {
    let script: Vec<ScriptEvent> = (0..50)
        .map(|i| ScriptEvent::TextDelta(format!("chunk{i} ")))
        .chain([ScriptEvent::Done(StopReason::Stop)])
        .collect();
    let provider = ScriptedStream::new(vec![script]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    let events = record(&agent);

    let handle = agent.abort_handle();
    let fired = Arc::new(AtomicBool::new(false));
    let fired2 = Arc::clone(&fired);
    agent.subscribe(move |ev| {
        if matches!(ev, AgentEvent::MessageUpdate { .. }) && !fired2.swap(true, Ordering::SeqCst) {
            // Two aborts: tripping must be idempotent.
            handle.abort();
            handle.abort();
        }
    });

    agent.prompt("stream a lot").await.unwrap();

    let events = events.lock().unwrap();
    assert_well_formed(&events);

    let finals = assistant_end_messages(&events);
    assert_eq!(finals.len(), 1, "exactly one terminal assistant message");
    assert_eq!(finals[0].stop_reason, StopReason::Aborted);
    assert_eq!(finals[0].text(), "Aborted");

    // The abort fires on the first update; the engine may already have one
    // more event in flight, but no more than that.
    let updates = kinds(&events).iter().filter(|k| **k == "message_update").count();
    assert!(updates <= 2, "at most one further update after the abort, got {updates}");

    let ks = kinds(&events);
    assert!(!ks.contains(&"tool_execution_start"));
    assert_eq!(&ks[ks.len() - 2..], &["turn_end", "agent_end"]);
    assert!(!agent.is_streaming());
}

#[tokio::test]
async fn abort_before_tools_skips_them_without_execution_events() {
    // The assistant requests a tool, but the abort lands during streaming of
    // the tool-call turn; no tool may start afterwards.
    let provider = ScriptedStream::new(vec![vec![
        ScriptEvent::TextDelta("about to call".into()),
        ScriptEvent::ToolCall { id: "c1".into(), name: "echo".into(), arguments: json!({"text": "x"}) },
        ScriptEvent::Done(StopReason::ToolUse),
    ]]);
    let mut agent = agent_with(provider, echo_registry());
    let events = record(&agent);

    let handle = agent.abort_handle();
    let fired = Arc::new(AtomicBool::new(false));
    let fired2 = Arc::clone(&fired);
    agent.subscribe(move |ev| {
        if matches!(ev, AgentEvent::MessageUpdate { .. }) && !fired2.swap(true, Ordering::SeqCst) {
            handle.abort();
        }
    });

    agent.prompt("go").await.unwrap();

    let events = events.lock().unwrap();
    let finals = assistant_end_messages(&events);
    assert_eq!(finals.last().unwrap().stop_reason, StopReason::Aborted);
    assert!(
        !kinds(&events).contains(&"tool_execution_start"),
        "no tool may start after an abort"
    );
}

// ─── Provider errors and truncation ──────────────────────────────────────────

#[tokio::test]
async fn provider_error_becomes_terminal_assistant_message() {
    let provider = ScriptedStream::new(vec![vec![
        ScriptEvent::TextDelta("partial answer".into()),
        ScriptEvent::Error("overloaded".into()),
    ]]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    let events = record(&agent);

    // A provider error ends the run through the normal event path, not as a
    // caller-visible failure.
    agent.prompt("hi").await.unwrap();

    let events = events.lock().unwrap();
    assert_well_formed(&events);
    let finals = assistant_end_messages(&events);
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].stop_reason, StopReason::Error);
    assert_eq!(finals[0].error_message.as_deref(), Some("overloaded"));
    // The error payload supersedes the accumulated partial.
    assert_eq!(finals[0].text(), "overloaded");

    match events.last().unwrap() {
        AgentEvent::AgentEnd { new_messages } => assert_eq!(new_messages.len(), 2),
        _ => unreachable!(),
    }
    assert!(agent.state().error.is_none(), "provider errors are not run errors");
}

#[tokio::test]
async fn truncated_stream_synthesizes_aborted() {
    // No Done/Error: the stream just ends.
    let provider = ScriptedStream::new(vec![vec![ScriptEvent::TextDelta("cut off".into())]]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));

    agent.prompt("hi").await.unwrap();

    let last = agent.messages().last().unwrap().as_assistant().unwrap();
    assert_eq!(last.stop_reason, StopReason::Aborted);
    assert_eq!(last.text(), "Aborted");
}

// ─── S4: steering interrupt mid-tool-batch ───────────────────────────────────

#[tokio::test]
async fn s4_steering_interrupts_tool_batch() {
    let provider = ScriptedStream::new(vec![
        vec![
            ScriptEvent::ToolCall { id: "c1".into(), name: "echo".into(), arguments: json!({"text": "one"}) },
            ScriptEvent::ToolCall { id: "c2".into(), name: "echo".into(), arguments: json!({"text": "two"}) },
            ScriptEvent::ToolCall { id: "c3".into(), name: "echo".into(), arguments: json!({"text": "three"}) },
            ScriptEvent::Done(StopReason::ToolUse),
        ],
        ScriptedStream::text_script("stopped as asked"),
    ]);
    let mut agent = agent_with(provider, echo_registry());
    let events = record(&agent);

    let steering = agent.steering_queue();
    agent.subscribe(move |ev| {
        if let AgentEvent::ToolExecutionEnd { tool_call_id, .. } = ev {
            if tool_call_id == "c1" {
                steering.push(Message::user("stop"));
            }
        }
    });

    agent.prompt("run three tools").await.unwrap();

    let events = events.lock().unwrap();
    assert_well_formed(&events);

    // c1 executed normally; c2 and c3 were skipped but still got the full
    // event triple and an error-flagged result.
    let ends: Vec<(String, bool, String)> = events
        .iter()
        .filter_map(|ev| match ev {
            AgentEvent::ToolExecutionEnd { tool_call_id, is_error, result, .. } => {
                Some((tool_call_id.clone(), *is_error, result.joined_text()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(ends.len(), 3);
    assert_eq!(ends[0], ("c1".into(), false, "one".into()));
    assert_eq!(ends[1], ("c2".into(), true, "Skipped".into()));
    assert_eq!(ends[2], ("c3".into(), true, "Skipped".into()));

    // Every call still has its result before the next assistant message.
    let msgs = agent.messages();
    let tr_ids: Vec<&str> = msgs
        .iter()
        .filter_map(|m| m.as_tool_result().map(|tr| tr.tool_call_id.as_str()))
        .collect();
    assert_eq!(tr_ids, vec!["c1", "c2", "c3"]);

    // The steering message is discharged in a fresh turn before stream B.
    let steer_idx = msgs.iter().position(|m| m.text() == "stop").unwrap();
    assert!(msgs[steer_idx + 1..].iter().any(|m| m.is_assistant()));
    let finals = assistant_end_messages(&events);
    assert_eq!(finals.last().unwrap().text(), "stopped as asked");
}

#[tokio::test]
async fn steering_between_turns_starts_new_turn() {
    let provider = ScriptedStream::new(vec![
        ScriptedStream::text_script("first answer"),
        ScriptedStream::text_script("second answer"),
    ]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    let events = record(&agent);

    let steering = agent.steering_queue();
    let fired = Arc::new(AtomicBool::new(false));
    let fired2 = Arc::clone(&fired);
    agent.subscribe(move |ev| {
        if let AgentEvent::MessageEnd { message: Message::Assistant(_) } = ev {
            if !fired2.swap(true, Ordering::SeqCst) {
                steering.push(Message::user("and another thing"));
            }
        }
    });

    agent.prompt("hello").await.unwrap();

    let ks = kinds(&events.lock().unwrap());
    assert_eq!(ks.iter().filter(|k| **k == "turn_start").count(), 2);
    let finals = assistant_end_messages(&events.lock().unwrap());
    assert_eq!(finals.len(), 2);
    assert_eq!(agent.messages().len(), 4, "user, assistant, steer, assistant");
}

// ─── Follow-up queue ─────────────────────────────────────────────────────────

#[tokio::test]
async fn follow_up_drained_only_at_natural_stop() {
    let provider = ScriptedStream::new(vec![
        ScriptedStream::text_script("first"),
        ScriptedStream::text_script("second"),
    ]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    let events = record(&agent);

    agent.follow_up(Message::user("follow this up"));
    agent.prompt("start").await.unwrap();

    let events = events.lock().unwrap();
    assert_well_formed(&events);
    assert_eq!(kinds(&events).iter().filter(|k| **k == "turn_start").count(), 2);

    let msgs = agent.messages();
    assert_eq!(msgs.len(), 4);
    assert_eq!(msgs[2].text(), "follow this up");
    match events.last().unwrap() {
        AgentEvent::AgentEnd { new_messages } => assert_eq!(new_messages.len(), 4),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn follow_up_one_at_a_time_drains_one_per_stop() {
    let provider = ScriptedStream::new(vec![
        ScriptedStream::text_script("a1"),
        ScriptedStream::text_script("a2"),
        ScriptedStream::text_script("a3"),
    ]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));

    agent.follow_up(Message::user("f1"));
    agent.follow_up(Message::user("f2"));
    agent.prompt("start").await.unwrap();

    // Default mode drains one per natural stop, so both get their own turn
    // within the same run.
    assert_eq!(agent.messages().len(), 6);
    assert!(agent.follow_up_queue().is_empty());
}

// ─── S6 and tool failures ────────────────────────────────────────────────────

#[tokio::test]
async fn s6_tool_not_found_synthesizes_error_result() {
    let provider = ScriptedStream::new(vec![
        vec![
            ScriptEvent::ToolCall { id: "c1".into(), name: "nope".into(), arguments: json!({}) },
            ScriptEvent::Done(StopReason::ToolUse),
        ],
        ScriptedStream::text_script("recovered"),
    ]);
    let mut agent = agent_with(provider, echo_registry());
    let events = record(&agent);

    agent.prompt("call the wrong tool").await.unwrap();

    let events = events.lock().unwrap();
    let end = events
        .iter()
        .find_map(|ev| match ev {
            AgentEvent::ToolExecutionEnd { is_error, result, .. } => {
                Some((*is_error, result.joined_text()))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(end, (true, "Tool not found: nope".into()));

    let tr = agent.messages()[2].as_tool_result().unwrap();
    assert!(tr.is_error);
    assert_eq!(tr.text(), "Tool not found: nope");
    // The engine carries on normally.
    let finals = assistant_end_messages(&events);
    assert_eq!(finals.last().unwrap().text(), "recovered");
}

#[tokio::test]
async fn tool_failure_is_captured_not_fatal() {
    let provider = ScriptedStream::new(vec![
        vec![
            ScriptEvent::ToolCall { id: "c1".into(), name: "broken".into(), arguments: json!({}) },
            ScriptEvent::Done(StopReason::ToolUse),
        ],
        ScriptedStream::text_script("noted"),
    ]);
    let mut reg = ToolRegistry::new();
    reg.register(FailingTool);
    let mut agent = agent_with(provider, Arc::new(reg));

    agent.prompt("try it").await.unwrap();

    let tr = agent.messages()[2].as_tool_result().unwrap();
    assert!(tr.is_error);
    assert!(tr.text().contains("disk on fire"));
    assert!(agent.state().error.is_none());
}

#[tokio::test]
async fn file_tool_write_via_agent_turn() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    let args = json!({ "path": path.to_str().unwrap(), "content": "agent wrote this" });

    let provider = ScriptedStream::new(vec![
        vec![
            ScriptEvent::ToolCall { id: "w1".into(), name: "write_file".into(), arguments: args },
            ScriptEvent::Done(StopReason::ToolUse),
        ],
        ScriptedStream::text_script("file written"),
    ]);
    let mut reg = ToolRegistry::new();
    reg.register(WriteFileTool);
    let mut agent = agent_with(provider, Arc::new(reg));

    agent.prompt("write the file").await.unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "agent wrote this");
}

// ─── S5: compaction ──────────────────────────────────────────────────────────

fn sized_user(tokens: usize) -> Message {
    Message::user("x".repeat(tokens * 4))
}

#[tokio::test]
async fn s5_compaction_triggers_before_stream() {
    let provider = ScriptedStream::new(vec![
        ScriptedStream::text_script("## Goal\nSummarized."),
        ScriptedStream::text_script("fresh reply"),
    ]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    agent.set_context_window(1_000);
    agent.set_compaction(CompactionSettings {
        enabled: true,
        reserve_tokens: 100,
        keep_recent_tokens: 200,
    });

    // Pre-load ~950 estimated tokens.
    agent.append_message(sized_user(300)).unwrap();
    agent.append_message(sized_user(200)).unwrap();
    agent.append_message(sized_user(450)).unwrap();
    let kept_text = agent.messages()[2].text();

    let events = record(&agent);
    agent.prompt("continue").await.unwrap();

    let events = events.lock().unwrap();
    let ks = kinds(&events);
    let c_start = ks.iter().position(|k| *k == "compaction_start").unwrap();
    let c_end = ks.iter().position(|k| *k == "compaction_end").unwrap();
    // The assistant stream opens only after compaction finished.
    let assistant_start = events
        .iter()
        .position(|ev| {
            matches!(ev, AgentEvent::MessageStart { message: Message::Assistant(_) })
        })
        .unwrap();
    assert!(c_start < c_end && c_end < assistant_start);

    // The prefix is now one synthetic checkpoint message; the suffix is
    // preserved verbatim.
    let msgs = agent.messages();
    assert!(msgs[0].text().starts_with("[Context Checkpoint -"));
    assert!(msgs[0].text().contains("## Goal"));
    assert_eq!(msgs[1].text(), kept_text);

    // The request actually sent to the model used the compacted history.
    match events.iter().find(|e| matches!(e, AgentEvent::CompactionEnd { .. })) {
        Some(AgentEvent::CompactionEnd { tokens_before, summary }) => {
            assert!(*tokens_before > 900);
            assert!(summary.contains("Summarized"));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn compaction_below_threshold_is_a_noop() {
    let provider = ScriptedStream::new(vec![ScriptedStream::text_script("ok")]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    agent.set_context_window(1_000);
    agent.set_compaction(CompactionSettings {
        enabled: true,
        reserve_tokens: 100,
        keep_recent_tokens: 200,
    });
    agent.append_message(sized_user(500)).unwrap();

    let events = record(&agent);
    agent.prompt("hi").await.unwrap();

    assert!(!kinds(&events.lock().unwrap()).contains(&"compaction_start"));
}

#[tokio::test]
async fn summarization_failure_is_fatal_for_the_run() {
    let provider = ScriptedStream::new(vec![vec![ScriptEvent::Error("llm down".into())]]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    agent.set_context_window(1_000);
    agent.set_compaction(CompactionSettings {
        enabled: true,
        reserve_tokens: 100,
        keep_recent_tokens: 50,
    });
    agent.append_message(sized_user(300)).unwrap();
    agent.append_message(sized_user(650)).unwrap();

    let events = record(&agent);
    let result = agent.prompt("go").await;

    assert!(result.is_err());
    assert!(agent.state().error.as_deref().unwrap().contains("llm down"));
    // agent_end is still emitted before the error surfaces.
    assert_eq!(kind(events.lock().unwrap().last().unwrap()), "agent_end");
    assert!(!agent.is_streaming());
}

// ─── Request shaping ─────────────────────────────────────────────────────────

#[tokio::test]
async fn request_carries_reasoning_tools_and_session() {
    let provider = ScriptedStream::new(vec![ScriptedStream::text_script("ok")]);
    let requests = Arc::clone(&provider.requests);
    let mut config = LoopConfig::new("openai/gpt-5.2");
    config.reasoning_level = ReasoningLevel::XHigh;
    config.session_id = Some("sess-1".into());
    let mut agent = Agent::new(Arc::new(provider), echo_registry(), config, 128_000);
    agent.set_system_prompt("You are terse.");

    agent.prompt("hello").await.unwrap();

    let reqs = requests.lock().unwrap();
    assert_eq!(reqs.len(), 1);
    let req = &reqs[0];
    assert!(req.stream);
    assert_eq!(req.system_prompt, "You are terse.");
    assert_eq!(req.options.reasoning_effort, Some(ReasoningEffort::XHigh));
    assert_eq!(req.options.session_id.as_deref(), Some("sess-1"));
    assert_eq!(req.tools.len(), 1);
    assert_eq!(req.tools[0].name, "echo");
}

#[tokio::test]
async fn custom_messages_never_reach_the_provider() {
    let provider = ScriptedStream::new(vec![ScriptedStream::text_script("ok")]);
    let requests = Arc::clone(&provider.requests);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    agent.append_message(Message::custom("marker", "internal state")).unwrap();

    agent.prompt("hi").await.unwrap();

    let reqs = requests.lock().unwrap();
    assert!(reqs[0].messages.iter().all(|m| m.role() != "custom"));
    // But it stays in the agent's own history.
    assert!(agent.messages().iter().any(|m| m.role() == "custom"));
}

struct KeepLastTransform;

#[async_trait]
impl ContextTransform for KeepLastTransform {
    async fn transform(
        &self,
        messages: Vec<Message>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Message>> {
        let n = messages.len();
        Ok(messages.into_iter().skip(n.saturating_sub(1)).collect())
    }
}

#[tokio::test]
async fn context_transform_applies_per_request_only() {
    let provider = ScriptedStream::new(vec![ScriptedStream::text_script("ok")]);
    let requests = Arc::clone(&provider.requests);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    agent.set_transform(Some(Arc::new(KeepLastTransform)));
    agent.append_message(Message::user("old one")).unwrap();
    agent.append_message(Message::user("old two")).unwrap();

    agent.prompt("newest").await.unwrap();

    let reqs = requests.lock().unwrap();
    assert_eq!(reqs[0].messages.len(), 1, "transform pruned the request");
    assert_eq!(reqs[0].messages[0].text(), "newest");
    assert_eq!(agent.messages().len(), 4, "history itself is untouched");
}

// ─── Tool runner edge: empty batch ───────────────────────────────────────────

#[tokio::test]
async fn empty_tool_batch_is_a_noop() {
    use runa_model::AssistantMessage;

    let assistant = AssistantMessage {
        content: vec![],
        stop_reason: StopReason::Stop,
        usage: None,
        error_message: None,
    };
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    let queue = crate::MessageQueue::default();
    let outcome = crate::runner::run_tool_batch(
        &assistant,
        &ToolRegistry::default(),
        &queue,
        &CancellationToken::new(),
        &tx,
    )
    .await;
    drop(tx);

    assert!(outcome.results.is_empty());
    assert!(outcome.steering.is_none());
    assert!(rx.recv().await.is_none(), "no events for an empty batch");
}

// ─── Progress updates ────────────────────────────────────────────────────────

struct ChattyTool;

#[async_trait]
impl Tool for ChattyTool {
    fn name(&self) -> &str {
        "chatty"
    }
    fn description(&self) -> &str {
        "reports progress twice"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    async fn execute(
        &self,
        _call_id: &str,
        _arguments: &Map<String, Value>,
        _cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> anyhow::Result<ToolResult> {
        progress.update(ToolResult::text("halfway"));
        progress.update(ToolResult::text("almost"));
        Ok(ToolResult::text("done"))
    }
}

#[tokio::test]
async fn tool_progress_surfaces_as_update_events() {
    let provider = ScriptedStream::new(vec![
        vec![
            ScriptEvent::ToolCall { id: "c1".into(), name: "chatty".into(), arguments: json!({}) },
            ScriptEvent::Done(StopReason::ToolUse),
        ],
        ScriptedStream::text_script("ok"),
    ]);
    let mut reg = ToolRegistry::new();
    reg.register(ChattyTool);
    let mut agent = agent_with(provider, Arc::new(reg));
    let events = record(&agent);

    agent.prompt("report progress").await.unwrap();

    let updates: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|ev| match ev {
            AgentEvent::ToolExecutionUpdate { partial, .. } => Some(partial.joined_text()),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec!["halfway", "almost"]);
}

// ─── Continue ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn continue_reenters_without_new_prompts() {
    let provider = ScriptedStream::new(vec![ScriptedStream::text_script("picked up")]);
    let mut agent = agent_with(provider, Arc::new(ToolRegistry::default()));
    agent.append_message(Message::user("left over")).unwrap();

    let events = record(&agent);
    agent.continue_run().await.unwrap();

    let events = events.lock().unwrap();
    assert_well_formed(&events);
    // No prompt message events before the assistant stream.
    assert_eq!(kinds(&events)[..2], ["agent_start", "turn_start"]);
    assert!(matches!(
        &events[2],
        AgentEvent::MessageStart { message: Message::Assistant(_) }
    ));
    assert_eq!(agent.messages().len(), 2);
}
