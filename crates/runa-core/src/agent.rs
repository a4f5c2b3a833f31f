// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use runa_config::{CompactionSettings, DrainMode, LoopConfig, ReasoningLevel};
use runa_model::{AssistantMessage, LlmStream, Message, UserContent};
use runa_tools::ToolRegistry;

use crate::compaction::CompactorState;
use crate::engine::{run_loop, RunParams};
use crate::error::AgentError;
use crate::events::AgentEvent;
use crate::queue::{MessageQueue, MessageSource};
use crate::transform::ContextTransform;

pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerSet {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener)>,
}

/// Ephemeral agent state.  Mutated only by the run driver and the explicit
/// caller APIs; observers receive events, never references into this.
#[derive(Debug, Default)]
pub struct AgentState {
    pub messages: Vec<Message>,
    pub is_streaming: bool,
    /// The in-progress assistant message while a stream is open.
    pub stream_message: Option<AssistantMessage>,
    /// Ids of tool calls currently awaiting a result.
    pub pending_tool_calls: HashSet<String>,
    /// Stringified fatal error from the last run, if any.
    pub error: Option<String>,
}

/// Cheap handle for tripping the current run's cancel token from another
/// task (or from an event observer).  Safe to call when idle; tripping is
/// idempotent and a fresh token is created per run.
#[derive(Clone)]
pub struct AbortHandle {
    cancel: Arc<Mutex<CancellationToken>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.cancel.lock().unwrap().cancel();
    }
}

/// The agent: owns the conversation, drives runs, fans events out to
/// subscribers, and carries the steering/follow-up queues.
///
/// Single-flight: at most one run is active at a time.  While a run is
/// active the message list belongs to the engine — the queues are the only
/// mutable surface.
pub struct Agent {
    provider: Arc<dyn LlmStream>,
    tools: Arc<ToolRegistry>,
    config: LoopConfig,
    compaction: CompactionSettings,
    context_window: usize,
    system_prompt: String,
    state: AgentState,
    compactor: Arc<Mutex<CompactorState>>,
    transform: Option<Arc<dyn ContextTransform>>,
    steering: Arc<MessageQueue>,
    follow_up: Arc<MessageQueue>,
    cancel: Arc<Mutex<CancellationToken>>,
    listeners: Arc<Mutex<ListenerSet>>,
}

impl Agent {
    /// Construct an agent.  `context_window` is the model's window in
    /// tokens; the compaction threshold is derived from it and the settings.
    pub fn new(
        provider: Arc<dyn LlmStream>,
        tools: Arc<ToolRegistry>,
        config: LoopConfig,
        context_window: usize,
    ) -> Self {
        Self {
            provider,
            tools,
            config,
            compaction: CompactionSettings::default(),
            context_window,
            system_prompt: String::new(),
            state: AgentState::default(),
            compactor: Arc::new(Mutex::new(CompactorState::default())),
            transform: None,
            steering: Arc::new(MessageQueue::new(DrainMode::OneAtATime)),
            follow_up: Arc::new(MessageQueue::new(DrainMode::OneAtATime)),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            listeners: Arc::new(Mutex::new(ListenerSet::default())),
        }
    }

    // ── State accessors ───────────────────────────────────────────────────────

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    // ── State mutators ────────────────────────────────────────────────────────

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.config.model_id = model_id.into();
    }

    pub fn set_reasoning_level(&mut self, level: ReasoningLevel) {
        self.config.reasoning_level = level;
    }

    pub fn set_tools(&mut self, tools: Arc<ToolRegistry>) {
        self.tools = tools;
    }

    pub fn set_compaction(&mut self, settings: CompactionSettings) {
        self.compaction = settings;
    }

    pub fn set_context_window(&mut self, tokens: usize) {
        self.context_window = tokens;
    }

    pub fn set_transform(&mut self, transform: Option<Arc<dyn ContextTransform>>) {
        self.transform = transform;
    }

    pub fn set_steering_mode(&self, mode: DrainMode) {
        self.steering.set_mode(mode);
    }

    pub fn set_follow_up_mode(&self, mode: DrainMode) {
        self.follow_up.set_mode(mode);
    }

    /// Replace the conversation.  Forbidden while a run is active; resets
    /// the compaction checkpoint because it described the old history.
    pub fn replace_messages(&mut self, messages: Vec<Message>) -> Result<(), AgentError> {
        if self.state.is_streaming {
            return Err(AgentError::MutationWhileStreaming);
        }
        self.state.messages = messages;
        self.compactor.lock().unwrap().previous = None;
        Ok(())
    }

    pub fn append_message(&mut self, message: Message) -> Result<(), AgentError> {
        if self.state.is_streaming {
            return Err(AgentError::MutationWhileStreaming);
        }
        self.state.messages.push(message);
        Ok(())
    }

    pub fn clear_messages(&mut self) -> Result<(), AgentError> {
        self.replace_messages(Vec::new())
    }

    /// Reset everything: conversation, stream state, error, and both queues.
    pub fn reset(&mut self) {
        self.state = AgentState::default();
        self.compactor.lock().unwrap().previous = None;
        self.clear_queues();
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Subscribe to run events.  The callback runs synchronously at the
    /// emission site and must not block; it may push to the queues but must
    /// not re-enter `prompt`/`continue_run`.
    pub fn subscribe(
        &self,
        listener: impl Fn(&AgentEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut set = self.listeners.lock().unwrap();
        let id = set.next_id;
        set.next_id += 1;
        set.entries.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().unwrap().entries.retain(|(i, _)| *i != id);
    }

    // ── Queues ────────────────────────────────────────────────────────────────

    /// Queue a message for injection mid-run (between tool calls or turns).
    pub fn steer(&self, message: Message) {
        self.steering.push(message);
    }

    /// Queue a message for after the run would otherwise finish.
    pub fn follow_up(&self, message: Message) {
        self.follow_up.push(message);
    }

    pub fn clear_queues(&self) {
        self.steering.clear();
        self.follow_up.clear();
    }

    /// Shared handle to the steering queue, for pushing from other tasks or
    /// event observers.
    pub fn steering_queue(&self) -> Arc<MessageQueue> {
        Arc::clone(&self.steering)
    }

    /// Shared handle to the follow-up queue.
    pub fn follow_up_queue(&self) -> Arc<MessageQueue> {
        Arc::clone(&self.follow_up)
    }

    // ── Control ───────────────────────────────────────────────────────────────

    /// Trip the current run's cancel token.  Safe when idle; idempotent.
    pub fn abort(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            cancel: Arc::clone(&self.cancel),
        }
    }

    // ── Prompt ────────────────────────────────────────────────────────────────

    /// Send a text prompt and run to completion.
    pub async fn prompt(&mut self, text: impl Into<String>) -> Result<(), AgentError> {
        self.prompt_messages(vec![Message::user(text)]).await
    }

    /// Send a text prompt with attached images.
    pub async fn prompt_with_images(
        &mut self,
        text: impl Into<String>,
        images: Vec<UserContent>,
    ) -> Result<(), AgentError> {
        self.prompt_messages(vec![Message::user_with_images(text, images)]).await
    }

    /// Send pre-built prompt messages and run to completion.
    pub async fn prompt_messages(&mut self, messages: Vec<Message>) -> Result<(), AgentError> {
        if self.state.is_streaming {
            return Err(AgentError::AlreadyStreaming);
        }
        self.run(messages).await
    }

    /// Re-enter the loop on the existing context, without new prompts.
    /// Used to retry after an overflow or a provider error.
    pub async fn continue_run(&mut self) -> Result<(), AgentError> {
        if self.state.is_streaming {
            return Err(AgentError::AlreadyStreaming);
        }
        if self.state.messages.is_empty() {
            return Err(AgentError::NoMessages);
        }
        if matches!(self.state.messages.last(), Some(Message::Assistant(_))) {
            return Err(AgentError::ContinueFromAssistant);
        }
        self.run(Vec::new()).await
    }

    async fn run(&mut self, prompts: Vec<Message>) -> Result<(), AgentError> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = cancel.clone();
        self.state.is_streaming = true;
        self.state.stream_message = None;
        self.state.error = None;

        let params = RunParams {
            system_prompt: self.system_prompt.clone(),
            messages: self.state.messages.clone(),
            prompts,
            provider: Arc::clone(&self.provider),
            tools: Arc::clone(&self.tools),
            config: self.config.clone(),
            settings: self.compaction,
            context_window: self.context_window,
            compactor: Arc::clone(&self.compactor),
            transform: self.transform.clone(),
            steering: Arc::clone(&self.steering) as Arc<dyn MessageSource>,
            follow_up: Arc::clone(&self.follow_up) as Arc<dyn MessageSource>,
            cancel,
        };

        // Capacity-1 channel keeps observers in lockstep with the engine:
        // the loop cannot run more than one event ahead of dispatch, so an
        // abort issued from a callback lands at the next suspension point.
        let (tx, mut rx) = mpsc::channel(1);
        let fut = run_loop(params, tx);
        tokio::pin!(fut);

        let mut outcome: Option<anyhow::Result<Vec<Message>>> = None;
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
                result = &mut fut, if outcome.is_none() => outcome = Some(result),
            }
        }

        self.state.is_streaming = false;
        self.state.stream_message = None;
        self.state.pending_tool_calls.clear();

        match outcome {
            Some(Ok(final_messages)) => {
                // The engine's list is authoritative: it includes compaction
                // splices that observers only saw as events.
                self.state.messages = final_messages;
                Ok(())
            }
            Some(Err(e)) => {
                self.state.error = Some(format!("{e:#}"));
                self.dispatch(AgentEvent::AgentEnd { new_messages: vec![] });
                Err(AgentError::Internal(e))
            }
            // The channel only closes after the loop future completes.
            None => Ok(()),
        }
    }

    fn dispatch(&mut self, event: AgentEvent) {
        self.apply_state(&event);
        let listeners: Vec<Listener> = {
            let set = self.listeners.lock().unwrap();
            set.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            (listener.as_ref())(&event);
        }
    }

    fn apply_state(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::MessageStart { message: Message::Assistant(m) } => {
                self.state.stream_message = Some(m.clone());
            }
            AgentEvent::MessageUpdate { message, .. } => {
                self.state.stream_message = Some(message.clone());
            }
            AgentEvent::MessageEnd { message } => {
                self.state.stream_message = None;
                self.state.messages.push(message.clone());
            }
            AgentEvent::ToolExecutionStart { tool_call_id, .. } => {
                self.state.pending_tool_calls.insert(tool_call_id.clone());
            }
            AgentEvent::ToolExecutionEnd { tool_call_id, .. } => {
                self.state.pending_tool_calls.remove(tool_call_id);
            }
            AgentEvent::AgentEnd { .. } => {
                self.state.is_streaming = false;
            }
            _ => {}
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
