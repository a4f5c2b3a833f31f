// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use runa_config::DrainMode;
use runa_model::Message;

/// A source of user messages injected into a running loop.
///
/// The engine polls steering sources between tool calls and after each turn,
/// and follow-up sources only when the loop would otherwise terminate.  An
/// empty return means "nothing to inject".
pub trait MessageSource: Send + Sync {
    fn poll(&self) -> Vec<Message>;
}

/// The standard [`MessageSource`]: a FIFO queue with a configurable
/// discharge policy.
///
/// This is the only externally mutable surface during a run — callers may
/// `push` from any task while the engine is streaming; the engine alone
/// drains.
#[derive(Debug, Default)]
pub struct MessageQueue {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<Message>,
    mode: DrainMode,
}

impl MessageQueue {
    pub fn new(mode: DrainMode) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                mode,
            }),
        }
    }

    pub fn push(&self, message: Message) {
        self.inner.lock().unwrap().queue.push_back(message);
    }

    pub fn set_mode(&self, mode: DrainMode) {
        self.inner.lock().unwrap().mode = mode;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().queue.clear();
    }
}

impl MessageSource for MessageQueue {
    fn poll(&self) -> Vec<Message> {
        let mut inner = self.inner.lock().unwrap();
        match inner.mode {
            DrainMode::OneAtATime => inner.queue.pop_front().into_iter().collect(),
            DrainMode::All => inner.queue.drain(..).collect(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(msgs: &[Message]) -> Vec<String> {
        msgs.iter().map(|m| m.text()).collect()
    }

    #[test]
    fn one_at_a_time_returns_oldest_only() {
        let q = MessageQueue::new(DrainMode::OneAtATime);
        q.push(Message::user("first"));
        q.push(Message::user("second"));

        assert_eq!(texts(&q.poll()), vec!["first"]);
        assert_eq!(q.len(), 1);
        assert_eq!(texts(&q.poll()), vec!["second"]);
        assert!(q.poll().is_empty());
    }

    #[test]
    fn all_mode_drains_in_enqueue_order() {
        let q = MessageQueue::new(DrainMode::All);
        q.push(Message::user("a"));
        q.push(Message::user("b"));
        q.push(Message::user("c"));

        assert_eq!(texts(&q.poll()), vec!["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn empty_queue_polls_empty() {
        let q = MessageQueue::default();
        assert!(q.poll().is_empty());
    }

    #[test]
    fn clear_discards_pending_messages() {
        let q = MessageQueue::new(DrainMode::All);
        q.push(Message::user("x"));
        q.clear();
        assert!(q.poll().is_empty());
    }

    #[test]
    fn mode_change_applies_to_next_poll() {
        let q = MessageQueue::new(DrainMode::OneAtATime);
        q.push(Message::user("a"));
        q.push(Message::user("b"));
        q.set_mode(DrainMode::All);
        assert_eq!(q.poll().len(), 2);
    }
}
