//! Bounded conversation history for one issue-attempt.

use std::collections::VecDeque;

use crate::core::types::{Message, Role};

/// Ordered chat history with a dedicated system slot.
///
/// The system message is never part of the turn deque, so it is always first
/// and never pruned. Turns are capped at `max_pairs` user/assistant pairs; the
/// oldest turns fall off as new ones are pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    system: Option<String>,
    turns: VecDeque<Message>,
    max_pairs: usize,
}

impl Conversation {
    pub fn new(max_pairs: usize) -> Self {
        Self {
            system: None,
            turns: VecDeque::new(),
            max_pairs: max_pairs.max(1),
        }
    }

    pub fn with_system(system: impl Into<String>, max_pairs: usize) -> Self {
        let mut conversation = Self::new(max_pairs);
        conversation.set_system(system);
        conversation
    }

    pub fn set_system(&mut self, system: impl Into<String>) {
        let system = system.into();
        self.system = (!system.trim().is_empty()).then_some(system);
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    fn push(&mut self, message: Message) {
        self.turns.push_back(message);
        let cap = self.max_pairs * 2;
        while self.turns.len() > cap {
            self.turns.pop_front();
        }
        // A history must not open with a dangling assistant reply.
        while self
            .turns
            .front()
            .is_some_and(|m| m.role == Role::Assistant)
        {
            self.turns.pop_front();
        }
    }

    /// Drop all turns. With `keep_system = false` the system slot is cleared too.
    pub fn reset(&mut self, keep_system: bool) {
        self.turns.clear();
        if !keep_system {
            self.system = None;
        }
    }

    /// Full message list as sent to the model: system first, then turns.
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.turns.len() + 1);
        if let Some(system) = &self.system {
            out.push(Message::system(system.clone()));
        }
        out.extend(self.turns.iter().cloned());
        out
    }

    /// Rough token count (four characters per token).
    pub fn estimated_tokens(&self) -> u64 {
        let chars: usize = self.system.as_ref().map_or(0, String::len)
            + self.turns.iter().map(|m| m.content.len()).sum::<usize>();
        (chars / 4) as u64
    }
}

/// Rough token count for arbitrary text (four characters per token).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}
