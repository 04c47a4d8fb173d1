//! Per-thread state: the transcript and the variable store.

use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, Role};

use super::context::ContextStore;

/// Everything that survives between tasks on one conversation thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    /// Append-only transcript.
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub context: ContextStore,
}

impl ThreadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a task: the system prompt goes in first if the transcript does not
    /// open with one, then the task as a user message.
    pub fn begin_task(&mut self, system_prompt: &str, task: &str) {
        let has_system = matches!(self.messages.first(), Some(m) if m.role == Role::System);
        if !has_system {
            self.messages.insert(0, ChatMessage::system(system_prompt));
        }
        self.messages.push(ChatMessage::user(task));
    }
}
