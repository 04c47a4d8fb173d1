//! Task results and the per-task execution log.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::llm::TokenUsage;

/// Outcome of one control-loop step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A script ran and its output was appended; ask the model again.
    Continue {
        script: String,
        output: String,
        usage: Option<TokenUsage>,
    },
    /// The model replied without a script. This is the final answer.
    Done {
        answer: String,
        usage: Option<TokenUsage>,
    },
}

/// Result of running one task to completion.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    /// Final assistant text.
    pub answer: String,
    /// Model invocations spent on this task.
    pub turns: usize,
    /// Summed token usage, if the provider reported any.
    pub usage: Option<TokenUsage>,
    pub log: Vec<TaskLogEntry>,
}

/// A single entry in the task execution log.
#[derive(Debug, Clone, Serialize)]
pub struct TaskLogEntry {
    pub timestamp: DateTime<Utc>,
    pub entry_type: LogEntryType,
    pub content: String,
}

impl TaskLogEntry {
    pub fn now(entry_type: LogEntryType, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            entry_type,
            content: content.into(),
        }
    }
}

/// Types of log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntryType {
    /// Script extracted from a model reply
    Script,
    /// Sandbox output fed back to the model
    Output,
    /// Final answer
    Response,
}

pub(crate) fn add_usage(total: Option<TokenUsage>, turn: Option<TokenUsage>) -> Option<TokenUsage> {
    match (total, turn) {
        (Some(a), Some(b)) => Some(a.add(&b)),
        (a, b) => a.or(b),
    }
}

/// Truncate a string for the execution log.
pub(crate) fn truncate_for_log(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
        None => s.to_string(),
    }
}
