//! Sandbox boundary.
//!
//! The control loop hands a script plus a flat [`ExecutionContext`] to a
//! [`Sandbox`] and gets back the printed output and the names the script
//! introduced. How the script actually runs (subprocess, restricted runtime,
//! remote service) is the implementation's business.
//!
//! Contract every implementation honours:
//! - the caller's context is borrowed immutably and never modified;
//! - everything the script prints is returned verbatim as `output`;
//! - failures of any kind come back as text in `output`, never as an error;
//! - `new_bindings` holds only names that were not already in the context and
//!   that do not start with an underscore.

mod python;

pub use python::{PythonSandbox, PythonSandboxConfig};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

/// Text returned when a script ran cleanly but printed nothing.
pub const NO_OUTPUT: &str = "<code ran, no output printed to stdout>";

/// One name visible to a script.
#[derive(Clone)]
pub enum Binding {
    /// A plain value, usually created by an earlier script.
    Value(Value),
    /// A callable tool.
    Tool(Arc<Tool>),
}

impl Binding {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Binding::Value(v) => Some(v),
            Binding::Tool(_) => None,
        }
    }

    pub fn as_tool(&self) -> Option<&Arc<Tool>> {
        match self {
            Binding::Tool(t) => Some(t),
            Binding::Value(_) => None,
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Binding::Tool(t) => f.debug_tuple("Tool").field(&t.name()).finish(),
        }
    }
}

/// Flat name → binding mapping handed to one execution.
pub type ExecutionContext = BTreeMap<String, Binding>;

/// What one script execution produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub output: String,
    pub new_bindings: BTreeMap<String, Value>,
}

impl ExecutionResult {
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            new_bindings: BTreeMap::new(),
        }
    }

    /// A failed execution: whatever was printed first, then the error line.
    pub fn failure(stdout: &str, error: impl fmt::Display) -> Self {
        Self::output(failure_output(stdout, error))
    }
}

/// Runs model-generated scripts.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(&self, script: &str, context: &ExecutionContext) -> ExecutionResult;
}

/// Output text for a script that ran without raising.
pub fn success_output(stdout: &str) -> String {
    if stdout.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        stdout.to_string()
    }
}

/// Output text for a script that failed, keeping anything printed before the failure.
pub fn failure_output(stdout: &str, error: impl fmt::Display) -> String {
    let mut output = String::with_capacity(stdout.len() + 64);
    output.push_str(stdout);
    if !stdout.is_empty() && !stdout.ends_with('\n') {
        output.push('\n');
    }
    output.push_str("Error during execution: ");
    output.push_str(&error.to_string());
    output
}

/// Keep only candidates that are new to `context` and not private.
pub fn diff_bindings(
    context: &ExecutionContext,
    candidates: impl IntoIterator<Item = (String, Value)>,
) -> BTreeMap<String, Value> {
    candidates
        .into_iter()
        .filter(|(name, _)| !name.starts_with('_') && !context.contains_key(name))
        .collect()
}

/// Cut `output` down to at most `max_chars` characters.
pub fn truncate_output(output: &mut String, max_chars: usize) {
    if let Some((idx, _)) = output.char_indices().nth(max_chars) {
        output.truncate(idx);
        output.push_str("\n... [output truncated]");
    }
}
