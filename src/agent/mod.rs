//! Agent module - the CodeAct control loop.
//!
//! The agent acts by writing code:
//! 1. Build the system prompt from the registered tools
//! 2. Call the LLM with the whole thread transcript
//! 3. If the reply contains a fenced script, run it with the tools and the
//!    thread's variables in scope and feed the printed output back
//! 4. Repeat until the LLM replies with plain text

mod agent_loop;
mod context;
mod interpreter;
mod prompt;
mod state;
mod types;

pub use agent_loop::{AgentError, AgentOptions, CodeActAgent};
pub use context::ContextStore;
pub use interpreter::{
    extract_all_blocks, extract_first_block, extract_script, ExtractionPolicy, FENCE,
};
pub use prompt::{build_system_prompt, render_tool};
pub use state::ThreadState;
pub use types::{LogEntryType, Step, TaskLogEntry, TaskOutcome};
