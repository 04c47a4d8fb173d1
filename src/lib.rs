//! # CodeAct
//!
//! An agent that acts by writing code instead of emitting structured tool
//! calls.
//!
//! This library provides:
//! - A tool registry that turns plain async functions into script-callable tools
//! - A control loop that alternates between the model and a script sandbox
//! - A Python subprocess sandbox with tools bridged back into Rust
//! - Thread checkpointing so a conversation and its variables survive across tasks
//!
//! ## Architecture
//!
//! Each task runs as a loop:
//! 1. The system prompt lists every tool as a Python declaration
//! 2. The model replies with either a fenced script or plain text
//! 3. A script runs with the tools and earlier variables in scope; whatever it
//!    prints goes back to the model
//! 4. Plain text is the final answer
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use codeact::{agent::{AgentOptions, CodeActAgent}, llm::OpenRouterClient};
//! use codeact::sandbox::PythonSandbox;
//! use codeact::tools::{builtin_tools, ToolRegistry};
//!
//! let agent = CodeActAgent::new(
//!     Arc::new(OpenRouterClient::new(api_key)),
//!     Arc::new(PythonSandbox::default()),
//!     ToolRegistry::from_specs(builtin_tools())?,
//!     AgentOptions::new("anthropic/claude-sonnet-4.5"),
//! );
//! let (outcome, state) = agent.run_task("What is sqrt(2) * 10?", None).await?;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod sandbox;
pub mod store;
pub mod tools;

pub use config::Config;
