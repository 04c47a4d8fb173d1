//! Core agent loop implementation.
//!
//! One task alternates between asking the model what to do and running the
//! script it wrote:
//! 1. Seed the transcript with the system prompt (once) and the task
//! 2. Call the model with the full transcript
//! 3. If the reply holds a fenced script, run it in the sandbox, feed the
//!    output back as a user message and merge new variables into the store
//! 4. Otherwise the reply is the final answer
//!
//! A turn commits all of its mutations together or none of them, so a
//! cancelled or failed turn leaves the thread exactly as it was.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::llm::{ChatMessage, LlmClient, LlmError};
use crate::sandbox::Sandbox;
use crate::tools::ToolRegistry;

use super::interpreter::{extract_script, ExtractionPolicy};
use super::prompt::build_system_prompt;
use super::state::ThreadState;
use super::types::{add_usage, truncate_for_log, LogEntryType, Step, TaskLogEntry, TaskOutcome};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model invocation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("turn cancelled")]
    Cancelled,

    #[error("turn limit ({0}) reached without a final answer")]
    TurnLimit(usize),
}

/// Per-agent settings.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Model identifier passed to the LLM client.
    pub model: String,
    /// Prepended to the generated system prompt.
    pub base_instructions: Option<String>,
    /// Replaces the generated system prompt entirely.
    pub prompt: Option<String>,
    pub extraction: ExtractionPolicy,
    /// `None` means no limit.
    pub max_turns: Option<usize>,
}

impl AgentOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_instructions: None,
            prompt: None,
            extraction: ExtractionPolicy::FirstBlock,
            max_turns: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.default_model.clone(),
            base_instructions: config.base_instructions.clone(),
            prompt: None,
            extraction: if config.combine_blocks {
                ExtractionPolicy::CombineAll
            } else {
                ExtractionPolicy::FirstBlock
            },
            max_turns: config.max_turns,
        }
    }
}

/// The CodeAct agent: a model that acts by writing scripts.
pub struct CodeActAgent {
    llm: Arc<dyn LlmClient>,
    sandbox: Arc<dyn Sandbox>,
    tools: ToolRegistry,
    system_prompt: String,
    options: AgentOptions,
}

impl CodeActAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sandbox: Arc<dyn Sandbox>,
        tools: ToolRegistry,
        options: AgentOptions,
    ) -> Self {
        let system_prompt = match &options.prompt {
            Some(prompt) => prompt.clone(),
            None => build_system_prompt(options.base_instructions.as_deref(), tools.list_tools()),
        };

        Self {
            llm,
            sandbox,
            tools,
            system_prompt,
            options,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Run exactly one turn against `state`.
    ///
    /// On error `state` is untouched.
    pub async fn step(
        &self,
        state: &mut ThreadState,
        cancel: &CancellationToken,
    ) -> Result<Step, AgentError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            response = self.llm.chat_completion(&self.options.model, &state.messages) => response?,
        };

        let Some(script) = extract_script(&response.content, self.options.extraction) else {
            state
                .messages
                .push(ChatMessage::assistant(response.content.clone()));
            return Ok(Step::Done {
                answer: response.content,
                usage: response.usage,
            });
        };

        tracing::debug!("Executing script ({} bytes)", script.len());
        let context = state.context.execution_context(&self.tools);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = self.sandbox.execute(&script, &context) => result,
        };

        state.messages.push(ChatMessage::assistant(response.content));
        state.messages.push(ChatMessage::user(result.output.clone()));
        let shadowed = state.context.merge(result.new_bindings, &self.tools);
        if !shadowed.is_empty() {
            tracing::debug!("Dropped bindings that shadow tools: {:?}", shadowed);
        }

        Ok(Step::Continue {
            script,
            output: result.output,
            usage: response.usage,
        })
    }

    /// Run `task` on an existing thread until the model gives a final answer.
    ///
    /// Completed turns stay in `state` even when a later turn fails.
    pub async fn run(
        &self,
        state: &mut ThreadState,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, AgentError> {
        state.begin_task(&self.system_prompt, task);
        tracing::info!(
            "Starting task with model {} ({} messages, {} variables)",
            self.options.model,
            state.messages.len(),
            state.context.len()
        );

        let mut log = Vec::new();
        let mut usage = None;
        let mut turns = 0;

        loop {
            if let Some(max) = self.options.max_turns {
                if turns >= max {
                    tracing::warn!("Turn limit ({}) reached", max);
                    return Err(AgentError::TurnLimit(max));
                }
            }
            turns += 1;
            tracing::debug!("CodeAct turn {}", turns);

            match self.step(state, cancel).await? {
                Step::Continue {
                    script,
                    output,
                    usage: turn_usage,
                } => {
                    usage = add_usage(usage, turn_usage);
                    log.push(TaskLogEntry::now(LogEntryType::Script, script));
                    log.push(TaskLogEntry::now(
                        LogEntryType::Output,
                        truncate_for_log(&output, 1000),
                    ));
                }
                Step::Done {
                    answer,
                    usage: turn_usage,
                } => {
                    usage = add_usage(usage, turn_usage);
                    log.push(TaskLogEntry::now(
                        LogEntryType::Response,
                        truncate_for_log(&answer, 2000),
                    ));
                    tracing::info!("Task finished after {} turn(s)", turns);
                    return Ok(TaskOutcome {
                        answer,
                        turns,
                        usage,
                        log,
                    });
                }
            }
        }
    }

    /// State-passing form of [`run`](Self::run): the previous thread state
    /// goes in, the updated one comes out next to the outcome.
    pub async fn run_task(
        &self,
        task: &str,
        previous: Option<ThreadState>,
    ) -> Result<(TaskOutcome, ThreadState), AgentError> {
        let mut state = previous.unwrap_or_default();
        let outcome = self
            .run(&mut state, task, &CancellationToken::new())
            .await?;
        Ok((outcome, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::llm::{ChatResponse, Role, TokenUsage};
    use crate::sandbox::{
        Binding, ExecutionContext, ExecutionResult, PythonSandbox, PythonSandboxConfig, NO_OUTPUT,
    };
    use crate::tools::{builtin_tools, StructuredTool};

    /// Replays canned replies and records every transcript it was shown.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn texts(replies: &[&str]) -> Arc<Self> {
            Self::new(
                replies
                    .iter()
                    .map(|r| Ok(ChatResponse::text(*r)))
                    .collect(),
            )
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
        ) -> Result<ChatResponse, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ChatResponse::text("out of replies")))
        }
    }

    /// Snapshot of what the sandbox was handed.
    #[derive(Debug)]
    struct Execution {
        script: String,
        values: BTreeMap<String, Value>,
        tools: Vec<String>,
    }

    struct ScriptedSandbox {
        results: Mutex<VecDeque<ExecutionResult>>,
        seen: Mutex<Vec<Execution>>,
    }

    impl ScriptedSandbox {
        fn new(results: Vec<ExecutionResult>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        async fn execute(&self, script: &str, context: &ExecutionContext) -> ExecutionResult {
            let mut values = BTreeMap::new();
            let mut tools = Vec::new();
            for (name, binding) in context {
                match binding {
                    Binding::Value(v) => {
                        values.insert(name.clone(), v.clone());
                    }
                    Binding::Tool(_) => tools.push(name.clone()),
                }
            }
            self.seen.lock().unwrap().push(Execution {
                script: script.to_string(),
                values,
                tools,
            });
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ExecutionResult::output(NO_OUTPUT))
        }
    }

    /// Cancels the token from inside the sandbox and never finishes.
    struct HangingSandbox {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Sandbox for HangingSandbox {
        async fn execute(&self, _script: &str, _context: &ExecutionContext) -> ExecutionResult {
            self.cancel.cancel();
            futures::future::pending().await
        }
    }

    async fn add(args: Value) -> anyhow::Result<Value> {
        let a = args["a"].as_f64().unwrap_or_default();
        let b = args["b"].as_f64().unwrap_or_default();
        Ok(json!(a + b))
    }

    fn add_registry() -> ToolRegistry {
        ToolRegistry::from_specs([StructuredTool::new("add", add)
            .with_description("Add two numbers together.")
            .with_param("a", "float")
            .with_param("b", "float")
            .with_returns("float")
            .into()])
        .unwrap()
    }

    fn agent(llm: Arc<dyn LlmClient>, sandbox: Arc<dyn Sandbox>) -> CodeActAgent {
        CodeActAgent::new(llm, sandbox, add_registry(), AgentOptions::new("test-model"))
    }

    fn bindings(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn direct_answer_without_code() {
        let llm = ScriptedLlm::texts(&["The answer is 4"]);
        let sandbox = ScriptedSandbox::new(vec![]);
        let agent = agent(llm.clone(), sandbox.clone());

        let (outcome, state) = agent.run_task("What is 2+2?", None).await.unwrap();

        assert_eq!(outcome.answer, "The answer is 4");
        assert_eq!(outcome.turns, 1);
        assert_eq!(llm.calls(), 1);
        assert!(sandbox.seen.lock().unwrap().is_empty());
        assert!(state.context.is_empty());

        let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(state.messages[0].content, agent.system_prompt());
        assert_eq!(state.messages[1].content, "What is 2+2?");
    }

    #[tokio::test]
    async fn one_tool_call_then_answer() {
        let llm = ScriptedLlm::texts(&["```python\nprint(add(2, 3))\n```", "5"]);
        let sandbox = ScriptedSandbox::new(vec![ExecutionResult::output("5.0\n")]);
        let agent = agent(llm.clone(), sandbox.clone());

        let (outcome, state) = agent.run_task("Add 2 and 3", None).await.unwrap();

        assert_eq!(outcome.answer, "5");
        assert_eq!(outcome.turns, 2);

        let seen = sandbox.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].script, "print(add(2, 3))");
        assert_eq!(seen[0].tools, vec!["add".to_string()]);

        let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant
            ]
        );
        assert_eq!(state.messages[3].content, "5.0\n");

        let kinds: Vec<LogEntryType> = outcome.log.iter().map(|e| e.entry_type).collect();
        assert_eq!(
            kinds,
            vec![
                LogEntryType::Script,
                LogEntryType::Output,
                LogEntryType::Response
            ]
        );
    }

    #[tokio::test]
    async fn failing_script_is_fed_back_and_recovered() {
        let llm = ScriptedLlm::texts(&[
            "```python\nprint(y)\n```",
            "```python\ny = 1\nprint(y)\n```",
            "y is 1",
        ]);
        let sandbox = ScriptedSandbox::new(vec![
            ExecutionResult::output(
                "Error during execution: NameError(\"name 'y' is not defined\")",
            ),
            ExecutionResult {
                output: "1\n".to_string(),
                new_bindings: bindings(&[("y", json!(1))]),
            },
        ]);
        let agent = agent(llm.clone(), sandbox.clone());

        let (outcome, state) = agent.run_task("Print y", None).await.unwrap();

        assert_eq!(outcome.answer, "y is 1");
        assert_eq!(outcome.turns, 3);
        assert!(state.messages[3]
            .content
            .starts_with("Error during execution:"));
        assert_eq!(state.context.get("y"), Some(&json!(1)));

        // The model saw the error before its second attempt.
        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[1].last().unwrap().role, Role::User);
        assert!(seen[1].last().unwrap().content.contains("NameError"));
    }

    #[tokio::test]
    async fn variables_persist_across_turns() {
        let llm = ScriptedLlm::texts(&[
            "```python\nx = 10\n```",
            "```python\nprint(x * 2)\n```",
            "20",
        ]);
        let sandbox = ScriptedSandbox::new(vec![
            ExecutionResult {
                output: NO_OUTPUT.to_string(),
                new_bindings: bindings(&[("x", json!(10))]),
            },
            ExecutionResult::output("20\n"),
        ]);
        let agent = agent(llm, sandbox.clone());

        let (outcome, state) = agent.run_task("Double ten", None).await.unwrap();
        assert_eq!(outcome.answer, "20");

        let seen = sandbox.seen.lock().unwrap();
        assert!(seen[0].values.is_empty());
        assert_eq!(seen[1].values.get("x"), Some(&json!(10)));
        assert_eq!(state.messages[3].content, NO_OUTPUT);
    }

    #[tokio::test]
    async fn tools_win_over_stored_variables() {
        let llm = ScriptedLlm::texts(&[
            "```python\nadd = 42\ny = 1\n```",
            "```python\nprint(add(y, 1))\n```",
            "2",
        ]);
        let sandbox = ScriptedSandbox::new(vec![ExecutionResult {
            output: NO_OUTPUT.to_string(),
            new_bindings: bindings(&[("add", json!(42)), ("y", json!(1))]),
        }]);
        let agent = agent(llm, sandbox.clone());

        let (_, state) = agent.run_task("Shadow a tool", None).await.unwrap();

        assert!(!state.context.contains("add"));
        assert!(state.context.contains("y"));
        let seen = sandbox.seen.lock().unwrap();
        assert!(seen[1].tools.contains(&"add".to_string()));
        assert!(!seen[1].values.contains_key("add"));
    }

    #[tokio::test]
    async fn second_task_resumes_thread() {
        let llm = ScriptedLlm::texts(&["```python\nx = 10\n```", "stored", "x is 10"]);
        let sandbox = ScriptedSandbox::new(vec![ExecutionResult {
            output: NO_OUTPUT.to_string(),
            new_bindings: bindings(&[("x", json!(10))]),
        }]);
        let agent = agent(llm.clone(), sandbox);

        let (_, state) = agent.run_task("Store ten", None).await.unwrap();
        let (outcome, state) = agent.run_task("What is x?", Some(state)).await.unwrap();

        assert_eq!(outcome.answer, "x is 10");
        assert_eq!(outcome.turns, 1);
        assert_eq!(state.context.get("x"), Some(&json!(10)));

        let systems = state
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .count();
        assert_eq!(systems, 1);

        // The resumed call saw the whole first task.
        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[2].len(), 6);
        assert_eq!(seen[2][5].content, "What is x?");
    }

    #[tokio::test]
    async fn model_failure_leaves_turn_uncommitted() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::RateLimited {
            provider: "test".to_string(),
        })]);
        let sandbox = ScriptedSandbox::new(vec![]);
        let agent = agent(llm, sandbox);

        let mut state = ThreadState::new();
        let err = agent
            .run(&mut state, "anything", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Llm(LlmError::RateLimited { .. })));
        let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert!(state.context.is_empty());
    }

    #[tokio::test]
    async fn cancelled_turn_commits_nothing() {
        let cancel = CancellationToken::new();
        let llm = ScriptedLlm::texts(&["```python\nz = 1\n```"]);
        let sandbox = Arc::new(HangingSandbox {
            cancel: cancel.clone(),
        });
        let agent = agent(llm, sandbox);

        let mut state = ThreadState::new();
        state.begin_task(agent.system_prompt(), "hang");
        let before = state.clone();

        let err = agent.step(&mut state, &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn cancelled_before_model_call() {
        let llm = ScriptedLlm::texts(&["never"]);
        let agent = agent(llm.clone(), ScriptedSandbox::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut state = ThreadState::new();
        let err = agent.run(&mut state, "task", &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn turn_limit_keeps_completed_turns() {
        let llm = ScriptedLlm::texts(&["```python\nprint(1)\n```", "```python\nprint(2)\n```"]);
        let sandbox = ScriptedSandbox::new(vec![ExecutionResult::output("1\n")]);
        let mut options = AgentOptions::new("test-model");
        options.max_turns = Some(1);
        let agent = CodeActAgent::new(llm, sandbox, add_registry(), options);

        let mut state = ThreadState::new();
        let err = agent
            .run(&mut state, "loop", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::TurnLimit(1)));
        assert_eq!(state.messages.len(), 4);
    }

    #[tokio::test]
    async fn usage_is_summed_over_turns() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 10,
        };
        let llm = ScriptedLlm::new(vec![
            Ok(ChatResponse {
                content: "```python\nprint(1)\n```".to_string(),
                usage: Some(usage),
            }),
            Ok(ChatResponse {
                content: "1".to_string(),
                usage: Some(usage),
            }),
        ]);
        let agent = agent(llm, ScriptedSandbox::new(vec![]));

        let (outcome, _) = agent.run_task("count", None).await.unwrap();
        assert_eq!(outcome.usage.map(|u| u.total()), Some(220));
    }

    #[tokio::test]
    async fn custom_prompt_replaces_generated_one() {
        let mut options = AgentOptions::new("test-model");
        options.prompt = Some("You are a calculator.".to_string());
        let agent = CodeActAgent::new(
            ScriptedLlm::texts(&["ok"]),
            ScriptedSandbox::new(vec![]),
            add_registry(),
            options,
        );
        assert_eq!(agent.system_prompt(), "You are a calculator.");

        let mut options = AgentOptions::new("test-model");
        options.base_instructions = Some("Be terse.".to_string());
        let agent = CodeActAgent::new(
            ScriptedLlm::texts(&["ok"]),
            ScriptedSandbox::new(vec![]),
            add_registry(),
            options,
        );
        assert!(agent.system_prompt().starts_with("Be terse.\n\n"));
        assert!(agent.system_prompt().contains("def add(a: float, b: float) -> float:"));
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn end_to_end_with_python_sandbox() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }

        let llm = ScriptedLlm::texts(&[
            "```python\nx = 10\n```",
            "```python\nprint(add(x, 2))\nprint(caesar_shift_encode('abc', 1))\n```",
            "Done",
        ]);
        let sandbox = Arc::new(PythonSandbox::new(PythonSandboxConfig::default()));
        let tools = ToolRegistry::from_specs(builtin_tools()).unwrap();
        let agent = CodeActAgent::new(llm, sandbox, tools, AgentOptions::new("test-model"));

        let (outcome, state) = agent.run_task("Use the tools", None).await.unwrap();

        assert_eq!(outcome.answer, "Done");
        assert_eq!(state.context.get("x"), Some(&json!(10)));
        assert_eq!(state.messages[3].content, NO_OUTPUT);
        assert_eq!(state.messages[5].content, "12.0\nbcd\n");
    }
}
