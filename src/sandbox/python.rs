//! Python subprocess sandbox.
//!
//! Every execution gets a fresh interpreter. The context's plain values are
//! sent in as JSON; tools become stub functions that call back to the host, one
//! JSON object per line. The protocol uses duplicates of the interpreter's
//! original stdin/stdout taken before the script starts. Everything written to
//! fd 1 afterwards, by print, `os.write` or a child process, lands in a capture
//! file and comes back as the script's output.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};

use super::{
    diff_bindings, failure_output, success_output, truncate_output, Binding, ExecutionContext,
    ExecutionResult, Sandbox,
};
use crate::tools::ToolArgs;

const PYTHON_RUNNER: &str = r#"
import io
import json
import os
import sys
import tempfile
import types

# The protocol runs over private copies of fds 0 and 1. The real fd 1 becomes a
# capture file shared by print, os.write and child processes; fd 0 is /dev/null.
_HOST_STDIN = os.fdopen(os.dup(0), "r", encoding="utf-8")
_HOST_STDOUT = os.fdopen(os.dup(1), "w", encoding="utf-8")
_CAPTURE = tempfile.TemporaryFile()
os.dup2(_CAPTURE.fileno(), 1)
_DEVNULL = os.open(os.devnull, os.O_RDONLY)
os.dup2(_DEVNULL, 0)
sys.stdin = open(os.devnull, "r")
sys.stdout = io.TextIOWrapper(
    io.FileIO(1, "w", closefd=False), encoding="utf-8", errors="replace", write_through=True
)

_SKIP_TYPES = (
    types.ModuleType,
    types.FunctionType,
    types.BuiltinFunctionType,
    types.MethodType,
    type,
)


def _read_json():
    line = _HOST_STDIN.readline()
    if not line:
        raise EOFError("stdin closed")
    return json.loads(line)


def _write_json(obj):
    _HOST_STDOUT.write(json.dumps(obj, ensure_ascii=False, allow_nan=False) + "\n")
    _HOST_STDOUT.flush()


def _make_tool(name):
    def _tool(*args, **kwargs):
        _write_json({"type": "tool_call", "name": name, "args": list(args), "kwargs": kwargs})
        response = _read_json()
        if response.get("type") != "tool_result":
            raise RuntimeError("invalid tool response from host")
        if response.get("ok"):
            return response.get("value")
        raise RuntimeError(response.get("error") or "tool call failed")

    _tool.__name__ = name
    return _tool


def _same(a, b):
    if type(a) is not type(b):
        return False
    if isinstance(a, list):
        return len(a) == len(b) and all(_same(x, y) for x, y in zip(a, b))
    if isinstance(a, dict):
        return a.keys() == b.keys() and all(_same(a[k], b[k]) for k in a)
    return a == b


def _round_trips(value):
    try:
        text = json.dumps(value, allow_nan=False)
    except (TypeError, ValueError, RecursionError):
        return False
    return _same(value, json.loads(text))


def _bindings(namespace, reserved):
    found = {}
    for name, value in namespace.items():
        if name in reserved or name.startswith("_") or isinstance(value, _SKIP_TYPES):
            continue
        if _round_trips(value):
            found[name] = value
    return found


def _captured():
    for stream in (sys.stdout, sys.__stdout__):
        try:
            stream.flush()
        except Exception:
            pass
    _CAPTURE.seek(0)
    return _CAPTURE.read().decode("utf-8", errors="replace")


_request = _read_json()
_namespace = dict(_request.get("variables") or {})
for _tool_name in _request.get("tools") or []:
    _namespace[_tool_name] = _make_tool(_tool_name)
_reserved = set(_namespace) | {"__builtins__"}

_error = None
try:
    exec(_request.get("code", ""), _namespace, _namespace)
except BaseException as e:
    _error = repr(e)

_write_json({
    "type": "exec_result",
    "stdout": _captured(),
    "error": _error,
    "bindings": _bindings(_namespace, _reserved),
})
"#;

/// Stderr kept for diagnosing an interpreter that died mid-protocol.
const STDERR_CAPTURE_LIMIT: usize = 4096;

#[derive(Debug, Clone)]
pub struct PythonSandboxConfig {
    /// Interpreter to launch.
    pub python_command: String,
    /// Wall-clock limit for one execution, tool calls included.
    pub timeout: Duration,
    /// Longest output handed back to the model.
    pub max_output_chars: usize,
}

impl Default for PythonSandboxConfig {
    fn default() -> Self {
        Self {
            python_command: "python3".to_string(),
            timeout: Duration::from_secs(60),
            max_output_chars: 10_000,
        }
    }
}

/// Interpreter-level faults. These never escape [`Sandbox::execute`]; they are
/// rendered into the output like any script failure.
#[derive(Debug, Error)]
enum SandboxFault {
    #[error("failed to start python interpreter `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("python interpreter I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid message from python interpreter: {0}")]
    Protocol(String),

    #[error("python interpreter exited unexpectedly{0}")]
    Exited(String),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RunnerEvent {
    ToolCall {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
    ExecResult {
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        bindings: BTreeMap<String, Value>,
    },
}

pub struct PythonSandbox {
    config: PythonSandboxConfig,
}

impl PythonSandbox {
    pub fn new(config: PythonSandboxConfig) -> Self {
        Self { config }
    }

    async fn run(
        &self,
        script: &str,
        context: &ExecutionContext,
    ) -> Result<ExecutionResult, SandboxFault> {
        let mut child = Command::new(&self.config.python_command)
            .arg("-u")
            .arg("-c")
            .arg(PYTHON_RUNNER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxFault::Spawn {
                command: self.config.python_command.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxFault::Protocol("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxFault::Protocol("stdout not captured".to_string()))?;
        // Drain stderr for the whole run so a chatty script cannot fill the pipe.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut kept = Vec::new();
                let mut chunk = [0u8; 1024];
                while let Ok(n) = stderr.read(&mut chunk).await {
                    if n == 0 {
                        break;
                    }
                    let room = STDERR_CAPTURE_LIMIT.saturating_sub(kept.len());
                    kept.extend_from_slice(&chunk[..n.min(room)]);
                }
                String::from_utf8_lossy(&kept).into_owned()
            })
        });
        let mut stdout = BufReader::new(stdout);

        let mut variables = Map::new();
        let mut tools = Vec::new();
        for (name, binding) in context {
            match binding {
                Binding::Value(value) => {
                    variables.insert(name.clone(), value.clone());
                }
                Binding::Tool(_) => tools.push(name.clone()),
            }
        }

        send_json(
            &mut stdin,
            &json!({
                "type": "exec",
                "code": script,
                "variables": variables,
                "tools": tools,
            }),
        )
        .await?;

        let outcome = loop {
            let event = match read_event(&mut stdout).await? {
                Some(event) => event,
                None => {
                    let stderr = match stderr_task {
                        Some(task) => task.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    let detail = if stderr.trim().is_empty() {
                        String::new()
                    } else {
                        format!(": {}", stderr.trim())
                    };
                    return Err(SandboxFault::Exited(detail));
                }
            };

            match event {
                RunnerEvent::ToolCall { name, args, kwargs } => {
                    tracing::debug!("Sandbox tool call: {}", name);
                    let result = match context.get(&name).and_then(Binding::as_tool) {
                        Some(tool) => {
                            match AssertUnwindSafe(tool.invoke(ToolArgs { args, kwargs }))
                                .catch_unwind()
                                .await
                            {
                                Ok(result) => result.map_err(|e| format!("{:#}", e)),
                                Err(panic) => {
                                    let reason = panic_message(panic.as_ref());
                                    tracing::warn!("Tool {} panicked: {}", name, reason);
                                    Err(format!("tool '{}' panicked: {}", name, reason))
                                }
                            }
                        }
                        None => Err(format!("'{}' is not a registered tool", name)),
                    };
                    let reply = match result {
                        Ok(value) => json!({"type": "tool_result", "ok": true, "value": value}),
                        Err(error) => json!({"type": "tool_result", "ok": false, "error": error}),
                    };
                    send_json(&mut stdin, &reply).await?;
                }
                RunnerEvent::ExecResult {
                    stdout,
                    error,
                    bindings,
                } => break (stdout, error, bindings),
            }
        };

        drop(stdin);
        let _ = child.wait().await;

        let (stdout, error, bindings) = outcome;
        let mut output = match error {
            Some(error) => failure_output(&stdout, error),
            None => success_output(&stdout),
        };
        truncate_output(&mut output, self.config.max_output_chars);

        Ok(ExecutionResult {
            output,
            new_bindings: diff_bindings(context, bindings),
        })
    }
}

impl Default for PythonSandbox {
    fn default() -> Self {
        Self::new(PythonSandboxConfig::default())
    }
}

#[async_trait]
impl Sandbox for PythonSandbox {
    async fn execute(&self, script: &str, context: &ExecutionContext) -> ExecutionResult {
        match tokio::time::timeout(self.config.timeout, self.run(script, context)).await {
            Ok(Ok(result)) => result,
            Ok(Err(fault)) => {
                tracing::warn!("Python sandbox fault: {}", fault);
                ExecutionResult::failure("", fault)
            }
            Err(_) => ExecutionResult::failure(
                "",
                format!(
                    "script timed out after {} seconds",
                    self.config.timeout.as_secs_f64()
                ),
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn send_json(stdin: &mut ChildStdin, value: &Value) -> Result<(), SandboxFault> {
    let mut line = serde_json::to_vec(value).map_err(|e| SandboxFault::Protocol(e.to_string()))?;
    line.push(b'\n');
    stdin.write_all(&line).await?;
    stdin.flush().await?;
    Ok(())
}

async fn read_event(
    stdout: &mut BufReader<ChildStdout>,
) -> Result<Option<RunnerEvent>, SandboxFault> {
    let mut line = String::new();
    if stdout.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    serde_json::from_str(line.trim())
        .map(Some)
        .map_err(|e| SandboxFault::Protocol(format!("{}; raw={}", e, line.trim())))
}
