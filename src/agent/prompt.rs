//! System prompt assembly.

use std::fmt::Write;
use std::sync::Arc;

use crate::tools::Tool;

const TASK_GUIDANCE: &str = "You will be given a task to perform. You should output either
- a Python code snippet that provides the solution to the task, or a step towards the solution.
Any output you want to extract from the code should be printed to the console.
Code should be output in a fenced code block.
- text to be shown directly to the user, if you want to ask for more information or provide the final answer.

In addition to the Python Standard Library, you can use the following functions:
";

const CLOSING_GUIDANCE: &str = "
Variables defined at the top level of previous code snippets can be referenced in your code.

Reminder: use Python code snippets to call tools. When you reply without a fenced code block, \
your reply is shown to the user as the final answer and the task ends.";

/// Render one tool as a Python declaration with an elided body.
pub fn render_tool(tool: &Tool) -> String {
    let params = tool
        .signature()
        .iter()
        .map(|p| p.render())
        .collect::<Vec<_>>()
        .join(", ");
    let returns = tool
        .returns()
        .map(|r| format!(" -> {}", r))
        .unwrap_or_default();

    format!(
        "def {name}({params}){returns}:\n    \"\"\"{description}\"\"\"\n    ...\n",
        name = tool.name(),
        params = params,
        returns = returns,
        description = tool.description(),
    )
}

/// Build the system prompt from optional base instructions and the tool list.
///
/// Pure: the same inputs always give byte-identical output.
pub fn build_system_prompt(base_instructions: Option<&str>, tools: &[Arc<Tool>]) -> String {
    let mut prompt = String::new();

    if let Some(base) = base_instructions.filter(|b| !b.is_empty()) {
        prompt.push_str(base);
        prompt.push_str("\n\n");
    }

    prompt.push_str(TASK_GUIDANCE);
    for tool in tools {
        let _ = write!(prompt, "\n{}", render_tool(tool));
    }
    prompt.push_str(CLOSING_GUIDANCE);
    prompt
}
