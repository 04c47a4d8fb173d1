//! Persistent variable store shared across turns of one thread.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sandbox::{Binding, ExecutionContext};
use crate::tools::ToolRegistry;

/// Names created by earlier scripts, with their last captured values.
///
/// Only grows: a merge never removes a name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextStore {
    vars: BTreeMap<String, Value>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Build the namespace for one execution. A tool shadows any stored
    /// variable of the same name.
    pub fn execution_context(&self, tools: &ToolRegistry) -> ExecutionContext {
        let mut context: ExecutionContext = self
            .vars
            .iter()
            .map(|(name, value)| (name.clone(), Binding::Value(value.clone())))
            .collect();

        for tool in tools.list_tools() {
            context.insert(tool.name().to_string(), Binding::Tool(tool.clone()));
        }
        context
    }

    /// Fold newly created names into the store, later writes winning.
    ///
    /// Names that collide with a tool are discarded; returns them.
    pub fn merge(
        &mut self,
        new_bindings: BTreeMap<String, Value>,
        tools: &ToolRegistry,
    ) -> Vec<String> {
        let mut shadowed = Vec::new();
        for (name, value) in new_bindings {
            if tools.contains(&name) {
                shadowed.push(name);
                continue;
            }
            self.vars.insert(name, value);
        }
        shadowed
    }
}

impl From<BTreeMap<String, Value>> for ContextStore {
    fn from(vars: BTreeMap<String, Value>) -> Self {
        Self { vars }
    }
}
