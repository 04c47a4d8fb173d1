//! Tool registry.
//!
//! Tools arrive in two shapes: raw callables (anything implementing
//! [`ToolFunction`]) and pre-wrapped descriptors ([`StructuredTool`]). Both are
//! normalized once, at registration, into the uniform [`Tool`] record. Nothing
//! downstream ever sees the original shape.

pub mod cipher;
pub mod math;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Boxed future returned by a tool implementation.
pub type ToolFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// The callable behind a tool. Receives one JSON object keyed by parameter name.
pub type ToolImpl = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool has no name")]
    EmptyName,

    #[error("tool name '{0}' is not a valid identifier")]
    InvalidName(String),

    #[error("tool '{0}' is registered more than once")]
    DuplicateName(String),
}

/// One declared parameter: a name plus an optional type hint used only for
/// rendering documentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
}

impl Param {
    pub fn new(name: impl Into<String>, type_hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_hint: Some(type_hint.into()),
        }
    }

    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_hint: None,
        }
    }

    /// `name: type`, or just `name` without a hint.
    pub fn render(&self) -> String {
        match &self.type_hint {
            Some(hint) if !hint.is_empty() => format!("{}: {}", self.name, hint),
            _ => self.name.clone(),
        }
    }
}

/// A raw callable exposed to generated scripts.
///
/// `name()` is the declared identifier and `description()` the documentation
/// string; both are picked up verbatim during normalization.
#[async_trait]
pub trait ToolFunction: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn parameters(&self) -> Vec<Param>;

    fn returns(&self) -> Option<&str> {
        None
    }

    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

/// A pre-wrapped tool descriptor built from a closure.
#[derive(Clone)]
pub struct StructuredTool {
    name: String,
    description: String,
    params: Vec<Param>,
    returns: Option<String>,
    func: ToolImpl,
}

impl StructuredTool {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
            returns: None,
            func: Arc::new(move |args: Value| -> ToolFuture { Box::pin(func(args)) }),
        }
    }

    /// Wrap a raw callable, keeping its declared name and documentation.
    pub fn from_function(function: Arc<dyn ToolFunction>) -> Self {
        let name = function.name().to_string();
        let description = function.description().to_string();
        let params = function.parameters();
        let returns = function.returns().map(str::to_string);
        let func: ToolImpl = Arc::new(move |args: Value| -> ToolFuture {
            let function = Arc::clone(&function);
            Box::pin(async move { function.call(args).await })
        });

        Self {
            name,
            description,
            params,
            returns,
            func,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, type_hint: impl Into<String>) -> Self {
        self.params.push(Param::new(name, type_hint));
        self
    }

    pub fn with_untyped_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param::untyped(name));
        self
    }

    pub fn with_returns(mut self, type_hint: impl Into<String>) -> Self {
        self.returns = Some(type_hint.into());
        self
    }
}

/// The closed set of shapes a tool may be supplied in.
#[derive(Clone)]
pub enum ToolSpec {
    Function(Arc<dyn ToolFunction>),
    Structured(StructuredTool),
}

impl ToolSpec {
    pub fn function(function: impl ToolFunction + 'static) -> Self {
        ToolSpec::Function(Arc::new(function))
    }
}

impl From<Arc<dyn ToolFunction>> for ToolSpec {
    fn from(function: Arc<dyn ToolFunction>) -> Self {
        ToolSpec::Function(function)
    }
}

impl From<StructuredTool> for ToolSpec {
    fn from(tool: StructuredTool) -> Self {
        ToolSpec::Structured(tool)
    }
}

/// Arguments as a script supplied them: positional first, then keywords.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolArgs {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl ToolArgs {
    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }
}

/// Normalized, immutable tool record.
pub struct Tool {
    name: String,
    signature: Vec<Param>,
    description: String,
    returns: Option<String>,
    implementation: ToolImpl,
}

impl Tool {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &[Param] {
        &self.signature
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn returns(&self) -> Option<&str> {
        self.returns.as_deref()
    }

    /// Map positional arguments onto parameter names, then overlay keywords.
    pub fn bind(&self, args: ToolArgs) -> anyhow::Result<Value> {
        if args.args.len() > self.signature.len() {
            anyhow::bail!(
                "{}() takes {} positional arguments but {} were given",
                self.name,
                self.signature.len(),
                args.args.len()
            );
        }

        let mut bound = Map::new();
        for (param, value) in self.signature.iter().zip(args.args) {
            bound.insert(param.name.clone(), value);
        }
        for (key, value) in args.kwargs {
            if bound.contains_key(&key) {
                anyhow::bail!("{}() got multiple values for argument '{}'", self.name, key);
            }
            bound.insert(key, value);
        }
        Ok(Value::Object(bound))
    }

    pub async fn invoke(&self, args: ToolArgs) -> anyhow::Result<Value> {
        let bound = self.bind(args)?;
        (self.implementation)(bound).await
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("description", &self.description)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn normalize(spec: ToolSpec) -> Result<Tool, ToolError> {
    let structured = match spec {
        ToolSpec::Function(function) => StructuredTool::from_function(function),
        ToolSpec::Structured(tool) => tool,
    };

    let name = structured.name.trim().to_string();
    if name.is_empty() {
        return Err(ToolError::EmptyName);
    }
    if !is_identifier(&name) {
        return Err(ToolError::InvalidName(name));
    }

    Ok(Tool {
        name,
        signature: structured.params,
        description: structured.description.trim().to_string(),
        returns: structured.returns,
        implementation: structured.func,
    })
}

/// Ordered set of normalized tools.
///
/// Registration order is preserved so the rendered prompt is stable.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize every spec. Fails on the first unusable or repeated name.
    pub fn from_specs(specs: impl IntoIterator<Item = ToolSpec>) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: impl Into<ToolSpec>) -> Result<Arc<Tool>, ToolError> {
        let tool = Arc::new(normalize(spec.into())?);
        if self.by_name.contains_key(tool.name()) {
            return Err(ToolError::DuplicateName(tool.name().to_string()));
        }
        self.by_name.insert(tool.name().to_string(), self.tools.len());
        self.tools.push(Arc::clone(&tool));
        tracing::debug!("Registered tool: {}", tool.name());
        Ok(tool)
    }

    pub fn list_tools(&self) -> &[Arc<Tool>] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Tool>> {
        self.by_name.get(name).map(|&idx| &self.tools[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.name()))
            .finish()
    }
}

/// Every built-in tool: the math helpers followed by the cipher helpers.
pub fn builtin_tools() -> Vec<ToolSpec> {
    let mut specs = math::tools();
    specs.extend(cipher::tools());
    specs
}

pub(crate) fn arg<'a>(args: &'a Value, name: &str) -> anyhow::Result<&'a Value> {
    args.get(name)
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", name))
}

pub(crate) fn arg_f64(args: &Value, name: &str) -> anyhow::Result<f64> {
    arg(args, name)?
        .as_f64()
        .ok_or_else(|| anyhow::anyhow!("Argument '{}' must be a number", name))
}

pub(crate) fn arg_i64(args: &Value, name: &str) -> anyhow::Result<i64> {
    let value = arg(args, name)?;
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    // Integral floats are accepted only when they fit without saturating.
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(f as i64),
        _ => anyhow::bail!("Argument '{}' must be a 64-bit integer", name),
    }
}

pub(crate) fn arg_str<'a>(args: &'a Value, name: &str) -> anyhow::Result<&'a str> {
    arg(args, name)?
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Argument '{}' must be a string", name))
}
