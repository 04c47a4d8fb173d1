//! Arithmetic and trigonometry helpers, supplied as pre-wrapped tools.

use std::future::Future;

use serde_json::{json, Value};

use super::{arg_f64, StructuredTool, ToolSpec};

fn number(value: f64) -> anyhow::Result<Value> {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| anyhow::anyhow!("result is not a finite number: {}", value))
}

async fn add(args: Value) -> anyhow::Result<Value> {
    number(arg_f64(&args, "a")? + arg_f64(&args, "b")?)
}

async fn subtract(args: Value) -> anyhow::Result<Value> {
    number(arg_f64(&args, "a")? - arg_f64(&args, "b")?)
}

async fn multiply(args: Value) -> anyhow::Result<Value> {
    number(arg_f64(&args, "a")? * arg_f64(&args, "b")?)
}

async fn divide(args: Value) -> anyhow::Result<Value> {
    let b = arg_f64(&args, "b")?;
    if b == 0.0 {
        anyhow::bail!("division by zero");
    }
    number(arg_f64(&args, "a")? / b)
}

async fn exponentiation(args: Value) -> anyhow::Result<Value> {
    number(arg_f64(&args, "a")?.powf(arg_f64(&args, "b")?))
}

async fn sqrt(args: Value) -> anyhow::Result<Value> {
    let a = arg_f64(&args, "a")?;
    if a < 0.0 {
        anyhow::bail!("math domain error");
    }
    number(a.sqrt())
}

async fn sin(args: Value) -> anyhow::Result<Value> {
    number(arg_f64(&args, "a")?.sin())
}

async fn cos(args: Value) -> anyhow::Result<Value> {
    number(arg_f64(&args, "a")?.cos())
}

async fn radians(args: Value) -> anyhow::Result<Value> {
    number(arg_f64(&args, "a")?.to_radians())
}

async fn ceil(args: Value) -> anyhow::Result<Value> {
    let a = arg_f64(&args, "a")?.ceil();
    if !a.is_finite() {
        anyhow::bail!("cannot convert {} to integer", a);
    }
    Ok(json!(a as i64))
}

fn binary<F, Fut>(name: &str, description: &str, func: F) -> ToolSpec
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    StructuredTool::new(name, func)
        .with_description(description)
        .with_param("a", "float")
        .with_param("b", "float")
        .with_returns("float")
        .into()
}

fn unary<F, Fut>(name: &str, description: &str, returns: &str, func: F) -> ToolSpec
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    StructuredTool::new(name, func)
        .with_description(description)
        .with_param("a", "float")
        .with_returns(returns)
        .into()
}

pub fn tools() -> Vec<ToolSpec> {
    vec![
        binary("add", "Add two numbers together.", add),
        binary("multiply", "Multiply two numbers together.", multiply),
        binary("divide", "Divide two numbers.", divide),
        binary("subtract", "Subtract two numbers.", subtract),
        unary("sin", "Take the sine of a number.", "float", sin),
        unary("cos", "Take the cosine of a number.", "float", cos),
        unary("radians", "Convert degrees to radians.", "float", radians),
        binary(
            "exponentiation",
            "Raise one number to the power of another.",
            exponentiation,
        ),
        unary("sqrt", "Take the square root of a number.", "float", sqrt),
        unary("ceil", "Round a number up to the nearest integer.", "int", ceil),
    ]
}
