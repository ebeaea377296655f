use super::calculator;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A function the helper assistant may ask to run
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Argument names with a short description each
    fn parameters(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Run the tool. Failures are reported in the returned JSON, never raised.
    fn call(&self, arguments: &Value) -> Value;
}

/// Tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

fn error(message: impl Into<String>) -> Value {
    json!({ "status": "error", "message": message.into() })
}

/// Evaluates arithmetic expressions
pub struct Calculator;

impl Calculator {
    fn allowed(ch: char) -> bool {
        ch.is_alphanumeric()
            || ch == '_'
            || ch.is_whitespace()
            || matches!(ch, '+' | '-' | '*' | '/' | '(' | ')' | '.' | ',')
    }
}

impl Tool for Calculator {
    fn name(&self) -> &'static str {
        "calculate"
    }

    fn description(&self) -> &'static str {
        "Evaluates a mathematical expression, e.g. \"2 + 2\", \"sqrt(16)\", \"sin(pi/2)\""
    }

    fn parameters(&self) -> &'static [(&'static str, &'static str)] {
        &[("expression", "the expression to evaluate")]
    }

    fn call(&self, arguments: &Value) -> Value {
        let Some(expression) = arguments.get("expression").and_then(Value::as_str) else {
            return error("missing 'expression' argument");
        };
        if expression.trim().is_empty() || !expression.chars().all(Self::allowed) {
            return json!({
                "status": "error",
                "message": "Invalid characters in expression",
                "expression": expression,
            });
        }

        match calculator::evaluate(expression) {
            Ok(result) => json!({
                "status": "success",
                "result": number(result),
                "expression": expression,
            }),
            Err(message) => json!({
                "status": "error",
                "message": message,
                "expression": expression,
            }),
        }
    }
}

/// Whole results are reported as integers
fn number(value: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < MAX_EXACT {
        json!(value as i64)
    } else {
        json!(value)
    }
}

/// Reports the local date and time
pub struct CurrentDateTime;

impl CurrentDateTime {
    fn describe(now: NaiveDateTime) -> Value {
        json!({
            "status": "success",
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M:%S").to_string(),
            "datetime": now.format("%Y-%m-%d %H:%M:%S").to_string(),
            "weekday": now.format("%A").to_string(),
        })
    }
}

impl Tool for CurrentDateTime {
    fn name(&self) -> &'static str {
        "get_current_datetime"
    }

    fn description(&self) -> &'static str {
        "Returns the current date, time and weekday"
    }

    fn call(&self, _arguments: &Value) -> Value {
        Self::describe(Local::now().naive_local())
    }
}

/// The tools offered to the model
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Calculator and date/time tools
    pub fn standard() -> Self {
        Self::new().register(Calculator).register(CurrentDateTime)
    }

    pub fn register<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.push(Box::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// One line per tool, for the model's instruction
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|tool| {
                let params = tool
                    .parameters()
                    .iter()
                    .map(|(name, about)| format!("\"{}\": {}", name, about))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- {}: {} (arguments: {{{}}})", tool.name(), tool.description(), params)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn call(&self, call: &ToolCall) -> Value {
        match self.get(&call.tool) {
            Some(tool) => tool.call(&call.arguments),
            None => error(format!("unknown tool: {}", call.tool)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
