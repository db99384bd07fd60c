use logseq_mcp_core::error::codes;
use serde_json::{Map, Value, json};

use crate::gateway::GatewayError;

/// Failure raised by a tool handler. The dispatcher turns it into an
/// `isError: true` tool result; it never terminates the exchange.
#[derive(Debug, Clone)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION_FAILED, message)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(codes::UNKNOWN_TOOL, format!("Unknown tool: {name}")).with_field("name")
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(details) = &self.details {
            payload["details"] = details.clone();
        }
        payload
    }
}

impl From<GatewayError> for ToolError {
    fn from(err: GatewayError) -> Self {
        let tool_error = ToolError::new(err.code(), err.to_string());
        match &err {
            GatewayError::Status { status, .. } => {
                tool_error.with_details(json!({ "status": status }))
            }
            GatewayError::Remote { body, .. } => tool_error.with_details(body.clone()),
            _ => tool_error,
        }
    }
}

pub(crate) fn arg_bool(args: &Map<String, Value>, key: &str, default: bool) -> Result<bool, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(v)) => Ok(*v),
        Some(_) => Err(ToolError::validation(format!("'{key}' must be a boolean")).with_field(key)),
    }
}

pub(crate) fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => {
            Err(ToolError::validation(format!("Missing required field '{key}'")).with_field(key))
        }
        Some(Value::String(v)) if !v.trim().is_empty() => Ok(v.clone()),
        Some(Value::String(_)) => {
            Err(ToolError::validation(format!("'{key}' must not be empty")).with_field(key))
        }
        Some(_) => Err(ToolError::validation(format!("'{key}' must be a string")).with_field(key)),
    }
}

/// Like [`required_string`] but an empty string is a legitimate value
/// (block content may be cleared).
pub(crate) fn required_text(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => {
            Err(ToolError::validation(format!("Missing required field '{key}'")).with_field(key))
        }
        Some(Value::String(v)) => Ok(v.clone()),
        Some(_) => Err(ToolError::validation(format!("'{key}' must be a string")).with_field(key)),
    }
}

pub(crate) fn required_value(args: &Map<String, Value>, key: &str) -> Result<Value, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => {
            Err(ToolError::validation(format!("Missing required field '{key}'")).with_field(key))
        }
        Some(value) => Ok(value.clone()),
    }
}

pub(crate) fn arg_optional_string(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.clone())),
        Some(_) => Err(ToolError::validation(format!("'{key}' must be a string")).with_field(key)),
    }
}

pub(crate) fn arg_optional_u64(args: &Map<String, Value>, key: &str) -> Result<Option<u64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            })
            .ok_or_else(|| {
                ToolError::validation(format!("'{key}' must be an unsigned integer"))
                    .with_field(key)
            })
            .map(Some),
        Some(_) => Err(
            ToolError::validation(format!("'{key}' must be an unsigned integer")).with_field(key),
        ),
    }
}

pub(crate) fn arg_u64(args: &Map<String, Value>, key: &str, default: u64) -> Result<u64, ToolError> {
    Ok(arg_optional_u64(args, key)?.unwrap_or(default))
}

pub(crate) fn arg_optional_object(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<Map<String, Value>>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(ToolError::validation(format!("'{key}' must be an object")).with_field(key)),
    }
}
