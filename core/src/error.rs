use serde::Serialize;
use serde_json::{Map, Value};

/// Business-result error returned inside a successful tool response.
///
/// The calling assistant inspects payload content, not transport status, so
/// every not-found / already-exists / query-failed outcome is rendered as
/// `{"error": <code>, "message": <text>, ...context}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    /// Machine-readable error code (see [`codes`])
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Extra fields echoed next to the error (existing page, failed query, ...)
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl ErrorPayload {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            context: Map::new(),
        }
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::new(codes::NOT_FOUND, format!("{kind} not found: {id}"))
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "error": self.error, "message": self.message })
        })
    }
}

/// Error codes used across the adapter
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const ALREADY_EXISTS: &str = "already_exists";
    pub const CREATE_FAILED: &str = "create_failed";
    pub const QUERY_FAILED: &str = "query_failed";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const CONNECTION_ERROR: &str = "connection_error";
    pub const HTTP_STATUS: &str = "http_status";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const RESPONSE_ERROR: &str = "response_error";
}
