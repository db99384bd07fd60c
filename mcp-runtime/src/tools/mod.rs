//! Tool registry and dispatch.
//!
//! Descriptors are grouped by capability (read / write / query). The registry
//! maps every tool name to the group that handles it and is built once at
//! startup; a name registered twice is a startup failure.

mod query;
mod read;
mod write;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::args::ToolError;
use crate::gateway::LogseqApi;

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolGroup {
    Read,
    Write,
    Query,
}

impl ToolGroup {
    pub const ALL: [ToolGroup; 3] = [ToolGroup::Read, ToolGroup::Write, ToolGroup::Query];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolGroup::Read => "read",
            ToolGroup::Write => "write",
            ToolGroup::Query => "query",
        }
    }

    pub fn definitions(self) -> Vec<ToolDefinition> {
        match self {
            ToolGroup::Read => read::definitions(),
            ToolGroup::Write => write::definitions(),
            ToolGroup::Query => query::definitions(),
        }
    }

    async fn handle(
        self,
        ctx: &ToolContext<'_>,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        match self {
            ToolGroup::Read => read::handle(ctx, name, args).await,
            ToolGroup::Write => write::handle(ctx, name, args).await,
            ToolGroup::Query => query::handle(ctx, name, args).await,
        }
    }
}

/// Everything a handler may touch during one call.
pub struct ToolContext<'a> {
    pub api: &'a dyn LogseqApi,
    /// Namespace prefix for `logseq_sync_notes` when the caller omits one.
    pub notes_prefix: &'a str,
    pub now: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool '{name}' is registered by both the {first} and {second} groups")]
    DuplicateName {
        name: &'static str,
        first: &'static str,
        second: &'static str,
    },
}

pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<&'static str, ToolGroup>,
}

impl ToolRegistry {
    pub fn build() -> Result<Self, RegistryError> {
        Self::from_definitions(
            ToolGroup::ALL
                .into_iter()
                .flat_map(|group| group.definitions().into_iter().map(move |def| (group, def))),
        )
    }

    fn from_definitions(
        entries: impl IntoIterator<Item = (ToolGroup, ToolDefinition)>,
    ) -> Result<Self, RegistryError> {
        let mut definitions = Vec::new();
        let mut handlers = HashMap::new();
        for (group, definition) in entries {
            if let Some(first) = handlers.insert(definition.name, group) {
                return Err(RegistryError::DuplicateName {
                    name: definition.name,
                    first: first.as_str(),
                    second: group.as_str(),
                });
            }
            definitions.push(definition);
        }
        Ok(Self {
            definitions,
            handlers,
        })
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn lookup(&self, name: &str) -> Option<ToolGroup> {
        self.handlers.get(name).copied()
    }

    /// Run one tool call to completion and shape the protocol result.
    /// Unknown names and handler failures both come back as `isError`
    /// results, never as faults.
    pub async fn dispatch(
        &self,
        ctx: &ToolContext<'_>,
        name: &str,
        args: &Map<String, Value>,
    ) -> Value {
        let Some(group) = self.lookup(name) else {
            tracing::warn!(tool = name, "unknown tool requested");
            return build_tool_call_response(&ToolError::unknown_tool(name).to_value(), true);
        };

        tracing::debug!(tool = name, group = group.as_str(), "dispatching tool call");
        match group.handle(ctx, name, args).await {
            Ok(payload) => build_tool_call_response(&payload, false),
            Err(err) => {
                tracing::warn!(tool = name, code = %err.code, error = %err.message, "tool call failed");
                build_tool_call_response(&err.to_value(), true)
            }
        }
    }
}

pub fn build_tool_call_response(payload: &Value, is_error: bool) -> Value {
    let text = to_pretty_json(payload);
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }]
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }]
        })
    }
}

pub(crate) fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Schema for a tool with no arguments.
fn empty_schema() -> Value {
    json!({
        "type": "object",
        "properties": {}
    })
}
