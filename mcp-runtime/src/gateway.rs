//! Typed proxy over the Logseq HTTP API.
//!
//! Every capability is one `POST /api` round trip carrying
//! `{"method": "logseq.<Namespace>.<call>", "args": [...]}` and answered with
//! `{"result": ...}` or `{"error": ...}`.

use std::str::FromStr;

use async_trait::async_trait;
use logseq_mcp_core::error::codes;
use logseq_mcp_core::model::{Block, GraphInfo, Page, SearchResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::config::GatewayConfig;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to reach Logseq API at {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("{message}")]
    Remote { message: String, body: Value },
    #[error("Failed to decode Logseq response for {method}: {reason}")]
    Decode { method: String, reason: String },
}

impl GatewayError {
    pub fn status(status: u16) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown Status")
            .to_string();
        GatewayError::Status { status, reason }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Transport { .. } => codes::CONNECTION_ERROR,
            GatewayError::Status { .. } => codes::HTTP_STATUS,
            GatewayError::Remote { .. } => codes::REMOTE_ERROR,
            GatewayError::Decode { .. } => codes::RESPONSE_ERROR,
        }
    }
}

/// What an external-call site does when the remote call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Replace the failure with a fallback value and log it.
    Degrade,
    /// Hand the failure to the caller.
    Propagate,
}

impl FailurePolicy {
    pub fn settle<T>(
        self,
        result: Result<T, GatewayError>,
        fallback: T,
        site: &str,
    ) -> Result<T, GatewayError> {
        match (self, result) {
            (_, Ok(value)) => Ok(value),
            (FailurePolicy::Degrade, Err(err)) => {
                tracing::warn!(site, error = %err, "remote call failed; degrading to fallback");
                Ok(fallback)
            }
            (FailurePolicy::Propagate, Err(err)) => Err(err),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePageOptions {
    pub create_first_block: bool,
}

impl CreatePageOptions {
    pub fn with_first_block() -> Self {
        Self {
            create_first_block: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InsertBlockOptions {
    pub sibling: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
}

impl InsertBlockOptions {
    pub fn sibling() -> Self {
        Self {
            sibling: true,
            ..Self::default()
        }
    }

    pub fn child() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MoveBlockOptions {
    pub before: bool,
    pub children: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageStatus {
    #[default]
    Success,
    Warning,
    Error,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Success => "success",
            MessageStatus::Warning => "warning",
            MessageStatus::Error => "error",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(MessageStatus::Success),
            "warning" => Ok(MessageStatus::Warning),
            "error" => Ok(MessageStatus::Error),
            other => Err(format!("unsupported message status '{other}'")),
        }
    }
}

/// One operation per remote capability. Implementations perform exactly one
/// round trip per call and hold no mutable state.
#[async_trait]
pub trait LogseqApi: Send + Sync {
    async fn get_page(&self, title_or_uuid: &str) -> Result<Option<Page>, GatewayError>;
    async fn get_all_pages(&self) -> Result<Vec<Page>, GatewayError>;
    async fn get_page_blocks_tree(&self, page: &str) -> Result<Vec<Block>, GatewayError>;
    async fn create_page(
        &self,
        title: &str,
        properties: &Map<String, Value>,
        options: CreatePageOptions,
    ) -> Result<Option<Page>, GatewayError>;
    async fn delete_page(&self, title: &str) -> Result<(), GatewayError>;

    async fn get_block(&self, uuid: &str) -> Result<Option<Block>, GatewayError>;
    async fn insert_block(
        &self,
        parent: &str,
        content: &str,
        options: InsertBlockOptions,
    ) -> Result<Option<Block>, GatewayError>;
    async fn update_block(&self, uuid: &str, content: &str) -> Result<(), GatewayError>;
    async fn remove_block(&self, uuid: &str) -> Result<(), GatewayError>;
    async fn move_block(
        &self,
        uuid: &str,
        target: &str,
        options: MoveBlockOptions,
    ) -> Result<(), GatewayError>;

    async fn get_block_properties(&self, uuid: &str) -> Result<Map<String, Value>, GatewayError>;
    async fn upsert_block_property(
        &self,
        uuid: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), GatewayError>;
    async fn remove_block_property(&self, uuid: &str, key: &str) -> Result<(), GatewayError>;

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, GatewayError>;
    async fn datascript_query(&self, query: &str) -> Result<Vec<Value>, GatewayError>;

    async fn get_current_graph(&self) -> Result<Option<GraphInfo>, GatewayError>;
    async fn get_user_configs(&self) -> Result<Map<String, Value>, GatewayError>;
    async fn show_msg(&self, message: &str, status: MessageStatus) -> Result<(), GatewayError>;

    /// Reachability check. The one call site where a failure is swallowed.
    async fn test_connection(&self) -> bool {
        let reachable = self.get_current_graph().await.map(|graph| graph.is_some());
        FailurePolicy::Degrade
            .settle(reachable, false, "connectivity_check")
            .unwrap_or(false)
    }
}

pub struct LogseqHttpClient {
    endpoint: String,
    token: String,
    http: reqwest::Client,
}

impl LogseqHttpClient {
    pub fn new(config: &GatewayConfig) -> Self {
        Self::with_http(config, reqwest::Client::new())
    }

    pub fn with_http(config: &GatewayConfig, http: reqwest::Client) -> Self {
        Self {
            endpoint: config.endpoint(),
            token: config.token.clone(),
            http,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, GatewayError> {
        tracing::debug!(method, "logseq api call");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "method": method, "args": args }))
            .send()
            .await
            .map_err(|source| GatewayError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| GatewayError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })?;

        let result = unwrap_envelope(method, status, &bytes)?;
        serde_json::from_value(result).map_err(|e| GatewayError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Calls whose result carries no information for the adapter.
    async fn call_unit(&self, method: &str, args: Vec<Value>) -> Result<(), GatewayError> {
        self.call::<Value>(method, args).await.map(|_| ())
    }
}

/// Split a raw `/api` response into its `result` or a typed failure.
pub fn unwrap_envelope(method: &str, status: u16, bytes: &[u8]) -> Result<Value, GatewayError> {
    if !(200..=299).contains(&status) {
        return Err(GatewayError::status(status));
    }
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    let body: Value = serde_json::from_slice(bytes).map_err(|e| GatewayError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })?;

    match body.get("error") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => {}
        Some(Value::String(message)) if message.is_empty() => {}
        Some(Value::String(message)) => {
            return Err(GatewayError::Remote {
                message: message.clone(),
                body,
            });
        }
        Some(other) => {
            return Err(GatewayError::Remote {
                message: other.to_string(),
                body,
            });
        }
    }

    Ok(body.get("result").cloned().unwrap_or(Value::Null))
}

#[async_trait]
impl LogseqApi for LogseqHttpClient {
    async fn get_page(&self, title_or_uuid: &str) -> Result<Option<Page>, GatewayError> {
        self.call("logseq.Editor.getPage", vec![json!(title_or_uuid)])
            .await
    }

    async fn get_all_pages(&self) -> Result<Vec<Page>, GatewayError> {
        let pages: Option<Vec<Page>> = self.call("logseq.Editor.getAllPages", Vec::new()).await?;
        Ok(pages.unwrap_or_default())
    }

    async fn get_page_blocks_tree(&self, page: &str) -> Result<Vec<Block>, GatewayError> {
        let blocks: Option<Vec<Block>> = self
            .call("logseq.Editor.getPageBlocksTree", vec![json!(page)])
            .await?;
        Ok(blocks.unwrap_or_default())
    }

    async fn create_page(
        &self,
        title: &str,
        properties: &Map<String, Value>,
        options: CreatePageOptions,
    ) -> Result<Option<Page>, GatewayError> {
        self.call(
            "logseq.Editor.createPage",
            vec![json!(title), json!(properties), json!(options)],
        )
        .await
    }

    async fn delete_page(&self, title: &str) -> Result<(), GatewayError> {
        self.call_unit("logseq.Editor.deletePage", vec![json!(title)])
            .await
    }

    async fn get_block(&self, uuid: &str) -> Result<Option<Block>, GatewayError> {
        self.call("logseq.Editor.getBlock", vec![json!(uuid)]).await
    }

    async fn insert_block(
        &self,
        parent: &str,
        content: &str,
        options: InsertBlockOptions,
    ) -> Result<Option<Block>, GatewayError> {
        self.call(
            "logseq.Editor.insertBlock",
            vec![json!(parent), json!(content), json!(options)],
        )
        .await
    }

    async fn update_block(&self, uuid: &str, content: &str) -> Result<(), GatewayError> {
        self.call_unit("logseq.Editor.updateBlock", vec![json!(uuid), json!(content)])
            .await
    }

    async fn remove_block(&self, uuid: &str) -> Result<(), GatewayError> {
        self.call_unit("logseq.Editor.removeBlock", vec![json!(uuid)])
            .await
    }

    async fn move_block(
        &self,
        uuid: &str,
        target: &str,
        options: MoveBlockOptions,
    ) -> Result<(), GatewayError> {
        self.call_unit(
            "logseq.Editor.moveBlock",
            vec![json!(uuid), json!(target), json!(options)],
        )
        .await
    }

    async fn get_block_properties(&self, uuid: &str) -> Result<Map<String, Value>, GatewayError> {
        let props: Option<Map<String, Value>> = self
            .call("logseq.Editor.getBlockProperties", vec![json!(uuid)])
            .await?;
        Ok(props.unwrap_or_default())
    }

    async fn upsert_block_property(
        &self,
        uuid: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), GatewayError> {
        self.call_unit(
            "logseq.Editor.upsertBlockProperty",
            vec![json!(uuid), json!(key), value.clone()],
        )
        .await
    }

    async fn remove_block_property(&self, uuid: &str, key: &str) -> Result<(), GatewayError> {
        self.call_unit(
            "logseq.Editor.removeBlockProperty",
            vec![json!(uuid), json!(key)],
        )
        .await
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, GatewayError> {
        let hits: Option<Vec<Value>> = self.call("logseq.App.search", vec![json!(query)]).await?;
        Ok(flatten_search_hits(hits.unwrap_or_default()))
    }

    async fn datascript_query(&self, query: &str) -> Result<Vec<Value>, GatewayError> {
        let rows: Option<Vec<Value>> = self
            .call("logseq.DB.datascriptQuery", vec![json!(query)])
            .await?;
        Ok(rows.unwrap_or_default())
    }

    async fn get_current_graph(&self) -> Result<Option<GraphInfo>, GatewayError> {
        self.call("logseq.App.getCurrentGraph", Vec::new()).await
    }

    async fn get_user_configs(&self) -> Result<Map<String, Value>, GatewayError> {
        let configs: Option<Map<String, Value>> =
            self.call("logseq.App.getUserConfigs", Vec::new()).await?;
        Ok(configs.unwrap_or_default())
    }

    async fn show_msg(&self, message: &str, status: MessageStatus) -> Result<(), GatewayError> {
        self.call_unit(
            "logseq.App.showMsg",
            vec![json!(message), json!(status.as_str())],
        )
        .await
    }
}

/// Unwrap the `{block: {...}}` wrapper of each search hit into a flat record.
/// Hits without a parsable block are skipped.
pub fn flatten_search_hits(hits: Vec<Value>) -> Vec<SearchResult> {
    hits.into_iter()
        .filter_map(|mut hit| {
            let block = hit.get_mut("block").map(Value::take)?;
            serde_json::from_value::<Block>(block).ok()
        })
        .map(SearchResult::from)
        .collect()
}
