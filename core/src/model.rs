//! Transient values relayed from the Logseq HTTP API.
//!
//! Field names follow the remote service's JSON (`original-name`, `journal?`,
//! `pre-block?`). Anything the adapter does not model explicitly is kept in
//! `extra` so it survives re-serialization untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel page name used when the remote service omits a block's page.
pub const UNKNOWN_PAGE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub uuid: String,
    pub name: String,
    #[serde(
        rename = "original-name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(rename = "journal?", default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Page {
    pub fn is_journal(&self) -> bool {
        self.journal.unwrap_or(false)
    }

    /// Compact listing form used by page indexes.
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "uuid": self.uuid,
            "isJournal": self.is_journal(),
        })
    }
}

/// Reference to another entity by its numeric database id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub uuid: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<BlockChild>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(rename = "pre-block?", default, skip_serializing_if = "Option::is_none")]
    pub pre_block: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Block {
    pub fn page_name(&self) -> Option<&str> {
        self.page.as_ref().and_then(|page| page.name.as_deref())
    }
}

/// Children come back either as nested blocks (block trees) or as bare
/// `["uuid", "..."]` references (single block fetches).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockChild {
    Node(Box<Block>),
    Ref(Value),
}

/// Flat projection of a full-text search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub uuid: String,
    pub content: String,
    pub page: String,
}

impl From<Block> for SearchResult {
    fn from(block: Block) -> Self {
        let page = block.page_name().unwrap_or(UNKNOWN_PAGE).to_string();
        Self {
            uuid: block.uuid,
            content: block.content,
            page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphInfo {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
