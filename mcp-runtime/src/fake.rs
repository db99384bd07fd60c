//! In-memory `LogseqApi` used by the handler, router and server tests.
//!
//! Blocks are kept as one flat, ordered list per page; nesting is not
//! modelled. Every trait call is recorded by name before it runs.

use std::sync::Mutex;

use async_trait::async_trait;
use logseq_mcp_core::model::{Block, EntityRef, GraphInfo, Page, SearchResult};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::gateway::{
    CreatePageOptions, GatewayError, InsertBlockOptions, LogseqApi, MessageStatus,
    MoveBlockOptions,
};

#[derive(Default)]
struct State {
    pages: Vec<Page>,
    blocks: Vec<Block>,
    calls: Vec<String>,
    query_rows: Vec<Value>,
    query_failure: Option<String>,
    last_query: Option<String>,
    last_insert_parent: Option<String>,
    graph: Option<GraphInfo>,
    user_configs: Map<String, Value>,
    messages: Vec<(String, MessageStatus)>,
    unreachable: bool,
}

impl State {
    fn find_page(&self, title_or_uuid: &str) -> Option<&Page> {
        let lowered = title_or_uuid.to_lowercase();
        self.pages
            .iter()
            .find(|page| page.name == lowered || page.uuid == title_or_uuid)
    }

    fn block_index(&self, uuid: &str) -> Option<usize> {
        self.blocks.iter().position(|block| block.uuid == uuid)
    }

    fn new_block(page_name: &str, content: &str) -> Block {
        Block {
            uuid: Uuid::now_v7().to_string(),
            content: content.to_string(),
            page: Some(EntityRef {
                id: None,
                name: Some(page_name.to_string()),
                extra: Map::new(),
            }),
            parent: None,
            left: None,
            children: None,
            properties: None,
            pre_block: None,
            extra: Map::new(),
        }
    }

    fn new_page(title: &str, properties: Option<Map<String, Value>>, journal: bool) -> Page {
        Page {
            uuid: Uuid::now_v7().to_string(),
            name: title.to_lowercase(),
            original_name: Some(title.to_string()),
            properties,
            journal: Some(journal),
            extra: Map::new(),
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeGraph {
    state: Mutex<State>,
}

impl FakeGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn enter(&self, method: &str) -> Result<std::sync::MutexGuard<'_, State>, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(method.to_string());
        if state.unreachable {
            return Err(GatewayError::status(503));
        }
        Ok(state)
    }

    pub(crate) fn add_page(&self, title: &str, journal: bool) -> Page {
        let page = State::new_page(title, None, journal);
        self.state.lock().unwrap().pages.push(page.clone());
        page
    }

    pub(crate) fn add_block(&self, page_title: &str, content: &str) -> Block {
        let mut state = self.state.lock().unwrap();
        let page_name = state
            .find_page(page_title)
            .map(|page| page.name.clone())
            .unwrap_or_else(|| panic!("no page {page_title}"));
        let block = State::new_block(&page_name, content);
        state.blocks.push(block.clone());
        block
    }

    pub(crate) fn page(&self, title: &str) -> Option<Page> {
        self.state.lock().unwrap().find_page(title).cloned()
    }

    pub(crate) fn page_count(&self) -> usize {
        self.state.lock().unwrap().pages.len()
    }

    pub(crate) fn page_blocks(&self, title: &str) -> Vec<Block> {
        let name = title.to_lowercase();
        self.state
            .lock()
            .unwrap()
            .blocks
            .iter()
            .filter(|block| block.page_name() == Some(name.as_str()))
            .cloned()
            .collect()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn set_query_rows(&self, rows: Vec<Value>) {
        self.state.lock().unwrap().query_rows = rows;
    }

    pub(crate) fn fail_queries(&self, message: &str) {
        self.state.lock().unwrap().query_failure = Some(message.to_string());
    }

    pub(crate) fn last_query(&self) -> Option<String> {
        self.state.lock().unwrap().last_query.clone()
    }

    pub(crate) fn last_insert_parent(&self) -> Option<String> {
        self.state.lock().unwrap().last_insert_parent.clone()
    }

    pub(crate) fn set_graph(&self, name: &str, path: &str) {
        self.state.lock().unwrap().graph = Some(GraphInfo {
            name: name.to_string(),
            path: path.to_string(),
            extra: Map::new(),
        });
    }

    pub(crate) fn set_user_config(&self, key: &str, value: Value) {
        self.state
            .lock()
            .unwrap()
            .user_configs
            .insert(key.to_string(), value);
    }

    pub(crate) fn messages(&self) -> Vec<(String, MessageStatus)> {
        self.state.lock().unwrap().messages.clone()
    }

    pub(crate) fn set_unreachable(&self) {
        self.state.lock().unwrap().unreachable = true;
    }
}

#[async_trait]
impl LogseqApi for FakeGraph {
    async fn get_page(&self, title_or_uuid: &str) -> Result<Option<Page>, GatewayError> {
        let state = self.enter("get_page")?;
        Ok(state.find_page(title_or_uuid).cloned())
    }

    async fn get_all_pages(&self) -> Result<Vec<Page>, GatewayError> {
        Ok(self.enter("get_all_pages")?.pages.clone())
    }

    async fn get_page_blocks_tree(&self, page: &str) -> Result<Vec<Block>, GatewayError> {
        let state = self.enter("get_page_blocks_tree")?;
        let Some(name) = state.find_page(page).map(|p| p.name.clone()) else {
            return Ok(Vec::new());
        };
        Ok(state
            .blocks
            .iter()
            .filter(|block| block.page_name() == Some(name.as_str()))
            .cloned()
            .collect())
    }

    async fn create_page(
        &self,
        title: &str,
        properties: &Map<String, Value>,
        options: CreatePageOptions,
    ) -> Result<Option<Page>, GatewayError> {
        let mut state = self.enter("create_page")?;
        if let Some(existing) = state.find_page(title) {
            return Ok(Some(existing.clone()));
        }
        let props = (!properties.is_empty()).then(|| properties.clone());
        let page = State::new_page(title, props.clone(), false);
        // with properties, the first block is the page's properties block
        if let Some(props) = props {
            let rendered: Vec<String> = props
                .iter()
                .map(|(key, value)| match value {
                    Value::String(text) => format!("{key}:: {text}"),
                    other => format!("{key}:: {other}"),
                })
                .collect();
            let mut pre_block = State::new_block(&page.name, &rendered.join("\n"));
            pre_block.properties = Some(props);
            pre_block.pre_block = Some(true);
            state.blocks.push(pre_block);
        } else if options.create_first_block {
            let first = State::new_block(&page.name, "");
            state.blocks.push(first);
        }
        state.pages.push(page.clone());
        Ok(Some(page))
    }

    async fn delete_page(&self, title: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("delete_page")?;
        let name = title.to_lowercase();
        state.pages.retain(|page| page.name != name);
        state
            .blocks
            .retain(|block| block.page_name() != Some(name.as_str()));
        Ok(())
    }

    async fn get_block(&self, uuid: &str) -> Result<Option<Block>, GatewayError> {
        let state = self.enter("get_block")?;
        Ok(state.blocks.iter().find(|b| b.uuid == uuid).cloned())
    }

    async fn insert_block(
        &self,
        parent: &str,
        content: &str,
        options: InsertBlockOptions,
    ) -> Result<Option<Block>, GatewayError> {
        let mut state = self.enter("insert_block")?;
        state.last_insert_parent = Some(parent.to_string());

        let (page_name, position) = if let Some(index) = state.block_index(parent) {
            let page_name = state.blocks[index].page_name().unwrap_or_default().to_string();
            (page_name, index + 1)
        } else if let Some(page) = state.pages.iter().find(|p| p.uuid == parent) {
            (page.name.clone(), state.blocks.len())
        } else {
            return Ok(None);
        };

        let mut block = State::new_block(&page_name, content);
        block.properties = options.properties;
        state.blocks.insert(position, block.clone());
        Ok(Some(block))
    }

    async fn update_block(&self, uuid: &str, content: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("update_block")?;
        if let Some(index) = state.block_index(uuid) {
            state.blocks[index].content = content.to_string();
        }
        Ok(())
    }

    async fn remove_block(&self, uuid: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("remove_block")?;
        state.blocks.retain(|block| block.uuid != uuid);
        Ok(())
    }

    async fn move_block(
        &self,
        uuid: &str,
        target: &str,
        options: MoveBlockOptions,
    ) -> Result<(), GatewayError> {
        let mut state = self.enter("move_block")?;
        let Some(from) = state.block_index(uuid) else {
            return Ok(());
        };
        let mut block = state.blocks.remove(from);
        let Some(to) = state.block_index(target) else {
            state.blocks.insert(from, block);
            return Ok(());
        };
        block.page = state.blocks[to].page.clone();
        let position = if options.before && !options.children {
            to
        } else {
            to + 1
        };
        state.blocks.insert(position, block);
        Ok(())
    }

    async fn get_block_properties(&self, uuid: &str) -> Result<Map<String, Value>, GatewayError> {
        let state = self.enter("get_block_properties")?;
        Ok(state
            .blocks
            .iter()
            .find(|b| b.uuid == uuid)
            .and_then(|b| b.properties.clone())
            .unwrap_or_default())
    }

    async fn upsert_block_property(
        &self,
        uuid: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), GatewayError> {
        let mut state = self.enter("upsert_block_property")?;
        if let Some(index) = state.block_index(uuid) {
            state.blocks[index]
                .properties
                .get_or_insert_with(Map::new)
                .insert(key.to_string(), value.clone());
        }
        Ok(())
    }

    async fn remove_block_property(&self, uuid: &str, key: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("remove_block_property")?;
        if let Some(index) = state.block_index(uuid) {
            if let Some(props) = state.blocks[index].properties.as_mut() {
                props.remove(key);
            }
        }
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, GatewayError> {
        let state = self.enter("search")?;
        Ok(state
            .blocks
            .iter()
            .filter(|block| block.content.contains(query))
            .cloned()
            .map(SearchResult::from)
            .collect())
    }

    async fn datascript_query(&self, query: &str) -> Result<Vec<Value>, GatewayError> {
        let mut state = self.enter("datascript_query")?;
        state.last_query = Some(query.to_string());
        if let Some(message) = &state.query_failure {
            return Err(GatewayError::Remote {
                message: message.clone(),
                body: json!({ "error": message }),
            });
        }
        Ok(state.query_rows.clone())
    }

    async fn get_current_graph(&self) -> Result<Option<GraphInfo>, GatewayError> {
        Ok(self.enter("get_current_graph")?.graph.clone())
    }

    async fn get_user_configs(&self) -> Result<Map<String, Value>, GatewayError> {
        Ok(self.enter("get_user_configs")?.user_configs.clone())
    }

    async fn show_msg(&self, message: &str, status: MessageStatus) -> Result<(), GatewayError> {
        let mut state = self.enter("show_msg")?;
        state.messages.push((message.to_string(), status));
        Ok(())
    }
}
