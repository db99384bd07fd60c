use logseq_mcp_core::error::{ErrorPayload, codes};
use logseq_mcp_core::model::{Block, Page};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::{ToolContext, ToolDefinition};
use crate::args::{
    ToolError, arg_bool, arg_optional_object, arg_optional_string, required_string, required_text,
    required_value,
};
use crate::gateway::{
    CreatePageOptions, InsertBlockOptions, LogseqApi, MessageStatus, MoveBlockOptions,
};

pub(super) fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "logseq_create_page",
            description: "Create a new page in Logseq with optional properties and initial content. Returns the existing page instead of creating a duplicate.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Page title" },
                    "properties": {
                        "type": "object",
                        "description": "Page properties (e.g., {type: 'Project', status: 'Active'})",
                        "additionalProperties": true
                    },
                    "content": { "type": "string", "description": "Initial content for the first block" }
                },
                "required": ["title"]
            }),
        },
        ToolDefinition {
            name: "logseq_delete_page",
            description: "Delete a page from Logseq. This action cannot be undone.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Page title to delete" }
                },
                "required": ["title"]
            }),
        },
        ToolDefinition {
            name: "logseq_create_block",
            description: "Create a new block under a parent page or block.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "parent": { "type": "string", "description": "Parent page title or block UUID" },
                    "content": { "type": "string", "description": "Block content (supports markdown)" },
                    "properties": {
                        "type": "object",
                        "description": "Block properties",
                        "additionalProperties": true
                    },
                    "sibling": {
                        "type": "boolean",
                        "description": "Insert as sibling instead of child (default: false)",
                        "default": false
                    }
                },
                "required": ["parent", "content"]
            }),
        },
        ToolDefinition {
            name: "logseq_update_block",
            description: "Update the content of an existing block.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "uuid": { "type": "string", "description": "Block UUID to update" },
                    "content": { "type": "string", "description": "New block content" }
                },
                "required": ["uuid", "content"]
            }),
        },
        ToolDefinition {
            name: "logseq_delete_block",
            description: "Delete a block and all its children. This action cannot be undone.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "uuid": { "type": "string", "description": "Block UUID to delete" }
                },
                "required": ["uuid"]
            }),
        },
        ToolDefinition {
            name: "logseq_move_block",
            description: "Move a block next to or under another block.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "uuid": { "type": "string", "description": "Block UUID to move" },
                    "target": { "type": "string", "description": "Target block UUID" },
                    "before": {
                        "type": "boolean",
                        "description": "Place before the target instead of after it (default: false)",
                        "default": false
                    },
                    "children": {
                        "type": "boolean",
                        "description": "Place as a child of the target (default: false)",
                        "default": false
                    }
                },
                "required": ["uuid", "target"]
            }),
        },
        ToolDefinition {
            name: "logseq_append_to_page",
            description: "Append content to the end of a page. Creates the page if it doesn't exist.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Page title" },
                    "content": { "type": "string", "description": "Content to append" }
                },
                "required": ["title", "content"]
            }),
        },
        ToolDefinition {
            name: "logseq_set_property",
            description: "Set a property on a block or page. Returns the full property map after the change.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "uuid": { "type": "string", "description": "Block/page UUID" },
                    "key": { "type": "string", "description": "Property name" },
                    "value": { "description": "Property value (string, number, boolean)" }
                },
                "required": ["uuid", "key", "value"]
            }),
        },
        ToolDefinition {
            name: "logseq_remove_property",
            description: "Remove a property from a block or page. Returns the full property map after the change.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "uuid": { "type": "string", "description": "Block/page UUID" },
                    "key": { "type": "string", "description": "Property name to remove" }
                },
                "required": ["uuid", "key"]
            }),
        },
        ToolDefinition {
            name: "logseq_sync_notes",
            description: "Sync conversation notes to a Logseq page with timestamp. Ideal for saving conversation summaries.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Note title (prefixed with '<pagePrefix>/')" },
                    "notes": { "type": "string", "description": "Note content to sync" },
                    "pagePrefix": {
                        "type": "string",
                        "description": "Page prefix (default: 'Claude Notes')",
                        "default": "Claude Notes"
                    }
                },
                "required": ["title", "notes"]
            }),
        },
        ToolDefinition {
            name: "logseq_show_message",
            description: "Show a toast message in the Logseq UI.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Message text" },
                    "status": {
                        "type": "string",
                        "enum": ["success", "warning", "error"],
                        "default": "success"
                    }
                },
                "required": ["message"]
            }),
        },
    ]
}

pub(super) async fn handle(
    ctx: &ToolContext<'_>,
    name: &str,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    match name {
        "logseq_create_page" => create_page(ctx, args).await,
        "logseq_delete_page" => delete_page(ctx, args).await,
        "logseq_create_block" => create_block(ctx, args).await,
        "logseq_update_block" => update_block(ctx, args).await,
        "logseq_delete_block" => delete_block(ctx, args).await,
        "logseq_move_block" => move_block(ctx, args).await,
        "logseq_append_to_page" => append_to_page(ctx, args).await,
        "logseq_set_property" => set_property(ctx, args).await,
        "logseq_remove_property" => remove_property(ctx, args).await,
        "logseq_sync_notes" => sync_notes(ctx, args).await,
        "logseq_show_message" => show_message(ctx, args).await,
        _ => Err(ToolError::unknown_tool(name)),
    }
}

/// Where a new block goes: straight under a block, or under a page's
/// first block (the page itself when it has none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BlockParent {
    ById(String),
    ByTitle(String),
}

impl BlockParent {
    pub(crate) fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.len() == 36 && Uuid::parse_str(raw).is_ok() {
            BlockParent::ById(raw.to_string())
        } else {
            BlockParent::ByTitle(raw.to_string())
        }
    }
}

fn create_failed(title: &str) -> Value {
    ErrorPayload::new(codes::CREATE_FAILED, format!("Failed to create page: {title}")).to_value()
}

async fn create_page(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let title = required_string(args, "title")?;
    let properties = arg_optional_object(args, "properties")?.unwrap_or_default();
    let content = arg_optional_string(args, "content")?;

    if let Some(existing) = ctx.api.get_page(&title).await? {
        return Ok(ErrorPayload::new(
            codes::ALREADY_EXISTS,
            format!("Page already exists: {title}"),
        )
        .with("page", json!(existing))
        .to_value());
    }

    let Some(page) = ctx
        .api
        .create_page(&title, &properties, CreatePageOptions::with_first_block())
        .await?
    else {
        return Ok(create_failed(&title));
    };

    if let Some(content) = content {
        // the properties block stays untouched
        let blocks = ctx.api.get_page_blocks_tree(&page.name).await?;
        match blocks.iter().find(|block| block.pre_block != Some(true)) {
            Some(first) => ctx.api.update_block(&first.uuid, &content).await?,
            None => {
                append_block(ctx.api, &page, &content).await?;
            }
        }
    }

    Ok(json!({ "success": true, "page": page }))
}

async fn delete_page(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let title = required_string(args, "title")?;
    if ctx.api.get_page(&title).await?.is_none() {
        return Ok(ErrorPayload::not_found("Page", &title).to_value());
    }

    ctx.api.delete_page(&title).await?;
    Ok(json!({ "success": true, "deleted": title }))
}

async fn create_block(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let parent = required_string(args, "parent")?;
    let content = required_text(args, "content")?;
    let properties = arg_optional_object(args, "properties")?;
    let sibling = arg_bool(args, "sibling", false)?;

    let parent_uuid = match BlockParent::classify(&parent) {
        BlockParent::ById(uuid) => uuid,
        BlockParent::ByTitle(title) => {
            let Some(page) = ctx.api.get_page(&title).await? else {
                return Ok(ErrorPayload::not_found("Parent", &title).to_value());
            };
            let blocks = ctx.api.get_page_blocks_tree(&page.name).await?;
            match blocks.first() {
                Some(first) => first.uuid.clone(),
                None => page.uuid,
            }
        }
    };

    let block = ctx
        .api
        .insert_block(
            &parent_uuid,
            &content,
            InsertBlockOptions {
                sibling,
                properties,
            },
        )
        .await?;
    Ok(json!({ "success": true, "block": block }))
}

async fn update_block(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let uuid = required_string(args, "uuid")?;
    let content = required_text(args, "content")?;

    if ctx.api.get_block(&uuid).await?.is_none() {
        return Ok(ErrorPayload::not_found("Block", &uuid).to_value());
    }

    ctx.api.update_block(&uuid, &content).await?;
    let updated = ctx.api.get_block(&uuid).await?;
    Ok(json!({ "success": true, "block": updated }))
}

async fn delete_block(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let uuid = required_string(args, "uuid")?;
    if ctx.api.get_block(&uuid).await?.is_none() {
        return Ok(ErrorPayload::not_found("Block", &uuid).to_value());
    }

    ctx.api.remove_block(&uuid).await?;
    Ok(json!({ "success": true, "deleted": uuid }))
}

async fn move_block(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let uuid = required_string(args, "uuid")?;
    let target = required_string(args, "target")?;
    let options = MoveBlockOptions {
        before: arg_bool(args, "before", false)?,
        children: arg_bool(args, "children", false)?,
    };

    if ctx.api.get_block(&uuid).await?.is_none() {
        return Ok(ErrorPayload::not_found("Block", &uuid).to_value());
    }
    if ctx.api.get_block(&target).await?.is_none() {
        return Ok(ErrorPayload::not_found("Target block", &target).to_value());
    }

    ctx.api.move_block(&uuid, &target, options).await?;
    let moved = ctx.api.get_block(&uuid).await?;
    Ok(json!({ "success": true, "block": moved }))
}

async fn ensure_page(
    api: &dyn LogseqApi,
    title: &str,
    properties: &Map<String, Value>,
) -> Result<Option<Page>, ToolError> {
    if let Some(page) = api.get_page(title).await? {
        return Ok(Some(page));
    }
    tracing::info!(page = title, "creating missing page");
    Ok(api
        .create_page(title, properties, CreatePageOptions::with_first_block())
        .await?)
}

/// Insert after the page's last top-level block, or as its first child.
async fn append_block(
    api: &dyn LogseqApi,
    page: &Page,
    content: &str,
) -> Result<Option<Block>, ToolError> {
    let blocks = api.get_page_blocks_tree(&page.name).await?;
    let block = match blocks.last() {
        Some(last) => {
            api.insert_block(&last.uuid, content, InsertBlockOptions::sibling())
                .await?
        }
        None => {
            api.insert_block(&page.uuid, content, InsertBlockOptions::child())
                .await?
        }
    };
    Ok(block)
}

async fn append_to_page(
    ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let title = required_string(args, "title")?;
    let content = required_text(args, "content")?;

    let Some(page) = ensure_page(ctx.api, &title, &Map::new()).await? else {
        return Ok(create_failed(&title));
    };
    let block = append_block(ctx.api, &page, &content).await?;
    Ok(json!({ "success": true, "block": block }))
}

async fn set_property(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let uuid = required_string(args, "uuid")?;
    let key = required_string(args, "key")?;
    let value = required_value(args, "value")?;

    ctx.api.upsert_block_property(&uuid, &key, &value).await?;
    let properties = ctx.api.get_block_properties(&uuid).await?;
    Ok(json!({ "success": true, "properties": properties }))
}

async fn remove_property(
    ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let uuid = required_string(args, "uuid")?;
    let key = required_string(args, "key")?;

    ctx.api.remove_block_property(&uuid, &key).await?;
    let properties = ctx.api.get_block_properties(&uuid).await?;
    Ok(json!({ "success": true, "properties": properties }))
}

async fn sync_notes(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let title = required_string(args, "title")?;
    let notes = required_text(args, "notes")?;
    let prefix = arg_optional_string(args, "pagePrefix")?
        .unwrap_or_else(|| ctx.notes_prefix.to_string());

    let page_title = format!("{prefix}/{title}");
    let timestamp = ctx.now.format("%Y-%m-%d %H:%M").to_string();
    let content = format!("## {timestamp}\n\n{notes}\n\n---");

    let mut properties = Map::new();
    properties.insert("type".to_string(), json!(prefix));
    properties.insert(
        "created".to_string(),
        json!(ctx.now.format("%Y-%m-%d").to_string()),
    );

    let Some(page) = ensure_page(ctx.api, &page_title, &properties).await? else {
        return Ok(create_failed(&page_title));
    };
    let block = append_block(ctx.api, &page, &content).await?;
    Ok(json!({ "success": true, "page": page_title, "block": block }))
}

async fn show_message(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let message = required_string(args, "message")?;
    let status = match arg_optional_string(args, "status")? {
        Some(raw) => raw
            .parse::<MessageStatus>()
            .map_err(|e| ToolError::validation(e).with_field("status"))?,
        None => MessageStatus::default(),
    };

    ctx.api.show_msg(&message, status).await?;
    Ok(json!({ "success": true, "status": status.as_str() }))
}
