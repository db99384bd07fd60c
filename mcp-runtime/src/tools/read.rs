use logseq_mcp_core::error::ErrorPayload;
use logseq_mcp_core::model::Page;
use serde_json::{Map, Value, json};

use super::{ToolContext, ToolDefinition, empty_schema};
use crate::args::{ToolError, arg_bool, arg_optional_u64, arg_u64, required_string};
use crate::datalog;

const DEFAULT_SEARCH_LIMIT: u64 = 50;

pub(super) fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "logseq_get_page",
            description: "Get a page from Logseq by title or UUID. Returns page metadata and optionally its block tree.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Page title or UUID" },
                    "includeBlocks": {
                        "type": "boolean",
                        "description": "Include the page's block tree (default: true)",
                        "default": true
                    }
                },
                "required": ["title"]
            }),
        },
        ToolDefinition {
            name: "logseq_get_block",
            description: "Get a specific block by UUID with its content and properties.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "uuid": { "type": "string", "description": "Block UUID" }
                },
                "required": ["uuid"]
            }),
        },
        ToolDefinition {
            name: "logseq_list_pages",
            description: "List all pages in the Logseq graph. Can filter by journal status; journalsOnly wins when both filters are set.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "number", "description": "Maximum number of pages to return" },
                    "journalsOnly": {
                        "type": "boolean",
                        "description": "Only return journal pages",
                        "default": false
                    },
                    "excludeJournals": {
                        "type": "boolean",
                        "description": "Exclude journal pages",
                        "default": false
                    }
                }
            }),
        },
        ToolDefinition {
            name: "logseq_search",
            description: "Search for content across all pages and blocks in the Logseq graph.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query text" },
                    "limit": {
                        "type": "number",
                        "description": "Maximum number of results (default: 50)",
                        "default": DEFAULT_SEARCH_LIMIT
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "logseq_get_backlinks",
            description: "Get all blocks that link to a specific page (backlinks/references).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Page title to find backlinks for" }
                },
                "required": ["title"]
            }),
        },
        ToolDefinition {
            name: "logseq_get_graph_info",
            description: "Get information about the current Logseq graph.",
            input_schema: empty_schema(),
        },
    ]
}

pub(super) async fn handle(
    ctx: &ToolContext<'_>,
    name: &str,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    match name {
        "logseq_get_page" => get_page(ctx, args).await,
        "logseq_get_block" => get_block(ctx, args).await,
        "logseq_list_pages" => list_pages(ctx, args).await,
        "logseq_search" => search(ctx, args).await,
        "logseq_get_backlinks" => get_backlinks(ctx, args).await,
        "logseq_get_graph_info" => get_graph_info(ctx).await,
        _ => Err(ToolError::unknown_tool(name)),
    }
}

async fn get_page(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let title = required_string(args, "title")?;
    let include_blocks = arg_bool(args, "includeBlocks", true)?;

    let Some(page) = ctx.api.get_page(&title).await? else {
        return Ok(ErrorPayload::not_found("Page", &title).to_value());
    };

    let mut payload = json!({ "page": page });
    if include_blocks {
        let blocks = ctx.api.get_page_blocks_tree(&page.name).await?;
        payload["blocks"] = json!(blocks);
    }
    Ok(payload)
}

async fn get_block(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let uuid = required_string(args, "uuid")?;
    match ctx.api.get_block(&uuid).await? {
        Some(block) => Ok(json!({ "block": block })),
        None => Ok(ErrorPayload::not_found("Block", &uuid).to_value()),
    }
}

/// At most one journal filter applies; `journalsOnly` takes precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageFilter {
    All,
    JournalsOnly,
    ExcludeJournals,
}

impl PageFilter {
    pub(crate) fn from_flags(journals_only: bool, exclude_journals: bool) -> Self {
        if journals_only {
            PageFilter::JournalsOnly
        } else if exclude_journals {
            PageFilter::ExcludeJournals
        } else {
            PageFilter::All
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            PageFilter::All => "all",
            PageFilter::JournalsOnly => "journals_only",
            PageFilter::ExcludeJournals => "exclude_journals",
        }
    }

    fn keeps(self, page: &Page) -> bool {
        match self {
            PageFilter::All => true,
            PageFilter::JournalsOnly => page.is_journal(),
            PageFilter::ExcludeJournals => !page.is_journal(),
        }
    }
}

async fn list_pages(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let limit = arg_optional_u64(args, "limit")?.filter(|limit| *limit > 0);
    let filter = PageFilter::from_flags(
        arg_bool(args, "journalsOnly", false)?,
        arg_bool(args, "excludeJournals", false)?,
    );

    let mut pages: Vec<Page> = ctx
        .api
        .get_all_pages()
        .await?
        .into_iter()
        .filter(|page| filter.keeps(page))
        .collect();
    if let Some(limit) = limit {
        pages.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }

    Ok(json!({
        "filter": filter.as_str(),
        "count": pages.len(),
        "pages": pages.iter().map(Page::summary).collect::<Vec<_>>(),
    }))
}

async fn search(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let query = required_string(args, "query")?;
    let limit = arg_u64(args, "limit", DEFAULT_SEARCH_LIMIT)?;

    let mut results = ctx.api.search(&query).await?;
    results.truncate(usize::try_from(limit).unwrap_or(usize::MAX));

    Ok(json!({
        "query": query,
        "count": results.len(),
        "results": results,
    }))
}

async fn get_backlinks(
    ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let title = required_string(args, "title")?;
    let rows = ctx.api.datascript_query(&datalog::backlinks(&title)).await?;
    let backlinks: Vec<Value> = datalog::pulled_entities(rows)
        .iter()
        .map(datalog::backlink_record)
        .collect();

    Ok(json!({
        "page": title,
        "count": backlinks.len(),
        "backlinks": backlinks,
    }))
}

async fn get_graph_info(ctx: &ToolContext<'_>) -> Result<Value, ToolError> {
    let graph = ctx.api.get_current_graph().await?;
    let config = ctx.api.get_user_configs().await?;

    Ok(json!({
        "graph": graph,
        "preferredFormat": config.get("preferred-format"),
        "preferredWorkflow": config.get("preferred-workflow"),
    }))
}
