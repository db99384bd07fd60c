use logseq_mcp_core::error::{ErrorPayload, codes};
use serde_json::{Map, Value, json};

use super::{ToolContext, ToolDefinition};
use crate::args::{ToolError, arg_bool, arg_optional_string, arg_u64, required_string};
use crate::datalog::{self, Matches, TaskMarker};

const DEFAULT_TAG_LIMIT: u64 = 100;
const DEFAULT_TASK_LIMIT: u64 = 100;
const DEFAULT_RECENT_DAYS: u64 = 7;
const DEFAULT_RECENT_LIMIT: u64 = 50;

pub(super) fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "logseq_datalog_query",
            description: "Execute a Datalog query against the Logseq database.\n\nExamples:\n- All pages: [:find (pull ?p [*]) :where [?p :block/name]]\n- Blocks with TODO: [:find (pull ?b [*]) :where [?b :block/marker \"TODO\"]]\n- Pages with a property: [:find (pull ?p [*]) :where [?p :block/properties ?props] [(get ?props :type) ?t] [(= ?t \"Project\")]]",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Datalog query in EDN format" }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "logseq_find_by_property",
            description: "Find all blocks/pages with a specific property value. Useful for finding entities by type, status, etc.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "property": { "type": "string", "description": "Property name to search for" },
                    "value": {
                        "description": "Property value to match (optional - if not provided, finds all with that property)"
                    }
                },
                "required": ["property"]
            }),
        },
        ToolDefinition {
            name: "logseq_find_by_tag",
            description: "Find all blocks that reference a specific tag/page.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tag": { "type": "string", "description": "Tag name (without #)" },
                    "limit": {
                        "type": "number",
                        "description": "Maximum results to return (default: 100)",
                        "default": DEFAULT_TAG_LIMIT
                    }
                },
                "required": ["tag"]
            }),
        },
        ToolDefinition {
            name: "logseq_find_tasks",
            description: "Find tasks/todos with optional status filter.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "description": "Task status filter: TODO, DOING, DONE, NOW, LATER, WAITING, CANCELLED",
                        "enum": TaskMarker::ALL.iter().map(|m| m.as_str()).collect::<Vec<_>>()
                    },
                    "includeContent": {
                        "type": "boolean",
                        "description": "Include full block content (default: true)",
                        "default": true
                    },
                    "limit": {
                        "type": "number",
                        "description": "Maximum results (default: 100)",
                        "default": DEFAULT_TASK_LIMIT
                    }
                }
            }),
        },
        ToolDefinition {
            name: "logseq_find_recent_blocks",
            description: "Find recently modified blocks across all pages.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "days": {
                        "type": "number",
                        "description": "Number of days to look back (default: 7)",
                        "default": DEFAULT_RECENT_DAYS
                    },
                    "limit": {
                        "type": "number",
                        "description": "Maximum results (default: 50)",
                        "default": DEFAULT_RECENT_LIMIT
                    }
                }
            }),
        },
        ToolDefinition {
            name: "logseq_find_page_hierarchy",
            description: "Find all pages in a namespace hierarchy (e.g., all pages under 'Project/').",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "namespace": { "type": "string", "description": "Parent namespace to search under" }
                },
                "required": ["namespace"]
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
        "logseq_datalog_query" => datalog_query(ctx, args).await,
        "logseq_find_by_property" => find_by_property(ctx, args).await,
        "logseq_find_by_tag" => find_by_tag(ctx, args).await,
        "logseq_find_tasks" => find_tasks(ctx, args).await,
        "logseq_find_recent_blocks" => find_recent_blocks(ctx, args).await,
        "logseq_find_page_hierarchy" => find_page_hierarchy(ctx, args).await,
        _ => Err(ToolError::unknown_tool(name)),
    }
}

fn limit_arg(args: &Map<String, Value>, key: &str, default: u64) -> Result<usize, ToolError> {
    Ok(usize::try_from(arg_u64(args, key, default)?).unwrap_or(usize::MAX))
}

/// Raw queries report remote rejection as a business error carrying the
/// query text, so the caller can correct it.
async fn datalog_query(
    ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let query = required_string(args, "query")?;
    match ctx.api.datascript_query(&query).await {
        Ok(results) => Ok(json!({
            "query": query,
            "count": results.len(),
            "results": results,
        })),
        Err(err) => {
            tracing::info!(error = %err, "datalog query rejected");
            Ok(
                ErrorPayload::new(codes::QUERY_FAILED, format!("Query failed: {err}"))
                    .with("query", json!(query))
                    .to_value(),
            )
        }
    }
}

async fn find_by_property(
    ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let property = required_string(args, "property")?;
    let keyword = datalog::property_keyword(&property)
        .map_err(|e| ToolError::validation(e.to_string()).with_field("property"))?;
    let value = args.get("value").filter(|v| !v.is_null());

    let rows = ctx
        .api
        .datascript_query(&datalog::by_property(&keyword, value))
        .await?;
    let results: Vec<Value> = datalog::pulled_entities(rows)
        .iter()
        .map(datalog::property_record)
        .collect();

    Ok(json!({
        "property": property,
        "value": value,
        "count": results.len(),
        "results": results,
    }))
}

async fn find_by_tag(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let tag = required_string(args, "tag")?;
    let limit = limit_arg(args, "limit", DEFAULT_TAG_LIMIT)?;

    let rows = ctx.api.datascript_query(&datalog::by_tag(&tag)).await?;
    let matches = Matches::truncate(datalog::pulled_entities(rows), limit);

    Ok(json!({
        "tag": tag,
        "count": matches.count(),
        "totalMatches": matches.total,
        "results": matches.items.iter().map(datalog::block_record).collect::<Vec<_>>(),
    }))
}

async fn find_tasks(ctx: &ToolContext<'_>, args: &Map<String, Value>) -> Result<Value, ToolError> {
    let marker = arg_optional_string(args, "status")?
        .map(|raw| raw.parse::<TaskMarker>())
        .transpose()
        .map_err(|e| ToolError::validation(e.to_string()).with_field("status"))?;
    let include_content = arg_bool(args, "includeContent", true)?;
    let limit = limit_arg(args, "limit", DEFAULT_TASK_LIMIT)?;

    let rows = ctx.api.datascript_query(&datalog::by_marker(marker)).await?;
    let matches = Matches::truncate(datalog::pulled_entities(rows), limit);
    let tasks: Vec<Value> = matches
        .items
        .iter()
        .map(|entity| datalog::task_record(entity, include_content))
        .collect();

    Ok(json!({
        "status": marker.map_or("ALL", TaskMarker::as_str),
        "count": matches.count(),
        "totalMatches": matches.total,
        "tasks": tasks,
    }))
}

async fn find_recent_blocks(
    ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let days = arg_u64(args, "days", DEFAULT_RECENT_DAYS)?;
    let limit = limit_arg(args, "limit", DEFAULT_RECENT_LIMIT)?;
    let cutoff = datalog::cutoff_millis(ctx.now, days);

    let rows = ctx
        .api
        .datascript_query(&datalog::updated_since(cutoff))
        .await?;
    // the remote predicate is not trusted to have filtered the window
    let matches = datalog::recent_blocks(datalog::pulled_entities(rows), cutoff, limit);

    Ok(json!({
        "days": days,
        "count": matches.count(),
        "totalMatches": matches.total,
        "blocks": matches.items.iter().map(datalog::recent_record).collect::<Vec<_>>(),
    }))
}

async fn find_page_hierarchy(
    ctx: &ToolContext<'_>,
    args: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let namespace = required_string(args, "namespace")?;

    let rows = ctx
        .api
        .datascript_query(&datalog::namespace_children(&namespace))
        .await?;
    let children: Vec<Value> = datalog::pulled_entities(rows)
        .iter()
        .map(datalog::namespace_record)
        .collect();
    let parent = ctx
        .api
        .get_page(&namespace)
        .await?
        .map(|page| json!({ "uuid": page.uuid, "name": page.name }));

    Ok(json!({
        "namespace": namespace,
        "parent": parent,
        "count": children.len(),
        "children": children,
    }))
}
