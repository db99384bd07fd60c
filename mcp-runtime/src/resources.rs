//! `logseq://` resources: a closed set of URI shapes, each mapped to one
//! read routine against the gateway.

use chrono::{Local, NaiveDate};
use logseq_mcp_core::error::{ErrorPayload, codes};
use logseq_mcp_core::model::Page;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde_json::{Value, json};

use crate::gateway::{FailurePolicy, GatewayError, LogseqApi};
use crate::tools::to_pretty_json;

pub const URI_SCHEME: &str = "logseq://";
const MIME_JSON: &str = "application/json";
const LISTED_PAGE_LIMIT: usize = 20;

/// Characters left alone by JavaScript's `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Unknown resource URI: {0}")]
    Unknown(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    Graph,
    Pages,
    Today,
    Page(String),
    Block(String),
}

impl ResourceUri {
    /// Exact names win over the `page/` and `block/` prefixes.
    pub fn parse(uri: &str) -> Result<Self, ResourceError> {
        let unknown = || ResourceError::Unknown(uri.to_string());
        let rest = uri.strip_prefix(URI_SCHEME).ok_or_else(unknown)?;

        match rest {
            "graph" => return Ok(ResourceUri::Graph),
            "pages" => return Ok(ResourceUri::Pages),
            "today" => return Ok(ResourceUri::Today),
            _ => {}
        }

        let decode = |raw: &str| -> Result<String, ResourceError> {
            let decoded = percent_decode_str(raw)
                .decode_utf8()
                .map_err(|_| unknown())?;
            if decoded.trim().is_empty() {
                return Err(unknown());
            }
            Ok(decoded.into_owned())
        };

        if let Some(raw) = rest.strip_prefix("page/") {
            Ok(ResourceUri::Page(decode(raw)?))
        } else if let Some(raw) = rest.strip_prefix("block/") {
            Ok(ResourceUri::Block(decode(raw)?))
        } else {
            Err(unknown())
        }
    }
}

pub fn page_uri(name: &str) -> String {
    format!("{URI_SCHEME}page/{}", utf8_percent_encode(name, URI_COMPONENT))
}

pub fn templates() -> Vec<Value> {
    let template = |uri_template: &str, name: &str, description: &str| {
        json!({
            "uriTemplate": uri_template,
            "name": name,
            "description": description,
            "mimeType": MIME_JSON,
        })
    };
    vec![
        template(
            "logseq://page/{title}",
            "Logseq Page",
            "A page from the Logseq graph with its blocks",
        ),
        template(
            "logseq://block/{uuid}",
            "Logseq Block",
            "A specific block from the Logseq graph",
        ),
        template(
            "logseq://pages",
            "All Logseq Pages",
            "List of all pages in the Logseq graph",
        ),
        template(
            "logseq://graph",
            "Graph Info",
            "Information about the current Logseq graph",
        ),
        template(
            "logseq://today",
            "Today's Journal",
            "Today's journal page in Logseq",
        ),
    ]
}

fn resource(uri: String, name: String, description: String) -> Value {
    json!({
        "uri": uri,
        "name": name,
        "description": description,
        "mimeType": MIME_JSON,
    })
}

async fn assemble_listing(
    api: &dyn LogseqApi,
    today: NaiveDate,
) -> Result<Vec<Value>, GatewayError> {
    let mut resources = Vec::new();

    if let Some(graph) = api.get_current_graph().await? {
        resources.push(resource(
            format!("{URI_SCHEME}graph"),
            format!("Graph: {}", graph.name),
            format!("Current Logseq graph at {}", graph.path),
        ));
    }
    resources.push(resource(
        format!("{URI_SCHEME}today"),
        "Today's Journal".to_string(),
        format!("Journal page for {}", today.format("%Y-%m-%d")),
    ));
    resources.push(resource(
        format!("{URI_SCHEME}pages"),
        "All Pages".to_string(),
        "Index of all pages in the graph".to_string(),
    ));

    let pages = api.get_all_pages().await?;
    for page in pages
        .iter()
        .filter(|page| !page.is_journal())
        .take(LISTED_PAGE_LIMIT)
    {
        resources.push(resource(
            page_uri(&page.name),
            page.name.clone(),
            format!("Page: {}", page.name),
        ));
    }
    Ok(resources)
}

/// Advisory discovery: any remote failure yields an empty listing.
pub async fn list(api: &dyn LogseqApi, today: NaiveDate) -> Vec<Value> {
    FailurePolicy::Degrade
        .settle(assemble_listing(api, today).await, Vec::new(), "resources_list")
        .unwrap_or_default()
}

/// The journal day in the host's local timezone. Every title candidate,
/// the ISO one included, is built from this single date.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Journal titles tried for `today`, in lookup order.
pub fn journal_title_candidates(date: NaiveDate) -> [String; 3] {
    [
        date.format("%Y-%m-%d").to_string(),
        date.format("%b %-d, %Y").to_string(),
        date.format("%B %-d, %Y").to_string(),
    ]
}

async fn page_with_blocks(api: &dyn LogseqApi, page: Page) -> Result<Value, GatewayError> {
    let blocks = api.get_page_blocks_tree(&page.name).await?;
    Ok(json!({ "page": page, "blocks": blocks }))
}

/// Resolve one resource URI to its JSON payload. Missing entities are
/// payloads; only an unrecognised URI or a remote failure is an error.
pub async fn read(
    api: &dyn LogseqApi,
    uri: &str,
    today: NaiveDate,
) -> Result<Value, ResourceError> {
    let payload = match ResourceUri::parse(uri)? {
        ResourceUri::Graph => {
            let graph = api.get_current_graph().await?;
            let config = api.get_user_configs().await?;
            json!({ "graph": graph, "config": config })
        }
        ResourceUri::Pages => {
            let pages = api.get_all_pages().await?;
            json!({
                "count": pages.len(),
                "pages": pages.iter().map(Page::summary).collect::<Vec<_>>(),
            })
        }
        ResourceUri::Today => {
            let candidates = journal_title_candidates(today);
            for title in &candidates {
                if let Some(page) = api.get_page(title).await? {
                    return Ok(page_with_blocks(api, page).await?);
                }
            }
            ErrorPayload::new(codes::NOT_FOUND, "Today's journal not found")
                .with("tried", json!(candidates))
                .to_value()
        }
        ResourceUri::Page(title) => match api.get_page(&title).await? {
            Some(page) => page_with_blocks(api, page).await?,
            None => ErrorPayload::not_found("Page", &title).to_value(),
        },
        ResourceUri::Block(uuid) => match api.get_block(&uuid).await? {
            Some(block) => json!({ "block": block }),
            None => ErrorPayload::not_found("Block", &uuid).to_value(),
        },
    };
    Ok(payload)
}

/// `resources/read` result body for one payload.
pub fn contents(uri: &str, payload: &Value) -> Value {
    json!({
        "contents": [{
            "uri": uri,
            "mimeType": MIME_JSON,
            "text": to_pretty_json(payload),
        }]
    })
}
