//! Datalog query text for the structured query tools, and the projections
//! that flatten `[[entity] ...]` result tuples into records.
//!
//! Every string spliced into query text goes through [`quote_literal`];
//! property names are spliced as keywords and must pass [`property_keyword`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use logseq_mcp_core::model::UNKNOWN_PAGE;
use serde_json::{Map, Value, json};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

const BLOCK_PULL: &str = "[:block/uuid :block/content {:block/page [:block/name]}]";
const PROPERTY_BLOCK_PULL: &str =
    "[:block/uuid :block/content :block/properties {:block/page [:block/name]}]";
const TASK_PULL: &str =
    "[:block/uuid :block/content :block/marker :block/priority {:block/page [:block/name]}]";
const RECENT_PULL: &str =
    "[:block/uuid :block/content :block/updated-at {:block/page [:block/name]}]";
const PAGE_PULL: &str = "[:block/uuid :block/name :block/original-name]";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid property name '{0}'")]
    InvalidPropertyName(String),
    #[error("Unknown task status '{0}'. Expected one of: TODO, DOING, DONE, NOW, LATER, WAITING, CANCELLED")]
    UnknownMarker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMarker {
    Todo,
    Doing,
    Done,
    Now,
    Later,
    Waiting,
    Cancelled,
}

impl TaskMarker {
    pub const ALL: [TaskMarker; 7] = [
        TaskMarker::Todo,
        TaskMarker::Doing,
        TaskMarker::Done,
        TaskMarker::Now,
        TaskMarker::Later,
        TaskMarker::Waiting,
        TaskMarker::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskMarker::Todo => "TODO",
            TaskMarker::Doing => "DOING",
            TaskMarker::Done => "DONE",
            TaskMarker::Now => "NOW",
            TaskMarker::Later => "LATER",
            TaskMarker::Waiting => "WAITING",
            TaskMarker::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskMarker {
    type Err = QueryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let upper = raw.trim().to_ascii_uppercase();
        TaskMarker::ALL
            .into_iter()
            .find(|marker| marker.as_str() == upper)
            .ok_or_else(|| QueryError::UnknownMarker(raw.to_string()))
    }
}

/// Render a string as a Datalog string literal.
pub fn quote_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// Numbers stay bare; every other JSON value is compared as a string.
pub fn value_literal(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        other => quote_literal(&other.to_string()),
    }
}

pub fn property_keyword(name: &str) -> Result<String, QueryError> {
    let name = name.trim();
    let valid = !name.is_empty()
        && !name.starts_with(':')
        && name
            .chars()
            .all(|ch| !ch.is_whitespace() && !matches!(ch, '[' | ']' | '{' | '}' | '(' | ')' | '"' | ';' | '\\'));
    if valid {
        Ok(format!(":{name}"))
    } else {
        Err(QueryError::InvalidPropertyName(name.to_string()))
    }
}

/// Blocks whose property map holds `keyword`, optionally equal to `value`.
pub fn by_property(keyword: &str, value: Option<&Value>) -> String {
    match value {
        Some(value) => format!(
            "[:find (pull ?b {PROPERTY_BLOCK_PULL})\n :where\n [?b :block/properties ?props]\n [(get ?props {keyword}) ?v]\n [(= ?v {})]]",
            value_literal(value)
        ),
        None => format!(
            "[:find (pull ?b {PROPERTY_BLOCK_PULL})\n :where\n [?b :block/properties ?props]\n [(get ?props {keyword}) _]]"
        ),
    }
}

/// Blocks referencing the page named `tag`, case-insensitively.
pub fn by_tag(tag: &str) -> String {
    format!(
        "[:find (pull ?b {BLOCK_PULL})\n :where\n [?b :block/refs ?r]\n [?r :block/name ?name]\n [(clojure.string/lower-case ?name) ?lower]\n [(= ?lower {})]]",
        quote_literal(&tag.to_lowercase())
    )
}

/// Blocks carrying `marker`, or any known marker when `None`.
pub fn by_marker(marker: Option<TaskMarker>) -> String {
    let predicate = match marker {
        Some(marker) => format!("[(= ?m {})]", quote_literal(marker.as_str())),
        None => {
            let set = TaskMarker::ALL
                .iter()
                .map(|m| quote_literal(m.as_str()))
                .collect::<Vec<_>>()
                .join(" ");
            format!("[(contains? #{{{set}}} ?m)]")
        }
    };
    format!("[:find (pull ?b {TASK_PULL})\n :where\n [?b :block/marker ?m]\n {predicate}]")
}

/// Blocks updated strictly after `cutoff_ms` (epoch milliseconds).
pub fn updated_since(cutoff_ms: i64) -> String {
    format!(
        "[:find (pull ?b {RECENT_PULL})\n :where\n [?b :block/updated-at ?t]\n [(> ?t {cutoff_ms})]]"
    )
}

/// Pages whose lower-cased name starts with `<namespace>/`.
pub fn namespace_children(namespace: &str) -> String {
    let prefix = format!("{}/", namespace.to_lowercase());
    format!(
        "[:find (pull ?p {PAGE_PULL})\n :where\n [?p :block/name ?name]\n [(clojure.string/starts-with? ?name {})]]",
        quote_literal(&prefix)
    )
}

/// Blocks referencing the page titled `title`, case-insensitively.
pub fn backlinks(title: &str) -> String {
    format!(
        "[:find (pull ?b {BLOCK_PULL})\n :where\n [?p :block/name ?name]\n [(clojure.string/lower-case ?name) ?lower-name]\n [(= ?lower-name {})]\n [?b :block/refs ?p]]",
        quote_literal(&title.to_lowercase())
    )
}

/// "now minus `days`" in the remote's epoch-millisecond convention.
pub fn cutoff_millis(now: DateTime<Utc>, days: u64) -> i64 {
    let span = i64::try_from(days)
        .unwrap_or(i64::MAX)
        .saturating_mul(MILLIS_PER_DAY);
    now.timestamp_millis().saturating_sub(span)
}

/// First pulled entity of every result tuple. Bare entity rows are accepted
/// too; anything else is dropped.
pub fn pulled_entities(rows: Vec<Value>) -> Vec<Map<String, Value>> {
    rows.into_iter()
        .filter_map(|row| match row {
            Value::Array(mut tuple) if !tuple.is_empty() => match tuple.swap_remove(0) {
                Value::Object(entity) => Some(entity),
                _ => None,
            },
            Value::Object(entity) => Some(entity),
            _ => None,
        })
        .collect()
}

pub fn attr(entity: &Map<String, Value>, key: &str) -> Value {
    entity.get(key).cloned().unwrap_or(Value::Null)
}

pub fn page_name(entity: &Map<String, Value>) -> Value {
    entity
        .get("block/page")
        .and_then(|page| page.get("block/name"))
        .cloned()
        .unwrap_or(Value::Null)
}

fn updated_at(entity: &Map<String, Value>) -> Option<i64> {
    entity.get("block/updated-at").and_then(Value::as_i64)
}

/// Flat `{uuid, content, page}` record for a pulled block.
pub fn block_record(entity: &Map<String, Value>) -> Value {
    json!({
        "uuid": attr(entity, "block/uuid"),
        "content": attr(entity, "block/content"),
        "page": page_name(entity),
    })
}

/// Backlinks keep the free-text search convention of a sentinel page name.
pub fn backlink_record(entity: &Map<String, Value>) -> Value {
    let mut record = block_record(entity);
    if record["page"].is_null() {
        record["page"] = json!(UNKNOWN_PAGE);
    }
    record
}

pub fn property_record(entity: &Map<String, Value>) -> Value {
    let mut record = block_record(entity);
    record["properties"] = attr(entity, "block/properties");
    record
}

pub fn task_record(entity: &Map<String, Value>, include_content: bool) -> Value {
    let mut record = json!({
        "uuid": attr(entity, "block/uuid"),
        "marker": attr(entity, "block/marker"),
        "priority": attr(entity, "block/priority"),
        "page": page_name(entity),
    });
    if include_content {
        record["content"] = attr(entity, "block/content");
    }
    record
}

pub fn recent_record(entity: &Map<String, Value>) -> Value {
    let updated = updated_at(entity)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|at| json!(at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)))
        .unwrap_or(Value::Null);
    let mut record = block_record(entity);
    record["updatedAt"] = updated;
    record
}

pub fn namespace_record(entity: &Map<String, Value>) -> Value {
    let name = entity
        .get("block/name")
        .filter(|v| !v.is_null())
        .or_else(|| entity.get("block/original-name"))
        .cloned()
        .unwrap_or(Value::Null);
    json!({
        "uuid": attr(entity, "block/uuid"),
        "name": name,
    })
}

/// A truncated result set together with the size it was cut from.
#[derive(Debug, Clone, PartialEq)]
pub struct Matches<T> {
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> Matches<T> {
    pub fn truncate(mut items: Vec<T>, limit: usize) -> Self {
        let total = items.len();
        items.truncate(limit);
        Self { total, items }
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }
}

/// Keep blocks updated strictly after the cutoff, newest first, then truncate.
/// A block without `block/updated-at` is outside every window.
pub fn recent_blocks(
    entities: Vec<Map<String, Value>>,
    cutoff_ms: i64,
    limit: usize,
) -> Matches<Map<String, Value>> {
    let mut fresh: Vec<_> = entities
        .into_iter()
        .filter(|entity| updated_at(entity).is_some_and(|t| t > cutoff_ms))
        .collect();
    fresh.sort_by_key(|entity| std::cmp::Reverse(updated_at(entity)));
    Matches::truncate(fresh, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entity(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn quote_literal_escapes_quotes_and_backslashes() {
        assert_eq!(quote_literal("plain"), "\"plain\"");
        assert_eq!(quote_literal(r#"a"b"#), r#""a\"b""#);
        assert_eq!(quote_literal(r"c:\x"), r#""c:\\x""#);
    }

    #[test]
    fn property_values_quote_everything_but_numbers() {
        assert_eq!(value_literal(&json!(3)), "3");
        assert_eq!(value_literal(&json!(2.5)), "2.5");
        assert_eq!(value_literal(&json!("Active")), "\"Active\"");
        assert_eq!(value_literal(&json!(true)), "\"true\"");
    }

    #[test]
    fn property_query_with_and_without_value() {
        let keyword = property_keyword("status").unwrap();
        let with_value = by_property(&keyword, Some(&json!("Active")));
        assert!(with_value.contains("[(get ?props :status) ?v]"));
        assert!(with_value.contains("[(= ?v \"Active\")]"));

        let without = by_property(&keyword, None);
        assert!(without.contains("[(get ?props :status) _]"));
        assert!(!without.contains("?v"));
    }

    #[test]
    fn injected_quotes_cannot_close_the_literal() {
        let query = by_property(":type", Some(&json!("x\")] [(pr ?b)")));
        assert!(query.contains(r#"[(= ?v "x\")] [(pr ?b)")]"#));
    }

    #[test]
    fn property_keyword_rejects_structural_characters() {
        assert_eq!(property_keyword("due-date").unwrap(), ":due-date");
        assert!(property_keyword("").is_err());
        assert!(property_keyword("a b").is_err());
        assert!(property_keyword("x) _]").is_err());
        assert!(property_keyword(":type").is_err());
    }

    #[test]
    fn tag_and_namespace_queries_are_lower_cased() {
        assert!(by_tag("ProjectX").contains("[(= ?lower \"projectx\")]"));
        assert!(
            namespace_children("Project").contains("(clojure.string/starts-with? ?name \"project/\")")
        );
        assert!(backlinks("Inbox").contains("[(= ?lower-name \"inbox\")]"));
    }

    #[test]
    fn marker_query_uses_closed_set_when_no_status() {
        let all = by_marker(None);
        assert!(all.contains(
            "#{\"TODO\" \"DOING\" \"DONE\" \"NOW\" \"LATER\" \"WAITING\" \"CANCELLED\"}"
        ));
        let doing = by_marker(Some(TaskMarker::Doing));
        assert!(doing.contains("[(= ?m \"DOING\")]"));
    }

    #[test]
    fn task_marker_parses_case_insensitively_and_rejects_unknown() {
        assert_eq!("later".parse::<TaskMarker>(), Ok(TaskMarker::Later));
        assert_eq!(
            "SOMEDAY".parse::<TaskMarker>(),
            Err(QueryError::UnknownMarker("SOMEDAY".to_string()))
        );
    }

    #[test]
    fn cutoff_is_now_minus_days_in_millis() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(cutoff_millis(now, 7), now.timestamp_millis() - 7 * MILLIS_PER_DAY);
        assert!(updated_since(1_000).contains("[(> ?t 1000)]"));
    }

    #[test]
    fn recent_blocks_keep_window_and_sort_descending() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let t = now.timestamp_millis();
        let rows = vec![
            json!([{"block/uuid": "one-day", "block/updated-at": t - MILLIS_PER_DAY}]),
            json!([{"block/uuid": "ten-days", "block/updated-at": t - 10 * MILLIS_PER_DAY}]),
            json!([{"block/uuid": "six-days", "block/updated-at": t - 6 * MILLIS_PER_DAY}]),
        ];

        let matches = recent_blocks(pulled_entities(rows), cutoff_millis(now, 7), 50);
        let uuids: Vec<_> = matches.items.iter().map(|e| attr(e, "block/uuid")).collect();
        assert_eq!(uuids, vec![json!("one-day"), json!("six-days")]);
        assert_eq!(matches.total, 2);
    }

    #[test]
    fn recent_blocks_drop_untimestamped_entries_and_truncate() {
        let entities = vec![
            entity(json!({"block/uuid": "no-ts"})),
            entity(json!({"block/uuid": "new", "block/updated-at": 300})),
            entity(json!({"block/uuid": "old", "block/updated-at": 200})),
            entity(json!({"block/uuid": "mid", "block/updated-at": 250})),
            entity(json!({"block/uuid": "at-cutoff", "block/updated-at": 100})),
        ];
        let matches = recent_blocks(entities, 100, 2);
        assert_eq!(matches.total, 3);
        assert_eq!(matches.count(), 2);
        assert_eq!(attr(&matches.items[0], "block/uuid"), "new");
        assert_eq!(attr(&matches.items[1], "block/uuid"), "mid");
    }

    #[test]
    fn matches_report_total_alongside_truncated_count() {
        let matches = Matches::truncate(vec![1, 2, 3, 4, 5], 3);
        assert_eq!(matches.total, 5);
        assert_eq!(matches.count(), 3);

        let empty = Matches::<i32>::truncate(Vec::new(), 100);
        assert_eq!((empty.total, empty.count()), (0, 0));
    }

    #[test]
    fn projections_flatten_pulled_entities() {
        let rows = vec![
            json!([{
                "block/uuid": "b1",
                "block/content": "TODO write",
                "block/marker": "TODO",
                "block/page": {"block/name": "inbox"}
            }]),
            json!("not a tuple"),
        ];
        let entities = pulled_entities(rows);
        assert_eq!(entities.len(), 1);

        let task = task_record(&entities[0], false);
        assert_eq!(task["marker"], "TODO");
        assert_eq!(task["page"], "inbox");
        assert!(task.get("content").is_none());
        assert_eq!(task["priority"], Value::Null);

        let namespace = namespace_record(&entity(json!({
            "block/uuid": "p1",
            "block/original-name": "Project/Alpha"
        })));
        assert_eq!(namespace["name"], "Project/Alpha");

        let recent = recent_record(&entity(json!({"block/uuid": "r", "block/updated-at": 0})));
        assert_eq!(recent["updatedAt"], "1970-01-01T00:00:00.000Z");
        assert_eq!(backlink_record(&entity(json!({"block/uuid": "x"})))["page"], "unknown");
    }
}
