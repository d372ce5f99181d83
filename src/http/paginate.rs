//! Cursor pagination over GraphQL connections.
//!
//! The page-info extractor is location-agnostic: it finds the first
//! `{pageInfo: {hasNextPage, endCursor}}` object anywhere in the response by
//! depth-first traversal, so queries are free to nest the connection wherever
//! the schema puts it.

use std::future::Future;

use serde_json::Value;

use crate::error::{PrismError, PrismResult};
use crate::http::client::RawRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// Locate the first `pageInfo` object in the value, depth-first. Objects are
/// visited before their siblings, keys in serialization order.
pub fn extract_page_info(value: &Value) -> Option<PageInfo> {
    match value {
        Value::Object(map) => {
            if let Some(info) = map.get("pageInfo") {
                if let Some(has_next) = info.get("hasNextPage").and_then(Value::as_bool) {
                    let end_cursor = info
                        .get("endCursor")
                        .and_then(Value::as_str)
                        .map(|s| s.to_string());
                    return Some(PageInfo {
                        has_next_page: has_next,
                        end_cursor,
                    });
                }
            }
            map.values().find_map(extract_page_info)
        }
        Value::Array(items) => items.iter().find_map(extract_page_info),
        _ => None,
    }
}

/// Drive a cursor-based connection until `hasNextPage = false`, a missing
/// `pageInfo`, or the `max_pages` guard. Returns every fetched record in
/// order. A single page with no further cursor issues exactly one request.
pub async fn paginate_connection<F, Fut>(
    mut fetch_page: F,
    max_pages: usize,
) -> PrismResult<Vec<RawRecord>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = PrismResult<RawRecord>>,
{
    let mut records = Vec::new();
    let mut after: Option<String> = None;
    let mut pages = 0usize;
    loop {
        pages += 1;
        if pages > max_pages {
            return Err(PrismError::UpstreamSemantic(format!(
                "pagination exceeded max_pages guard ({max_pages})"
            )));
        }
        let record = fetch_page(after.clone()).await?;
        let page_info = extract_page_info(&record.response.json);
        records.push(record);
        match page_info {
            Some(PageInfo {
                has_next_page: true,
                end_cursor: Some(cursor),
            }) if !cursor.is_empty() => after = Some(cursor),
            _ => return Ok(records),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::{ExchangeMeta, RequestEnvelope, ResponseEnvelope};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record_with_json(json: Value) -> RawRecord {
        RawRecord {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            request: RequestEnvelope {
                method: "POST".into(),
                url: "https://example.test/graphql".into(),
                headers: BTreeMap::new(),
                body: None,
            },
            response: ResponseEnvelope {
                status: 200,
                headers: BTreeMap::new(),
                json,
            },
            meta: ExchangeMeta {
                tag: "t".into(),
                request_fingerprint: "0".repeat(16),
                attempt: 1,
            },
        }
    }

    #[test]
    fn finds_page_info_nested_anywhere() {
        let value = json!({
            "data": {"repository": {"issueOrPullRequest": {
                "comments": {
                    "pageInfo": {"hasNextPage": true, "endCursor": "abc"},
                    "nodes": []
                }
            }}}
        });
        let info = extract_page_info(&value).unwrap();
        assert!(info.has_next_page);
        assert_eq!(info.end_cursor.as_deref(), Some("abc"));
    }

    #[test]
    fn missing_page_info_yields_none() {
        assert_eq!(extract_page_info(&json!({"data": {"x": 1}})), None);
    }

    #[tokio::test]
    async fn single_page_issues_exactly_one_request() {
        let mut calls = 0usize;
        let records = paginate_connection(
            |_after| {
                calls += 1;
                async move {
                    Ok(record_with_json(json!({
                        "data": {"pageInfo": {"hasNextPage": false, "endCursor": null}}
                    })))
                }
            },
            1000,
        )
        .await
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn follows_cursors_until_exhausted() {
        let mut cursors_seen = Vec::new();
        let records = paginate_connection(
            |after| {
                cursors_seen.push(after.clone());
                let next = match after.as_deref() {
                    None => json!({"hasNextPage": true, "endCursor": "c1"}),
                    Some("c1") => json!({"hasNextPage": true, "endCursor": "c2"}),
                    _ => json!({"hasNextPage": false, "endCursor": null}),
                };
                async move { Ok(record_with_json(json!({"data": {"pageInfo": next}}))) }
            },
            1000,
        )
        .await
        .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            cursors_seen,
            vec![None, Some("c1".to_string()), Some("c2".to_string())]
        );
    }

    #[tokio::test]
    async fn max_pages_guard_trips() {
        let result = paginate_connection(
            |_after| async {
                Ok(record_with_json(json!({
                    "data": {"pageInfo": {"hasNextPage": true, "endCursor": "again"}}
                })))
            },
            3,
        )
        .await;
        assert!(matches!(result, Err(PrismError::UpstreamSemantic(_))));
    }
}
