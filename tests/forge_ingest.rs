//! Ingestion against a local fake forge: rate-limit honoring and idempotent
//! archival.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use prism_devrel::github::{IngestOptions, Ingester, RawArchive};
use prism_devrel::http::client::{HttpClient, JsonRequest};
use prism_devrel::projector::{project_archive, ProjectorOptions};

#[derive(Clone, Default)]
struct ForgeState {
    rate_limited_hits: Arc<AtomicU32>,
}

async fn search_issues(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let q = params.get("q").cloned().unwrap_or_default();
    if q.contains("is:issue") {
        Json(json!({
            "total_count": 1,
            "items": [{
                "number": 5,
                "html_url": "https://github.com/acme/widget/issues/5",
                "user": {"login": "dave"},
                "created_at": "2026-01-09T00:00:00Z"
            }]
        }))
    } else {
        Json(json!({"total_count": 0, "items": []}))
    }
}

async fn graphql(Json(body): Json<Value>) -> Json<Value> {
    let query = body.get("query").and_then(Value::as_str).unwrap_or_default();
    if query.contains("GetIssueOrPRCore") {
        return Json(json!({"data": {"repository": {"issueOrPullRequest": {
            "__typename": "Issue",
            "number": 5,
            "url": "https://github.com/acme/widget/issues/5",
            "title": "Redis cache timeout",
            "body": "connections pile up until the cache times out",
            "state": "CLOSED",
            "createdAt": "2026-01-09T00:00:00Z",
            "closedAt": "2026-01-12T00:00:00Z",
            "author": {"login": "dave"},
            "authorAssociation": "NONE",
            "labels": {"nodes": [{"name": "bug"}]},
            "comments": {"totalCount": 1}
        }}}}));
    }
    if query.contains("GetItemCommentsPage") {
        return Json(json!({"data": {"repository": {"issueOrPullRequest": {
            "__typename": "Issue",
            "comments": {
                "pageInfo": {"hasNextPage": false, "endCursor": null},
                "nodes": [{
                    "id": "C_1",
                    "url": "https://github.com/acme/widget/issues/5#c1",
                    "body": "try raising the pool size",
                    "createdAt": "2026-01-10T00:00:00Z",
                    "author": {"login": "erin"},
                    "authorAssociation": "CONTRIBUTOR"
                }]
            }
        }}}}));
    }
    if query.contains("GetItemTimelinePage") {
        return Json(json!({"data": {"repository": {"issueOrPullRequest": {
            "__typename": "Issue",
            "timelineItems": {
                "pageInfo": {"hasNextPage": false, "endCursor": null},
                "nodes": [{
                    "__typename": "ClosedEvent",
                    "id": "E_1",
                    "createdAt": "2026-01-12T00:00:00Z",
                    "actor": {"login": "dave"}
                }]
            }
        }}}}));
    }
    Json(json!({"data": {}}))
}

async fn rate_limited(State(state): State<ForgeState>) -> impl IntoResponse {
    let hits = state.rate_limited_hits.fetch_add(1, Ordering::SeqCst);
    if hits == 0 {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", "2".parse().unwrap());
        (
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            headers,
            Json(json!({"message": "API rate limit exceeded"})),
        )
            .into_response()
    } else {
        Json(json!({"ok": true})).into_response()
    }
}

async fn spawn_forge() -> (SocketAddr, ForgeState) {
    let state = ForgeState::default();
    let app = Router::new()
        .route("/search/issues", get(search_issues))
        .route("/graphql", post(graphql))
        .route("/rate-limited", get(rate_limited))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn relative_paths(archive: &RawArchive) -> Vec<String> {
    archive
        .iter_record_paths()
        .unwrap()
        .iter()
        .map(|path| {
            path.strip_prefix(archive.root())
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

#[tokio::test]
async fn retry_after_is_honored_with_exactly_one_retry() {
    let (addr, state) = spawn_forge().await;
    let dir = tempfile::tempdir().unwrap();
    let archive = RawArchive::new(dir.path());

    let client = HttpClient::new().unwrap();
    let request = JsonRequest::get(format!("http://{addr}/rate-limited"), "rate_limit_probe");

    let started = std::time::Instant::now();
    let record = client.request_json(&request, Some(&archive)).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(record.response.status, 200);
    assert_eq!(record.meta.attempt, 2);
    assert!(
        elapsed.as_secs_f64() >= 2.0,
        "expected Retry-After sleep, elapsed {elapsed:?}"
    );
    assert_eq!(state.rate_limited_hits.load(Ordering::SeqCst), 2);

    // Both attempts archived under distinct attempt-suffixed paths.
    let paths = relative_paths(&archive);
    assert_eq!(paths.len(), 2);
    assert!(paths.iter().any(|p| p.ends_with("_a1.json")));
    assert!(paths.iter().any(|p| p.ends_with("_a2.json")));
}

#[tokio::test]
async fn ingestion_is_idempotent_and_projectable() {
    let (addr, _) = spawn_forge().await;
    let options = IngestOptions {
        owner: "acme".into(),
        repo: "widget".into(),
        start: "2026-01-06".into(),
        end: "2026-01-20".into(),
        per_page: 100,
        max_items: 0,
        hydrate: true,
    };
    let ingester = Ingester::with_endpoints(
        Some("test-token".into()),
        format!("http://{addr}"),
        format!("http://{addr}/graphql"),
    )
    .unwrap();

    let first_dir = tempfile::tempdir().unwrap();
    let first_archive = RawArchive::new(first_dir.path());
    let summary = ingester.run(&options, &first_archive).await.unwrap();
    assert_eq!(summary.issue_count, 1);
    assert_eq!(summary.pr_count, 0);
    assert_eq!(summary.hydrated_item_count, 1);

    let second_dir = tempfile::tempdir().unwrap();
    let second_archive = RawArchive::new(second_dir.path());
    ingester.run(&options, &second_archive).await.unwrap();

    // Identical parameters produce the identical set of archive paths.
    assert_eq!(relative_paths(&first_archive), relative_paths(&second_archive));
    assert!(first_dir.path().join("run.json").is_file());
    assert!(first_dir.path().join("run_finished.json").is_file());
    assert!(first_dir.path().join("discovered_index.json").is_file());

    // The archive projects into the expected relational rows.
    let views = project_archive(&first_archive, &ProjectorOptions::default()).unwrap();
    assert_eq!(views.work_items.len(), 1);
    assert_eq!(views.work_items[0].item_type, "issue");
    assert_eq!(views.comments.len(), 1);
    assert_eq!(views.comments[0].author_login, "@erin");
    assert_eq!(views.events.len(), 1);
    assert_eq!(views.events[0].event_type, "Closed");
    // issue_opened from discovery plus the projected comment activity.
    assert!(views
        .activity
        .iter()
        .any(|a| a.activity == "issue_opened" && a.login == "@dave"));
    assert!(views
        .activity
        .iter()
        .any(|a| a.activity == "commented" && a.login == "@erin"));
}
