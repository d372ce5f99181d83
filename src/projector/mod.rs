//! Projection of archived raw records into relational views.
//!
//! A pure transform: rows are derived entirely from `raw_http/**/*.json` and
//! are fully rebuilt on each run. Records are dispatched on their `meta.tag`
//! prefix; everything else about the response shape is discovered by field
//! access with graceful degradation on missing optionals.

pub mod export;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::PrismResult;
use crate::github::archive::RawArchive;
use crate::http::client::RawRecord;

pub const DEFAULT_MAX_BODY_CHARS: usize = 280;
pub const DEFAULT_MAX_ITEM_BODY_CHARS: usize = 800;

#[derive(Debug, Clone)]
pub struct ProjectorOptions {
    pub max_body_chars: usize,
    pub max_item_body_chars: usize,
}

impl Default for ProjectorOptions {
    fn default() -> Self {
        Self {
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            max_item_body_chars: DEFAULT_MAX_ITEM_BODY_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItemRow {
    pub repo_full_name: String,
    pub number: i64,
    pub item_type: String,
    pub url: String,
    pub title: String,
    pub body_excerpt: String,
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub author_login: String,
    pub author_association: String,
    pub labels: Vec<String>,
    pub milestone_title: String,
    pub is_merged: bool,
    pub merged_at: Option<DateTime<Utc>>,
    pub merged_by: String,
    pub comment_count: Option<i64>,
    pub review_count: Option<i64>,
    pub changed_files: Option<i64>,
    pub additions: Option<i64>,
    pub deletions: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItemEventRow {
    pub repo_full_name: String,
    pub number: i64,
    pub item_type: String,
    pub event_id: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_login: String,
    pub subject_type: String,
    pub subject: String,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentRow {
    pub repo_full_name: String,
    pub number: i64,
    pub item_type: String,
    pub comment_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub author_login: String,
    pub author_association: String,
    pub body_excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewRow {
    pub repo_full_name: String,
    pub pr_number: i64,
    pub review_id: String,
    pub review_state: String,
    pub submitted_at: DateTime<Utc>,
    pub author_login: String,
    pub body_excerpt: String,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserActivityRow {
    pub repo_full_name: String,
    pub login: String,
    pub activity: String,
    pub number: i64,
    pub occurred_at: Option<DateTime<Utc>>,
    pub reference: String,
}

#[derive(Debug, Default, Clone)]
pub struct ProjectedViews {
    pub work_items: Vec<WorkItemRow>,
    pub events: Vec<WorkItemEventRow>,
    pub comments: Vec<CommentRow>,
    pub reviews: Vec<ReviewRow>,
    pub activity: Vec<UserActivityRow>,
}

/// Rebuild all views from the archive.
pub fn project_archive(
    archive: &RawArchive,
    options: &ProjectorOptions,
) -> PrismResult<ProjectedViews> {
    let mut work_items: BTreeMap<(String, i64, String), WorkItemRow> = BTreeMap::new();
    let mut views = ProjectedViews::default();

    for path in archive.iter_record_paths()? {
        let record = match RawArchive::read_record(&path) {
            Ok(record) => record,
            Err(_) => continue,
        };
        let partial = extract_rows_from_record(&record, options);
        for row in partial.work_items {
            let key = (row.repo_full_name.clone(), row.number, row.item_type.clone());
            work_items.insert(key, row);
        }
        views.events.extend(partial.events);
        views.comments.extend(partial.comments);
        views.reviews.extend(partial.reviews);
        views.activity.extend(partial.activity);
    }

    views.work_items = work_items.into_values().collect();
    views.events.sort_by(|a, b| {
        (&a.repo_full_name, a.number, a.occurred_at, &a.event_type, &a.event_id).cmp(&(
            &b.repo_full_name,
            b.number,
            b.occurred_at,
            &b.event_type,
            &b.event_id,
        ))
    });
    views.comments.sort_by(|a, b| {
        (&a.repo_full_name, a.number, a.created_at, &a.comment_id).cmp(&(
            &b.repo_full_name,
            b.number,
            b.created_at,
            &b.comment_id,
        ))
    });
    views.reviews.sort_by(|a, b| {
        (&a.repo_full_name, a.pr_number, a.submitted_at, &a.review_id).cmp(&(
            &b.repo_full_name,
            b.pr_number,
            b.submitted_at,
            &b.review_id,
        ))
    });
    views.activity.sort_by(|a, b| {
        (&a.repo_full_name, &a.login, &a.activity, a.number).cmp(&(
            &b.repo_full_name,
            &b.login,
            &b.activity,
            b.number,
        ))
    });
    debug!(
        work_items = views.work_items.len(),
        events = views.events.len(),
        comments = views.comments.len(),
        reviews = views.reviews.len(),
        activity = views.activity.len(),
        "projection complete"
    );
    Ok(views)
}

/// Extract whatever rows a single record contributes, keyed off its tag.
pub fn extract_rows_from_record(record: &RawRecord, options: &ProjectorOptions) -> ProjectedViews {
    let mut out = ProjectedViews::default();
    let tag = record.meta.tag.as_str();

    let Some(repo) = derive_repo_full_name(record) else {
        return out;
    };

    if tag.starts_with("discovery_pr") || tag.starts_with("discovery_issue") {
        let activity = if tag.starts_with("discovery_pr") {
            "pr_opened"
        } else {
            "issue_opened"
        };
        let items = record
            .response
            .json
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for item in items {
            let Some(number) = item.get("number").and_then(Value::as_i64) else {
                continue;
            };
            let Some(login) = item
                .pointer("/user/login")
                .and_then(Value::as_str)
                .filter(|l| !l.is_empty())
            else {
                continue;
            };
            out.activity.push(UserActivityRow {
                repo_full_name: repo.clone(),
                login: format!("@{}", login.trim_start_matches('@')),
                activity: activity.to_string(),
                number,
                occurred_at: item
                    .get("created_at")
                    .and_then(Value::as_str)
                    .and_then(parse_time),
                reference: item
                    .get("html_url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        return out;
    }

    let data = record.response.json.get("data");

    if tag.starts_with("graphql_core_item") {
        if let Some(item) = data.and_then(|d| d.pointer("/repository/issueOrPullRequest")) {
            if let Some(row) = extract_work_item(&repo, item, options.max_item_body_chars) {
                out.work_items.push(row);
            }
        }
        return out;
    }

    if tag.starts_with("graphql_timeline_item") {
        let Some((item_type, number)) = item_identity(record) else {
            return out;
        };
        if let Some(nodes) = data
            .and_then(|d| d.pointer("/repository/issueOrPullRequest/timelineItems/nodes"))
            .and_then(Value::as_array)
        {
            out.events
                .extend(extract_events(&repo, nodes, &item_type, number));
        }
        return out;
    }

    if tag.starts_with("graphql_comments_item") {
        let Some((item_type, number)) = item_identity(record) else {
            return out;
        };
        if let Some(nodes) = data
            .and_then(|d| d.pointer("/repository/issueOrPullRequest/comments/nodes"))
            .and_then(Value::as_array)
        {
            let rows = extract_comments(&repo, nodes, &item_type, number, options.max_body_chars);
            for row in &rows {
                if !row.author_login.is_empty() {
                    out.activity.push(UserActivityRow {
                        repo_full_name: repo.clone(),
                        login: row.author_login.clone(),
                        activity: "commented".to_string(),
                        number,
                        occurred_at: Some(row.created_at),
                        reference: row.url.clone(),
                    });
                }
            }
            out.comments.extend(rows);
        }
        return out;
    }

    if tag.starts_with("graphql_reviews_pr") {
        let Some(number) = derive_number(record) else {
            return out;
        };
        if let Some(nodes) = data
            .and_then(|d| d.pointer("/repository/pullRequest/reviews/nodes"))
            .and_then(Value::as_array)
        {
            let rows = extract_reviews(&repo, nodes, number, options.max_body_chars);
            for row in &rows {
                if !row.author_login.is_empty() {
                    out.activity.push(UserActivityRow {
                        repo_full_name: repo.clone(),
                        login: row.author_login.clone(),
                        activity: "reviewed".to_string(),
                        number,
                        occurred_at: Some(row.submitted_at),
                        reference: row.reference.clone(),
                    });
                }
            }
            out.reviews.extend(rows);
        }
        return out;
    }

    out
}

fn extract_work_item(repo: &str, item: &Value, max_item_body_chars: usize) -> Option<WorkItemRow> {
    let typename = item.get("__typename").and_then(Value::as_str)?;
    if typename != "Issue" && typename != "PullRequest" {
        return None;
    }
    let number = item.get("number").and_then(Value::as_i64)?;
    let item_type = if typename == "PullRequest" { "pr" } else { "issue" };

    let mut labels: Vec<String> = item
        .pointer("/labels/nodes")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| n.get("name").and_then(Value::as_str))
                .filter(|name| !name.is_empty())
                .map(|name| name.to_string())
                .collect()
        })
        .unwrap_or_default();
    labels.sort();
    labels.dedup();

    let merged_at = if typename == "PullRequest" {
        item.get("mergedAt").and_then(Value::as_str).and_then(parse_time)
    } else {
        None
    };

    Some(WorkItemRow {
        repo_full_name: repo.to_string(),
        number,
        item_type: item_type.to_string(),
        url: item
            .get("url")
            .and_then(Value::as_str)
            .map(|u| u.to_string())
            .unwrap_or_else(|| build_work_item_url(repo, item_type, number)),
        title: str_field(item, "title"),
        body_excerpt: safe_excerpt(item.get("body").and_then(Value::as_str), max_item_body_chars),
        state: str_field(item, "state"),
        created_at: item.get("createdAt").and_then(Value::as_str).and_then(parse_time),
        closed_at: item.get("closedAt").and_then(Value::as_str).and_then(parse_time),
        author_login: actor_login(item.get("author")).unwrap_or_default(),
        author_association: str_field(item, "authorAssociation"),
        labels,
        milestone_title: item
            .pointer("/milestone/title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        is_merged: merged_at.is_some(),
        merged_at,
        merged_by: actor_login(item.get("mergedBy")).unwrap_or_default(),
        comment_count: item.pointer("/comments/totalCount").and_then(Value::as_i64),
        review_count: item.pointer("/reviews/totalCount").and_then(Value::as_i64),
        changed_files: item.get("changedFiles").and_then(Value::as_i64),
        additions: item.get("additions").and_then(Value::as_i64),
        deletions: item.get("deletions").and_then(Value::as_i64),
    })
}

fn extract_events(
    repo: &str,
    nodes: &[Value],
    item_type: &str,
    number: i64,
) -> Vec<WorkItemEventRow> {
    let reference = build_work_item_url(repo, item_type, number);
    let mut out = Vec::new();
    for node in nodes {
        let Some(typename) = node.get("__typename").and_then(Value::as_str) else {
            continue;
        };
        let Some(event_type) = canonical_event_name(typename) else {
            continue;
        };
        let Some(occurred_at) = node.get("createdAt").and_then(Value::as_str).and_then(parse_time)
        else {
            continue;
        };

        let (subject_type, subject) = event_subject(typename, node);
        let event_id = match node.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => surrogate_key(node),
        };

        out.push(WorkItemEventRow {
            repo_full_name: repo.to_string(),
            number,
            item_type: item_type.to_string(),
            event_id,
            event_type: event_type.to_string(),
            occurred_at,
            actor_login: actor_login(node.get("actor")).unwrap_or_default(),
            subject_type,
            subject,
            reference: reference.clone(),
        });
    }
    out
}

fn extract_comments(
    repo: &str,
    nodes: &[Value],
    item_type: &str,
    number: i64,
    max_body_chars: usize,
) -> Vec<CommentRow> {
    let mut out = Vec::new();
    for node in nodes {
        let Some(created_at) = node.get("createdAt").and_then(Value::as_str).and_then(parse_time)
        else {
            continue;
        };
        let comment_id = match node.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => surrogate_key(node),
        };
        out.push(CommentRow {
            repo_full_name: repo.to_string(),
            number,
            item_type: item_type.to_string(),
            comment_id,
            url: str_field(node, "url"),
            created_at,
            author_login: actor_login(node.get("author")).unwrap_or_default(),
            author_association: str_field(node, "authorAssociation"),
            body_excerpt: safe_excerpt(node.get("body").and_then(Value::as_str), max_body_chars),
        });
    }
    out
}

fn extract_reviews(repo: &str, nodes: &[Value], pr_number: i64, max_body_chars: usize) -> Vec<ReviewRow> {
    let reference = build_work_item_url(repo, "pr", pr_number);
    let mut out = Vec::new();
    for node in nodes {
        let Some(submitted_at) = node
            .get("submittedAt")
            .and_then(Value::as_str)
            .and_then(parse_time)
        else {
            continue;
        };
        let review_id = match node.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => surrogate_key(node),
        };
        out.push(ReviewRow {
            repo_full_name: repo.to_string(),
            pr_number,
            review_id,
            review_state: str_field(node, "state"),
            submitted_at,
            author_login: actor_login(node.get("author")).unwrap_or_default(),
            body_excerpt: safe_excerpt(node.get("body").and_then(Value::as_str), max_body_chars),
            reference: reference.clone(),
        });
    }
    out
}

/// Map a GraphQL timeline typename to its canonical event name.
fn canonical_event_name(typename: &str) -> Option<&'static str> {
    Some(match typename {
        "ClosedEvent" => "Closed",
        "ReopenedEvent" => "Reopened",
        "LabeledEvent" => "Labeled",
        "UnlabeledEvent" => "Unlabeled",
        "AssignedEvent" => "Assigned",
        "UnassignedEvent" => "Unassigned",
        "MilestonedEvent" => "Milestoned",
        "DemilestonedEvent" => "Demilestoned",
        "RenamedTitleEvent" => "RenamedTitle",
        "CrossReferencedEvent" => "CrossReferenced",
        "ReferencedEvent" => "Referenced",
        _ => return None,
    })
}

fn event_subject(typename: &str, node: &Value) -> (String, String) {
    match typename {
        "LabeledEvent" | "UnlabeledEvent" => node
            .pointer("/label/name")
            .and_then(Value::as_str)
            .map(|name| ("label".to_string(), name.to_string()))
            .unwrap_or_default(),
        "MilestonedEvent" | "DemilestonedEvent" => node
            .get("milestoneTitle")
            .and_then(Value::as_str)
            .map(|title| ("milestone".to_string(), title.to_string()))
            .unwrap_or_default(),
        "AssignedEvent" | "UnassignedEvent" => node
            .pointer("/assignee/login")
            .and_then(Value::as_str)
            .map(|login| ("assignee".to_string(), login.to_string()))
            .unwrap_or_default(),
        "RenamedTitleEvent" => node
            .get("currentTitle")
            .and_then(Value::as_str)
            .map(|title| ("title".to_string(), title.to_string()))
            .unwrap_or_default(),
        "CrossReferencedEvent" => node
            .pointer("/source/url")
            .and_then(Value::as_str)
            .map(|url| ("source".to_string(), url.to_string()))
            .unwrap_or_default(),
        "ReferencedEvent" => node
            .pointer("/commit/url")
            .and_then(Value::as_str)
            .map(|url| ("commit".to_string(), url.to_string()))
            .unwrap_or_default(),
        _ => (String::new(), String::new()),
    }
}

/// Actor identity: prefer `@login`; fall back to the numeric databaseId.
/// Opaque node ids are never emitted as user identifiers.
fn actor_login(actor: Option<&Value>) -> Option<String> {
    let actor = actor?;
    if let Some(login) = actor
        .get("login")
        .and_then(Value::as_str)
        .filter(|login| !login.is_empty())
    {
        return Some(format!("@{}", login.trim_start_matches('@')));
    }
    actor
        .get("databaseId")
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
}

/// Whitespace-collapsed excerpt with a terminal ellipsis past `max_chars`.
pub fn safe_excerpt(text: Option<&str>, max_chars: usize) -> String {
    let Some(text) = text else {
        return String::new();
    };
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = collapsed.chars().collect();
    if chars.len() <= max_chars {
        return collapsed;
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = chars[..keep].iter().collect();
    out.push('…');
    out
}

/// Stable surrogate key for nodes missing an upstream id.
pub fn surrogate_key(node: &Value) -> String {
    let digest = Sha256::digest(node.to_string().as_bytes());
    format!("sha256:{}", &hex::encode(digest)[..12])
}

fn build_work_item_url(repo: &str, item_type: &str, number: i64) -> String {
    let path = if item_type == "issue" { "issues" } else { "pull" };
    format!("https://github.com/{repo}/{path}/{number}")
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The repo a record belongs to: GraphQL variables first, then the REST
/// search `q=` parameter.
fn derive_repo_full_name(record: &RawRecord) -> Option<String> {
    if let Some(body) = &record.request.body {
        let owner = body.pointer("/variables/owner").and_then(Value::as_str);
        let name = body.pointer("/variables/name").and_then(Value::as_str);
        if let (Some(owner), Some(name)) = (owner, name) {
            if !owner.is_empty() && !name.is_empty() {
                return Some(format!("{owner}/{name}"));
            }
        }
    }
    let parsed = url::Url::parse(&record.request.url).ok()?;
    let q = parsed
        .query_pairs()
        .find(|(key, _)| key == "q")
        .map(|(_, value)| value.into_owned())?;
    q.split_whitespace()
        .find_map(|part| part.strip_prefix("repo:"))
        .filter(|repo| repo.contains('/'))
        .map(|repo| repo.to_string())
}

fn derive_number(record: &RawRecord) -> Option<i64> {
    record
        .request
        .body
        .as_ref()?
        .pointer("/variables/number")
        .and_then(Value::as_i64)
}

fn item_identity(record: &RawRecord) -> Option<(String, i64)> {
    let typename = record
        .response
        .json
        .pointer("/data/repository/issueOrPullRequest/__typename")
        .and_then(Value::as_str)?;
    let item_type = match typename {
        "Issue" => "issue",
        "PullRequest" => "pr",
        _ => return None,
    };
    Some((item_type.to_string(), derive_number(record)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::{ExchangeMeta, RequestEnvelope, ResponseEnvelope};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(tag: &str, body: Option<Value>, url: &str, response: Value) -> RawRecord {
        RawRecord {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            request: RequestEnvelope {
                method: if body.is_some() { "POST" } else { "GET" }.into(),
                url: url.to_string(),
                headers: BTreeMap::new(),
                body,
            },
            response: ResponseEnvelope {
                status: 200,
                headers: BTreeMap::new(),
                json: response,
            },
            meta: ExchangeMeta {
                tag: tag.to_string(),
                request_fingerprint: "f".repeat(16),
                attempt: 1,
            },
        }
    }

    fn graphql_body(number: i64) -> Value {
        json!({"query": "...", "variables": {"owner": "acme", "name": "widget", "number": number}})
    }

    #[test]
    fn excerpt_collapses_whitespace_and_truncates() {
        let text = "line one\n\n   line\ttwo";
        assert_eq!(safe_excerpt(Some(text), 280), "line one line two");
        let long = "a".repeat(300);
        let excerpt = safe_excerpt(Some(&long), 280);
        assert_eq!(excerpt.chars().count(), 280);
        assert!(excerpt.ends_with('…'));
    }

    #[test]
    fn actor_identity_prefers_login_then_database_id() {
        assert_eq!(
            actor_login(Some(&json!({"login": "octocat", "id": "MDQ6..."}))),
            Some("@octocat".to_string())
        );
        assert_eq!(
            actor_login(Some(&json!({"databaseId": 42}))),
            Some("42".to_string())
        );
        assert_eq!(actor_login(Some(&json!({"id": "MDQ6VXNlcg=="}))), None);
    }

    #[test]
    fn core_record_projects_work_item() {
        let response = json!({"data": {"repository": {"issueOrPullRequest": {
            "__typename": "PullRequest",
            "number": 17,
            "url": "https://github.com/acme/widget/pull/17",
            "title": "Fix retry jitter",
            "body": "  Retry   sleeps were  unjittered ",
            "state": "MERGED",
            "createdAt": "2026-01-10T09:00:00Z",
            "closedAt": "2026-01-11T10:00:00Z",
            "mergedAt": "2026-01-11T10:00:00Z",
            "author": {"login": "octocat"},
            "authorAssociation": "MEMBER",
            "labels": {"nodes": [{"name": "bug"}, {"name": "bug"}, {"name": "area/http"}]},
            "comments": {"totalCount": 3},
            "reviews": {"totalCount": 1},
            "changedFiles": 2,
            "additions": 10,
            "deletions": 4
        }}}});
        let rec = record("graphql_core_item17", Some(graphql_body(17)), "https://api.github.com/graphql", response);
        let views = extract_rows_from_record(&rec, &ProjectorOptions::default());
        assert_eq!(views.work_items.len(), 1);
        let row = &views.work_items[0];
        assert_eq!(row.repo_full_name, "acme/widget");
        assert_eq!(row.item_type, "pr");
        assert!(row.is_merged);
        assert_eq!(row.labels, vec!["area/http".to_string(), "bug".to_string()]);
        assert_eq!(row.body_excerpt, "Retry sleeps were unjittered");
        assert_eq!(row.author_login, "@octocat");
    }

    #[test]
    fn timeline_record_maps_canonical_event_names() {
        let response = json!({"data": {"repository": {"issueOrPullRequest": {
            "__typename": "Issue",
            "timelineItems": {"nodes": [
                {"__typename": "ClosedEvent", "id": "E1", "createdAt": "2026-01-12T00:00:00Z",
                 "actor": {"login": "alice"}},
                {"__typename": "LabeledEvent", "id": "E2", "createdAt": "2026-01-12T01:00:00Z",
                 "actor": {"login": "bob"}, "label": {"name": "bug"}},
                {"__typename": "SubscribedEvent", "id": "E3", "createdAt": "2026-01-12T02:00:00Z"}
            ]}
        }}}});
        let rec = record("graphql_timeline_item5_pabc", Some(graphql_body(5)), "https://api.github.com/graphql", response);
        let views = extract_rows_from_record(&rec, &ProjectorOptions::default());
        assert_eq!(views.events.len(), 2);
        assert_eq!(views.events[0].event_type, "Closed");
        assert_eq!(views.events[1].event_type, "Labeled");
        assert_eq!(views.events[1].subject_type, "label");
        assert_eq!(views.events[1].subject, "bug");
    }

    #[test]
    fn comments_record_emits_rows_and_activity() {
        let response = json!({"data": {"repository": {"issueOrPullRequest": {
            "__typename": "Issue",
            "comments": {"nodes": [
                {"id": "C1", "url": "https://github.com/acme/widget/issues/5#c1",
                 "body": "try enabling debug logs", "createdAt": "2026-01-12T03:00:00Z",
                 "author": {"login": "carol"}, "authorAssociation": "CONTRIBUTOR"},
                {"body": "missing id and timestamp"}
            ]}
        }}}});
        let rec = record("graphql_comments_item5_pabc", Some(graphql_body(5)), "https://api.github.com/graphql", response);
        let views = extract_rows_from_record(&rec, &ProjectorOptions::default());
        assert_eq!(views.comments.len(), 1);
        assert_eq!(views.activity.len(), 1);
        assert_eq!(views.activity[0].activity, "commented");
        assert_eq!(views.activity[0].login, "@carol");
    }

    #[test]
    fn missing_node_id_gets_surrogate_key() {
        let node = json!({"body": "x", "createdAt": "2026-01-12T03:00:00Z"});
        let rows = extract_comments("acme/widget", &[node], "issue", 5, 280);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].comment_id.starts_with("sha256:"));
        assert_eq!(rows[0].comment_id.len(), "sha256:".len() + 12);
    }

    #[test]
    fn discovery_record_emits_opened_activity() {
        let response = json!({"items": [
            {"number": 5, "html_url": "https://github.com/acme/widget/issues/5",
             "user": {"login": "dave"}, "created_at": "2026-01-09T00:00:00Z"},
            {"number": 6, "user": {}}
        ]});
        let rec = record(
            "discovery_issue_page1",
            None,
            "https://api.github.com/search/issues?q=repo%3Aacme%2Fwidget+is%3Aissue",
            response,
        );
        let views = extract_rows_from_record(&rec, &ProjectorOptions::default());
        assert_eq!(views.activity.len(), 1);
        assert_eq!(views.activity[0].activity, "issue_opened");
        assert_eq!(views.activity[0].repo_full_name, "acme/widget");
    }
}
