//! Discovery + hydration of a repository's closed items within a window.
//!
//! Discovery uses REST search; hydration walks each item's GraphQL
//! connections page by page. Every exchange lands in the raw archive before
//! any retry decision, which makes re-runs resumable: identical parameters
//! produce identical archive paths.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::PrismResult;
use crate::github::archive::RawArchive;
use crate::github::queries;
use crate::http::client::{HttpClient, JsonRequest};
use crate::http::paginate::paginate_connection;

pub const GITHUB_API: &str = "https://api.github.com";
pub const GITHUB_GRAPHQL: &str = "https://api.github.com/graphql";

const GRAPHQL_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_SEARCH_PAGES: u32 = 100;
const MAX_CONNECTION_PAGES: usize = 1000;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub owner: String,
    pub repo: String,
    /// Inclusive `closedAt` window bounds, `YYYY-MM-DD` (UTC).
    pub start: String,
    pub end: String,
    pub per_page: u32,
    /// If > 0, limit the number of items hydrated (smoke runs).
    pub max_items: usize,
    /// Discovery-only mode: skip hydration entirely.
    pub hydrate: bool,
}

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub pr_count: usize,
    pub issue_count: usize,
    pub hydrated_item_count: usize,
}

pub struct Ingester {
    http: HttpClient,
    token: Option<String>,
    api_base: String,
    graphql_url: String,
}

impl Ingester {
    pub fn new(token: Option<String>) -> PrismResult<Self> {
        Ok(Self {
            http: HttpClient::new()?,
            token,
            api_base: GITHUB_API.to_string(),
            graphql_url: GITHUB_GRAPHQL.to_string(),
        })
    }

    /// Point the ingester at a different forge base (tests use a local fake).
    pub fn with_endpoints(
        token: Option<String>,
        api_base: impl Into<String>,
        graphql_url: impl Into<String>,
    ) -> PrismResult<Self> {
        Ok(Self {
            http: HttpClient::new()?,
            token,
            api_base: api_base.into(),
            graphql_url: graphql_url.into(),
        })
    }

    fn decorate(&self, mut request: JsonRequest) -> JsonRequest {
        request = request
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "prism-devrel");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        request
    }

    pub async fn run(
        &self,
        options: &IngestOptions,
        archive: &RawArchive,
    ) -> PrismResult<IngestSummary> {
        let repo_full_name = format!("{}/{}", options.owner, options.repo);
        archive.write_json(
            "run.json",
            &json!({
                "repo": repo_full_name,
                "window": {"closedAt_start": options.start, "closedAt_end": options.end},
                "started_at": chrono::Utc::now().to_rfc3339(),
                "notes": "Raw-only ingestion. No normalization or downstream processing performed.",
            }),
        )?;

        let q_pr = format!(
            "repo:{repo_full_name} is:pr state:closed closed:{}..{}",
            options.start, options.end
        );
        let q_issue = format!(
            "repo:{repo_full_name} is:issue state:closed closed:{}..{}",
            options.start, options.end
        );

        let pr_items = self
            .search_issues(&q_pr, options.per_page, "discovery_pr", archive)
            .await?;
        let issue_items = self
            .search_issues(&q_issue, options.per_page, "discovery_issue", archive)
            .await?;
        info!(
            prs = pr_items.len(),
            issues = issue_items.len(),
            "discovery complete"
        );

        archive.write_json(
            "discovered_index.json",
            &json!({
                "repo": repo_full_name,
                "window": {"closedAt_start": options.start, "closedAt_end": options.end},
                "discovery": {
                    "pr_count": pr_items.len(),
                    "issue_count": issue_items.len(),
                    "prs": pr_items.iter().map(item_summary).collect::<Vec<_>>(),
                    "issues": issue_items.iter().map(item_summary).collect::<Vec<_>>(),
                },
            }),
        )?;

        let mut summary = IngestSummary {
            pr_count: pr_items.len(),
            issue_count: issue_items.len(),
            hydrated_item_count: 0,
        };
        if !options.hydrate {
            return Ok(summary);
        }

        // Deterministic hydration order across discovery sources.
        let mut numbers: BTreeSet<i64> = BTreeSet::new();
        for item in pr_items.iter().chain(issue_items.iter()) {
            if let Some(number) = item.get("number").and_then(Value::as_i64) {
                numbers.insert(number);
            }
        }
        let numbers: Vec<i64> = if options.max_items > 0 {
            numbers.into_iter().take(options.max_items).collect()
        } else {
            numbers.into_iter().collect()
        };

        for &number in &numbers {
            self.hydrate_item(options, number, archive).await?;
            summary.hydrated_item_count += 1;
        }

        archive.write_json(
            "run_finished.json",
            &json!({
                "finished_at": chrono::Utc::now().to_rfc3339(),
                "hydrated_item_count": summary.hydrated_item_count,
            }),
        )?;
        Ok(summary)
    }

    /// REST search, page-number based: stop once a page returns fewer than
    /// `per_page` items or the search page cap is hit.
    async fn search_issues(
        &self,
        query: &str,
        per_page: u32,
        tag_prefix: &str,
        archive: &RawArchive,
    ) -> PrismResult<Vec<Value>> {
        let mut results = Vec::new();
        let mut page = 1u32;
        loop {
            let mut url = url::Url::parse(&format!("{}/search/issues", self.api_base))
                .map_err(|e| crate::PrismError::Configuration(format!("bad api base: {e}")))?;
            url.query_pairs_mut()
                .append_pair("q", query)
                .append_pair("per_page", &per_page.to_string())
                .append_pair("page", &page.to_string());

            let request =
                self.decorate(JsonRequest::get(url.to_string(), format!("{tag_prefix}_page{page}")));
            let record = self.http.request_json(&request, Some(archive)).await?;
            let items: Vec<Value> = record
                .response
                .json
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let count = items.len();
            results.extend(items);
            if count < per_page as usize {
                break;
            }
            page += 1;
            if page > MAX_SEARCH_PAGES {
                warn!("search page cap hit; refine the query window");
                break;
            }
        }
        Ok(results)
    }

    async fn hydrate_item(
        &self,
        options: &IngestOptions,
        number: i64,
        archive: &RawArchive,
    ) -> PrismResult<()> {
        let variables = json!({
            "owner": options.owner,
            "name": options.repo,
            "number": number,
        });

        let core = self
            .graphql_call(
                queries::GET_CORE,
                variables.clone(),
                format!("graphql_core_item{number}"),
                archive,
            )
            .await?;
        let typename = core
            .response
            .json
            .pointer("/data/repository/issueOrPullRequest/__typename")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.paginate_graphql(
            queries::GET_COMMENTS_PAGE,
            &variables,
            &format!("graphql_comments_item{number}"),
            archive,
        )
        .await?;
        self.paginate_graphql(
            queries::GET_TIMELINE_PAGE,
            &variables,
            &format!("graphql_timeline_item{number}"),
            archive,
        )
        .await?;

        if typename == "PullRequest" {
            self.paginate_graphql(
                queries::GET_PR_REVIEWS_PAGE,
                &variables,
                &format!("graphql_reviews_pr{number}"),
                archive,
            )
            .await?;
            self.paginate_graphql(
                queries::GET_PR_FILES_PAGE,
                &variables,
                &format!("graphql_files_pr{number}"),
                archive,
            )
            .await?;
            self.fetch_pr_file_patches(options, number, archive).await?;
        }
        Ok(())
    }

    async fn graphql_call(
        &self,
        query: &str,
        variables: Value,
        tag: String,
        archive: &RawArchive,
    ) -> PrismResult<crate::http::client::RawRecord> {
        let body = json!({"query": query, "variables": variables});
        let request = self
            .decorate(JsonRequest::post(self.graphql_url.clone(), body, tag))
            .timeout(GRAPHQL_TIMEOUT);
        self.http.graphql(&request, Some(archive)).await
    }

    async fn paginate_graphql(
        &self,
        query: &'static str,
        variables: &Value,
        tag_prefix: &str,
        archive: &RawArchive,
    ) -> PrismResult<()> {
        let variables = variables.clone();
        paginate_connection(
            |after| {
                let mut vars = variables.clone();
                vars["after"] = after.clone().map(Value::String).unwrap_or(Value::Null);
                let tag = format!("{tag_prefix}_p{}", cursor_tag(after.as_deref()));
                self.graphql_call(query, vars, tag, archive)
            },
            MAX_CONNECTION_PAGES,
        )
        .await?;
        Ok(())
    }

    /// REST `pulls/{n}/files` for patch content; page-number based.
    async fn fetch_pr_file_patches(
        &self,
        options: &IngestOptions,
        number: i64,
        archive: &RawArchive,
    ) -> PrismResult<()> {
        let mut page = 1u32;
        loop {
            let url = format!(
                "{}/repos/{}/{}/pulls/{number}/files?per_page={}&page={page}",
                self.api_base, options.owner, options.repo, options.per_page
            );
            let request =
                self.decorate(JsonRequest::get(url, format!("rest_pr_files_pr{number}_page{page}")));
            let record = self.http.request_json(&request, Some(archive)).await?;
            let count = record
                .response
                .json
                .as_array()
                .map(|items| items.len())
                .unwrap_or(0);
            if count < options.per_page as usize {
                break;
            }
            page += 1;
            if page > 1000 {
                break;
            }
        }
        Ok(())
    }
}

/// Stable per-cursor page suffix: `sha256(cursor | "start")[:8]`.
fn cursor_tag(after: Option<&str>) -> String {
    let digest = Sha256::digest(after.unwrap_or("start").as_bytes());
    hex::encode(digest)[..8].to_string()
}

fn item_summary(item: &Value) -> Value {
    json!({
        "number": item.get("number"),
        "url": item.get("html_url"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_tag_is_stable() {
        assert_eq!(cursor_tag(None), cursor_tag(Some("start")));
        assert_ne!(cursor_tag(Some("abc")), cursor_tag(Some("abd")));
        assert_eq!(cursor_tag(Some("abc")).len(), 8);
    }
}
