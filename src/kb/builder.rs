//! KB document construction and embedding maintenance.
//!
//! One `kb_document` row per (item, section); the stable id is
//! `sha256(repo ‖ item_type ‖ item_number ‖ section)`. A row is pending for a
//! model when it has no embedding or its `source_hash` no longer matches;
//! the embed pass batches pending rows and upserts on `(kb_id, model)`.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::embeddings::Embedder;
use crate::error::{PrismError, PrismResult};
use crate::projector::ProjectedViews;

#[derive(Debug, Clone, PartialEq)]
pub struct KbDocument {
    pub kb_id: String,
    pub repo_full_name: String,
    pub item_type: String,
    pub item_number: i64,
    pub section: String,
    pub source_ref: String,
    pub text: String,
    pub metadata: Value,
    pub source_hash: String,
}

pub fn kb_id(repo: &str, item_type: &str, item_number: i64, section: &str) -> String {
    let digest = Sha256::digest(format!("{repo}|{item_type}|{item_number}|{section}").as_bytes());
    hex::encode(digest)
}

pub fn source_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Build all KB documents from the projected views. Sections per item:
/// `title_body`, `comments`, `reviews` (PRs), and a `timeline` summary.
/// Empty sections produce no row.
pub fn build_documents(views: &ProjectedViews) -> Vec<KbDocument> {
    let mut documents = Vec::new();

    for item in &views.work_items {
        let key = (item.repo_full_name.as_str(), item.number, item.item_type.as_str());
        let metadata = json!({
            "state": item.state,
            "labels": item.labels,
            "author": item.author_login,
            "is_merged": item.is_merged,
        });

        let mut title_body = item.title.trim().to_string();
        if !item.body_excerpt.is_empty() {
            if !title_body.is_empty() {
                title_body.push_str("\n\n");
            }
            title_body.push_str(&item.body_excerpt);
        }
        if !title_body.is_empty() {
            documents.push(section_document(key, "title_body", &item.url, title_body, metadata.clone()));
        }

        let comments: Vec<String> = views
            .comments
            .iter()
            .filter(|c| {
                c.repo_full_name == item.repo_full_name
                    && c.number == item.number
                    && c.item_type == item.item_type
            })
            .map(|c| format!("{}: {}", c.author_login, c.body_excerpt))
            .collect();
        if !comments.is_empty() {
            documents.push(section_document(
                key,
                "comments",
                &item.url,
                comments.join("\n"),
                metadata.clone(),
            ));
        }

        if item.item_type == "pr" {
            let reviews: Vec<String> = views
                .reviews
                .iter()
                .filter(|r| r.repo_full_name == item.repo_full_name && r.pr_number == item.number)
                .map(|r| format!("{} [{}]: {}", r.author_login, r.review_state, r.body_excerpt))
                .collect();
            if !reviews.is_empty() {
                documents.push(section_document(
                    key,
                    "reviews",
                    &item.url,
                    reviews.join("\n"),
                    metadata.clone(),
                ));
            }
        }

        let timeline: Vec<String> = views
            .events
            .iter()
            .filter(|e| {
                e.repo_full_name == item.repo_full_name
                    && e.number == item.number
                    && e.item_type == item.item_type
            })
            .map(|e| {
                let mut line = format!("{} by {}", e.event_type, e.actor_login);
                if !e.subject.is_empty() {
                    line.push_str(&format!(" ({}: {})", e.subject_type, e.subject));
                }
                line
            })
            .collect();
        if !timeline.is_empty() {
            documents.push(section_document(key, "timeline", &item.url, timeline.join("\n"), metadata));
        }
    }

    documents
}

fn section_document(
    key: (&str, i64, &str),
    section: &str,
    source_ref: &str,
    text: String,
    metadata: Value,
) -> KbDocument {
    let (repo, number, item_type) = key;
    KbDocument {
        kb_id: kb_id(repo, item_type, number, section),
        repo_full_name: repo.to_string(),
        item_type: item_type.to_string(),
        item_number: number,
        section: section.to_string(),
        source_ref: source_ref.to_string(),
        source_hash: source_hash(&text),
        text,
        metadata,
    }
}

/// Idempotent upsert of KB documents.
pub async fn upsert_documents(pool: &PgPool, documents: &[KbDocument]) -> PrismResult<usize> {
    for doc in documents {
        sqlx::query(
            r#"
            INSERT INTO kb_document (
              kb_id, repo_full_name, item_type, item_number, section,
              source_ref, "text", metadata, source_hash, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            ON CONFLICT (kb_id) DO UPDATE SET
              source_ref = EXCLUDED.source_ref,
              "text" = EXCLUDED."text",
              metadata = EXCLUDED.metadata,
              source_hash = EXCLUDED.source_hash,
              updated_at = now()
            "#,
        )
        .bind(&doc.kb_id)
        .bind(&doc.repo_full_name)
        .bind(&doc.item_type)
        .bind(doc.item_number as i32)
        .bind(&doc.section)
        .bind(&doc.source_ref)
        .bind(&doc.text)
        .bind(&doc.metadata)
        .bind(&doc.source_hash)
        .execute(pool)
        .await?;
    }
    info!(count = documents.len(), "kb documents upserted");
    Ok(documents.len())
}

/// Replace the `repo_*` projection tables with the current views. The views
/// are a full rebuild from raw, so the load is truncate-and-insert.
pub async fn load_projected_views(pool: &PgPool, views: &ProjectedViews) -> PrismResult<()> {
    sqlx::query(
        "TRUNCATE TABLE repo_work_item, repo_work_item_event, repo_comment, repo_pr_review, repo_user_activity",
    )
    .execute(pool)
    .await?;

    for item in &views.work_items {
        sqlx::query(
            r#"
            INSERT INTO repo_work_item (
              repo_full_name, number, type, url, title, body_excerpt, state,
              created_at, closed_at, author_login, author_association, labels_json,
              milestone_title, is_merged, merged_at, merged_by,
              comment_count, review_count, changed_files, additions, deletions
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21)
            "#,
        )
        .bind(&item.repo_full_name)
        .bind(item.number as i32)
        .bind(&item.item_type)
        .bind(&item.url)
        .bind(&item.title)
        .bind(&item.body_excerpt)
        .bind(&item.state)
        .bind(item.created_at)
        .bind(item.closed_at)
        .bind(&item.author_login)
        .bind(&item.author_association)
        .bind(serde_json::to_value(&item.labels)?)
        .bind(&item.milestone_title)
        .bind(item.is_merged)
        .bind(item.merged_at)
        .bind(&item.merged_by)
        .bind(item.comment_count.map(|v| v as i32))
        .bind(item.review_count.map(|v| v as i32))
        .bind(item.changed_files.map(|v| v as i32))
        .bind(item.additions.map(|v| v as i32))
        .bind(item.deletions.map(|v| v as i32))
        .execute(pool)
        .await?;
    }

    for event in &views.events {
        sqlx::query(
            r#"
            INSERT INTO repo_work_item_event (
              repo_full_name, number, type, event_id, event_type, occurred_at,
              actor_login, subject_type, subject, reference
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (repo_full_name, number, event_id) DO NOTHING
            "#,
        )
        .bind(&event.repo_full_name)
        .bind(event.number as i32)
        .bind(&event.item_type)
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(event.occurred_at)
        .bind(&event.actor_login)
        .bind(&event.subject_type)
        .bind(&event.subject)
        .bind(&event.reference)
        .execute(pool)
        .await?;
    }

    for comment in &views.comments {
        sqlx::query(
            r#"
            INSERT INTO repo_comment (
              repo_full_name, number, type, comment_id, url, created_at,
              author_login, author_association, body_excerpt
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (repo_full_name, number, comment_id) DO NOTHING
            "#,
        )
        .bind(&comment.repo_full_name)
        .bind(comment.number as i32)
        .bind(&comment.item_type)
        .bind(&comment.comment_id)
        .bind(&comment.url)
        .bind(comment.created_at)
        .bind(&comment.author_login)
        .bind(&comment.author_association)
        .bind(&comment.body_excerpt)
        .execute(pool)
        .await?;
    }

    for review in &views.reviews {
        sqlx::query(
            r#"
            INSERT INTO repo_pr_review (
              repo_full_name, pr_number, review_id, review_state, submitted_at,
              author_login, body_excerpt, reference
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (repo_full_name, pr_number, review_id) DO NOTHING
            "#,
        )
        .bind(&review.repo_full_name)
        .bind(review.pr_number as i32)
        .bind(&review.review_id)
        .bind(&review.review_state)
        .bind(review.submitted_at)
        .bind(&review.author_login)
        .bind(&review.body_excerpt)
        .bind(&review.reference)
        .execute(pool)
        .await?;
    }

    for activity in &views.activity {
        sqlx::query(
            r#"
            INSERT INTO repo_user_activity (
              repo_full_name, login, activity, number, occurred_at, reference
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&activity.repo_full_name)
        .bind(&activity.login)
        .bind(&activity.activity)
        .bind(activity.number as i32)
        .bind(activity.occurred_at)
        .bind(&activity.reference)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Embed every pending document for the embedder's model. Returns the number
/// of rows (re)embedded. A dimension mismatch against the embedder's
/// configuration is fatal, never silently stored.
pub async fn embed_pending(
    pool: &PgPool,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> PrismResult<usize> {
    if batch_size == 0 {
        return Err(PrismError::Configuration(
            "embedding batch_size must be positive".to_string(),
        ));
    }

    let mut total = 0usize;
    loop {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT d.kb_id, d."text", d.source_hash
            FROM kb_document d
            LEFT JOIN kb_embedding e ON e.kb_id = d.kb_id AND e.model = $1
            WHERE e.kb_id IS NULL OR e.source_hash <> d.source_hash
            ORDER BY d.kb_id
            LIMIT $2
            "#,
        )
        .bind(embedder.model())
        .bind(batch_size as i64)
        .fetch_all(pool)
        .await?;
        if rows.is_empty() {
            break;
        }

        let texts: Vec<String> = rows.iter().map(|(_, text, _)| text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        for vector in &vectors {
            if vector.len() != embedder.dimensions() {
                return Err(PrismError::Embedding(format!(
                    "embedding dims mismatch: expected {}, got {}",
                    embedder.dimensions(),
                    vector.len()
                )));
            }
        }

        for ((kb_id, _, hash), vector) in rows.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO kb_embedding (kb_id, model, dims, embedding, source_hash)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (kb_id, model) DO UPDATE SET
                  dims = EXCLUDED.dims,
                  embedding = EXCLUDED.embedding,
                  source_hash = EXCLUDED.source_hash,
                  created_at = now()
                "#,
            )
            .bind(kb_id)
            .bind(embedder.model())
            .bind(embedder.dimensions() as i32)
            .bind(pgvector::Vector::from(vector))
            .bind(hash)
            .execute(pool)
            .await?;
        }

        total += rows.len();
        debug!(batch = rows.len(), total, "embedded kb batch");
        if rows.len() < batch_size {
            break;
        }
    }
    Ok(total)
}

/// Group documents for inspection / fixture output.
pub fn documents_by_section(documents: &[KbDocument]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for doc in documents {
        *counts.entry(doc.section.clone()).or_insert(0usize) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::{CommentRow, ProjectedViews, ReviewRow, WorkItemRow};
    use chrono::Utc;

    fn base_item(number: i64, item_type: &str) -> WorkItemRow {
        WorkItemRow {
            repo_full_name: "acme/widget".into(),
            number,
            item_type: item_type.into(),
            url: format!("https://github.com/acme/widget/pull/{number}"),
            title: "Fix cache".into(),
            body_excerpt: "the cache misbehaves".into(),
            state: "MERGED".into(),
            created_at: None,
            closed_at: None,
            author_login: "@octocat".into(),
            author_association: "MEMBER".into(),
            labels: vec!["bug".into()],
            milestone_title: String::new(),
            is_merged: true,
            merged_at: None,
            merged_by: "@maintainer".into(),
            comment_count: Some(1),
            review_count: Some(1),
            changed_files: None,
            additions: None,
            deletions: None,
        }
    }

    #[test]
    fn kb_id_is_stable_per_section() {
        let a = kb_id("acme/widget", "pr", 17, "comments");
        let b = kb_id("acme/widget", "pr", 17, "comments");
        let c = kb_id("acme/widget", "pr", 17, "reviews");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn sections_are_built_per_item() {
        let mut views = ProjectedViews::default();
        views.work_items.push(base_item(17, "pr"));
        views.comments.push(CommentRow {
            repo_full_name: "acme/widget".into(),
            number: 17,
            item_type: "pr".into(),
            comment_id: "C1".into(),
            url: String::new(),
            created_at: Utc::now(),
            author_login: "@carol".into(),
            author_association: String::new(),
            body_excerpt: "have you tried ttl".into(),
        });
        views.reviews.push(ReviewRow {
            repo_full_name: "acme/widget".into(),
            pr_number: 17,
            review_id: "R1".into(),
            review_state: "APPROVED".into(),
            submitted_at: Utc::now(),
            author_login: "@dan".into(),
            body_excerpt: "lgtm".into(),
            reference: String::new(),
        });

        let documents = build_documents(&views);
        let counts = documents_by_section(&documents);
        assert_eq!(counts.get("title_body"), Some(&1));
        assert_eq!(counts.get("comments"), Some(&1));
        assert_eq!(counts.get("reviews"), Some(&1));
        assert_eq!(counts.get("timeline"), None);

        let comments = documents.iter().find(|d| d.section == "comments").unwrap();
        assert!(comments.text.contains("@carol"));
        assert_eq!(comments.source_hash, source_hash(&comments.text));
    }

    #[test]
    fn text_change_changes_source_hash_only() {
        let mut views = ProjectedViews::default();
        views.work_items.push(base_item(17, "pr"));
        let before = build_documents(&views);

        views.work_items[0].body_excerpt = "the cache misbehaves badly".into();
        let after = build_documents(&views);

        let b = before.iter().find(|d| d.section == "title_body").unwrap();
        let a = after.iter().find(|d| d.section == "title_body").unwrap();
        assert_eq!(b.kb_id, a.kb_id);
        assert_ne!(b.source_hash, a.source_hash);
    }

    #[test]
    fn issues_do_not_get_review_sections() {
        let mut views = ProjectedViews::default();
        views.work_items.push(base_item(5, "issue"));
        views.reviews.push(ReviewRow {
            repo_full_name: "acme/widget".into(),
            pr_number: 5,
            review_id: "R1".into(),
            review_state: "APPROVED".into(),
            submitted_at: Utc::now(),
            author_login: "@dan".into(),
            body_excerpt: "stray".into(),
            reference: String::new(),
        });
        let documents = build_documents(&views);
        assert!(documents.iter().all(|d| d.section != "reviews"));
    }
}
