//! CSV export of the projected views (`out_views/*.csv`).
//!
//! The views are narrow fixed-column tables; rows are written with RFC-4180
//! quoting and a header line.

use std::fs;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::PrismResult;
use crate::projector::ProjectedViews;

pub fn export_views(views: &ProjectedViews, out_dir: &Path) -> PrismResult<()> {
    fs::create_dir_all(out_dir)?;

    write_csv(
        &out_dir.join("repo_work_item.csv"),
        &[
            "repo_full_name",
            "number",
            "type",
            "url",
            "title",
            "body_excerpt",
            "state",
            "created_at",
            "closed_at",
            "author_login",
            "author_association",
            "labels_json",
            "milestone_title",
            "is_merged",
            "merged_at",
            "merged_by",
            "comment_count",
            "review_count",
            "changed_files",
            "additions",
            "deletions",
        ],
        views.work_items.iter().map(|row| {
            vec![
                row.repo_full_name.clone(),
                row.number.to_string(),
                row.item_type.clone(),
                row.url.clone(),
                row.title.clone(),
                row.body_excerpt.clone(),
                row.state.clone(),
                time_field(row.created_at),
                time_field(row.closed_at),
                row.author_login.clone(),
                row.author_association.clone(),
                serde_json::to_string(&row.labels).unwrap_or_else(|_| "[]".to_string()),
                row.milestone_title.clone(),
                if row.is_merged { "1" } else { "0" }.to_string(),
                time_field(row.merged_at),
                row.merged_by.clone(),
                count_field(row.comment_count),
                count_field(row.review_count),
                count_field(row.changed_files),
                count_field(row.additions),
                count_field(row.deletions),
            ]
        }),
    )?;

    write_csv(
        &out_dir.join("repo_work_item_event.csv"),
        &[
            "repo_full_name",
            "number",
            "type",
            "event_id",
            "event_type",
            "occurred_at",
            "actor_login",
            "subject_type",
            "subject",
            "reference",
        ],
        views.events.iter().map(|row| {
            vec![
                row.repo_full_name.clone(),
                row.number.to_string(),
                row.item_type.clone(),
                row.event_id.clone(),
                row.event_type.clone(),
                time_field(Some(row.occurred_at)),
                row.actor_login.clone(),
                row.subject_type.clone(),
                row.subject.clone(),
                row.reference.clone(),
            ]
        }),
    )?;

    write_csv(
        &out_dir.join("repo_comment.csv"),
        &[
            "repo_full_name",
            "number",
            "type",
            "comment_id",
            "url",
            "created_at",
            "author_login",
            "author_association",
            "body_excerpt",
        ],
        views.comments.iter().map(|row| {
            vec![
                row.repo_full_name.clone(),
                row.number.to_string(),
                row.item_type.clone(),
                row.comment_id.clone(),
                row.url.clone(),
                time_field(Some(row.created_at)),
                row.author_login.clone(),
                row.author_association.clone(),
                row.body_excerpt.clone(),
            ]
        }),
    )?;

    write_csv(
        &out_dir.join("repo_pr_review.csv"),
        &[
            "repo_full_name",
            "pr_number",
            "review_id",
            "review_state",
            "submitted_at",
            "author_login",
            "body_excerpt",
            "reference",
        ],
        views.reviews.iter().map(|row| {
            vec![
                row.repo_full_name.clone(),
                row.pr_number.to_string(),
                row.review_id.clone(),
                row.review_state.clone(),
                time_field(Some(row.submitted_at)),
                row.author_login.clone(),
                row.body_excerpt.clone(),
                row.reference.clone(),
            ]
        }),
    )?;

    write_csv(
        &out_dir.join("repo_user_activity.csv"),
        &[
            "repo_full_name",
            "login",
            "activity",
            "number",
            "occurred_at",
            "reference",
        ],
        views.activity.iter().map(|row| {
            vec![
                row.repo_full_name.clone(),
                row.login.clone(),
                row.activity.clone(),
                row.number.to_string(),
                time_field(row.occurred_at),
                row.reference.clone(),
            ]
        }),
    )?;

    Ok(())
}

fn time_field(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn count_field(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_csv<I>(path: &Path, header: &[&str], rows: I) -> PrismResult<()>
where
    I: Iterator<Item = Vec<String>>,
{
    let mut out = String::new();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in rows {
        let encoded: Vec<String> = row.iter().map(|field| csv_escape(field)).collect();
        out.push_str(&encoded.join(","));
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::WorkItemEventRow;

    #[test]
    fn csv_escape_quotes_only_when_needed() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn exports_all_view_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut views = ProjectedViews::default();
        views.events.push(WorkItemEventRow {
            repo_full_name: "acme/widget".into(),
            number: 5,
            item_type: "issue".into(),
            event_id: "E1".into(),
            event_type: "Closed".into(),
            occurred_at: Utc::now(),
            actor_login: "@alice".into(),
            subject_type: String::new(),
            subject: String::new(),
            reference: "https://github.com/acme/widget/issues/5".into(),
        });
        export_views(&views, dir.path()).unwrap();
        for name in [
            "repo_work_item.csv",
            "repo_work_item_event.csv",
            "repo_comment.csv",
            "repo_pr_review.csv",
            "repo_user_activity.csv",
        ] {
            assert!(dir.path().join(name).is_file(), "missing {name}");
        }
        let events = std::fs::read_to_string(dir.path().join("repo_work_item_event.csv")).unwrap();
        assert!(events.lines().count() == 2);
        assert!(events.contains("@alice"));
    }
}
