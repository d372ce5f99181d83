//! Repository insight report: per-contributor activity aggregated from the
//! projected views, with a tunable weighting for the overall score.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PrismResult;
use crate::projector::ProjectedViews;

/// Weights for the composite activity score. The defaults favor authored
/// work over drive-by comments; callers can supply their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityWeights {
    pub opened: f64,
    pub commented: f64,
    pub reviewed: f64,
    pub merged: f64,
}

impl Default for ActivityWeights {
    fn default() -> Self {
        Self {
            opened: 2.0,
            commented: 0.5,
            reviewed: 1.0,
            merged: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContributorInsight {
    pub login: String,
    pub issues_opened: usize,
    pub prs_opened: usize,
    pub comments: usize,
    pub reviews: usize,
    pub merged_prs: usize,
    pub activity_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightReport {
    pub repo_full_name: String,
    pub work_item_count: usize,
    pub contributors: Vec<ContributorInsight>,
}

pub fn build_insights(views: &ProjectedViews, weights: &ActivityWeights) -> InsightReport {
    let repo_full_name = views
        .work_items
        .first()
        .map(|item| item.repo_full_name.clone())
        .or_else(|| views.activity.first().map(|a| a.repo_full_name.clone()))
        .unwrap_or_default();

    let mut by_login: BTreeMap<String, ContributorInsight> = BTreeMap::new();

    for activity in &views.activity {
        let insight = by_login
            .entry(activity.login.clone())
            .or_insert_with(|| ContributorInsight {
                login: activity.login.clone(),
                ..Default::default()
            });
        match activity.activity.as_str() {
            "issue_opened" => insight.issues_opened += 1,
            "pr_opened" => insight.prs_opened += 1,
            "commented" => insight.comments += 1,
            "reviewed" => insight.reviews += 1,
            _ => {}
        }
    }

    for item in &views.work_items {
        if item.is_merged && !item.author_login.is_empty() {
            by_login
                .entry(item.author_login.clone())
                .or_insert_with(|| ContributorInsight {
                    login: item.author_login.clone(),
                    ..Default::default()
                })
                .merged_prs += 1;
        }
    }

    let mut contributors: Vec<ContributorInsight> = by_login
        .into_values()
        .map(|mut insight| {
            insight.activity_score = weights.opened
                * (insight.issues_opened + insight.prs_opened) as f64
                + weights.commented * insight.comments as f64
                + weights.reviewed * insight.reviews as f64
                + weights.merged * insight.merged_prs as f64;
            insight
        })
        .collect();
    contributors.sort_by(|a, b| {
        b.activity_score
            .total_cmp(&a.activity_score)
            .then_with(|| a.login.cmp(&b.login))
    });

    InsightReport {
        repo_full_name,
        work_item_count: views.work_items.len(),
        contributors,
    }
}

/// Write `repo_insights.json` and `repo_insights.md` under `out_dir`.
pub fn write_insights(report: &InsightReport, out_dir: &Path) -> PrismResult<()> {
    std::fs::create_dir_all(out_dir)?;
    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    std::fs::write(out_dir.join("repo_insights.json"), json)?;

    let mut md = String::new();
    md.push_str(&format!("# Repo insights: {}\n\n", report.repo_full_name));
    md.push_str(&format!("Work items: {}\n\n", report.work_item_count));
    md.push_str("| contributor | issues | prs | comments | reviews | merged | score |\n");
    md.push_str("|---|---|---|---|---|---|---|\n");
    for c in &report.contributors {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {:.2} |\n",
            c.login, c.issues_opened, c.prs_opened, c.comments, c.reviews, c.merged_prs,
            c.activity_score
        ));
    }
    std::fs::write(out_dir.join("repo_insights.md"), md)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::UserActivityRow;

    #[test]
    fn scores_follow_weights_and_sort_descending() {
        let mut views = ProjectedViews::default();
        for (login, activity, count) in [
            ("@alice", "pr_opened", 3),
            ("@alice", "reviewed", 2),
            ("@bob", "commented", 4),
        ] {
            for i in 0..count {
                views.activity.push(UserActivityRow {
                    repo_full_name: "acme/widget".into(),
                    login: login.into(),
                    activity: activity.into(),
                    number: i,
                    occurred_at: None,
                    reference: String::new(),
                });
            }
        }

        let report = build_insights(&views, &ActivityWeights::default());
        assert_eq!(report.contributors[0].login, "@alice");
        assert!((report.contributors[0].activity_score - (3.0 * 2.0 + 2.0)).abs() < 1e-9);
        assert!((report.contributors[1].activity_score - 2.0).abs() < 1e-9);
    }

    #[test]
    fn custom_weights_change_the_ranking() {
        let mut views = ProjectedViews::default();
        views.activity.push(UserActivityRow {
            repo_full_name: "acme/widget".into(),
            login: "@opener".into(),
            activity: "pr_opened".into(),
            number: 1,
            occurred_at: None,
            reference: String::new(),
        });
        for i in 0..3 {
            views.activity.push(UserActivityRow {
                repo_full_name: "acme/widget".into(),
                login: "@commenter".into(),
                activity: "commented".into(),
                number: i,
                occurred_at: None,
                reference: String::new(),
            });
        }

        let default_report = build_insights(&views, &ActivityWeights::default());
        assert_eq!(default_report.contributors[0].login, "@opener");

        let comment_heavy = ActivityWeights {
            commented: 5.0,
            ..ActivityWeights::default()
        };
        let weighted_report = build_insights(&views, &comment_heavy);
        assert_eq!(weighted_report.contributors[0].login, "@commenter");
    }
}
