//! Retrieval over the knowledge base: keyword (tsvector), vector (pgvector
//! ANN), and hybrid reciprocal-rank fusion.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::embeddings::Embedder;
use crate::error::PrismResult;

const EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    Vector,
    Hybrid,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Hybrid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub kb_id: String,
    pub item_type: String,
    pub item_number: i64,
    pub section: String,
    pub source_ref: String,
    pub text: String,
    pub metadata: Value,
    pub score: Option<f64>,
}

/// Fusion constants: `score(doc) = Σ wᵢ · 1/(k₀ + rankᵢ)`.
#[derive(Debug, Clone, Copy)]
pub struct RrfWeights {
    pub k0: f64,
    pub keyword: f64,
    pub vector: f64,
}

impl Default for RrfWeights {
    fn default() -> Self {
        Self {
            k0: 60.0,
            keyword: 0.3,
            vector: 0.7,
        }
    }
}

pub struct Retriever {
    pool: PgPool,
    embedder: Arc<dyn Embedder>,
    weights: RrfWeights,
}

impl Retriever {
    pub fn new(pool: PgPool, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            pool,
            embedder,
            weights: RrfWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: RrfWeights) -> Self {
        self.weights = weights;
        self
    }

    pub async fn search(
        &self,
        mode: SearchMode,
        query: &str,
        limit: usize,
        repo_filter: Option<&str>,
    ) -> PrismResult<Vec<SearchResult>> {
        match mode {
            SearchMode::Keyword => self.search_keyword(query, limit, repo_filter).await,
            SearchMode::Vector => self.search_vector(query, limit, repo_filter).await,
            SearchMode::Hybrid => self.search_hybrid(query, limit, repo_filter).await,
        }
    }

    /// Full-text search ranked by `ts_rank` over the generated tsvector.
    pub async fn search_keyword(
        &self,
        query: &str,
        limit: usize,
        repo_filter: Option<&str>,
    ) -> PrismResult<Vec<SearchResult>> {
        let mut sql = String::from(
            r#"
            SELECT d.kb_id, d.item_type, d.item_number, d.section,
                   d.source_ref, d."text", d.metadata,
                   ts_rank(d.text_tsv, plainto_tsquery('simple', $1))::float8 AS score
            FROM kb_document d
            WHERE d.text_tsv @@ plainto_tsquery('simple', $1)
            "#,
        );
        if repo_filter.is_some() {
            sql.push_str(" AND d.repo_full_name = $3");
        }
        sql.push_str(" ORDER BY score DESC LIMIT $2");

        let mut q = sqlx::query(&sql).bind(query).bind(limit as i64);
        if let Some(repo) = repo_filter {
            q = q.bind(repo);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(|row| row_to_result(&row)).collect()
    }

    /// ANN search over `kb_embedding`, restricted to the query embedding's
    /// `(model, dims)` so cross-model vectors never mix.
    pub async fn search_vector(
        &self,
        query: &str,
        limit: usize,
        repo_filter: Option<&str>,
    ) -> PrismResult<Vec<SearchResult>> {
        let embedding = self.embedder.embed_one(query).await?;
        let query_vector = pgvector::Vector::from(embedding.vector);

        let mut sql = String::from(
            r#"
            SELECT d.kb_id, d.item_type, d.item_number, d.section,
                   d.source_ref, d."text", d.metadata,
                   (e.embedding <-> $1)::float8 AS distance
            FROM kb_embedding e
            JOIN kb_document d ON d.kb_id = e.kb_id
            WHERE e.model = $2 AND e.dims = $3
            "#,
        );
        if repo_filter.is_some() {
            sql.push_str(" AND d.repo_full_name = $5");
        }
        sql.push_str(" ORDER BY distance ASC LIMIT $4");

        let mut q = sqlx::query(&sql)
            .bind(&query_vector)
            .bind(&embedding.model)
            .bind(embedding.dimensions as i32)
            .bind(limit as i64);
        if let Some(repo) = repo_filter {
            q = q.bind(repo);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                let mut result = row_to_result(&row)?;
                let distance: f64 = row.try_get("distance")?;
                result.score = Some(1.0 - distance);
                Ok(result)
            })
            .collect()
    }

    /// Hybrid retrieval: `2·limit` candidates from each mode, fused by RRF.
    pub async fn search_hybrid(
        &self,
        query: &str,
        limit: usize,
        repo_filter: Option<&str>,
    ) -> PrismResult<Vec<SearchResult>> {
        let keyword = self.search_keyword(query, limit * 2, repo_filter).await?;
        let vector = self.search_vector(query, limit * 2, repo_filter).await?;
        debug!(
            keyword = keyword.len(),
            vector = vector.len(),
            "fusing hybrid candidates"
        );
        Ok(rrf_fuse(&keyword, &vector, self.weights, limit))
    }
}

fn row_to_result(row: &sqlx::postgres::PgRow) -> PrismResult<SearchResult> {
    let item_number: i32 = row.try_get("item_number")?;
    let text: String = row.try_get("text")?;
    let score: Option<f64> = row.try_get("score").ok();
    Ok(SearchResult {
        kb_id: row.try_get("kb_id")?,
        item_type: row.try_get("item_type")?,
        item_number: item_number as i64,
        section: row.try_get("section")?,
        source_ref: row.try_get("source_ref")?,
        text: text.chars().take(EXCERPT_CHARS).collect(),
        metadata: row.try_get("metadata")?,
        score,
    })
}

/// Pure reciprocal-rank fusion. Ranks are 1-based per source list. Ties
/// break by fused score desc, then vector score desc, then `kb_id` asc.
pub fn rrf_fuse(
    keyword: &[SearchResult],
    vector: &[SearchResult],
    weights: RrfWeights,
    limit: usize,
) -> Vec<SearchResult> {
    let mut fused: HashMap<String, f64> = HashMap::new();
    let mut vector_scores: HashMap<String, f64> = HashMap::new();
    let mut docs: HashMap<String, SearchResult> = HashMap::new();

    for (rank, doc) in keyword.iter().enumerate() {
        let rrf = 1.0 / (weights.k0 + (rank + 1) as f64);
        *fused.entry(doc.kb_id.clone()).or_insert(0.0) += weights.keyword * rrf;
        docs.entry(doc.kb_id.clone()).or_insert_with(|| doc.clone());
    }
    for (rank, doc) in vector.iter().enumerate() {
        let rrf = 1.0 / (weights.k0 + (rank + 1) as f64);
        *fused.entry(doc.kb_id.clone()).or_insert(0.0) += weights.vector * rrf;
        vector_scores.insert(doc.kb_id.clone(), doc.score.unwrap_or(0.0));
        docs.entry(doc.kb_id.clone()).or_insert_with(|| doc.clone());
    }

    let mut ordered: Vec<(String, f64)> = fused.into_iter().collect();
    ordered.sort_by(|(a_id, a_score), (b_id, b_score)| {
        b_score
            .total_cmp(a_score)
            .then_with(|| {
                let a_vec = vector_scores.get(a_id).copied().unwrap_or(f64::NEG_INFINITY);
                let b_vec = vector_scores.get(b_id).copied().unwrap_or(f64::NEG_INFINITY);
                b_vec.total_cmp(&a_vec)
            })
            .then_with(|| a_id.cmp(b_id))
    });

    ordered
        .into_iter()
        .take(limit)
        .filter_map(|(kb_id, score)| {
            docs.remove(&kb_id).map(|mut doc| {
                doc.score = Some(score);
                doc
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(kb_id: &str, score: f64) -> SearchResult {
        SearchResult {
            kb_id: kb_id.to_string(),
            item_type: "issue".to_string(),
            item_number: 1,
            section: "title_body".to_string(),
            source_ref: String::new(),
            text: String::new(),
            metadata: json!({}),
            score: Some(score),
        }
    }

    #[test]
    fn overlap_doc_ranks_first_and_vector_beats_keyword() {
        // keyword list: overlap, kw-only; vector list: overlap, vec-only.
        let keyword = vec![doc("overlap", 0.9), doc("kw-only", 0.8)];
        let vector = vec![doc("overlap", 0.95), doc("vec-only", 0.85)];
        let fused = rrf_fuse(&keyword, &vector, RrfWeights::default(), 3);
        let ids: Vec<&str> = fused.iter().map(|d| d.kb_id.as_str()).collect();
        assert_eq!(ids, vec!["overlap", "vec-only", "kw-only"]);
    }

    #[test]
    fn top_two_keeps_overlap_then_vector_only() {
        let keyword = vec![doc("overlap", 0.9), doc("kw-only", 0.8)];
        let vector = vec![doc("overlap", 0.95), doc("vec-only", 0.85)];
        let fused = rrf_fuse(&keyword, &vector, RrfWeights::default(), 2);
        let ids: Vec<&str> = fused.iter().map(|d| d.kb_id.as_str()).collect();
        assert_eq!(ids, vec!["overlap", "vec-only"]);
    }

    #[test]
    fn raising_vector_weight_never_demotes_the_vector_leader() {
        let keyword = vec![doc("kw1", 0.9), doc("kw2", 0.8)];
        let vector = vec![doc("vec-top", 0.99), doc("kw1", 0.5)];
        let base = RrfWeights::default();

        let position = |weights: RrfWeights| -> usize {
            rrf_fuse(&keyword, &vector, weights, 4)
                .iter()
                .position(|d| d.kb_id == "vec-top")
                .unwrap()
        };

        let before = position(base);
        for bump in [0.8, 1.0, 2.0, 5.0] {
            let after = position(RrfWeights {
                vector: bump,
                ..base
            });
            assert!(after <= before, "w_vector={bump} demoted the vector leader");
        }
    }

    #[test]
    fn ties_break_by_vector_score_then_kb_id() {
        // Same fused contribution for both: each appears only in the vector
        // list at the same rank is impossible, so construct equal fusion via
        // symmetric ranks in the two lists with equal weights.
        let weights = RrfWeights {
            k0: 60.0,
            keyword: 0.5,
            vector: 0.5,
        };
        let keyword = vec![doc("a", 0.9), doc("b", 0.8)];
        let vector = vec![doc("b", 0.7), doc("a", 0.6)];
        let fused = rrf_fuse(&keyword, &vector, weights, 2);
        // Fused scores equal; b has the higher vector score.
        assert_eq!(fused[0].kb_id, "b");
        assert_eq!(fused[1].kb_id, "a");
    }

    #[test]
    fn fused_scores_are_populated() {
        let fused = rrf_fuse(&[doc("x", 0.5)], &[], RrfWeights::default(), 1);
        let expected = 0.3 * (1.0 / 61.0);
        assert!((fused[0].score.unwrap() - expected).abs() < 1e-12);
    }
}
