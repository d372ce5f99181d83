//! Lesson store: insert-with-embedding, ANN duplicate detection, and
//! role-scoped recall.

use std::sync::Arc;

use uuid::Uuid;

use crate::court::models::Lesson;
use crate::embeddings::{compose_lesson_embedding_text, Embedder, EmbeddingResult};
use crate::error::PrismResult;
use crate::redaction::Redactor;
use crate::storage::{CourtStore, LessonSearchHit};

pub const DUPLICATE_K: usize = 5;
pub const DUPLICATE_MAX_DISTANCE: f32 = 0.25;

pub struct LessonService {
    store: Arc<dyn CourtStore>,
    embedder: Arc<dyn Embedder>,
    redactor: Arc<Redactor>,
    duplicate_max_distance: f32,
}

impl LessonService {
    pub fn new(
        store: Arc<dyn CourtStore>,
        embedder: Arc<dyn Embedder>,
        redactor: Arc<Redactor>,
    ) -> Self {
        Self {
            store,
            embedder,
            redactor,
            duplicate_max_distance: DUPLICATE_MAX_DISTANCE,
        }
    }

    pub fn with_duplicate_max_distance(mut self, max_distance: f32) -> Self {
        self.duplicate_max_distance = max_distance;
        self
    }

    fn embedding_input(lesson: &Lesson) -> String {
        compose_lesson_embedding_text(
            &lesson.title,
            &lesson.content,
            lesson.rationale.as_deref().unwrap_or(""),
        )
    }

    /// Insert a lesson with full embedding provenance. The redaction gate
    /// runs before any embedding call so sensitive text never leaves the
    /// process either.
    pub async fn insert_lesson(
        &self,
        case_id: Option<Uuid>,
        lesson: &Lesson,
    ) -> PrismResult<(Uuid, EmbeddingResult)> {
        self.redactor
            .assert_no_sensitive_data(&serde_json::to_value(lesson)?)?;
        let embedding = self.embedder.embed_one(&Self::embedding_input(lesson)).await?;
        let lesson_id = self.store.store_lesson(case_id, lesson, Some(&embedding)).await?;
        Ok((lesson_id, embedding))
    }

    /// Nearby stored lessons for the same role, close enough to be the same
    /// lesson. Callers may suppress the insert or set `supersedes_lesson_id`.
    pub async fn find_duplicate_candidates(
        &self,
        lesson: &Lesson,
    ) -> PrismResult<Vec<LessonSearchHit>> {
        let embedding = self.embedder.embed_one(&Self::embedding_input(lesson)).await?;
        let hits = self
            .store
            .search_lessons(&lesson.role, &embedding, DUPLICATE_K)
            .await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.distance <= self.duplicate_max_distance)
            .collect())
    }

    /// Role-scoped top-k recall. Model/dimension filtering happens in the
    /// store so cross-model vectors never rank against each other.
    pub async fn search_lessons(
        &self,
        role: &str,
        query: &str,
        k: usize,
    ) -> PrismResult<Vec<LessonSearchHit>> {
        self.redactor
            .assert_no_sensitive_data(&serde_json::json!({"role": role, "query": query}))?;
        let embedding = self.embedder.embed_one(query).await?;
        self.store.search_lessons(role, &embedding, k).await
    }
}
