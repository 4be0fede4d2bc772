//! Course catalogue, enrollment and lesson progress

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::backend::{Database, Order, Query};
use crate::cache::CacheKey;
use crate::error::ServiceResult;
use crate::services::{codec, BaseService, StateChannel, ViewState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default, with = "codec::option_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub course_id: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    pub position: i32,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct Enrollment {
    course_id: String,
}

pub struct CourseService {
    base: BaseService,
    courses: StateChannel<Vec<Course>>,
}

impl CourseService {
    pub fn new(base: BaseService) -> Self {
        Self {
            base,
            courses: StateChannel::new(),
        }
    }

    pub fn state(&self) -> &StateChannel<Vec<Course>> {
        &self.courses
    }

    pub fn snapshot(&self) -> ViewState<Vec<Course>> {
        self.courses.snapshot()
    }

    /// Published courses, newest first.
    pub async fn load_courses(&self) -> ServiceResult<Vec<Course>> {
        self.courses.start_loading();
        let query = Query::table("courses")
            .eq("is_published", true)
            .order("created_at", Order::Desc);
        let result = self.base.fetch_cached(&CacheKey::courses(), &query, None).await;
        if let Ok(courses) = &result {
            self.courses.finish(courses.clone());
        }
        self.courses.settle(result)
    }

    /// Lessons of a course in teaching order.
    pub async fn load_lessons(&self, course_id: &str) -> ServiceResult<Vec<Lesson>> {
        let query = Query::table("lessons")
            .eq("course_id", course_id)
            .order("position", Order::Asc);
        self.base
            .fetch_cached(&CacheKey::lessons(course_id), &query, None)
            .await
    }

    pub async fn enroll(&self, course_id: &str) -> ServiceResult<()> {
        let user_id = self.base.current_user_id().await?;
        let row = json!({
            "user_id": user_id,
            "course_id": course_id,
            "enrolled_at": Utc::now().to_rfc3339(),
        });
        self.base
            .backend()
            .upsert("enrollments", row, Some("user_id,course_id"))
            .await?;
        info!(course_id = %course_id, "Enrolled in course");
        Ok(())
    }

    pub async fn enrolled_course_ids(&self) -> ServiceResult<Vec<String>> {
        let user_id = self.base.current_user_id().await?;
        let query = Query::table("enrollments").eq("user_id", user_id);
        let rows: Vec<Enrollment> = self.base.fetch_rows(&query).await?;
        Ok(rows.into_iter().map(|row| row.course_id).collect())
    }

    /// Records a finished lesson; completing it twice is harmless.
    pub async fn complete_lesson(&self, course_id: &str, lesson_id: &str) -> ServiceResult<()> {
        let user_id = self.base.current_user_id().await?;
        let row = json!({
            "user_id": user_id,
            "course_id": course_id,
            "lesson_id": lesson_id,
            "completed": true,
            "completed_at": Utc::now().to_rfc3339(),
        });
        self.base
            .backend()
            .upsert("lesson_progress", row, Some("user_id,lesson_id"))
            .await?;
        Ok(())
    }

    /// Fraction of the course's lessons the user completed, in `0.0..=1.0`.
    pub async fn progress(&self, course_id: &str) -> ServiceResult<f64> {
        let user_id = self.base.current_user_id().await?;
        let lessons = self.load_lessons(course_id).await?;
        if lessons.is_empty() {
            return Ok(0.0);
        }

        let query = Query::table("lesson_progress")
            .eq("user_id", user_id)
            .eq("course_id", course_id)
            .eq("completed", true);
        let done = self.base.backend().select(&query).await?;
        let completed = done
            .iter()
            .filter_map(|row| row.get("lesson_id").and_then(|id| id.as_str()))
            .filter(|id| lessons.iter().any(|lesson| lesson.id == *id))
            .count();
        Ok(completed as f64 / lessons.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AuthApi, MemoryBackend};
    use crate::cache::{Cache, CacheLimits};
    use crate::error::ServiceError;
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryBackend>, CourseService) {
        let backend = Arc::new(MemoryBackend::new());
        backend.create_account("ana@example.com", "secret1").await;
        backend.sign_in("ana@example.com", "secret1").await.unwrap();
        backend
            .seed(
                "courses",
                vec![
                    json!({"id": "c1", "title": "Knowing yourself", "is_published": true, "created_at": "2024-01-01T00:00:00Z"}),
                    json!({"id": "c2", "title": "Draft", "is_published": false, "created_at": "2024-02-01T00:00:00Z"}),
                    json!({"id": "c3", "title": "Habits", "is_published": true, "created_at": "2024-03-01T00:00:00Z"}),
                ],
            )
            .await;
        backend
            .seed(
                "lessons",
                vec![
                    json!({"id": "l2", "course_id": "c1", "title": "Two", "position": 2}),
                    json!({"id": "l1", "course_id": "c1", "title": "One", "position": 1}),
                    json!({"id": "l3", "course_id": "c1", "title": "Three", "position": 3}),
                    json!({"id": "l4", "course_id": "c1", "title": "Four", "position": 4}),
                ],
            )
            .await;
        let cache = Cache::new(CacheLimits::unbounded(), Duration::from_secs(300));
        let service = CourseService::new(BaseService::new(backend.clone(), Some(cache)));
        (backend, service)
    }

    #[tokio::test]
    async fn test_only_published_courses_newest_first() {
        let (_backend, service) = setup().await;
        let courses = service.load_courses().await.unwrap();
        let ids: Vec<&str> = courses.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c1"]);
        assert_eq!(service.snapshot().data, courses);
    }

    #[tokio::test]
    async fn test_lessons_in_position_order() {
        let (_backend, service) = setup().await;
        let lessons = service.load_lessons("c1").await.unwrap();
        let positions: Vec<i32> = lessons.iter().map(|l| l.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent() {
        let (backend, service) = setup().await;
        service.enroll("c1").await.unwrap();
        service.enroll("c1").await.unwrap();

        assert_eq!(backend.rows("enrollments").await.len(), 1);
        assert_eq!(service.enrolled_course_ids().await.unwrap(), vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn test_progress_counts_completed_lessons() {
        let (_backend, service) = setup().await;
        assert_eq!(service.progress("c1").await.unwrap(), 0.0);

        service.complete_lesson("c1", "l1").await.unwrap();
        service.complete_lesson("c1", "l1").await.unwrap();
        service.complete_lesson("c1", "l3").await.unwrap();

        assert_eq!(service.progress("c1").await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_progress_of_empty_course_is_zero() {
        let (_backend, service) = setup().await;
        assert_eq!(service.progress("c3").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_enroll_requires_session() {
        let (backend, service) = setup().await;
        backend.sign_out().await.unwrap();
        assert_eq!(service.enroll("c1").await, Err(ServiceError::Unauthorized));
    }
}
