//! Self-assessment tests
//!
//! A test is a list of questions whose options carry scores. Submitting sums
//! the chosen scores and picks the result band containing the total.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::backend::{Database, Order, Query};
use crate::cache::CacheKey;
use crate::error::{ServiceError, ServiceResult};
use crate::services::{codec, BaseService, StateChannel, ViewState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: String,
    pub text: String,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<AnswerOption>,
}

/// Inclusive score range and the verdict shown for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBand {
    pub min_score: i32,
    pub max_score: i32,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl ResultBand {
    pub fn contains(&self, score: i32) -> bool {
        (self.min_score..=self.max_score).contains(&score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub results: Vec<ResultBand>,
}

impl Assessment {
    /// Scores `answers` (question id to option id). Every question must be
    /// answered with one of its own options.
    pub fn score(&self, answers: &HashMap<String, String>) -> ServiceResult<(i32, &ResultBand)> {
        if let Some(unknown) = answers
            .keys()
            .find(|question_id| !self.questions.iter().any(|q| &q.id == *question_id))
        {
            return Err(ServiceError::InvalidData(format!("Unknown question {}", unknown)));
        }

        let mut total = 0;
        for question in &self.questions {
            let chosen = answers
                .get(&question.id)
                .ok_or_else(|| ServiceError::InvalidData(format!("Question {} is unanswered", question.id)))?;
            let option = question
                .options
                .iter()
                .find(|option| &option.id == chosen)
                .ok_or_else(|| {
                    ServiceError::InvalidData(format!("{} is not an option of question {}", chosen, question.id))
                })?;
            total += option.score;
        }

        let band = self
            .results
            .iter()
            .find(|band| band.contains(total))
            .ok_or_else(|| ServiceError::InvalidData(format!("No result covers score {}", total)))?;
        Ok((total, band))
    }
}

/// A stored submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub test_id: String,
    pub score: i32,
    pub result_title: String,
    #[serde(with = "codec::timestamp")]
    pub created_at: DateTime<Utc>,
}

pub struct AssessmentService {
    base: BaseService,
    tests: StateChannel<Vec<Assessment>>,
}

impl AssessmentService {
    pub fn new(base: BaseService) -> Self {
        Self {
            base,
            tests: StateChannel::new(),
        }
    }

    pub fn state(&self) -> &StateChannel<Vec<Assessment>> {
        &self.tests
    }

    pub fn snapshot(&self) -> ViewState<Vec<Assessment>> {
        self.tests.snapshot()
    }

    pub async fn load_tests(&self) -> ServiceResult<Vec<Assessment>> {
        self.tests.start_loading();
        let query = Query::table("tests").order("title", Order::Asc);
        let result = self.base.fetch_cached(&CacheKey::tests(), &query, None).await;
        if let Ok(tests) = &result {
            self.tests.finish(tests.clone());
        }
        self.tests.settle(result)
    }

    pub async fn load_test(&self, test_id: &str) -> ServiceResult<Assessment> {
        self.load_tests()
            .await?
            .into_iter()
            .find(|test| test.id == test_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Test {}", test_id)))
    }

    /// Scores and stores a submission.
    pub async fn submit(&self, test_id: &str, answers: &HashMap<String, String>) -> ServiceResult<TestResult> {
        let user_id = self.base.current_user_id().await?;
        let test = self.load_test(test_id).await?;
        let (score, band) = test.score(answers)?;

        let row = json!({
            "user_id": user_id,
            "test_id": test_id,
            "score": score,
            "result_title": band.title,
            "answers": answers,
        });
        let stored = self
            .base
            .backend()
            .insert("test_results", row)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Unknown("Insert returned no row".to_string()))?;
        info!(test_id = %test_id, score, "Test submitted");
        codec::decode_row(stored)
    }

    /// The user's past submissions, newest first.
    pub async fn load_results(&self) -> ServiceResult<Vec<TestResult>> {
        let user_id = self.base.current_user_id().await?;
        let query = Query::table("test_results")
            .eq("user_id", user_id)
            .order("created_at", Order::Desc);
        self.base.fetch_rows(&query).await
    }
}
