//! Weekly columns

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::backend::{Order, Query};
use crate::cache::CacheKey;
use crate::error::ServiceResult;
use crate::services::{BaseService, StateChannel, ViewState};

const TABLE: &str = "weekly_columns";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyColumn {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Option<String>,
    /// Monday of the week the column belongs to
    pub week_start: NaiveDate,
}

pub struct WeeklyColumnService {
    base: BaseService,
    columns: StateChannel<Vec<WeeklyColumn>>,
}

impl WeeklyColumnService {
    pub fn new(base: BaseService) -> Self {
        Self {
            base,
            columns: StateChannel::new(),
        }
    }

    pub fn state(&self) -> &StateChannel<Vec<WeeklyColumn>> {
        &self.columns
    }

    pub fn snapshot(&self) -> ViewState<Vec<WeeklyColumn>> {
        self.columns.snapshot()
    }

    /// The `limit` most recent published columns.
    pub async fn load_latest(&self, limit: usize) -> ServiceResult<Vec<WeeklyColumn>> {
        if limit == 0 {
            self.columns.finish(Vec::new());
            return Ok(Vec::new());
        }
        self.columns.start_loading();
        let query = Query::table(TABLE)
            .eq("is_published", true)
            .order("week_start", Order::Desc)
            .limit(limit);
        let result = self
            .base
            .fetch_cached(&CacheKey::weekly_columns(limit), &query, None)
            .await;
        if let Ok(columns) = &result {
            self.columns.finish(columns.clone());
        }
        self.columns.settle(result)
    }

    pub async fn load_column(&self, id: &str) -> ServiceResult<WeeklyColumn> {
        let result = self
            .base
            .fetch_one(&Query::table(TABLE).eq("id", id).eq("is_published", true))
            .await;
        self.columns.settle(result)
    }
}
