//! Notification inbox

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::backend::{Database, Order, Query};
use crate::cache::CacheKey;
use crate::error::ServiceResult;
use crate::services::{codec, BaseService, StateChannel, ViewState};

/// How long a loaded inbox is served from cache.
pub const NOTIFICATIONS_TTL: Duration = Duration::from_secs(300);

const TABLE: &str = "notifications";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(with = "codec::timestamp")]
    pub created_at: DateTime<Utc>,
}

pub struct NotificationService {
    base: BaseService,
    state: StateChannel<Vec<Notification>>,
}

impl NotificationService {
    pub fn new(base: BaseService) -> Self {
        Self {
            base,
            state: StateChannel::new(),
        }
    }

    pub fn state(&self) -> &StateChannel<Vec<Notification>> {
        &self.state
    }

    pub fn snapshot(&self) -> ViewState<Vec<Notification>> {
        self.state.snapshot()
    }

    /// Loads the signed-in user's notifications, newest first.
    pub async fn load(&self) -> ServiceResult<Vec<Notification>> {
        self.state.start_loading();
        let result = self.fetch().await;
        if let Ok(items) = &result {
            self.state.finish(items.clone());
        }
        self.state.settle(result)
    }

    /// Drops the cached inbox and loads it again.
    pub async fn reload(&self) -> ServiceResult<Vec<Notification>> {
        if let Ok(user_id) = self.base.current_user_id().await {
            self.base.invalidate(&CacheKey::notifications(&user_id)).await;
        }
        self.load().await
    }

    async fn fetch(&self) -> ServiceResult<Vec<Notification>> {
        let user_id = self.base.current_user_id().await?;
        let query = Query::table(TABLE)
            .eq("user_id", user_id.as_str())
            .order("created_at", Order::Desc);
        self.base
            .fetch_cached(&CacheKey::notifications(&user_id), &query, Some(NOTIFICATIONS_TTL))
            .await
    }

    pub async fn mark_read(&self, id: &str) -> ServiceResult<()> {
        let result = self.set_read(Some(id)).await;
        if result.is_ok() {
            self.state.modify(|items| {
                if let Some(item) = items.iter_mut().find(|item| item.id == id) {
                    item.is_read = true;
                }
            });
        }
        self.state.settle(result)
    }

    pub async fn mark_all_read(&self) -> ServiceResult<()> {
        let result = self.set_read(None).await;
        if result.is_ok() {
            self.state.modify(|items| items.iter_mut().for_each(|item| item.is_read = true));
        }
        self.state.settle(result)
    }

    async fn set_read(&self, id: Option<&str>) -> ServiceResult<()> {
        let user_id = self.base.current_user_id().await?;
        let mut query = Query::table(TABLE).eq("user_id", user_id.as_str());
        if let Some(id) = id {
            query = query.eq("id", id);
        }
        let updated = self.base.backend().update(&query, json!({ "is_read": true })).await?;
        self.base.invalidate(&CacheKey::notifications(&user_id)).await;
        info!(count = updated.len(), "Notifications marked read");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> ServiceResult<()> {
        let result: ServiceResult<()> = async {
            let user_id = self.base.current_user_id().await?;
            let query = Query::table(TABLE).eq("user_id", user_id.as_str()).eq("id", id);
            self.base.backend().delete(&query).await?;
            self.base.invalidate(&CacheKey::notifications(&user_id)).await;
            Ok(())
        }
        .await;
        if result.is_ok() {
            self.state.modify(|items| items.retain(|item| item.id != id));
        }
        self.state.settle(result)
    }

    /// Unread notifications among those loaded.
    pub fn unread_count(&self) -> usize {
        self.state.data().iter().filter(|item| !item.is_read).count()
    }
}
