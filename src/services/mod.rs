//! Feature services
//!
//! Every service wraps a [`BaseService`] (backend handle plus the shared cache)
//! and publishes what it loaded as a [`ViewState`] on a watch channel.

pub mod assessments;
pub mod chat;
pub mod codec;
pub mod courses;
pub mod device_tokens;
pub mod notifications;
pub mod profile;
pub mod weekly_columns;

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::backend::{AuthApi, Database, Query, SharedBackend};
use crate::cache::{Cache, CacheKey};
use crate::error::{ServiceError, ServiceResult};

pub use assessments::AssessmentService;
pub use chat::ChatService;
pub use courses::CourseService;
pub use device_tokens::DeviceTokenService;
pub use notifications::NotificationService;
pub use profile::ProfileService;
pub use weekly_columns::WeeklyColumnService;

// == View state ==
/// What a screen renders: the data, a loading flag and the last failure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewState<T> {
    pub data: T,
    pub is_loading: bool,
    pub error: Option<ServiceError>,
}

/// Watch-backed holder of a [`ViewState`]. Clones publish to the same channel.
#[derive(Debug)]
pub struct StateChannel<T> {
    tx: Arc<watch::Sender<ViewState<T>>>,
}

impl<T> Clone for StateChannel<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T: Clone + Default> Default for StateChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default> StateChannel<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ViewState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState<T>> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ViewState<T> {
        self.tx.borrow().clone()
    }

    pub fn data(&self) -> T {
        self.tx.borrow().data.clone()
    }

    pub fn start_loading(&self) {
        self.tx.send_modify(|state| {
            state.is_loading = true;
            state.error = None;
        });
    }

    pub fn finish(&self, data: T) {
        self.tx.send_modify(|state| {
            state.data = data;
            state.is_loading = false;
            state.error = None;
        });
    }

    /// Edits the published data in place.
    pub fn modify(&self, change: impl FnOnce(&mut T)) {
        self.tx.send_modify(|state| change(&mut state.data));
    }

    /// Publishes the error of a failed result and passes the result through.
    pub fn settle<R>(&self, result: ServiceResult<R>) -> ServiceResult<R> {
        if let Err(e) = &result {
            self.tx.send_modify(|state| {
                state.is_loading = false;
                state.error = Some(e.clone());
            });
        }
        result
    }
}

// == Base service ==
/// Backend and cache access shared by the feature services.
#[derive(Clone)]
pub struct BaseService {
    backend: SharedBackend,
    cache: Option<Cache>,
}

impl BaseService {
    pub fn new(backend: SharedBackend, cache: Option<Cache>) -> Self {
        Self { backend, cache }
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn cache(&self) -> Option<&Cache> {
        self.cache.as_ref()
    }

    /// Id of the signed-in user.
    pub async fn current_user_id(&self) -> ServiceResult<String> {
        self.backend
            .session()
            .await
            .map(|session| session.user.id)
            .ok_or(ServiceError::Unauthorized)
    }

    pub async fn fetch_rows<T: DeserializeOwned>(&self, query: &Query) -> ServiceResult<Vec<T>> {
        let rows = self.backend.select(query).await?;
        codec::decode_rows(rows)
    }

    /// First row matching `query`, or `NotFound`.
    pub async fn fetch_one<T: DeserializeOwned>(&self, query: &Query) -> ServiceResult<T> {
        let query = query.clone().limit(1);
        let row = self
            .backend
            .select(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::NotFound(format!("No row in {}", query.table)))?;
        codec::decode_row(row)
    }

    /// Cache-aside read: serves `key` when fresh, otherwise runs `query` and
    /// stores the decoded rows for `ttl` (the cache default when `None`).
    pub async fn fetch_cached<T>(&self, key: &CacheKey, query: &Query, ttl: Option<Duration>) -> ServiceResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(cache) = &self.cache {
            if let Some(rows) = cache.get::<Vec<T>, _>(key).await {
                return Ok(rows);
            }
        }

        let rows: Vec<T> = self.fetch_rows(query).await?;
        if let Some(cache) = &self.cache {
            match ttl {
                Some(ttl) => cache.set_with_ttl(key, &rows, ttl).await,
                None => cache.set(key, &rows).await,
            }
        }
        debug!(key = %key, count = rows.len(), "Fetched rows");
        Ok(rows)
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        if let Some(cache) = &self.cache {
            cache.remove(key).await;
        }
    }

    pub async fn invalidate_resource(&self, resource: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_resource(resource).await;
        }
    }
}
