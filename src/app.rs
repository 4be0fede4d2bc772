//! Composition root
//!
//! Builds the one backend handle, the one cache and everything that depends
//! on them. Screens receive what they need from here.

use std::sync::Arc;

use tracing::info;

use crate::backend::{HttpBackend, SharedBackend};
use crate::cache::Cache;
use crate::config::Config;
use crate::error::BackendResult;
use crate::preferences::Preferences;
use crate::services::{
    AssessmentService, BaseService, ChatService, CourseService, DeviceTokenService, NotificationService,
    ProfileService, WeeklyColumnService,
};
use crate::session::SessionManager;

pub struct AppContext {
    pub backend: SharedBackend,
    pub cache: Cache,
    pub preferences: Option<Preferences>,
    pub session: Arc<SessionManager>,
    pub notifications: NotificationService,
    pub courses: CourseService,
    pub assessments: AssessmentService,
    pub chat: ChatService,
    pub profile: ProfileService,
    pub weekly_columns: WeeklyColumnService,
    pub device_tokens: DeviceTokenService,
}

impl AppContext {
    /// Wires everything around an existing backend.
    pub fn new(backend: SharedBackend, cache: Cache, preferences: Option<Preferences>) -> Self {
        let session = Arc::new(SessionManager::new(
            backend.clone(),
            Some(cache.clone()),
            preferences.clone(),
        ));
        let base = BaseService::new(backend.clone(), Some(cache.clone()));

        Self {
            notifications: NotificationService::new(base.clone()),
            courses: CourseService::new(base.clone()),
            assessments: AssessmentService::new(base.clone()),
            chat: ChatService::new(base.clone()),
            profile: ProfileService::new(base.clone()),
            weekly_columns: WeeklyColumnService::new(base.clone()),
            device_tokens: DeviceTokenService::new(base),
            backend,
            cache,
            preferences,
            session,
        }
    }

    /// Builds the REST-backed context described by `config`.
    pub fn from_config(config: &Config) -> BackendResult<Self> {
        let backend: SharedBackend = Arc::new(HttpBackend::from_config(config)?);
        let cache = Cache::from_config(config);
        let preferences = Preferences::open_configured(config.preferences_path.as_deref());
        info!(
            backend_url = %config.backend_url,
            cache_bounded = config.cache_limits().is_bounded(),
            "Client context created"
        );
        Ok(Self::new(backend, cache, preferences))
    }
}
