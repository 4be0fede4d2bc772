//! User profile and avatar

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::backend::{Database, Query, Storage};
use crate::cache::CacheKey;
use crate::error::{ServiceError, ServiceResult};
use crate::services::{codec, BaseService, StateChannel, ViewState};

pub const AVATAR_BUCKET: &str = "avatars";

const TABLE: &str = "profiles";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Same as the auth user id
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default, with = "codec::option_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial profile edit. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self == &ProfileUpdate::default()
    }
}

fn avatar_content_type(extension: &str) -> Option<&'static str> {
    match extension {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "heic" => Some("image/heic"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub struct ProfileService {
    base: BaseService,
    profile: StateChannel<Option<Profile>>,
}

impl ProfileService {
    pub fn new(base: BaseService) -> Self {
        Self {
            base,
            profile: StateChannel::new(),
        }
    }

    pub fn state(&self) -> &StateChannel<Option<Profile>> {
        &self.profile
    }

    pub fn snapshot(&self) -> ViewState<Option<Profile>> {
        self.profile.snapshot()
    }

    pub async fn load(&self) -> ServiceResult<Profile> {
        self.profile.start_loading();
        let result = self.fetch().await;
        if let Ok(profile) = &result {
            self.profile.finish(Some(profile.clone()));
        }
        self.profile.settle(result)
    }

    async fn fetch(&self) -> ServiceResult<Profile> {
        let user_id = self.base.current_user_id().await?;
        let key = CacheKey::profile(&user_id);
        if let Some(cache) = self.base.cache() {
            if let Some(profile) = cache.get::<Profile, _>(&key).await {
                return Ok(profile);
            }
        }

        let profile: Profile = self
            .base
            .fetch_one(&Query::table(TABLE).eq("id", user_id))
            .await?;
        if let Some(cache) = self.base.cache() {
            cache.set(&key, &profile).await;
        }
        Ok(profile)
    }

    pub async fn update(&self, update: &ProfileUpdate) -> ServiceResult<Profile> {
        let result = self.apply(update).await;
        if let Ok(profile) = &result {
            self.profile.finish(Some(profile.clone()));
        }
        self.profile.settle(result)
    }

    async fn apply(&self, update: &ProfileUpdate) -> ServiceResult<Profile> {
        if update.is_empty() {
            return Err(ServiceError::InvalidData("Nothing to update".to_string()));
        }
        let user_id = self.base.current_user_id().await?;

        let mut patch = codec::encode_row(update)?;
        if let Value::Object(fields) = &mut patch {
            fields.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));
        }
        let row = self
            .base
            .backend()
            .update(&Query::table(TABLE).eq("id", user_id.as_str()), patch)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::NotFound(format!("Profile {}", user_id)))?;
        self.base.invalidate(&CacheKey::profile(&user_id)).await;
        codec::decode_row(row)
    }

    /// Uploads a new avatar image and points the profile at it. Returns the
    /// public URL.
    pub async fn upload_avatar(&self, bytes: Vec<u8>, extension: &str) -> ServiceResult<String> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        let result: ServiceResult<String> = async move {
            let content_type = avatar_content_type(&extension)
                .ok_or_else(|| ServiceError::InvalidData(format!("Unsupported image type {}", extension)))?;
            if bytes.is_empty() {
                return Err(ServiceError::InvalidData("Image is empty".to_string()));
            }
            let user_id = self.base.current_user_id().await?;

            let path = format!("{}/avatar.{}", user_id, extension);
            let storage = self.base.backend();
            storage.upload(AVATAR_BUCKET, &path, bytes, content_type, true).await?;
            let url = storage.public_url(AVATAR_BUCKET, &path);
            info!(path = %path, "Avatar uploaded");
            Ok(url)
        }
        .await;

        let url = self.profile.settle(result)?;
        let update = ProfileUpdate {
            avatar_url: Some(url.clone()),
            ..ProfileUpdate::default()
        };
        self.update(&update).await?;
        Ok(url)
    }
}
