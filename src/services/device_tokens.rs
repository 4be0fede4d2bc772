//! Push notification device tokens

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::backend::{Database, Query};
use crate::error::{ServiceError, ServiceResult};
use crate::services::BaseService;

const TABLE: &str = "device_tokens";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Macos,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Macos => "macos",
        }
    }
}

pub struct DeviceTokenService {
    base: BaseService,
}

impl DeviceTokenService {
    pub fn new(base: BaseService) -> Self {
        Self { base }
    }

    /// Stores the device's push token for the signed-in user. A token that
    /// moved to another account is reassigned.
    pub async fn register(&self, token: &str, platform: Platform) -> ServiceResult<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ServiceError::InvalidData("Device token is empty".to_string()));
        }
        let user_id = self.base.current_user_id().await?;
        let row = json!({
            "token": token,
            "user_id": user_id,
            "platform": platform.as_str(),
            "updated_at": Utc::now().to_rfc3339(),
        });
        self.base.backend().upsert(TABLE, row, Some("token")).await?;
        info!(platform = platform.as_str(), "Device token registered");
        Ok(())
    }

    pub async fn unregister(&self, token: &str) -> ServiceResult<()> {
        self.base
            .backend()
            .delete(&Query::table(TABLE).eq("token", token.trim()))
            .await?;
        Ok(())
    }
}
