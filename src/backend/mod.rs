//! Backend client boundary
//!
//! The BaaS is consumed through four traits: auth, database, storage and
//! realtime. The client owns the session; callers never pass tokens around.
//!
//! Two implementations ship with the crate:
//! - [`HttpBackend`] talks to the backend's REST endpoints.
//! - [`MemoryBackend`] keeps everything in process, including realtime fan-out.

mod http;
mod memory;
mod query;
mod realtime;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendResult;

pub use http::HttpBackend;
pub use memory::MemoryBackend;
pub use query::{Filter, Order, Query};
pub use realtime::{ChannelSpec, RealtimeEvent, Subscription};

// == Identity ==
/// Account as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Tokens issued by the backend for a signed-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds at which the access token stops being accepted
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    /// Whether the access token is past its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now().timestamp())
    }
}

/// Result of a password sign-in.
#[derive(Debug, Clone, PartialEq)]
pub enum SignInOutcome {
    /// Fully signed in
    Session(Session),
    /// Password accepted; a verified second factor must be checked next
    MfaRequired { factor_id: String },
}

/// Kind of one-time password being verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Signup,
    Recovery,
    #[serde(rename = "magiclink")]
    MagicLink,
    EmailChange,
}

impl OtpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpType::Signup => "signup",
            OtpType::Recovery => "recovery",
            OtpType::MagicLink => "magiclink",
            OtpType::EmailChange => "email_change",
        }
    }

    /// Parses the `type` parameter of an auth callback.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "signup" => Some(OtpType::Signup),
            "recovery" => Some(OtpType::Recovery),
            "magiclink" => Some(OtpType::MagicLink),
            "email_change" => Some(OtpType::EmailChange),
            _ => None,
        }
    }
}

// == Boundary Traits ==
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Creates an account. Returns a session unless email confirmation is pending.
    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> BackendResult<Option<Session>>;

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<SignInOutcome>;

    /// Revokes and forgets the held session.
    async fn sign_out(&self) -> BackendResult<()>;

    /// Currently held session, if any.
    async fn session(&self) -> Option<Session>;

    /// Adopts tokens received out of band (e.g. an auth callback link).
    async fn set_session(&self, access_token: &str, refresh_token: &str) -> BackendResult<Session>;

    /// Exchanges the held refresh token for a new session.
    async fn refresh_session(&self) -> BackendResult<Session>;

    /// Fetches the user behind the held session.
    async fn get_user(&self) -> BackendResult<User>;

    async fn reset_password_for_email(&self, email: &str, redirect_to: Option<&str>) -> BackendResult<()>;

    async fn verify_otp(&self, email: &str, token: &str, kind: OtpType) -> BackendResult<Session>;

    /// Completes a sign-in that returned [`SignInOutcome::MfaRequired`].
    async fn mfa_verify(&self, factor_id: &str, code: &str) -> BackendResult<Session>;
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn select(&self, query: &Query) -> BackendResult<Vec<Value>>;

    /// Inserts one row (object) or many (array); returns the stored rows.
    async fn insert(&self, table: &str, rows: Value) -> BackendResult<Vec<Value>>;

    /// Applies `patch` to every row matching `query`; returns the updated rows.
    async fn update(&self, query: &Query, patch: Value) -> BackendResult<Vec<Value>>;

    /// Inserts or replaces rows, matching existing ones on `on_conflict`
    /// (primary key `id` when `None`).
    async fn upsert(&self, table: &str, rows: Value, on_conflict: Option<&str>) -> BackendResult<Vec<Value>>;

    async fn delete(&self, query: &Query) -> BackendResult<()>;
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores an object and returns its key within the bucket.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> BackendResult<String>;

    async fn download(&self, bucket: &str, path: &str) -> BackendResult<Vec<u8>>;

    async fn remove(&self, bucket: &str, paths: &[String]) -> BackendResult<()>;

    /// Public URL of an object in a public bucket.
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

#[async_trait]
pub trait Realtime: Send + Sync {
    async fn subscribe(&self, channel: ChannelSpec) -> BackendResult<Subscription>;
}

/// The full backend surface.
pub trait Backend: AuthApi + Database + Storage + Realtime {}

impl<T: AuthApi + Database + Storage + Realtime> Backend for T {}

/// The process-wide backend handle.
pub type SharedBackend = Arc<dyn Backend>;
