//! REST backend adapter
//!
//! Speaks the backend's public HTTP API: `/auth/v1` for identity, `/rest/v1`
//! for rows, `/storage/v1` for objects. The session lives here, behind a lock,
//! and its access token is attached to every request.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    AuthApi, ChannelSpec, Database, Filter, OtpType, Query, Realtime, Session, SignInOutcome,
    Storage, Subscription, User,
};
use crate::config::Config;
use crate::error::{BackendError, BackendResult};

// == Wire Types ==
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.user,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    #[serde(flatten)]
    user: User,
    #[serde(default)]
    factors: Vec<Factor>,
}

impl AuthUser {
    fn verified_factor(&self) -> Option<&Factor> {
        self.factors.iter().find(|factor| factor.status == "verified")
    }
}

#[derive(Debug, Deserialize)]
struct Factor {
    id: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct Challenge {
    id: String,
}

/// Error bodies differ per service; every known field is optional.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Builds a [`BackendError`] from a failed response's status and body.
pub(crate) fn error_from_body(status: u16, body: &str) -> BackendError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed
        .error_code
        .or_else(|| parsed.code.as_ref().and_then(Value::as_str).map(str::to_string))
        .or_else(|| parsed.error.clone());
    let message = parsed
        .msg
        .or(parsed.message)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                body.to_string()
            }
        });
    BackendError::Http {
        status,
        code,
        message,
    }
}

/// Renders a filter value the way the row API expects it in a query string.
pub(crate) fn filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Query-string pairs for the filters, ordering and range of `query`.
pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = Vec::new();
    for filter in &query.filters {
        match filter {
            Filter::Eq(column, Value::Null) => params.push((column.clone(), "is.null".to_string())),
            Filter::Eq(column, value) => {
                params.push((column.clone(), format!("eq.{}", filter_value(value))))
            }
            Filter::In(column, values) => {
                let list: Vec<String> = values.iter().map(filter_value).collect();
                params.push((column.clone(), format!("in.({})", list.join(","))));
            }
        }
    }
    if !query.order.is_empty() {
        let order: Vec<String> = query
            .order
            .iter()
            .map(|(column, direction)| format!("{}.{}", column, direction.as_str()))
            .collect();
        params.push(("order".to_string(), order.join(",")));
    }
    if let Some((offset, count)) = query.range {
        params.push(("offset".to_string(), offset.to_string()));
        params.push(("limit".to_string(), count.to_string()));
    }
    params
}

// == HTTP Backend ==
#[derive(Debug)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    /// First-stage session of a sign-in waiting on its second factor. Only
    /// the factor endpoints ever see its token.
    pending_mfa: RwLock<Option<Session>>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>, timeout: Duration) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            session: RwLock::new(None),
            pending_mfa: RwLock::new(None),
        })
    }

    pub fn from_config(config: &Config) -> BackendResult<Self> {
        Self::new(&config.backend_url, &config.anon_key, config.http_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request with the API key and, when signed in, the user's bearer token.
    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = match self.session.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.anon_key.clone(),
        };
        self.client
            .request(method, self.url(path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn send(builder: RequestBuilder) -> BackendResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status.as_u16(), &body))
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(builder: RequestBuilder) -> BackendResult<T> {
        let response = Self::send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn store_session(&self, session: &Session) {
        *self.session.write().await = Some(session.clone());
        *self.pending_mfa.write().await = None;
    }

    /// Request authorized by the pending first-stage token rather than the
    /// held session.
    fn factor_request(&self, path: &str, access_token: &str) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> BackendResult<TokenResponse> {
        let builder = self
            .request(Method::POST, "/auth/v1/token")
            .await
            .query(&[("grant_type", grant_type)])
            .json(&body);
        Self::send_json(builder).await
    }

    async fn rows_request(&self, method: Method, query: &Query) -> RequestBuilder {
        self.request(method, &format!("/rest/v1/{}", query.table))
            .await
            .query(&query_params(query))
    }
}

#[async_trait]
impl AuthApi for HttpBackend {
    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> BackendResult<Option<Session>> {
        let builder = self
            .request(Method::POST, "/auth/v1/signup")
            .await
            .json(&json!({"email": email, "password": password, "data": metadata}));
        let body: Value = Self::send_json(builder).await?;

        // Without a token the account awaits email confirmation
        if body.get("access_token").is_none() {
            info!(email = %email, "Sign-up pending email confirmation");
            return Ok(None);
        }
        let tokens: TokenResponse =
            serde_json::from_value(body).map_err(|e| BackendError::Decode(e.to_string()))?;
        let session = tokens.into_session();
        self.store_session(&session).await;
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<SignInOutcome> {
        let tokens = self
            .token_grant("password", json!({"email": email, "password": password}))
            .await?;
        let factor_id = tokens.user.verified_factor().map(|factor| factor.id.clone());
        let session = tokens.into_session();

        match factor_id {
            Some(factor_id) => {
                // Not usable for rows until the second factor is verified
                *self.session.write().await = None;
                *self.pending_mfa.write().await = Some(session);
                Ok(SignInOutcome::MfaRequired { factor_id })
            }
            None => {
                self.store_session(&session).await;
                Ok(SignInOutcome::Session(session))
            }
        }
    }

    async fn sign_out(&self) -> BackendResult<()> {
        *self.pending_mfa.write().await = None;
        if self.session.read().await.is_none() {
            return Ok(());
        }
        let result = Self::send(self.request(Method::POST, "/auth/v1/logout").await).await;
        // The local session is dropped even when the server call fails
        *self.session.write().await = None;
        result.map(|_| ())
    }

    async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    async fn set_session(&self, access_token: &str, refresh_token: &str) -> BackendResult<Session> {
        let builder = self
            .client
            .get(self.url("/auth/v1/user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token);
        let user: User = Self::send_json(builder).await?;
        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at: None,
            user,
        };
        self.store_session(&session).await;
        Ok(session)
    }

    async fn refresh_session(&self) -> BackendResult<Session> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|session| session.refresh_token.clone())
            .ok_or(BackendError::NoSession)?;

        match self
            .token_grant("refresh_token", json!({"refresh_token": refresh_token}))
            .await
        {
            Ok(tokens) => {
                let session = tokens.into_session();
                self.store_session(&session).await;
                debug!("Session refreshed");
                Ok(session)
            }
            Err(err @ BackendError::Http { status: 400..=499, .. }) => {
                *self.session.write().await = None;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn get_user(&self) -> BackendResult<User> {
        if self.session.read().await.is_none() {
            return Err(BackendError::NoSession);
        }
        Self::send_json(self.request(Method::GET, "/auth/v1/user").await).await
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: Option<&str>) -> BackendResult<()> {
        let mut builder = self
            .request(Method::POST, "/auth/v1/recover")
            .await
            .json(&json!({"email": email}));
        if let Some(redirect_to) = redirect_to {
            builder = builder.query(&[("redirect_to", redirect_to)]);
        }
        Self::send(builder).await.map(|_| ())
    }

    async fn verify_otp(&self, email: &str, token: &str, kind: OtpType) -> BackendResult<Session> {
        let builder = self
            .request(Method::POST, "/auth/v1/verify")
            .await
            .json(&json!({"email": email, "token": token, "type": kind.as_str()}));
        let tokens: TokenResponse = Self::send_json(builder).await?;
        let session = tokens.into_session();
        self.store_session(&session).await;
        Ok(session)
    }

    async fn mfa_verify(&self, factor_id: &str, code: &str) -> BackendResult<Session> {
        let access_token = self
            .pending_mfa
            .read()
            .await
            .as_ref()
            .map(|pending| pending.access_token.clone())
            .ok_or(BackendError::NoSession)?;

        let challenge: Challenge = Self::send_json(self.factor_request(
            &format!("/auth/v1/factors/{}/challenge", factor_id),
            &access_token,
        ))
        .await?;
        let builder = self
            .factor_request(&format!("/auth/v1/factors/{}/verify", factor_id), &access_token)
            .json(&json!({"challenge_id": challenge.id, "code": code}));
        let tokens: TokenResponse = Self::send_json(builder).await?;
        let session = tokens.into_session();
        self.store_session(&session).await;
        Ok(session)
    }
}

#[async_trait]
impl Database for HttpBackend {
    async fn select(&self, query: &Query) -> BackendResult<Vec<Value>> {
        let builder = self
            .rows_request(Method::GET, query)
            .await
            .query(&[("select", query.columns.as_str())]);
        Self::send_json(builder).await
    }

    async fn insert(&self, table: &str, rows: Value) -> BackendResult<Vec<Value>> {
        let builder = self
            .request(Method::POST, &format!("/rest/v1/{}", table))
            .await
            .header("Prefer", "return=representation")
            .json(&rows);
        Self::send_json(builder).await
    }

    async fn update(&self, query: &Query, patch: Value) -> BackendResult<Vec<Value>> {
        let builder = self
            .rows_request(Method::PATCH, query)
            .await
            .header("Prefer", "return=representation")
            .json(&patch);
        Self::send_json(builder).await
    }

    async fn upsert(&self, table: &str, rows: Value, on_conflict: Option<&str>) -> BackendResult<Vec<Value>> {
        let mut builder = self
            .request(Method::POST, &format!("/rest/v1/{}", table))
            .await
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&rows);
        if let Some(columns) = on_conflict {
            builder = builder.query(&[("on_conflict", columns)]);
        }
        Self::send_json(builder).await
    }

    async fn delete(&self, query: &Query) -> BackendResult<()> {
        Self::send(self.rows_request(Method::DELETE, query).await)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Storage for HttpBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> BackendResult<String> {
        #[derive(Deserialize)]
        struct Uploaded {
            #[serde(rename = "Key")]
            key: String,
        }

        let builder = self
            .request(Method::POST, &format!("/storage/v1/object/{}/{}", bucket, path))
            .await
            .header(header::CONTENT_TYPE, content_type)
            .header("x-upsert", upsert.to_string())
            .body(bytes);
        let uploaded: Uploaded = Self::send_json(builder).await?;
        Ok(uploaded.key)
    }

    async fn download(&self, bucket: &str, path: &str) -> BackendResult<Vec<u8>> {
        let response = Self::send(
            self.request(
                Method::GET,
                &format!("/storage/v1/object/authenticated/{}/{}", bucket, path),
            )
            .await,
        )
        .await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> BackendResult<()> {
        let builder = self
            .request(Method::DELETE, &format!("/storage/v1/object/{}", bucket))
            .await
            .json(&json!({"prefixes": paths}));
        Self::send(builder).await.map(|_| ())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.url(&format!("/storage/v1/object/public/{}/{}", bucket, path))
    }
}

#[async_trait]
impl Realtime for HttpBackend {
    async fn subscribe(&self, _channel: ChannelSpec) -> BackendResult<Subscription> {
        Err(BackendError::Unsupported("realtime channels over plain HTTP"))
    }
}
