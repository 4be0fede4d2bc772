//! In-process backend
//!
//! Implements the whole backend boundary over in-memory tables. Used by the
//! test suites and for offline development; row semantics follow the REST
//! backend closely enough that services cannot tell the two apart.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use super::{
    AuthApi, ChannelSpec, Database, OtpType, Query, Realtime, RealtimeEvent, Session, SignInOutcome,
    Storage, Subscription, User,
};
use crate::error::{BackendError, BackendResult};

const SESSION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug)]
struct Account {
    password: String,
    user: User,
    mfa: Option<MfaFactor>,
    otp: Option<(OtpType, String)>,
}

#[derive(Debug, Clone)]
struct MfaFactor {
    factor_id: String,
    code: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Value>>,
    accounts: HashMap<String, Account>,
    /// access token -> email
    access_tokens: HashMap<String, String>,
    /// refresh token -> email
    refresh_tokens: HashMap<String, String>,
    session: Option<Session>,
    pending_mfa: Option<(String, Session)>,
    objects: HashMap<(String, String), Vec<u8>>,
    subscribers: Vec<(ChannelSpec, mpsc::UnboundedSender<RealtimeEvent>)>,
    injected: VecDeque<BackendError>,
    counter: u64,
}

impl MemoryState {
    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn take_injected(&mut self) -> BackendResult<()> {
        match self.injected.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn issue_session(&mut self, email: &str) -> BackendResult<Session> {
        let user = self
            .accounts
            .get(email)
            .map(|account| account.user.clone())
            .ok_or_else(|| BackendError::http_with_code(404, "user_not_found", "User not found"))?;
        let n = self.next();
        let access_token = format!("access-{}", n);
        let refresh_token = format!("refresh-{}", n);
        self.access_tokens.insert(access_token.clone(), email.to_string());
        self.refresh_tokens.insert(refresh_token.clone(), email.to_string());
        Ok(Session {
            access_token,
            refresh_token,
            expires_at: Some(Utc::now().timestamp() + SESSION_LIFETIME_SECS),
            user,
        })
    }

    fn publish(&mut self, event: RealtimeEvent) {
        self.subscribers.retain(|(_, tx)| !tx.is_closed());
        for (channel, tx) in &self.subscribers {
            if channel.matches(event.table(), event.row()) {
                let _ = tx.send(event.clone());
            }
        }
    }

    fn insert_row(&mut self, table: &str, row: Value, on_conflict: Option<&[&str]>) -> BackendResult<Value> {
        if !row.is_object() {
            return Err(BackendError::http(
                400,
                format!("Expected an object row, got {}", row),
            ));
        }

        let conflict_columns: &[&str] = match on_conflict {
            Some(columns) => columns,
            None => &["id"],
        };
        let rows = self.tables.entry(table.to_string()).or_default();
        let existing = rows
            .iter()
            .position(|stored| conflict_columns.iter().all(|c| stored.get(*c) == row.get(*c)));

        match (existing, on_conflict.is_some()) {
            (Some(index), true) => {
                let old = rows[index].clone();
                merge(&mut rows[index], &row);
                let record = rows[index].clone();
                self.publish(RealtimeEvent::Update {
                    table: table.to_string(),
                    record: record.clone(),
                    old,
                });
                Ok(record)
            }
            (Some(_), false) => Err(BackendError::http_with_code(
                409,
                "23505",
                "duplicate key value violates unique constraint",
            )),
            (None, _) => {
                let mut row = row;
                if let Value::Object(object) = &mut row {
                    object
                        .entry("id")
                        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
                    object
                        .entry("created_at")
                        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
                }
                rows.push(row.clone());
                self.publish(RealtimeEvent::Insert {
                    table: table.to_string(),
                    record: row.clone(),
                });
                Ok(row)
            }
        }
    }
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Null, Value::Null) => Ordering::Equal,
        // Nulls sort last, as the database does for ascending order
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}

fn rows_of(rows: Value) -> BackendResult<Vec<Value>> {
    match rows {
        Value::Array(rows) => Ok(rows),
        row @ Value::Object(_) => Ok(vec![row]),
        other => Err(BackendError::http(400, format!("Expected rows, got {}", other))),
    }
}

// == Memory Backend ==
/// Backend kept entirely in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Creates a confirmed account and returns its user id.
    pub async fn create_account(&self, email: &str, password: &str) -> String {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            user_metadata: Value::Object(Map::new()),
            created_at: Some(Utc::now()),
        };
        let id = user.id.clone();
        self.state.lock().await.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user,
                mfa: None,
                otp: None,
            },
        );
        id
    }

    /// Attaches a verified TOTP factor that accepts `code`.
    pub async fn enable_mfa(&self, email: &str, factor_id: &str, code: &str) {
        if let Some(account) = self.state.lock().await.accounts.get_mut(email) {
            account.mfa = Some(MfaFactor {
                factor_id: factor_id.to_string(),
                code: code.to_string(),
            });
        }
    }

    /// Last one-time password issued to `email`.
    pub async fn last_otp(&self, email: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(email)
            .and_then(|account| account.otp.as_ref().map(|(_, token)| token.clone()))
    }

    /// Issues a session for `email` without touching the held one, as an
    /// auth callback link would carry it.
    pub async fn issue_link_session(&self, email: &str) -> BackendResult<Session> {
        self.state.lock().await.issue_session(email)
    }

    /// Invalidates every issued token, as a server-side sign-out would.
    pub async fn revoke_all_sessions(&self) {
        let mut state = self.state.lock().await;
        state.access_tokens.clear();
        state.refresh_tokens.clear();
    }

    /// Inserts rows directly, bypassing injected failures.
    pub async fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut state = self.state.lock().await;
        for row in rows {
            let _ = state.insert_row(table, row, None);
        }
    }

    /// Current contents of `table`.
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.state
            .lock()
            .await
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes the next backend call fail with `err`.
    pub async fn fail_next(&self, err: BackendError) {
        self.state.lock().await.injected.push_back(err);
    }

    /// Number of live realtime subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state.subscribers.len()
    }
}

#[async_trait]
impl AuthApi for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> BackendResult<Option<Session>> {
        {
            let mut state = self.state.lock().await;
            state.take_injected()?;
            if state.accounts.contains_key(email) {
                return Err(BackendError::http_with_code(
                    422,
                    "user_already_exists",
                    "User already registered",
                ));
            }
        }
        self.create_account(email, password).await;

        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.get_mut(email) {
            account.user.user_metadata = metadata;
        }
        let session = state.issue_session(email)?;
        state.session = Some(session.clone());
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<SignInOutcome> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let mfa = match state.accounts.get(email) {
            Some(account) if account.password == password => account.mfa.clone(),
            _ => {
                return Err(BackendError::http_with_code(
                    400,
                    "invalid_credentials",
                    "Invalid login credentials",
                ))
            }
        };

        let session = state.issue_session(email)?;
        match mfa {
            Some(factor) => {
                state.session = None;
                state.pending_mfa = Some((factor.factor_id.clone(), session));
                Ok(SignInOutcome::MfaRequired {
                    factor_id: factor.factor_id,
                })
            }
            None => {
                state.session = Some(session.clone());
                Ok(SignInOutcome::Session(session))
            }
        }
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        if let Some(session) = state.session.take() {
            state.access_tokens.remove(&session.access_token);
            state.refresh_tokens.remove(&session.refresh_token);
        }
        state.pending_mfa = None;
        Ok(())
    }

    async fn session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    async fn set_session(&self, access_token: &str, refresh_token: &str) -> BackendResult<Session> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let email = state
            .access_tokens
            .get(access_token)
            .cloned()
            .ok_or_else(|| BackendError::http(401, "invalid JWT"))?;
        let user = state
            .accounts
            .get(&email)
            .map(|account| account.user.clone())
            .ok_or_else(|| BackendError::http_with_code(404, "user_not_found", "User not found"))?;
        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at: Some(Utc::now().timestamp() + SESSION_LIFETIME_SECS),
            user,
        };
        state.session = Some(session.clone());
        Ok(session)
    }

    async fn refresh_session(&self) -> BackendResult<Session> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let current = state.session.clone().ok_or(BackendError::NoSession)?;
        let email = match state.refresh_tokens.remove(&current.refresh_token) {
            Some(email) => email,
            None => {
                state.session = None;
                return Err(BackendError::http_with_code(
                    400,
                    "refresh_token_not_found",
                    "Invalid Refresh Token: Refresh Token Not Found",
                ));
            }
        };
        state.access_tokens.remove(&current.access_token);
        let session = state.issue_session(&email)?;
        state.session = Some(session.clone());
        debug!(email = %email, "Memory backend refreshed session");
        Ok(session)
    }

    async fn get_user(&self) -> BackendResult<User> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let session = state.session.clone().ok_or(BackendError::NoSession)?;
        let email = state
            .access_tokens
            .get(&session.access_token)
            .cloned()
            .ok_or_else(|| BackendError::http(401, "invalid JWT: token is expired"))?;
        state
            .accounts
            .get(&email)
            .map(|account| account.user.clone())
            .ok_or_else(|| BackendError::http_with_code(404, "user_not_found", "User not found"))
    }

    async fn reset_password_for_email(&self, email: &str, _redirect_to: Option<&str>) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let code = format!("{:06}", 100_000 + state.next() % 900_000);
        // Unknown addresses succeed silently so accounts cannot be probed
        if let Some(account) = state.accounts.get_mut(email) {
            account.otp = Some((OtpType::Recovery, code));
        }
        Ok(())
    }

    async fn verify_otp(&self, email: &str, token: &str, kind: OtpType) -> BackendResult<Session> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let valid = state
            .accounts
            .get(email)
            .and_then(|account| account.otp.as_ref())
            .is_some_and(|(issued_kind, issued)| *issued_kind == kind && issued == token);
        if !valid {
            return Err(BackendError::http_with_code(
                403,
                "otp_expired",
                "Token has expired or is invalid",
            ));
        }
        if let Some(account) = state.accounts.get_mut(email) {
            account.otp = None;
        }
        let session = state.issue_session(email)?;
        state.session = Some(session.clone());
        Ok(session)
    }

    async fn mfa_verify(&self, factor_id: &str, code: &str) -> BackendResult<Session> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let (pending_factor, session) = state.pending_mfa.clone().ok_or(BackendError::NoSession)?;
        let email = session.user.email.clone().unwrap_or_default();
        let expected = state
            .accounts
            .get(&email)
            .and_then(|account| account.mfa.as_ref())
            .map(|factor| factor.code.clone());
        if pending_factor != factor_id || expected.as_deref() != Some(code) {
            return Err(BackendError::http_with_code(
                422,
                "mfa_verification_failed",
                "Invalid TOTP code entered",
            ));
        }
        state.pending_mfa = None;
        state.session = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl Database for MemoryBackend {
    async fn select(&self, query: &Query) -> BackendResult<Vec<Value>> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let mut rows: Vec<Value> = state
            .tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|row| query.matches(row)).cloned().collect())
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            for (column, direction) in &query.order {
                let left = a.get(column).unwrap_or(&Value::Null);
                let right = b.get(column).unwrap_or(&Value::Null);
                let ordering = match direction {
                    super::Order::Asc => compare_values(left, right),
                    super::Order::Desc => compare_values(right, left),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        if let Some((offset, count)) = query.range {
            rows = rows.into_iter().skip(offset).take(count).collect();
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Value) -> BackendResult<Vec<Value>> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        rows_of(rows)?
            .into_iter()
            .map(|row| state.insert_row(table, row, None))
            .collect()
    }

    async fn update(&self, query: &Query, patch: Value) -> BackendResult<Vec<Value>> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let mut changes = Vec::new();
        if let Some(rows) = state.tables.get_mut(&query.table) {
            for row in rows.iter_mut().filter(|row| query.matches(row)) {
                let old = row.clone();
                merge(row, &patch);
                changes.push((old, row.clone()));
            }
        }

        let mut updated = Vec::with_capacity(changes.len());
        for (old, record) in changes {
            state.publish(RealtimeEvent::Update {
                table: query.table.clone(),
                record: record.clone(),
                old,
            });
            updated.push(record);
        }
        Ok(updated)
    }

    async fn upsert(&self, table: &str, rows: Value, on_conflict: Option<&str>) -> BackendResult<Vec<Value>> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let columns: Vec<&str> = on_conflict
            .unwrap_or("id")
            .split(',')
            .map(str::trim)
            .collect();
        rows_of(rows)?
            .into_iter()
            .map(|row| state.insert_row(table, row, Some(columns.as_slice())))
            .collect()
    }

    async fn delete(&self, query: &Query) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let removed: Vec<Value> = match state.tables.get_mut(&query.table) {
            Some(rows) => {
                let (gone, kept): (Vec<Value>, Vec<Value>) =
                    rows.drain(..).partition(|row| query.matches(row));
                *rows = kept;
                gone
            }
            None => Vec::new(),
        };
        for old in removed {
            state.publish(RealtimeEvent::Delete {
                table: query.table.clone(),
                old,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
        upsert: bool,
    ) -> BackendResult<String> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let key = (bucket.to_string(), path.to_string());
        if !upsert && state.objects.contains_key(&key) {
            return Err(BackendError::http(409, "The resource already exists"));
        }
        state.objects.insert(key, bytes);
        Ok(format!("{}/{}", bucket, path))
    }

    async fn download(&self, bucket: &str, path: &str) -> BackendResult<Vec<u8>> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        state
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::http(404, "Object not found"))
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        for path in paths {
            state.objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://storage/{}/{}", bucket, path)
    }
}

#[async_trait]
impl Realtime for MemoryBackend {
    async fn subscribe(&self, channel: ChannelSpec) -> BackendResult<Subscription> {
        let mut state = self.state.lock().await;
        state.take_injected()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let topic = channel.topic();
        state.subscribers.push((channel, tx));
        debug!(topic = %topic, "Memory backend channel subscribed");
        Ok(Subscription::new(topic, rx))
    }
}
