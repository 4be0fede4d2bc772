//! Session manager
//!
//! Drives the auth state machine from the backend client's own session and
//! publishes every change on a watch channel.

use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::backend::{AuthApi, OtpType, SharedBackend, SignInOutcome, User};
use crate::cache::Cache;
use crate::deeplink::parse_auth_callback;
use crate::error::{AuthError, AuthResult, BackendError};
use crate::preferences::Preferences;
use crate::session::{AuthState, AuthStatus};

/// Redirect target embedded in password-reset emails.
pub const PASSWORD_RESET_REDIRECT: &str = "whoami://reset-password";

const MIN_PASSWORD_LEN: usize = 6;

pub struct SessionManager {
    backend: SharedBackend,
    cache: Option<Cache>,
    preferences: Option<Preferences>,
    state: watch::Sender<AuthState>,
}

impl SessionManager {
    pub fn new(backend: SharedBackend, cache: Option<Cache>, preferences: Option<Preferences>) -> Self {
        let (state, _) = watch::channel(AuthState::signed_out());
        Self {
            backend,
            cache,
            preferences,
            state,
        }
    }

    // == Published state ==
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().current_user.clone()
    }

    fn transition(&self, status: AuthStatus, user: Option<User>, error: Option<AuthError>) {
        self.state.send_modify(|state| {
            if state.status != status {
                if !state.status.allows(&status) {
                    warn!(from = state.status.name(), to = status.name(), "Unexpected auth transition");
                }
                info!(from = state.status.name(), to = status.name(), "Auth status changed");
            }
            state.status = status;
            state.current_user = user;
            state.error = error;
        });
    }

    fn publish_error(&self, error: &AuthError) {
        self.state.send_modify(|state| state.error = Some(error.clone()));
    }

    fn fail(&self, status: AuthStatus, error: AuthError) -> AuthError {
        self.transition(status, None, Some(error.clone()));
        error
    }

    async fn clear_local_state(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
        }
        self.store_mfa_factor(None).await;
    }

    /// Persists the pending factor id off the async runtime's threads.
    async fn store_mfa_factor(&self, factor_id: Option<String>) {
        let Some(preferences) = self.preferences.clone() else {
            return;
        };
        let result = tokio::task::spawn_blocking(move || preferences.set_mfa_factor_id(factor_id)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to store MFA factor"),
            Err(e) => warn!(error = %e, "MFA factor write task failed"),
        }
    }

    // == Launch ==
    /// Adopts whatever session the backend client already holds.
    ///
    /// An expired token is refreshed first. When the backend cannot be reached
    /// the held session's user snapshot is trusted until the next refresh.
    pub async fn restore(&self) -> bool {
        let Some(session) = self.backend.session().await else {
            self.transition(AuthStatus::Unauthenticated, None, None);
            return false;
        };
        self.transition(AuthStatus::Authenticating, None, None);

        if session.is_expired() {
            if let Err(e) = self.backend.refresh_session().await {
                if !matches!(e, BackendError::Network(_)) {
                    info!(error = %e, "Stored session could not be refreshed");
                    self.transition(AuthStatus::Unauthenticated, None, None);
                    return false;
                }
            }
        }

        match self.backend.get_user().await {
            Ok(user) => {
                self.transition(AuthStatus::Authenticated, Some(user), None);
                true
            }
            Err(BackendError::Network(e)) => {
                warn!(error = %e, "Backend unreachable, using stored session");
                self.transition(AuthStatus::Authenticated, Some(session.user), None);
                true
            }
            Err(e) => {
                info!(error = %e, "Stored session rejected");
                self.transition(AuthStatus::Unauthenticated, None, None);
                false
            }
        }
    }

    // == Sign in / up / out ==
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<User> {
        let email = email.trim();
        if let Err(e) = validate_credentials(email, password) {
            self.publish_error(&e);
            return Err(e);
        }

        self.transition(AuthStatus::Authenticating, None, None);
        match self.backend.sign_in(email, password).await {
            Ok(SignInOutcome::Session(session)) => {
                self.transition(AuthStatus::Authenticated, Some(session.user.clone()), None);
                Ok(session.user)
            }
            Ok(SignInOutcome::MfaRequired { factor_id }) => {
                self.store_mfa_factor(Some(factor_id.clone())).await;
                let error = AuthError::MfaRequired {
                    factor_id: factor_id.clone(),
                };
                Err(self.fail(AuthStatus::AwaitingMfa { factor_id }, error))
            }
            Err(e) => Err(self.fail(AuthStatus::Unauthenticated, e.into())),
        }
    }

    /// Completes a sign-in that stopped at [`AuthStatus::AwaitingMfa`].
    pub async fn verify_mfa(&self, code: &str) -> AuthResult<User> {
        let factor_id = match &self.state.borrow().status {
            AuthStatus::AwaitingMfa { factor_id } => Some(factor_id.clone()),
            _ => None,
        }
        .or_else(|| self.preferences.as_ref().and_then(Preferences::mfa_factor_id));
        let Some(factor_id) = factor_id else {
            let error = AuthError::Unknown("No sign-in is waiting for verification".to_string());
            self.publish_error(&error);
            return Err(error);
        };

        self.transition(AuthStatus::Authenticating, None, None);
        match self.backend.mfa_verify(&factor_id, code.trim()).await {
            Ok(session) => {
                self.transition(AuthStatus::Authenticated, Some(session.user.clone()), None);
                Ok(session.user)
            }
            Err(e) => Err(self.fail(AuthStatus::AwaitingMfa { factor_id }, e.into())),
        }
    }

    /// Creates an account. `Ok(None)` means the account awaits email
    /// confirmation and the user stays signed out.
    pub async fn sign_up(&self, email: &str, password: &str, full_name: &str) -> AuthResult<Option<User>> {
        let email = email.trim();
        if let Err(e) = validate_credentials(email, password) {
            self.publish_error(&e);
            return Err(e);
        }

        self.transition(AuthStatus::Authenticating, None, None);
        let metadata = json!({ "full_name": full_name.trim() });
        match self.backend.sign_up(email, password, metadata).await {
            Ok(Some(session)) => {
                self.transition(AuthStatus::Authenticated, Some(session.user.clone()), None);
                Ok(Some(session.user))
            }
            Ok(None) => {
                self.transition(AuthStatus::Unauthenticated, None, None);
                Ok(None)
            }
            Err(e) => Err(self.fail(AuthStatus::Unauthenticated, e.into())),
        }
    }

    /// Signs out. Local state is cleared even when the backend call fails.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let result = self.backend.sign_out().await;
        self.clear_local_state().await;
        self.transition(AuthStatus::Unauthenticated, None, None);
        result.map_err(|e| {
            warn!(error = %e, "Backend sign-out failed; local session cleared");
            AuthError::from(e)
        })
    }

    // == Refresh ==
    /// Renews the session. A rejected refresh means the session expired and
    /// signs the user out; a network failure leaves the state untouched.
    pub async fn refresh(&self) -> AuthResult<()> {
        if !self.is_authenticated() {
            return Ok(());
        }

        match self.backend.refresh_session().await {
            Ok(session) => {
                self.transition(AuthStatus::Authenticated, Some(session.user), None);
                Ok(())
            }
            Err(BackendError::Network(e)) => {
                warn!(error = %e, "Session refresh failed, will retry on next tick");
                Err(AuthError::Network(e))
            }
            Err(e) => {
                info!(error = %e, "Session expired");
                self.clear_local_state().await;
                Err(self.fail(AuthStatus::Unauthenticated, e.into()))
            }
        }
    }

    // == Recovery and verification ==
    pub async fn reset_password(&self, email: &str) -> AuthResult<()> {
        let email = email.trim();
        if !looks_like_email(email) {
            let error = AuthError::InvalidCredentials;
            self.publish_error(&error);
            return Err(error);
        }
        self.backend
            .reset_password_for_email(email, Some(PASSWORD_RESET_REDIRECT))
            .await
            .map_err(|e| {
                let error = AuthError::from(e);
                self.publish_error(&error);
                error
            })
    }

    pub async fn verify_otp(&self, email: &str, token: &str, kind: OtpType) -> AuthResult<User> {
        self.transition(AuthStatus::Authenticating, None, None);
        match self.backend.verify_otp(email.trim(), token.trim(), kind).await {
            Ok(session) => {
                self.transition(AuthStatus::Authenticated, Some(session.user.clone()), None);
                Ok(session.user)
            }
            Err(e) => Err(self.fail(AuthStatus::Unauthenticated, e.into())),
        }
    }

    /// Signs in from an auth callback link. Returns the user and the flow that
    /// issued the link, so a recovery link can lead to the new-password form.
    pub async fn handle_deep_link(&self, link: &str) -> AuthResult<(User, Option<OtpType>)> {
        let callback = match parse_auth_callback(link) {
            Ok(callback) => callback,
            Err(e) => {
                let error = AuthError::from(e);
                self.publish_error(&error);
                return Err(error);
            }
        };

        self.transition(AuthStatus::Authenticating, None, None);
        match self
            .backend
            .set_session(&callback.access_token, &callback.refresh_token)
            .await
        {
            Ok(session) => {
                self.transition(AuthStatus::Authenticated, Some(session.user.clone()), None);
                Ok((session.user, callback.kind))
            }
            Err(e) => Err(self.fail(AuthStatus::Unauthenticated, e.into())),
        }
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if !looks_like_email(email) || password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(())
}
