//! Authentication state
//!
//! The one piece of app state with named transitions:
//!
//! ```text
//! Unauthenticated -> Authenticating -> Authenticated
//!                          |     \-> AwaitingMfa -> Authenticated
//!                          \-> Unauthenticated (failure)
//! Authenticated -> Unauthenticated (sign-out or expired session)
//! ```

use crate::backend::User;
use crate::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    Unauthenticated,
    Authenticating,
    /// Password accepted; waiting for the second factor
    AwaitingMfa { factor_id: String },
    Authenticated,
}

impl AuthStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn allows(&self, next: &AuthStatus) -> bool {
        use AuthStatus::*;
        matches!(
            (self, next),
            (Unauthenticated, Authenticating)
                | (Authenticating, Authenticated)
                | (Authenticating, Unauthenticated)
                | (Authenticating, AwaitingMfa { .. })
                | (AwaitingMfa { .. }, Authenticating)
                | (AwaitingMfa { .. }, Unauthenticated)
                | (Authenticated, Authenticating)
                | (Authenticated, Unauthenticated)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthStatus::Unauthenticated => "unauthenticated",
            AuthStatus::Authenticating => "authenticating",
            AuthStatus::AwaitingMfa { .. } => "awaiting_mfa",
            AuthStatus::Authenticated => "authenticated",
        }
    }
}

/// Published auth state: status, user snapshot and the last failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub status: AuthStatus,
    pub current_user: Option<User>,
    pub error: Option<AuthError>,
}

impl AuthState {
    pub fn signed_out() -> Self {
        Self {
            status: AuthStatus::Unauthenticated,
            current_user: None,
            error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::signed_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(AuthStatus::Unauthenticated.allows(&AuthStatus::Authenticating));
        assert!(AuthStatus::Authenticating.allows(&AuthStatus::Authenticated));
        assert!(AuthStatus::Authenticated.allows(&AuthStatus::Unauthenticated));
    }

    #[test]
    fn test_mfa_detour() {
        let awaiting = AuthStatus::AwaitingMfa {
            factor_id: "f1".into(),
        };
        assert!(AuthStatus::Authenticating.allows(&awaiting));
        assert!(awaiting.allows(&AuthStatus::Authenticating));
        assert!(!awaiting.allows(&AuthStatus::Authenticated));
    }

    #[test]
    fn test_cannot_skip_authenticating() {
        assert!(!AuthStatus::Unauthenticated.allows(&AuthStatus::Authenticated));
        assert!(!AuthStatus::Unauthenticated.allows(&AuthStatus::Unauthenticated));
    }

    #[test]
    fn test_default_state_is_signed_out() {
        let state = AuthState::default();
        assert!(!state.is_authenticated());
        assert!(state.current_user.is_none());
        assert_eq!(state.status.name(), "unauthenticated");
    }
}
