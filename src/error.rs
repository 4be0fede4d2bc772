//! Error types for the client core
//!
//! Provides the error taxonomy using thiserror. Raw backend failures are
//! classified into [`AuthError`] or [`ServiceError`] at the call site and never
//! published as-is.

use thiserror::Error;

// == Cache Error Enum ==
/// Store-level cache failures. These stay inside the cache layer, which logs
/// them and degrades to a miss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Value alone exceeds the configured byte budget
    #[error("Value for key {key} is {size} bytes, over the {limit} byte limit")]
    ValueTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },

    /// Value could not be encoded or decoded
    #[error("Codec failure for key {key}: {message}")]
    Codec { key: String, message: String },
}

// == Backend Error Enum ==
/// Raw failure reported by the backend boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend answered with a non-success status
    #[error("Backend returned {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The request never produced a response
    #[error("Network failure: {0}")]
    Network(String),

    /// The response body did not have the expected shape
    #[error("Malformed backend response: {0}")]
    Decode(String),

    /// The operation requires a session and none is held
    #[error("No active session")]
    NoSession,

    /// The backend adapter does not offer this operation
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

impl BackendError {
    /// Builds an HTTP error from a status and a message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        BackendError::Http {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Builds an HTTP error carrying the backend's machine-readable code.
    pub fn http_with_code(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Http {
            status,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    fn code(&self) -> Option<&str> {
        match self {
            BackendError::Http { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    fn message_lower(&self) -> String {
        match self {
            BackendError::Http { message, .. } => message.to_lowercase(),
            other => other.to_string().to_lowercase(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

// == Auth Error Enum ==
/// Authentication failures as the sign-in and account screens present them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Invalid or expired code")]
    InvalidOtp,

    /// The account has a verified second factor that must be checked first
    #[error("Multi-factor verification required")]
    MfaRequired { factor_id: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Unknown(String),
}

impl AuthError {
    /// Inline text shown next to the form that failed.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "The email or password is incorrect.".to_string(),
            AuthError::UserNotFound => "No account exists for this email.".to_string(),
            AuthError::EmailTaken => "An account with this email already exists.".to_string(),
            AuthError::InvalidOtp => "That code is invalid or has expired.".to_string(),
            AuthError::MfaRequired { .. } => "Enter the code from your authenticator app.".to_string(),
            AuthError::Network(_) => "Check your connection and try again.".to_string(),
            AuthError::Unknown(msg) => msg.clone(),
        }
    }
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        let message = err.message_lower();
        match err.code() {
            Some("invalid_credentials") => return AuthError::InvalidCredentials,
            Some("user_not_found") => return AuthError::UserNotFound,
            Some("user_already_exists") | Some("email_exists") => return AuthError::EmailTaken,
            Some("otp_expired") | Some("otp_disabled") => return AuthError::InvalidOtp,
            _ => {}
        }
        match err {
            BackendError::Network(msg) => AuthError::Network(msg),
            _ if message.contains("invalid login credentials") => AuthError::InvalidCredentials,
            _ if message.contains("user not found") => AuthError::UserNotFound,
            _ if message.contains("already registered") => AuthError::EmailTaken,
            _ if message.contains("token has expired") || message.contains("otp") => {
                AuthError::InvalidOtp
            }
            BackendError::Http { message, .. } => AuthError::Unknown(message),
            other => AuthError::Unknown(other.to_string()),
        }
    }
}

// == Service Error Enum ==
/// Failures of feature-service reads and writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Unknown(String),
}

impl ServiceError {
    /// Inline text shown in place of the content that failed to load.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::NotFound(_) => "This content is no longer available.".to_string(),
            ServiceError::InvalidData(msg) => format!("Please check your input: {}", msg),
            ServiceError::Unauthorized => "Please sign in again.".to_string(),
            ServiceError::Network(_) => "Check your connection and try again.".to_string(),
            ServiceError::Decoding(_) => "Something went wrong reading the data.".to_string(),
            ServiceError::Unsupported(_) => "This feature is not available.".to_string(),
            ServiceError::Unknown(msg) => msg.clone(),
        }
    }
}

impl From<BackendError> for ServiceError {
    fn from(err: BackendError) -> Self {
        // PGRST116: a single-row request matched zero rows
        if err.code() == Some("PGRST116") {
            return ServiceError::NotFound(err.to_string());
        }
        match err {
            BackendError::Http {
                status: 404,
                message,
                ..
            } => ServiceError::NotFound(message),
            BackendError::Http {
                status: 401 | 403,
                ..
            } => ServiceError::Unauthorized,
            BackendError::Http {
                status: 400 | 409 | 422,
                message,
                ..
            } => ServiceError::InvalidData(message),
            BackendError::Http { message, .. } => ServiceError::Unknown(message),
            BackendError::Network(msg) => ServiceError::Network(msg),
            BackendError::Decode(msg) => ServiceError::Decoding(msg),
            BackendError::NoSession => ServiceError::Unauthorized,
            BackendError::Unsupported(what) => ServiceError::Unsupported(what.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Decoding(err.to_string())
    }
}

// == Result Type Aliases ==
pub type BackendResult<T> = std::result::Result<T, BackendError>;
pub type AuthResult<T> = std::result::Result<T, AuthError>;
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_status_maps_to_not_found() {
        let err: ServiceError = BackendError::http(404, "no such row").into();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn test_single_row_code_maps_to_not_found() {
        let err: ServiceError =
            BackendError::http_with_code(406, "PGRST116", "JSON object requested").into();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn test_auth_statuses_map_to_unauthorized() {
        assert_eq!(ServiceError::from(BackendError::http(401, "jwt expired")), ServiceError::Unauthorized);
        assert_eq!(ServiceError::from(BackendError::NoSession), ServiceError::Unauthorized);
    }

    #[test]
    fn test_network_and_decode_map_through() {
        assert!(matches!(
            ServiceError::from(BackendError::Network("timeout".into())),
            ServiceError::Network(_)
        ));
        assert!(matches!(
            ServiceError::from(BackendError::Decode("bad json".into())),
            ServiceError::Decoding(_)
        ));
    }

    #[test]
    fn test_auth_error_by_code() {
        let err = BackendError::http_with_code(400, "invalid_credentials", "Invalid login credentials");
        assert_eq!(AuthError::from(err), AuthError::InvalidCredentials);

        let err = BackendError::http_with_code(422, "email_exists", "exists");
        assert_eq!(AuthError::from(err), AuthError::EmailTaken);
    }

    #[test]
    fn test_auth_error_by_message() {
        let err = BackendError::http(400, "Invalid login credentials");
        assert_eq!(AuthError::from(err), AuthError::InvalidCredentials);

        let err = BackendError::http(400, "User already registered");
        assert_eq!(AuthError::from(err), AuthError::EmailTaken);

        let err = BackendError::http(403, "Token has expired or is invalid");
        assert_eq!(AuthError::from(err), AuthError::InvalidOtp);
    }

    #[test]
    fn test_auth_error_unknown_keeps_message() {
        let err = BackendError::http(500, "database is down");
        assert_eq!(AuthError::from(err), AuthError::Unknown("database is down".into()));
    }

    #[test]
    fn test_user_messages_are_not_empty() {
        assert!(!ServiceError::Unauthorized.user_message().is_empty());
        assert!(!AuthError::InvalidOtp.user_message().is_empty());
    }
}
