//! Deep link parsing
//!
//! Auth callbacks arrive as `whoami://<host>/<path>?...` or with the parameters
//! in the fragment (`whoami://auth-callback#access_token=...`), depending on
//! the flow that produced them.

use std::collections::HashMap;

use thiserror::Error;
use url::Url;

use crate::backend::OtpType;
use crate::error::AuthError;

/// The app's custom URL scheme.
pub const SCHEME: &str = "whoami";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeepLinkError {
    #[error("Not a valid URL: {0}")]
    InvalidUrl(String),

    #[error("Unexpected scheme {0}")]
    WrongScheme(String),

    #[error("Missing parameter {0}")]
    MissingParameter(&'static str),

    /// The provider redirected back with an error instead of tokens
    #[error("{0}")]
    Provider(String),
}

impl From<DeepLinkError> for AuthError {
    fn from(err: DeepLinkError) -> Self {
        match err {
            DeepLinkError::Provider(message) if message.to_lowercase().contains("expired") => {
                AuthError::InvalidOtp
            }
            other => AuthError::Unknown(other.to_string()),
        }
    }
}

/// Tokens carried by an auth callback link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCallback {
    pub access_token: String,
    pub refresh_token: String,
    /// Flow that issued the link; `None` for plain OAuth sign-in
    pub kind: Option<OtpType>,
}

/// Parses an auth callback link.
pub fn parse_auth_callback(link: &str) -> Result<AuthCallback, DeepLinkError> {
    let url = Url::parse(link).map_err(|e| DeepLinkError::InvalidUrl(e.to_string()))?;
    if url.scheme() != SCHEME {
        return Err(DeepLinkError::WrongScheme(url.scheme().to_string()));
    }

    // Fragment parameters win over query parameters of the same name
    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(fragment) = url.fragment() {
        params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
    }

    if let Some(error) = params.get("error_description").or_else(|| params.get("error")) {
        return Err(DeepLinkError::Provider(error.clone()));
    }

    let access_token = params
        .remove("access_token")
        .filter(|token| !token.is_empty())
        .ok_or(DeepLinkError::MissingParameter("access_token"))?;
    let refresh_token = params
        .remove("refresh_token")
        .filter(|token| !token.is_empty())
        .ok_or(DeepLinkError::MissingParameter("refresh_token"))?;
    let kind = params.get("type").and_then(|kind| OtpType::parse(kind));

    Ok(AuthCallback {
        access_token,
        refresh_token,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_callback() {
        let callback =
            parse_auth_callback("whoami://auth-callback?access_token=a1&refresh_token=r1&type=recovery")
                .unwrap();
        assert_eq!(callback.access_token, "a1");
        assert_eq!(callback.refresh_token, "r1");
        assert_eq!(callback.kind, Some(OtpType::Recovery));
    }

    #[test]
    fn test_fragment_callback() {
        let callback = parse_auth_callback(
            "whoami://auth-callback#access_token=a%2Bb&expires_in=3600&refresh_token=r1&token_type=bearer&type=signup",
        )
        .unwrap();
        assert_eq!(callback.access_token, "a+b");
        assert_eq!(callback.kind, Some(OtpType::Signup));
    }

    #[test]
    fn test_oauth_callback_without_type() {
        let callback = parse_auth_callback("whoami://login#access_token=a&refresh_token=r").unwrap();
        assert_eq!(callback.kind, None);
    }

    #[test]
    fn test_wrong_scheme() {
        assert_eq!(
            parse_auth_callback("https://example.com/?access_token=a&refresh_token=r"),
            Err(DeepLinkError::WrongScheme("https".into()))
        );
    }

    #[test]
    fn test_missing_refresh_token() {
        assert_eq!(
            parse_auth_callback("whoami://auth-callback?access_token=a"),
            Err(DeepLinkError::MissingParameter("refresh_token"))
        );
    }

    #[test]
    fn test_provider_error() {
        let err = parse_auth_callback(
            "whoami://auth-callback#error=access_denied&error_description=Email+link+is+invalid+or+has+expired",
        )
        .unwrap_err();
        assert_eq!(err, DeepLinkError::Provider("Email link is invalid or has expired".into()));
        assert_eq!(AuthError::from(err), AuthError::InvalidOtp);
    }

    #[test]
    fn test_garbage_is_invalid_url() {
        assert!(matches!(parse_auth_callback("not a url"), Err(DeepLinkError::InvalidUrl(_))));
    }
}
