//! Provider adapters
//!
//! This module provides the adapter SDK for external calendar providers:
//! - The `ProviderAdapter` trait every provider implementation follows
//! - Wire types and error classification shared across token endpoints
//! - The instance-scoped adapter registry used for dispatch
//!
//! Adapters are constructed once at startup with their HTTP client and
//! configuration injected; nothing here keeps global state.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{CalendarEvent, Provider};

pub mod google;
pub mod microsoft;
pub mod outlook;
pub mod registry;

pub use google::{GoogleAdapter, GoogleConfig};
pub use microsoft::{MicrosoftAdapter, MicrosoftConfig};
pub use outlook::{OutlookAdapter, OutlookConfig};
pub use registry::{AdapterRegistry, RegistryError};

/// Token endpoint success payload, shared by every provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Token endpoint error payload (RFC 6749 §5.2).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Time window bounding a calendar fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// Window opening now and closing `days` days out.
    pub fn starting_now(days: i64) -> Self {
        let now = Utc::now();
        Self {
            start: now,
            end: now + Duration::days(days),
        }
    }
}

impl Default for FetchWindow {
    fn default() -> Self {
        Self::starting_now(30)
    }
}

/// Classified failure of a token refresh call.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    /// The refresh token itself is dead. The caller must revoke, not retry.
    #[error("refresh token rejected: {0}")]
    InvalidGrant(String),
    /// Network or 5xx failure. The caller may retry with backoff.
    #[error("transient refresh failure: {0}")]
    Transient(String),
    /// 429 from the token endpoint. Honor the delay before retrying.
    #[error("refresh rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    /// The call exceeded its deadline.
    #[error("refresh timed out")]
    Timeout,
}

/// Classified failure of an event fetch call.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// 401 despite local bookkeeping saying the token was fresh.
    #[error("provider rejected the access token")]
    Unauthorized,
    /// 429 from the provider API.
    #[error("fetch rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    /// The call exceeded its deadline.
    #[error("fetch timed out")]
    Timeout,
    /// Any other provider-side failure, auth is not in question.
    #[error("provider error: {0}")]
    Provider(String),
}

/// Failure of a best-effort remote revocation call.
#[derive(Debug, Clone, Error)]
#[error("revocation failed: {0}")]
pub struct RevokeError(pub String);

/// Failure mapping a provider-native event onto [`CalendarEvent`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("event missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("invalid {field} timestamp: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// How a provider treats the stored refresh token after a successful
/// refresh. Providers vary, so this is a per-adapter decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Every refresh consumes the presented token; only the returned one
    /// (if any) is valid afterwards.
    AlwaysRotate,
    /// The stored token stays valid unless the response carries a new one.
    ReplaceWhenReturned,
}

impl RotationPolicy {
    /// Resolve which refresh token survives the refresh.
    pub fn next_refresh_token(
        &self,
        stored: Option<String>,
        returned: Option<String>,
    ) -> Option<String> {
        match self {
            RotationPolicy::AlwaysRotate => returned,
            RotationPolicy::ReplaceWhenReturned => returned.or(stored),
        }
    }
}

/// Capability interface implemented once per provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter speaks for.
    fn provider(&self) -> Provider;

    /// Exchange a refresh token at the provider's token endpoint.
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokenResponse, RefreshError>;

    /// Fetch events inside `window`, normalized to the unified model.
    async fn fetch_events(
        &self,
        access_token: &str,
        window: FetchWindow,
    ) -> Result<Vec<CalendarEvent>, FetchError>;

    /// Best-effort remote revocation. Providers without a revocation
    /// endpoint keep the default no-op.
    async fn revoke(&self, _token: &str) -> Result<(), RevokeError> {
        Ok(())
    }

    /// Refresh token rotation behavior at this provider.
    fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy::ReplaceWhenReturned
    }
}

/// Build the process-wide HTTP client shared by all adapters.
pub fn build_http_client(
    connect_timeout: std::time::Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
}

/// Error codes that mean the grant is dead and a retry cannot help.
const INVALID_GRANT_CODES: &[&str] = &[
    "invalid_grant",
    "invalid_client",
    "unauthorized_client",
    "access_denied",
    "unsupported_grant_type",
];

/// Classify a non-2xx, non-429 token endpoint response.
///
/// A recognized permanent error code wins over the HTTP status; everything
/// else defaults to transient so a live grant is never revoked over a
/// wobbly response.
pub(crate) fn classify_token_endpoint_error(status: u16, body: &str) -> RefreshError {
    if let Ok(parsed) = serde_json::from_str::<OAuthErrorResponse>(body) {
        let detail = match &parsed.error_description {
            Some(description) => format!("{}: {}", parsed.error, description),
            None => parsed.error.clone(),
        };
        if INVALID_GRANT_CODES.contains(&parsed.error.as_str()) {
            return RefreshError::InvalidGrant(detail);
        }
        if parsed.error == "temporarily_unavailable" {
            return RefreshError::Transient(detail);
        }
    }

    if (500..600).contains(&status) {
        RefreshError::Transient(format!("token endpoint returned {}", status))
    } else {
        RefreshError::Transient(format!("token endpoint returned {}: {}", status, body))
    }
}

/// Seconds to wait out a 429, from the `Retry-After` header when present.
pub(crate) fn retry_after_seconds(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get("Retry-After")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(60)
}

pub(crate) fn refresh_send_error(err: reqwest::Error) -> RefreshError {
    if err.is_timeout() {
        RefreshError::Timeout
    } else {
        RefreshError::Transient(err.to_string())
    }
}

pub(crate) fn fetch_send_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Provider(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_grant_codes_classify_as_invalid_grant() {
        for code in INVALID_GRANT_CODES {
            let body = format!(r#"{{"error":"{}","error_description":"gone"}}"#, code);
            let classified = classify_token_endpoint_error(400, &body);
            assert!(
                matches!(classified, RefreshError::InvalidGrant(_)),
                "{} should be invalid_grant, got {:?}",
                code,
                classified
            );
        }
    }

    #[test]
    fn server_errors_classify_as_transient() {
        assert!(matches!(
            classify_token_endpoint_error(503, "upstream busy"),
            RefreshError::Transient(_)
        ));
    }

    #[test]
    fn unrecognized_client_errors_stay_transient() {
        // A live grant must never be revoked over an unknown 4xx
        let classified =
            classify_token_endpoint_error(400, r#"{"error":"interaction_required"}"#);
        assert!(matches!(classified, RefreshError::Transient(_)));
    }

    #[test]
    fn error_description_is_carried_into_the_message() {
        let classified = classify_token_endpoint_error(
            400,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );
        match classified {
            RefreshError::InvalidGrant(detail) => {
                assert!(detail.contains("invalid_grant"));
                assert!(detail.contains("expired or revoked"));
            }
            other => panic!("expected InvalidGrant, got {:?}", other),
        }
    }

    #[test]
    fn rotation_policy_resolves_survivors() {
        let stored = Some("old".to_string());
        let returned = Some("new".to_string());

        assert_eq!(
            RotationPolicy::AlwaysRotate.next_refresh_token(stored.clone(), returned.clone()),
            Some("new".to_string())
        );
        // A rotating provider that returned nothing leaves the pair
        // non-refreshable; the presented token is spent either way.
        assert_eq!(
            RotationPolicy::AlwaysRotate.next_refresh_token(stored.clone(), None),
            None
        );
        assert_eq!(
            RotationPolicy::ReplaceWhenReturned.next_refresh_token(stored.clone(), returned),
            Some("new".to_string())
        );
        assert_eq!(
            RotationPolicy::ReplaceWhenReturned.next_refresh_token(stored, None),
            Some("old".to_string())
        );
    }

    #[test]
    fn default_window_spans_thirty_days() {
        let window = FetchWindow::default();
        assert_eq!(window.end - window.start, Duration::days(30));
    }

    #[test]
    fn token_response_tolerates_missing_optional_fields() {
        let parsed: OAuthTokenResponse =
            serde_json::from_str(r#"{"access_token":"abc"}"#).expect("minimal response parses");
        assert_eq!(parsed.access_token, "abc");
        assert!(parsed.refresh_token.is_none());
        assert!(parsed.expires_in.is_none());
    }
}
