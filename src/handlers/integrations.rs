//! Integration status and disconnect endpoints.
//!
//! "Connected but failing" and "not connected" are different states for the
//! UI, so the listing reports expiring and expired records instead of
//! hiding them.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::models::Provider;
use crate::server::AppState;
use crate::store::{OAuthTokenRecord, TokenState};

/// Connection state of one provider integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    /// Token is fresh and usable
    Connected,
    /// Token is inside the safety margin or past expiry, but a refresh
    /// token exists so the next use will repair it
    Expiring,
    /// Expired with no refresh path; the user must reconnect
    Expired,
    /// Revoked by the provider or the user
    Revoked,
}

/// One provider integration as reported to callers.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationInfo {
    pub provider: Provider,
    pub status: IntegrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response wrapper for the integrations listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct IntegrationsResponse {
    pub integrations: Vec<IntegrationInfo>,
}

fn integration_status(
    record: &OAuthTokenRecord,
    now: DateTime<Utc>,
    safety_margin: ChronoDuration,
) -> IntegrationStatus {
    match record.state_at(now, safety_margin) {
        TokenState::Revoked => IntegrationStatus::Revoked,
        TokenState::Fresh => IntegrationStatus::Connected,
        TokenState::NeedsRefresh if record.refresh_token.is_some() => IntegrationStatus::Expiring,
        TokenState::NeedsRefresh => IntegrationStatus::Expired,
    }
}

/// Lists every provider integration stored for a user.
#[utoipa::path(
    get,
    path = "/users/{user_id}/integrations",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = Uuid, Path, description = "User whose integrations to list"),
    ),
    responses(
        (status = 200, description = "Integrations with their connection state", body = IntegrationsResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_integrations(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(user_id): Path<Uuid>,
) -> Result<Json<IntegrationsResponse>, ApiError> {
    let safety_margin =
        ChronoDuration::seconds(state.config.token_refresh.safety_margin_seconds as i64);
    let now = Utc::now();

    let records = state.store.list_for_user(user_id).await?;
    let integrations = records
        .iter()
        .map(|record| IntegrationInfo {
            provider: record.provider,
            status: integration_status(record, now, safety_margin),
            expires_at: record.expires_at,
            connected_at: record.created_at,
            updated_at: record.updated_at,
        })
        .collect();

    Ok(Json(IntegrationsResponse { integrations }))
}

/// Disconnects a provider integration, revoking its tokens.
#[utoipa::path(
    delete,
    path = "/users/{user_id}/integrations/{provider}",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = Uuid, Path, description = "User owning the integration"),
        ("provider" = String, Path, description = "Provider slug, e.g. google"),
    ),
    responses(
        (status = 204, description = "Integration revoked"),
        (status = 400, description = "Unknown provider", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "No integration for this provider", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn delete_integration(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path((user_id, provider_slug)): Path<(Uuid, String)>,
) -> Result<StatusCode, ApiError> {
    let provider: Provider = provider_slug.parse().map_err(|_| {
        validation_error(
            "unknown provider",
            json!({ "provider": format!("unknown value '{provider_slug}'") }),
        )
    })?;

    state.lifecycle.revoke(user_id, provider).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TokenStatus;

    fn record(
        status: TokenStatus,
        refresh_token: Option<&str>,
        expires_in_secs: Option<i64>,
    ) -> OAuthTokenRecord {
        let now = Utc::now();
        OAuthTokenRecord {
            user_id: Uuid::new_v4(),
            provider: Provider::Google,
            status,
            access_token: "access".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: expires_in_secs.map(|secs| now + ChronoDuration::seconds(secs)),
            scope: "calendar.readonly".to_string(),
            token_type: "Bearer".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn status_of(record: &OAuthTokenRecord) -> IntegrationStatus {
        integration_status(record, Utc::now(), ChronoDuration::seconds(60))
    }

    #[test]
    fn test_fresh_token_reports_connected() {
        let record = record(TokenStatus::Active, Some("refresh"), Some(3600));
        assert_eq!(status_of(&record), IntegrationStatus::Connected);
    }

    #[test]
    fn test_expiring_token_with_refresh_path_reports_expiring() {
        let record = record(TokenStatus::Active, Some("refresh"), Some(30));
        assert_eq!(status_of(&record), IntegrationStatus::Expiring);
    }

    #[test]
    fn test_expired_token_without_refresh_reports_expired() {
        let record = record(TokenStatus::Expired, None, Some(-60));
        assert_eq!(status_of(&record), IntegrationStatus::Expired);
    }

    #[test]
    fn test_revoked_wins_over_everything() {
        let record = record(TokenStatus::Revoked, Some("refresh"), Some(3600));
        assert_eq!(status_of(&record), IntegrationStatus::Revoked);
    }

    #[test]
    fn test_integration_info_serializes_camel_case() {
        let info = IntegrationInfo {
            provider: Provider::Microsoft,
            status: IntegrationStatus::Expiring,
            expires_at: Some(Utc::now()),
            connected_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["provider"], "microsoft");
        assert_eq!(json["status"], "expiring");
        assert!(json.get("expiresAt").is_some());
        assert!(json.get("connectedAt").is_some());
    }
}
