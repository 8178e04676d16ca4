//! Token storage abstraction
//!
//! This module defines the [`TokenStore`] trait that the lifecycle manager
//! and aggregator are written against, plus the decrypted domain record it
//! deals in. The SQL-backed implementation lives in [`sql`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::CryptoError;
use crate::models::Provider;
use crate::models::event::UnknownEnumValue;

pub mod sql;

pub use sql::SqlTokenStore;

/// Stored status of an OAuth token record.
///
/// The status is a cache of the last known state, not authoritative over
/// time: a record whose `expires_at` has passed is treated as expired no
/// matter what the column says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Token is live and may be served or refreshed.
    Active,
    /// Expiry passed (or a provider 401 was observed) and no refresh path
    /// exists right now. A new grant through `upsert` revives the pair.
    Expired,
    /// Terminal. The provider rejected the refresh token or the user
    /// disconnected; only a new authorization can revive the pair.
    Revoked,
}

impl TokenStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Expired => "expired",
            TokenStatus::Revoked => "revoked",
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TokenStatus::Active),
            "expired" => Ok(TokenStatus::Expired),
            "revoked" => Ok(TokenStatus::Revoked),
            other => Err(UnknownEnumValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle classification of a stored record at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Usable as-is; expiry is comfortably ahead of the safety margin.
    Fresh,
    /// Expired or inside the safety margin; refresh before use.
    NeedsRefresh,
    /// Terminal; the user must reconnect the provider.
    Revoked,
}

/// A decrypted token record as the rest of the crate sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthTokenRecord {
    pub user_id: Uuid,
    pub provider: Provider,
    pub status: TokenStatus,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: String,
    pub token_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthTokenRecord {
    /// Classify the record relative to `now`.
    ///
    /// A token expiring at or before `now + safety_margin` already counts as
    /// `NeedsRefresh` so a fetch is never issued with a token likely to
    /// expire mid-flight. When `expires_at` is known it overrides the cached
    /// status in both directions; without it, a record stays `Fresh` until a
    /// provider 401 flips its status to expired.
    pub fn state_at(&self, now: DateTime<Utc>, safety_margin: Duration) -> TokenState {
        if self.status == TokenStatus::Revoked {
            return TokenState::Revoked;
        }
        match self.expires_at {
            Some(expires_at) if expires_at <= now + safety_margin => TokenState::NeedsRefresh,
            Some(_) => TokenState::Fresh,
            None if self.status == TokenStatus::Expired => TokenState::NeedsRefresh,
            None => TokenState::Fresh,
        }
    }
}

/// Write-side view of a token record. Row timestamps are store-managed.
#[derive(Debug, Clone)]
pub struct TokenUpsert {
    pub user_id: Uuid,
    pub provider: Provider,
    pub status: TokenStatus,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: String,
    pub token_type: String,
}

/// Errors surfaced by token storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("corrupt token record for user {user_id}: {detail}")]
    Corrupt { user_id: Uuid, detail: String },
    #[error("token record not persisted")]
    NotPersisted,
}

/// Persistence seam for OAuth token records.
///
/// Every write is atomic per `(user_id, provider)` key: concurrent writers
/// racing on the same key resolve last-writer-wins with no partial field
/// updates visible to readers.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the record for a `(user, provider)` pair.
    async fn get(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<OAuthTokenRecord>, StoreError>;

    /// Insert or overwrite the record for the pair carried by `record`.
    async fn upsert(&self, record: TokenUpsert) -> Result<OAuthTokenRecord, StoreError>;

    /// Overwrite the cached status column. Returns `false` when no record
    /// exists.
    async fn mark_status(
        &self,
        user_id: Uuid,
        provider: Provider,
        status: TokenStatus,
    ) -> Result<bool, StoreError>;

    /// Flip the record to `revoked`. Returns `false` when no record exists.
    async fn mark_revoked(&self, user_id: Uuid, provider: Provider) -> Result<bool, StoreError> {
        self.mark_status(user_id, provider, TokenStatus::Revoked)
            .await
    }

    /// All records for a user, ordered by provider.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OAuthTokenRecord>, StoreError>;

    /// Records whose expiry is at or before `before`, ordered by expiry.
    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<OAuthTokenRecord>, StoreError>;

    /// Remove the record. Returns `false` when no record exists.
    async fn delete(&self, user_id: Uuid, provider: Provider) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_expiring_at(expires_at: Option<DateTime<Utc>>, status: TokenStatus) -> OAuthTokenRecord {
        let now = Utc::now();
        OAuthTokenRecord {
            user_id: Uuid::new_v4(),
            provider: Provider::Google,
            status,
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at,
            scope: String::new(),
            token_type: "Bearer".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fresh_outside_the_safety_margin() {
        let now = Utc::now();
        let record = record_expiring_at(Some(now + Duration::seconds(61)), TokenStatus::Active);
        assert_eq!(
            record.state_at(now, Duration::seconds(60)),
            TokenState::Fresh
        );
    }

    #[test]
    fn needs_refresh_exactly_at_the_margin_boundary() {
        let now = Utc::now();
        let record = record_expiring_at(Some(now + Duration::seconds(60)), TokenStatus::Active);
        assert_eq!(
            record.state_at(now, Duration::seconds(60)),
            TokenState::NeedsRefresh
        );
    }

    #[test]
    fn needs_refresh_when_already_expired() {
        let now = Utc::now();
        let record = record_expiring_at(Some(now - Duration::seconds(5)), TokenStatus::Active);
        assert_eq!(
            record.state_at(now, Duration::seconds(60)),
            TokenState::NeedsRefresh
        );
    }

    #[test]
    fn unknown_expiry_counts_as_fresh() {
        let now = Utc::now();
        let record = record_expiring_at(None, TokenStatus::Active);
        assert_eq!(
            record.state_at(now, Duration::seconds(60)),
            TokenState::Fresh
        );
    }

    #[test]
    fn expired_status_without_expiry_needs_refresh() {
        let now = Utc::now();
        let record = record_expiring_at(None, TokenStatus::Expired);
        assert_eq!(
            record.state_at(now, Duration::seconds(60)),
            TokenState::NeedsRefresh
        );
    }

    #[test]
    fn known_expiry_overrides_the_cached_status() {
        let now = Utc::now();
        // Stale "expired" cache on a record another writer already refreshed
        let record = record_expiring_at(Some(now + Duration::hours(1)), TokenStatus::Expired);
        assert_eq!(
            record.state_at(now, Duration::seconds(60)),
            TokenState::Fresh
        );
        // Stale "active" cache on a record past its expiry
        let record = record_expiring_at(Some(now - Duration::hours(1)), TokenStatus::Active);
        assert_eq!(
            record.state_at(now, Duration::seconds(60)),
            TokenState::NeedsRefresh
        );
    }

    #[test]
    fn revoked_wins_over_expiry_in_both_directions() {
        let now = Utc::now();
        let future = record_expiring_at(Some(now + Duration::hours(1)), TokenStatus::Revoked);
        let past = record_expiring_at(Some(now - Duration::hours(1)), TokenStatus::Revoked);
        assert_eq!(future.state_at(now, Duration::seconds(60)), TokenState::Revoked);
        assert_eq!(past.state_at(now, Duration::seconds(60)), TokenState::Revoked);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TokenStatus::Active,
            TokenStatus::Expired,
            TokenStatus::Revoked,
        ] {
            assert_eq!(status.as_str().parse::<TokenStatus>().ok(), Some(status));
        }
        assert!("paused".parse::<TokenStatus>().is_err());
    }
}
