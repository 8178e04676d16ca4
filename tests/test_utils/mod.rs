//! Shared fixtures for integration tests.
//!
//! Provides an in-memory SQLite database with migrations applied, an
//! in-memory [`TokenStore`] for tests that do not need SQL, and a
//! scriptable [`ProviderAdapter`] whose refresh and fetch behavior each
//! test controls.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

use calsync::crypto::CryptoKey;
use calsync::migration::{Migrator, MigratorTrait};
use calsync::models::{CalendarEvent, EventCategory, EventPriority, Provider};
use calsync::providers::{
    FetchError, FetchWindow, OAuthTokenResponse, ProviderAdapter, RefreshError, RevokeError,
    RotationPolicy,
};
use calsync::store::{
    OAuthTokenRecord, StoreError, TokenStatus, TokenStore, TokenUpsert,
};

/// Sets up an in-memory SQLite database with all migrations applied.
#[allow(dead_code)]
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Deterministic 32-byte key for tests.
#[allow(dead_code)]
pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("32-byte test key")
}

/// A second key that must not decrypt material written with the first.
#[allow(dead_code)]
pub fn other_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![9u8; 32]).expect("32-byte test key")
}

/// Write-side record with sensible defaults for tests.
#[allow(dead_code)]
pub fn sample_upsert(user_id: Uuid, provider: Provider) -> TokenUpsert {
    TokenUpsert {
        user_id,
        provider,
        status: TokenStatus::Active,
        access_token: "access-token".to_string(),
        refresh_token: Some("refresh-token".to_string()),
        expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
        scope: "calendar.read".to_string(),
        token_type: "Bearer".to_string(),
    }
}

/// A normalized event with the given id and start offset in minutes.
#[allow(dead_code)]
pub fn sample_event(source: Provider, id: &str, title: &str, start_offset_min: i64) -> CalendarEvent {
    let start = Utc::now() + ChronoDuration::minutes(start_offset_min);
    CalendarEvent {
        id: id.to_string(),
        title: title.to_string(),
        description: None,
        start_date: start,
        end_date: start + ChronoDuration::minutes(30),
        all_day: false,
        location: None,
        attendees: Vec::new(),
        organizer: None,
        category: EventCategory::Work,
        priority: EventPriority::Medium,
        source,
        is_recurring: false,
        color: None,
        is_private: false,
        has_attachments: false,
        meeting_url: None,
    }
}

/// In-memory [`TokenStore`] keyed on `(user_id, provider)`.
///
/// Semantics mirror the SQL store: upserts overwrite everything except
/// `created_at`, listings come back in deterministic order.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(Uuid, Provider), OAuthTokenRecord>>,
}

impl MemoryStore {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing upsert timestamps.
    #[allow(dead_code)]
    pub fn seed(&self, record: OAuthTokenRecord) {
        let mut records = self.records.lock().expect("store lock");
        records.insert((record.user_id, record.provider), record);
    }

    #[allow(dead_code)]
    pub fn snapshot(&self, user_id: Uuid, provider: Provider) -> Option<OAuthTokenRecord> {
        let records = self.records.lock().expect("store lock");
        records.get(&(user_id, provider)).cloned()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn get(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<OAuthTokenRecord>, StoreError> {
        let records = self.records.lock().expect("store lock");
        Ok(records.get(&(user_id, provider)).cloned())
    }

    async fn upsert(&self, record: TokenUpsert) -> Result<OAuthTokenRecord, StoreError> {
        let mut records = self.records.lock().expect("store lock");
        let now = Utc::now();
        let created_at = records
            .get(&(record.user_id, record.provider))
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let stored = OAuthTokenRecord {
            user_id: record.user_id,
            provider: record.provider,
            status: record.status,
            access_token: record.access_token,
            refresh_token: record.refresh_token,
            expires_at: record.expires_at,
            scope: record.scope,
            token_type: record.token_type,
            created_at,
            updated_at: now,
        };
        records.insert((stored.user_id, stored.provider), stored.clone());
        Ok(stored)
    }

    async fn mark_status(
        &self,
        user_id: Uuid,
        provider: Provider,
        status: TokenStatus,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().expect("store lock");
        match records.get_mut(&(user_id, provider)) {
            Some(record) => {
                record.status = status;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OAuthTokenRecord>, StoreError> {
        let records = self.records.lock().expect("store lock");
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.provider.as_str());
        Ok(matching)
    }

    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<OAuthTokenRecord>, StoreError> {
        let records = self.records.lock().expect("store lock");
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| r.expires_at.is_some_and(|at| at <= before))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.expires_at);
        Ok(matching)
    }

    async fn delete(&self, user_id: Uuid, provider: Provider) -> Result<bool, StoreError> {
        let mut records = self.records.lock().expect("store lock");
        Ok(records.remove(&(user_id, provider)).is_some())
    }
}

/// What a [`ScriptedAdapter`] does when asked to refresh.
#[allow(dead_code)]
#[derive(Clone)]
pub enum RefreshScript {
    /// Succeed with `access-{n}` where `n` counts the calls made.
    Rotate { refresh_token: Option<String> },
    InvalidGrant,
    Transient,
    RateLimited { retry_after_secs: u64 },
}

/// Scriptable [`ProviderAdapter`] that counts every call.
pub struct ScriptedAdapter {
    provider: Provider,
    refresh_script: RefreshScript,
    refresh_delay: Duration,
    rotation: RotationPolicy,
    fail_revoke: bool,
    events: Vec<CalendarEvent>,
    fetch_error: Option<FetchError>,
    rejected_tokens: Vec<String>,
    pub refresh_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub revoke_calls: AtomicUsize,
    pub last_window: Mutex<Option<FetchWindow>>,
}

#[allow(dead_code)]
impl ScriptedAdapter {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            refresh_script: RefreshScript::Rotate {
                refresh_token: Some("rotated-refresh".to_string()),
            },
            refresh_delay: Duration::ZERO,
            rotation: RotationPolicy::ReplaceWhenReturned,
            fail_revoke: false,
            events: Vec::new(),
            fetch_error: None,
            rejected_tokens: Vec::new(),
            refresh_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
            last_window: Mutex::new(None),
        }
    }

    pub fn with_refresh_script(mut self, script: RefreshScript) -> Self {
        self.refresh_script = script;
        self
    }

    /// Hold every refresh open long enough for concurrent callers to pile up.
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn with_rotation(mut self, rotation: RotationPolicy) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_failing_revoke(mut self) -> Self {
        self.fail_revoke = true;
        self
    }

    pub fn with_events(mut self, events: Vec<CalendarEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_fetch_error(mut self, error: FetchError) -> Self {
        self.fetch_error = Some(error);
        self
    }

    /// Tokens the fake provider answers with a 401.
    pub fn rejecting_tokens(mut self, tokens: &[&str]) -> Self {
        self.rejected_tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn revoke_count(&self) -> usize {
        self.revoke_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<OAuthTokenResponse, RefreshError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        match &self.refresh_script {
            RefreshScript::Rotate { refresh_token } => Ok(OAuthTokenResponse {
                access_token: format!("access-{call}"),
                refresh_token: refresh_token.clone(),
                expires_in: Some(3600),
                scope: None,
                token_type: Some("Bearer".to_string()),
            }),
            RefreshScript::InvalidGrant => {
                Err(RefreshError::InvalidGrant("grant is dead".to_string()))
            }
            RefreshScript::Transient => {
                Err(RefreshError::Transient("token endpoint 503".to_string()))
            }
            RefreshScript::RateLimited { retry_after_secs } => Err(RefreshError::RateLimited {
                retry_after_secs: *retry_after_secs,
            }),
        }
    }

    async fn fetch_events(
        &self,
        access_token: &str,
        window: FetchWindow,
    ) -> Result<Vec<CalendarEvent>, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_window.lock().expect("window lock") = Some(window);
        if self.rejected_tokens.iter().any(|t| t == access_token) {
            return Err(FetchError::Unauthorized);
        }
        if let Some(error) = &self.fetch_error {
            return Err(error.clone());
        }
        Ok(self.events.clone())
    }

    async fn revoke(&self, _token: &str) -> Result<(), RevokeError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_revoke {
            Err(RevokeError("revocation endpoint returned 500".to_string()))
        } else {
            Ok(())
        }
    }

    fn rotation_policy(&self) -> RotationPolicy {
        self.rotation
    }
}
