//! Token lifecycle management
//!
//! One state machine per (user, provider) credential: hand out fresh access
//! tokens without touching the network, refresh expiring ones exactly once
//! no matter how many callers ask at the same time, and retire grants the
//! provider has declared dead.

use chrono::{Duration as ChronoDuration, Utc};
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::Provider;
use crate::providers::{AdapterRegistry, RefreshError};
use crate::store::{StoreError, TokenState, TokenStatus, TokenStore, TokenUpsert};

/// Fallback retry hint when the provider did not supply one
const TRANSIENT_RETRY_SECS: u64 = 5;

/// Errors surfaced to token consumers.
///
/// Values are broadcast to every caller coalesced into a shared refresh, so
/// the type stays cheaply cloneable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    /// No usable credential; the user must re-authorize
    #[error("provider not connected")]
    NotConnected,
    /// Transient provider or network trouble, retry after the hinted delay
    #[error("{message} (retry after {retry_after_secs}s)")]
    Retryable {
        message: String,
        retry_after_secs: u64,
    },
    /// The provider told us to back off
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    /// Storage or wiring fault on our side
    #[error("{message}")]
    Internal { message: String },
}

#[derive(Debug, Clone)]
enum RefreshMode {
    /// Stored expiry fell inside the safety margin
    Expiring,
    /// A fetch got a 401 with this token despite local bookkeeping
    Forced { stale_token: Option<String> },
}

type TokenKey = (Uuid, Provider);
type RefreshOutcome = Result<String, AuthError>;

/// Hands out valid access tokens, coalescing concurrent refreshes.
///
/// Cloning shares the underlying store, registry, and in-flight table.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    store: Arc<dyn TokenStore>,
    registry: AdapterRegistry,
    safety_margin: ChronoDuration,
    in_flight: Arc<Mutex<HashMap<TokenKey, broadcast::Sender<RefreshOutcome>>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        registry: AdapterRegistry,
        safety_margin: ChronoDuration,
    ) -> Self {
        Self {
            store,
            registry,
            safety_margin,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return an access token good for at least the safety margin.
    ///
    /// Fresh tokens come straight from storage. Expiring ones go through a
    /// per-key single-flight refresh; callers arriving while one is already
    /// running wait for that outcome instead of issuing their own.
    #[instrument(skip(self), fields(user_id = %user_id, provider = %provider))]
    pub async fn get_valid_access_token(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<String, AuthError> {
        let record = self
            .store
            .get(user_id, provider)
            .await
            .map_err(store_fault)?
            .ok_or(AuthError::NotConnected)?;

        match record.state_at(Utc::now(), self.safety_margin) {
            TokenState::Revoked => Err(AuthError::NotConnected),
            TokenState::Fresh => Ok(record.access_token),
            TokenState::NeedsRefresh => {
                self.refresh_single_flight(user_id, provider, RefreshMode::Expiring)
                    .await
            }
        }
    }

    /// Force a refresh after a provider rejected `stale_token` with a 401.
    ///
    /// If the stored token has already moved past `stale_token`, another
    /// caller refreshed in the meantime and the stored one is returned
    /// without a network call.
    #[instrument(skip(self, stale_token), fields(user_id = %user_id, provider = %provider))]
    pub async fn refresh_access_token(
        &self,
        user_id: Uuid,
        provider: Provider,
        stale_token: Option<&str>,
    ) -> Result<String, AuthError> {
        let mode = RefreshMode::Forced {
            stale_token: stale_token.map(str::to_string),
        };
        self.refresh_single_flight(user_id, provider, mode).await
    }

    /// Sever a connection.
    ///
    /// The remote revocation is best-effort; local state always ends up
    /// `Revoked` even when the provider call fails.
    #[instrument(skip(self), fields(user_id = %user_id, provider = %provider))]
    pub async fn revoke(&self, user_id: Uuid, provider: Provider) -> Result<(), AuthError> {
        let record = self
            .store
            .get(user_id, provider)
            .await
            .map_err(store_fault)?
            .ok_or(AuthError::NotConnected)?;

        if let Ok(adapter) = self.registry.get(provider) {
            let token = record
                .refresh_token
                .as_deref()
                .unwrap_or(&record.access_token);
            if let Err(e) = adapter.revoke(token).await {
                warn!(
                    user_id = %user_id,
                    provider = %provider,
                    error = %e,
                    "remote revocation failed, marking revoked locally anyway"
                );
            }
        }

        self.store
            .mark_revoked(user_id, provider)
            .await
            .map_err(store_fault)?;
        counter!("token_revoked_total").increment(1);
        info!(user_id = %user_id, provider = %provider, "connection revoked");
        Ok(())
    }

    /// Delete long-expired records that can never be refreshed.
    ///
    /// Returns the number of records removed.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self, retention: ChronoDuration) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - retention;
        let mut deleted = 0u64;
        for record in self.store.list_expiring(cutoff).await? {
            if record.refresh_token.is_none()
                && self.store.delete(record.user_id, record.provider).await?
            {
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(deleted, "cleaned up expired credentials");
        }
        counter!("token_cleanup_deleted_total").increment(deleted);
        Ok(deleted)
    }

    async fn refresh_single_flight(
        &self,
        user_id: Uuid,
        provider: Provider,
        mode: RefreshMode,
    ) -> RefreshOutcome {
        let key = (user_id, provider);

        let mut outcome_rx = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(sender) => {
                    // Subscribing under the map lock guarantees the worker's
                    // send, which also takes the lock, cannot slip past us.
                    debug!("joining an in-flight refresh");
                    counter!("token_refresh_coalesced_total").increment(1);
                    sender.subscribe()
                }
                None => {
                    let (sender, receiver) = broadcast::channel(1);
                    in_flight.insert(key, sender.clone());
                    // The refresh runs on its own task so a caller that
                    // disconnects mid-wait cannot strand the in-flight entry.
                    let manager = self.clone();
                    tokio::spawn(async move {
                        let outcome = manager.perform_refresh(user_id, provider, mode).await;
                        let mut in_flight = manager.in_flight.lock().await;
                        in_flight.remove(&key);
                        let _ = sender.send(outcome);
                    });
                    receiver
                }
            }
        };

        match outcome_rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(AuthError::Retryable {
                message: "refresh worker went away".to_string(),
                retry_after_secs: TRANSIENT_RETRY_SECS,
            }),
        }
    }

    async fn perform_refresh(
        &self,
        user_id: Uuid,
        provider: Provider,
        mode: RefreshMode,
    ) -> RefreshOutcome {
        let refresh_start = Instant::now();

        let record = self
            .store
            .get(user_id, provider)
            .await
            .map_err(store_fault)?
            .ok_or(AuthError::NotConnected)?;
        if record.status == TokenStatus::Revoked {
            return Err(AuthError::NotConnected);
        }

        // A refresh that completed between the caller's state check and this
        // flight winning the key makes the work unnecessary.
        match &mode {
            RefreshMode::Expiring => {
                if record.state_at(Utc::now(), self.safety_margin) == TokenState::Fresh {
                    debug!(user_id = %user_id, provider = %provider, "token already fresh");
                    return Ok(record.access_token);
                }
            }
            RefreshMode::Forced {
                stale_token: Some(stale),
            } if record.access_token != *stale => {
                debug!(
                    user_id = %user_id,
                    provider = %provider,
                    "stored token already rotated past the rejected one"
                );
                return Ok(record.access_token);
            }
            RefreshMode::Forced { .. } => {}
        }

        let Some(refresh_token) = record.refresh_token.clone() else {
            if record.status != TokenStatus::Expired {
                self.store
                    .mark_status(user_id, provider, TokenStatus::Expired)
                    .await
                    .map_err(store_fault)?;
            }
            info!(
                user_id = %user_id,
                provider = %provider,
                "credential expired with no refresh token"
            );
            return Err(AuthError::NotConnected);
        };

        let adapter = self.registry.get(provider).map_err(|e| AuthError::Internal {
            message: e.to_string(),
        })?;

        match adapter.refresh(&refresh_token).await {
            Ok(response) => {
                let refresh_duration = refresh_start.elapsed();
                histogram!("token_refresh_latency_ms")
                    .record(refresh_duration.as_secs_f64() * 1_000.0);

                let next_refresh = adapter
                    .rotation_policy()
                    .next_refresh_token(record.refresh_token, response.refresh_token);
                let expires_at = response
                    .expires_in
                    .map(|secs| Utc::now() + ChronoDuration::seconds(secs));

                let updated = self
                    .store
                    .upsert(TokenUpsert {
                        user_id,
                        provider,
                        status: TokenStatus::Active,
                        access_token: response.access_token,
                        refresh_token: next_refresh,
                        expires_at,
                        scope: response.scope.unwrap_or(record.scope),
                        token_type: response.token_type.unwrap_or(record.token_type),
                    })
                    .await
                    .map_err(store_fault)?;

                info!(
                    user_id = %user_id,
                    provider = %provider,
                    refresh_duration_ms = refresh_duration.as_millis(),
                    "refreshed access token"
                );
                let metric_labels = vec![("provider", provider.to_string())];
                counter!("token_refresh_success_total", &metric_labels).increment(1);

                Ok(updated.access_token)
            }
            Err(RefreshError::InvalidGrant(detail)) => {
                warn!(
                    user_id = %user_id,
                    provider = %provider,
                    error = %detail,
                    "refresh token rejected, revoking the connection"
                );
                self.store
                    .mark_revoked(user_id, provider)
                    .await
                    .map_err(store_fault)?;
                counter!("token_refresh_permanent_failure_total").increment(1);
                Err(AuthError::NotConnected)
            }
            Err(RefreshError::RateLimited { retry_after_secs }) => {
                warn!(
                    user_id = %user_id,
                    provider = %provider,
                    retry_after_secs,
                    "token endpoint rate limited"
                );
                counter!("token_refresh_rate_limited_total").increment(1);
                Err(AuthError::RateLimited { retry_after_secs })
            }
            Err(RefreshError::Timeout) => {
                warn!(user_id = %user_id, provider = %provider, "refresh timed out");
                counter!("token_refresh_transient_failure_total").increment(1);
                Err(AuthError::Retryable {
                    message: "refresh timed out".to_string(),
                    retry_after_secs: TRANSIENT_RETRY_SECS,
                })
            }
            Err(RefreshError::Transient(detail)) => {
                warn!(
                    user_id = %user_id,
                    provider = %provider,
                    error = %detail,
                    "transient refresh failure"
                );
                counter!("token_refresh_transient_failure_total").increment(1);
                Err(AuthError::Retryable {
                    message: detail,
                    retry_after_secs: TRANSIENT_RETRY_SECS,
                })
            }
        }
    }
}

fn store_fault(e: StoreError) -> AuthError {
    AuthError::Internal {
        message: e.to_string(),
    }
}
