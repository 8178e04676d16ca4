//! Cross-provider calendar aggregation
//!
//! Fans one request out to every connected calendar provider, tolerates the
//! ones that fail, and merges the survivors into a single deterministic
//! list. A provider that is not connected is not an error; a provider that
//! is connected but broken is reported next to the events, never instead of
//! them.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::lifecycle::{AuthError, TokenLifecycleManager};
use crate::models::{CalendarEvent, EventCategory, EventPriority, Provider};
use crate::providers::{AdapterRegistry, FetchError, FetchWindow};
use crate::store::{StoreError, TokenStatus, TokenStore};

/// Post-merge event filters.
///
/// All criteria are conjunctive; `None` means "no constraint". Filtering is
/// a pure step over the merged list, so identical provider responses and
/// filters always produce identical output.
#[derive(Debug, Clone)]
pub struct EventFilters {
    pub sources: Option<Vec<Provider>>,
    pub categories: Option<Vec<EventCategory>>,
    pub priorities: Option<Vec<EventPriority>>,
    /// Case-insensitive substring over title and description
    pub search: Option<String>,
    pub include_private: bool,
    pub include_recurring: bool,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Default for EventFilters {
    fn default() -> Self {
        Self {
            sources: None,
            categories: None,
            priorities: None,
            search: None,
            include_private: true,
            include_recurring: true,
            from: None,
            to: None,
        }
    }
}

impl EventFilters {
    /// Whether an event survives every active criterion.
    ///
    /// The date range keeps any event overlapping `[from, to]`.
    pub fn matches(&self, event: &CalendarEvent) -> bool {
        if let Some(sources) = &self.sources {
            if !sources.contains(&event.source) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories.contains(&event.category) {
                return false;
            }
        }
        if let Some(priorities) = &self.priorities {
            if !priorities.contains(&event.priority) {
                return false;
            }
        }
        if !self.include_private && event.is_private {
            return false;
        }
        if !self.include_recurring && event.is_recurring {
            return false;
        }
        if let Some(from) = self.from {
            if event.end_date < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.start_date > to {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !needle.is_empty() {
                let in_title = event.title.to_lowercase().contains(&needle);
                let in_description = event
                    .description
                    .as_deref()
                    .map(|d| d.to_lowercase().contains(&needle))
                    .unwrap_or(false);
                if !in_title && !in_description {
                    return false;
                }
            }
        }
        true
    }
}

/// Why a connected provider contributed no events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider rejected a freshly refreshed token
    Unauthorized,
    /// Transient trouble, worth retrying
    Retryable,
    RateLimited,
    Timeout,
    /// The provider answered but the call failed for non-auth reasons
    ProviderError,
    Internal,
}

/// One provider's failure inside an otherwise successful aggregation.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub provider: Provider,
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Merged events plus the providers that could not contribute.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub events: Vec<CalendarEvent>,
    pub failed_providers: Vec<ProviderFailure>,
}

enum ProviderOutcome {
    Events(Vec<CalendarEvent>),
    /// Not connected; silently absent from the result
    Skipped,
    Failed(ProviderFailure),
}

/// Fans calendar fetches out across connected providers.
///
/// Cloning shares the underlying store, registry, and lifecycle manager.
#[derive(Clone)]
pub struct CalendarAggregator {
    store: Arc<dyn TokenStore>,
    registry: AdapterRegistry,
    lifecycle: TokenLifecycleManager,
    window_days: i64,
    fetch_concurrency: usize,
}

impl CalendarAggregator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        registry: AdapterRegistry,
        lifecycle: TokenLifecycleManager,
        window_days: i64,
        fetch_concurrency: usize,
    ) -> Self {
        Self {
            store,
            registry,
            lifecycle,
            window_days,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// Fetch, merge, and filter events across every connected provider.
    ///
    /// Providers run concurrently; the merge awaits them in registry order
    /// and sorts by start date, so output order is deterministic for
    /// identical provider responses.
    #[instrument(skip(self, filters), fields(user_id = %user_id))]
    pub async fn get_events(
        &self,
        user_id: Uuid,
        filters: &EventFilters,
    ) -> Result<AggregateResult, StoreError> {
        let fetch_start = Instant::now();

        let now = Utc::now();
        let window = FetchWindow {
            start: filters.from.unwrap_or(now),
            end: filters
                .to
                .unwrap_or(now + ChronoDuration::days(self.window_days)),
        };

        let connected = self.connected_providers(user_id).await?;
        debug!(count = connected.len(), "fanning out to connected providers");

        let semaphore = Arc::new(Semaphore::new(self.fetch_concurrency));
        let mut handles = Vec::with_capacity(connected.len());
        for provider in connected {
            let aggregator = self.clone();
            let slots = Arc::clone(&semaphore);
            let handle = tokio::spawn(async move {
                let Ok(_permit) = slots.acquire_owned().await else {
                    return ProviderOutcome::Failed(ProviderFailure {
                        provider,
                        kind: FailureKind::Internal,
                        message: "fetch slot closed".to_string(),
                        retry_after_secs: None,
                    });
                };
                aggregator.fetch_provider(user_id, provider, window).await
            });
            handles.push((provider, handle));
        }

        let mut events = Vec::new();
        let mut failed_providers = Vec::new();
        for (provider, handle) in handles {
            match handle.await {
                Ok(ProviderOutcome::Events(batch)) => events.extend(batch),
                Ok(ProviderOutcome::Skipped) => {}
                Ok(ProviderOutcome::Failed(failure)) => {
                    warn!(
                        provider = %failure.provider,
                        kind = ?failure.kind,
                        error = %failure.message,
                        "provider failed during aggregation"
                    );
                    failed_providers.push(failure);
                }
                Err(e) => {
                    warn!(provider = %provider, error = %e, "provider fetch task failed");
                    failed_providers.push(ProviderFailure {
                        provider,
                        kind: FailureKind::Internal,
                        message: "fetch task failed".to_string(),
                        retry_after_secs: None,
                    });
                }
            }
        }

        events.retain(|event| filters.matches(event));
        // Stable sort keeps registry order among equal start dates
        events.sort_by_key(|event| event.start_date);

        histogram!("calendar_aggregate_latency_ms")
            .record(fetch_start.elapsed().as_secs_f64() * 1_000.0);
        counter!("calendar_events_returned_total").increment(events.len() as u64);

        Ok(AggregateResult {
            events,
            failed_providers,
        })
    }

    /// Calendar providers with a non-revoked record and a registered adapter,
    /// in deterministic registry order.
    pub async fn connected_providers(&self, user_id: Uuid) -> Result<Vec<Provider>, StoreError> {
        let records = self.store.list_for_user(user_id).await?;
        Ok(self
            .registry
            .providers()
            .into_iter()
            .filter(|provider| {
                records
                    .iter()
                    .any(|r| r.provider == *provider && r.status != TokenStatus::Revoked)
            })
            .collect())
    }

    async fn fetch_provider(
        &self,
        user_id: Uuid,
        provider: Provider,
        window: FetchWindow,
    ) -> ProviderOutcome {
        let token = match self.lifecycle.get_valid_access_token(user_id, provider).await {
            Ok(token) => token,
            Err(AuthError::NotConnected) => {
                debug!(provider = %provider, "provider not connected, skipping");
                return ProviderOutcome::Skipped;
            }
            Err(e) => return ProviderOutcome::Failed(auth_failure(provider, e)),
        };

        let adapter = match self.registry.get(provider) {
            Ok(adapter) => adapter,
            Err(e) => {
                return ProviderOutcome::Failed(ProviderFailure {
                    provider,
                    kind: FailureKind::Internal,
                    message: e.to_string(),
                    retry_after_secs: None,
                });
            }
        };

        let metric_labels = vec![("provider", provider.to_string())];
        match adapter.fetch_events(&token, window).await {
            Ok(events) => {
                counter!("calendar_fetch_success_total", &metric_labels).increment(1);
                ProviderOutcome::Events(events)
            }
            Err(FetchError::Unauthorized) => {
                // Local bookkeeping said the token was fine; the provider
                // disagreed. Refresh once and retry before giving up.
                debug!(provider = %provider, "401 on fetch, forcing one refresh");
                counter!("calendar_fetch_unauthorized_retry_total").increment(1);
                let fresh = match self
                    .lifecycle
                    .refresh_access_token(user_id, provider, Some(&token))
                    .await
                {
                    Ok(fresh) => fresh,
                    Err(AuthError::NotConnected) => return ProviderOutcome::Skipped,
                    Err(e) => return ProviderOutcome::Failed(auth_failure(provider, e)),
                };
                match adapter.fetch_events(&fresh, window).await {
                    Ok(events) => {
                        counter!("calendar_fetch_success_total", &metric_labels).increment(1);
                        ProviderOutcome::Events(events)
                    }
                    Err(FetchError::Unauthorized) => {
                        counter!("calendar_fetch_failure_total", &metric_labels).increment(1);
                        ProviderOutcome::Failed(ProviderFailure {
                            provider,
                            kind: FailureKind::Unauthorized,
                            message: "provider rejected a freshly refreshed token".to_string(),
                            retry_after_secs: None,
                        })
                    }
                    Err(e) => {
                        counter!("calendar_fetch_failure_total", &metric_labels).increment(1);
                        ProviderOutcome::Failed(fetch_failure(provider, e))
                    }
                }
            }
            Err(e) => {
                counter!("calendar_fetch_failure_total", &metric_labels).increment(1);
                ProviderOutcome::Failed(fetch_failure(provider, e))
            }
        }
    }
}

fn auth_failure(provider: Provider, error: AuthError) -> ProviderFailure {
    match error {
        AuthError::Retryable {
            message,
            retry_after_secs,
        } => ProviderFailure {
            provider,
            kind: FailureKind::Retryable,
            message,
            retry_after_secs: Some(retry_after_secs),
        },
        AuthError::RateLimited { retry_after_secs } => ProviderFailure {
            provider,
            kind: FailureKind::RateLimited,
            message: "token endpoint rate limited".to_string(),
            retry_after_secs: Some(retry_after_secs),
        },
        AuthError::Internal { message } => ProviderFailure {
            provider,
            kind: FailureKind::Internal,
            message,
            retry_after_secs: None,
        },
        // Callers skip NotConnected before reporting failures
        AuthError::NotConnected => ProviderFailure {
            provider,
            kind: FailureKind::Internal,
            message: "provider not connected".to_string(),
            retry_after_secs: None,
        },
    }
}

fn fetch_failure(provider: Provider, error: FetchError) -> ProviderFailure {
    match error {
        FetchError::Unauthorized => ProviderFailure {
            provider,
            kind: FailureKind::Unauthorized,
            message: "provider rejected the access token".to_string(),
            retry_after_secs: None,
        },
        FetchError::RateLimited { retry_after_secs } => ProviderFailure {
            provider,
            kind: FailureKind::RateLimited,
            message: "provider rate limited the fetch".to_string(),
            retry_after_secs: Some(retry_after_secs),
        },
        FetchError::Timeout => ProviderFailure {
            provider,
            kind: FailureKind::Timeout,
            message: "fetch timed out".to_string(),
            retry_after_secs: None,
        },
        FetchError::Provider(message) => ProviderFailure {
            provider,
            kind: FailureKind::ProviderError,
            message,
            retry_after_secs: None,
        },
    }
}
