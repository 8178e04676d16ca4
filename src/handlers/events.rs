//! Aggregated calendar events endpoint.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::aggregator::{AggregateResult, EventFilters};
use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::models::{EventCategory, EventPriority, Provider};
use crate::server::AppState;

/// Query parameters for the aggregated events listing.
///
/// List-valued filters are comma-separated, e.g. `sources=google,microsoft`.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Comma-separated provider slugs to include
    pub sources: Option<String>,
    /// Comma-separated event categories to include
    pub categories: Option<String>,
    /// Comma-separated event priorities to include
    pub priorities: Option<String>,
    /// Case-insensitive substring matched against title and description
    pub search: Option<String>,
    /// Window start, RFC 3339 (defaults to now)
    pub from: Option<String>,
    /// Window end, RFC 3339 (defaults to the configured window)
    pub to: Option<String>,
    /// Include private events (default: true)
    pub include_private: Option<bool>,
    /// Include recurring events (default: true)
    pub include_recurring: Option<bool>,
}

/// Returns the merged calendar for a user across every connected provider.
///
/// Providers that fail are reported in `failedProviders` next to the events
/// from the ones that succeeded.
#[utoipa::path(
    get,
    path = "/users/{user_id}/calendar/events",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = Uuid, Path, description = "User whose calendars to aggregate"),
        EventsQuery,
    ),
    responses(
        (status = 200, description = "Merged events plus per-provider failures", body = AggregateResult),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "calendar"
)]
pub async fn get_user_events(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(user_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<AggregateResult>, ApiError> {
    let filters = parse_filters(&query)?;
    let result = state.aggregator.get_events(user_id, &filters).await?;
    Ok(Json(result))
}

fn parse_filters(query: &EventsQuery) -> Result<EventFilters, ApiError> {
    let mut filters = EventFilters::default();

    if let Some(raw) = &query.sources {
        filters.sources = Some(parse_list::<Provider>(raw, "sources")?);
    }
    if let Some(raw) = &query.categories {
        filters.categories = Some(parse_list::<EventCategory>(raw, "categories")?);
    }
    if let Some(raw) = &query.priorities {
        filters.priorities = Some(parse_list::<EventPriority>(raw, "priorities")?);
    }
    if let Some(search) = &query.search {
        let trimmed = search.trim();
        if !trimmed.is_empty() {
            filters.search = Some(trimmed.to_string());
        }
    }
    if let Some(raw) = &query.from {
        filters.from = Some(parse_timestamp(raw, "from")?);
    }
    if let Some(raw) = &query.to {
        filters.to = Some(parse_timestamp(raw, "to")?);
    }
    if let (Some(from), Some(to)) = (filters.from, filters.to)
        && from > to
    {
        return Err(validation_error(
            "invalid date range",
            json!({ "from": "must not be after 'to'" }),
        ));
    }
    if let Some(include_private) = query.include_private {
        filters.include_private = include_private;
    }
    if let Some(include_recurring) = query.include_recurring {
        filters.include_recurring = include_recurring;
    }

    Ok(filters)
}

fn parse_list<T: std::str::FromStr>(raw: &str, field: &'static str) -> Result<Vec<T>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<T>().map_err(|_| {
                validation_error(
                    "invalid filter value",
                    json!({ field: format!("unknown value '{part}'") }),
                )
            })
        })
        .collect()
}

fn parse_timestamp(raw: &str, field: &'static str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            validation_error(
                "invalid timestamp",
                json!({ field: "must be an RFC 3339 timestamp" }),
            )
        })
}
