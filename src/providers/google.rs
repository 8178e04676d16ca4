//! Google Calendar adapter
//!
//! Talks to the Calendar v3 API on the user's primary calendar with
//! `singleEvents=true` so recurring series arrive pre-expanded. Google only
//! returns a refresh token when it decides to rotate, so the stored one
//! survives a refresh that omits it.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::classify::classify_event_text;
use crate::models::{CalendarEvent, Provider};
use crate::providers::{
    FetchError, FetchWindow, NormalizeError, OAuthTokenResponse, ProviderAdapter, RefreshError,
    RevokeError, classify_token_endpoint_error, fetch_send_error, refresh_send_error,
    retry_after_seconds,
};

/// Google adapter configuration
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Token endpoint (overridable for tests)
    pub token_url: String,
    /// Revocation endpoint (overridable for tests)
    pub revoke_url: String,
    /// Calendar API base (overridable for tests)
    pub api_base_url: String,
    pub refresh_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Events requested per page
    pub page_size: u32,
    /// Upper bound on followed result pages
    pub max_pages: u32,
}

impl GoogleConfig {
    pub fn new(client_id: String, client_secret: Option<String>) -> Self {
        Self {
            client_id,
            client_secret,
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            revoke_url: "https://oauth2.googleapis.com/revoke".to_string(),
            api_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            refresh_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(10),
            page_size: 50,
            max_pages: 10,
        }
    }
}

/// Google Calendar adapter
#[derive(Clone)]
pub struct GoogleAdapter {
    config: GoogleConfig,
    http: Client,
}

impl GoogleAdapter {
    pub fn new(config: GoogleConfig, http: Client) -> Self {
        Self { config, http }
    }

    async fn fetch_page(
        &self,
        access_token: &str,
        window: &FetchWindow,
        page_token: Option<&str>,
    ) -> Result<GoogleEventPage, FetchError> {
        let mut url = Url::parse(&format!(
            "{}/calendars/primary/events",
            self.config.api_base_url
        ))
        .map_err(|e| FetchError::Provider(format!("invalid Calendar base URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("timeMin", &window.start.to_rfc3339())
            .append_pair("timeMax", &window.end.to_rfc3339())
            .append_pair("singleEvents", "true")
            .append_pair("orderBy", "startTime")
            .append_pair("maxResults", &self.config.page_size.to_string());
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }

        let response = self
            .http
            .get(url)
            .timeout(self.config.fetch_timeout)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(fetch_send_error)?;

        if response.status().is_success() {
            response
                .json::<GoogleEventPage>()
                .await
                .map_err(|e| FetchError::Provider(format!("malformed calendar response: {}", e)))
        } else if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Calendar API rejected the access token with 401");
            Err(FetchError::Unauthorized)
        } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = retry_after_seconds(&response);
            warn!(retry_after_secs, "Calendar API fetch rate limited");
            Err(FetchError::RateLimited { retry_after_secs })
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::Provider(format!(
                "Calendar API returned {}: {}",
                status, body
            )))
        }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokenResponse, RefreshError> {
        let mut params = HashMap::new();
        params.insert("client_id", self.config.client_id.clone());
        params.insert("grant_type", "refresh_token".to_string());
        params.insert("refresh_token", refresh_token.to_string());
        if let Some(secret) = &self.config.client_secret {
            params.insert("client_secret", secret.clone());
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .timeout(self.config.refresh_timeout)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(refresh_send_error)?;

        if response.status().is_success() {
            response
                .json::<OAuthTokenResponse>()
                .await
                .map_err(|e| RefreshError::Transient(format!("malformed token response: {}", e)))
        } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = retry_after_seconds(&response);
            warn!(retry_after_secs, "Google token endpoint rate limited");
            Err(RefreshError::RateLimited { retry_after_secs })
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(classify_token_endpoint_error(status, &body))
        }
    }

    async fn fetch_events(
        &self,
        access_token: &str,
        window: FetchWindow,
    ) -> Result<Vec<CalendarEvent>, FetchError> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0;

        loop {
            if pages >= self.config.max_pages {
                debug!(pages, "stopping Calendar pagination at the page cap");
                break;
            }
            pages += 1;

            let page = self
                .fetch_page(access_token, &window, page_token.as_deref())
                .await?;
            for item in page.items {
                if item.status.as_deref() == Some("cancelled") {
                    continue;
                }
                let normalized = normalize_event(item)
                    .map_err(|e| FetchError::Provider(format!("unusable Calendar event: {}", e)))?;
                events.push(normalized);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(events)
    }

    async fn revoke(&self, token: &str) -> Result<(), RevokeError> {
        let mut params = HashMap::new();
        params.insert("token", token.to_string());

        let response = self
            .http
            .post(&self.config.revoke_url)
            .timeout(self.config.refresh_timeout)
            .form(&params)
            .send()
            .await
            .map_err(|e| RevokeError(format!("revocation request failed: {}", e)))?;

        // Google answers 400 for an already-dead token, which is the state
        // we wanted anyway
        if response.status().is_success() || response.status() == StatusCode::BAD_REQUEST {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RevokeError(format!(
                "revocation returned {}: {}",
                status, body
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleEventPage {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GoogleEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    start: Option<GoogleEventTime>,
    end: Option<GoogleEventTime>,
    location: Option<String>,
    #[serde(default)]
    attendees: Vec<GoogleAttendee>,
    organizer: Option<GoogleOrganizer>,
    #[serde(rename = "recurringEventId")]
    recurring_event_id: Option<String>,
    #[serde(default)]
    recurrence: Vec<String>,
    visibility: Option<String>,
    #[serde(rename = "colorId")]
    color_id: Option<String>,
    #[serde(rename = "hangoutLink")]
    hangout_link: Option<String>,
    #[serde(rename = "conferenceData")]
    conference_data: Option<GoogleConferenceData>,
    #[serde(default)]
    attachments: Vec<GoogleAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
struct GoogleEventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    /// All-day marker, `YYYY-MM-DD`
    date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GoogleAttendee {
    email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GoogleOrganizer {
    email: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GoogleConferenceData {
    #[serde(rename = "entryPoints", default)]
    entry_points: Vec<GoogleEntryPoint>,
}

#[derive(Debug, Clone, Deserialize)]
struct GoogleEntryPoint {
    #[serde(rename = "entryPointType")]
    entry_point_type: Option<String>,
    uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GoogleAttachment {
    #[serde(rename = "fileUrl")]
    #[allow(dead_code)]
    file_url: Option<String>,
}

/// Resolve a Calendar time object to UTC plus an all-day flag.
fn parse_google_time(
    field: &'static str,
    value: &GoogleEventTime,
) -> Result<(DateTime<Utc>, bool), NormalizeError> {
    if let Some(date_time) = &value.date_time {
        let parsed = DateTime::parse_from_rfc3339(date_time).map_err(|_| {
            NormalizeError::InvalidTimestamp {
                field,
                value: date_time.clone(),
            }
        })?;
        return Ok((parsed.with_timezone(&Utc), false));
    }
    if let Some(date) = &value.date {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
            NormalizeError::InvalidTimestamp {
                field,
                value: date.clone(),
            }
        })?;
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .ok_or(NormalizeError::InvalidTimestamp {
                field,
                value: date.clone(),
            })?;
        return Ok((midnight.and_utc(), true));
    }
    Err(NormalizeError::MissingField { field })
}

/// Map a Calendar v3 event onto the unified model.
fn normalize_event(event: GoogleEvent) -> Result<CalendarEvent, NormalizeError> {
    let start = event
        .start
        .as_ref()
        .ok_or(NormalizeError::MissingField { field: "start" })?;
    let end = event
        .end
        .as_ref()
        .ok_or(NormalizeError::MissingField { field: "end" })?;
    let (start_date, all_day) = parse_google_time("start", start)?;
    let (end_date, _) = parse_google_time("end", end)?;

    let title = event.summary.clone().unwrap_or_default();
    let description = event.description.clone().filter(|s| !s.is_empty());
    let (category, priority) = classify_event_text(&title, description.as_deref());

    let attendees: Vec<String> = event
        .attendees
        .iter()
        .filter_map(|a| a.email.clone())
        .collect();
    let organizer = event
        .organizer
        .as_ref()
        .and_then(|o| o.email.clone().or_else(|| o.display_name.clone()));
    let meeting_url = event
        .hangout_link
        .clone()
        .or_else(|| {
            event.conference_data.as_ref().and_then(|c| {
                c.entry_points
                    .iter()
                    .find(|p| p.entry_point_type.as_deref() == Some("video"))
                    .and_then(|p| p.uri.clone())
            })
        })
        .filter(|s| !s.is_empty());
    let is_recurring = event.recurring_event_id.is_some() || !event.recurrence.is_empty();
    let is_private = matches!(
        event.visibility.as_deref(),
        Some("private") | Some("confidential")
    );

    Ok(CalendarEvent {
        id: event.id,
        title,
        description,
        start_date,
        end_date,
        all_day,
        location: event.location.filter(|s| !s.is_empty()),
        attendees,
        organizer,
        category,
        priority,
        source: Provider::Google,
        is_recurring,
        color: event.color_id,
        is_private,
        has_attachments: !event.attachments.is_empty(),
        meeting_url,
    })
}
