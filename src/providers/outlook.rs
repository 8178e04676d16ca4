//! Outlook REST v2 calendar adapter
//!
//! Covers consumer and legacy tenants still on `outlook.office.com/api/v2.0`,
//! whose payloads are PascalCase rather than the Graph camelCase. Tokens come
//! from the same AAD endpoint as Graph and rotate on every refresh.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
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
    RotationPolicy, classify_token_endpoint_error, fetch_send_error, refresh_send_error,
    retry_after_seconds,
};

/// Outlook adapter configuration
#[derive(Debug, Clone)]
pub struct OutlookConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Token endpoint (overridable for tests)
    pub token_url: String,
    /// Outlook REST base (overridable for tests)
    pub api_base_url: String,
    pub refresh_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Events requested per page
    pub page_size: u32,
    /// Upper bound on followed result pages
    pub max_pages: u32,
}

impl OutlookConfig {
    pub fn new(client_id: String, client_secret: Option<String>) -> Self {
        Self {
            client_id,
            client_secret,
            token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
            api_base_url: "https://outlook.office.com/api/v2.0".to_string(),
            refresh_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(10),
            page_size: 50,
            max_pages: 10,
        }
    }
}

/// Outlook REST v2 calendar adapter
#[derive(Clone)]
pub struct OutlookAdapter {
    config: OutlookConfig,
    http: Client,
}

impl OutlookAdapter {
    pub fn new(config: OutlookConfig, http: Client) -> Self {
        Self { config, http }
    }

    async fn fetch_page(
        &self,
        access_token: &str,
        url: Url,
    ) -> Result<OutlookEventPage, FetchError> {
        let response = self
            .http
            .get(url)
            .timeout(self.config.fetch_timeout)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Prefer", "outlook.timezone=\"UTC\"")
            .send()
            .await
            .map_err(fetch_send_error)?;

        if response.status().is_success() {
            response
                .json::<OutlookEventPage>()
                .await
                .map_err(|e| FetchError::Provider(format!("malformed calendar response: {}", e)))
        } else if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Outlook rejected the access token with 401");
            Err(FetchError::Unauthorized)
        } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = retry_after_seconds(&response);
            warn!(retry_after_secs, "Outlook calendar fetch rate limited");
            Err(FetchError::RateLimited { retry_after_secs })
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::Provider(format!(
                "Outlook returned {}: {}",
                status, body
            )))
        }
    }
}

#[async_trait]
impl ProviderAdapter for OutlookAdapter {
    fn provider(&self) -> Provider {
        Provider::Outlook
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
            warn!(retry_after_secs, "Outlook token endpoint rate limited");
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
        let mut url = Url::parse(&format!("{}/me/calendarview", self.config.api_base_url))
            .map_err(|e| FetchError::Provider(format!("invalid Outlook base URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("startDateTime", &window.start.to_rfc3339())
            .append_pair("endDateTime", &window.end.to_rfc3339())
            .append_pair("$top", &self.config.page_size.to_string())
            .append_pair("$orderby", "Start/DateTime");

        let mut events = Vec::new();
        let mut next = Some(url);
        let mut pages = 0;

        while let Some(page_url) = next.take() {
            if pages >= self.config.max_pages {
                debug!(pages, "stopping Outlook pagination at the page cap");
                break;
            }
            pages += 1;

            let page = self.fetch_page(access_token, page_url).await?;
            for event in page.value {
                if event.is_cancelled {
                    continue;
                }
                let normalized = normalize_event(event)
                    .map_err(|e| FetchError::Provider(format!("unusable Outlook event: {}", e)))?;
                events.push(normalized);
            }

            next = match page.next_link.as_deref() {
                Some(link) => Some(Url::parse(link).map_err(|e| {
                    FetchError::Provider(format!("invalid @odata.nextLink: {}", e))
                })?),
                None => None,
            };
        }

        Ok(events)
    }

    fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy::AlwaysRotate
    }
}

#[derive(Debug, Deserialize)]
struct OutlookEventPage {
    #[serde(default)]
    value: Vec<OutlookEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutlookEvent {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Subject")]
    subject: Option<String>,
    #[serde(rename = "BodyPreview")]
    body_preview: Option<String>,
    #[serde(rename = "Start")]
    start: Option<OutlookDateTime>,
    #[serde(rename = "End")]
    end: Option<OutlookDateTime>,
    #[serde(rename = "IsAllDay", default)]
    is_all_day: bool,
    #[serde(rename = "IsCancelled", default)]
    is_cancelled: bool,
    #[serde(rename = "Location")]
    location: Option<OutlookLocation>,
    #[serde(rename = "Attendees", default)]
    attendees: Vec<OutlookAttendee>,
    #[serde(rename = "Organizer")]
    organizer: Option<OutlookRecipient>,
    #[serde(rename = "Type")]
    event_type: Option<String>,
    #[serde(rename = "Sensitivity")]
    sensitivity: Option<String>,
    #[serde(rename = "HasAttachments", default)]
    has_attachments: bool,
    #[serde(rename = "OnlineMeetingUrl")]
    online_meeting_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutlookDateTime {
    #[serde(rename = "DateTime")]
    date_time: String,
    // Always UTC given the Prefer header on the request
    #[serde(rename = "TimeZone")]
    #[allow(dead_code)]
    time_zone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutlookLocation {
    #[serde(rename = "DisplayName")]
    display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutlookEmailAddress {
    #[serde(rename = "Address")]
    address: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutlookRecipient {
    #[serde(rename = "EmailAddress")]
    email_address: Option<OutlookEmailAddress>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutlookAttendee {
    #[serde(rename = "EmailAddress")]
    email_address: Option<OutlookEmailAddress>,
}

fn parse_outlook_datetime(
    field: &'static str,
    value: &OutlookDateTime,
) -> Result<DateTime<Utc>, NormalizeError> {
    if let Ok(fixed) = DateTime::parse_from_rfc3339(&value.date_time) {
        return Ok(fixed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&value.date_time, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| NormalizeError::InvalidTimestamp {
            field,
            value: value.date_time.clone(),
        })
}

/// Map an Outlook REST event onto the unified model.
fn normalize_event(event: OutlookEvent) -> Result<CalendarEvent, NormalizeError> {
    let start = event
        .start
        .as_ref()
        .ok_or(NormalizeError::MissingField { field: "Start" })?;
    let end = event
        .end
        .as_ref()
        .ok_or(NormalizeError::MissingField { field: "End" })?;
    let start_date = parse_outlook_datetime("Start", start)?;
    let end_date = parse_outlook_datetime("End", end)?;

    let title = event.subject.clone().unwrap_or_default();
    let description = event.body_preview.clone().filter(|s| !s.is_empty());
    let (category, priority) = classify_event_text(&title, description.as_deref());

    let attendees: Vec<String> = event
        .attendees
        .iter()
        .filter_map(|a| a.email_address.as_ref())
        .filter_map(|e| e.address.clone())
        .collect();
    let organizer = event
        .organizer
        .as_ref()
        .and_then(|o| o.email_address.as_ref())
        .and_then(|e| e.address.clone().or_else(|| e.name.clone()));
    let meeting_url = event.online_meeting_url.clone().filter(|s| !s.is_empty());
    let is_recurring = matches!(
        event.event_type.as_deref(),
        Some("Occurrence") | Some("SeriesMaster") | Some("Exception")
    );
    let is_private = matches!(
        event.sensitivity.as_deref(),
        Some("Private") | Some("Confidential")
    );

    Ok(CalendarEvent {
        id: event.id,
        title,
        description,
        start_date,
        end_date,
        all_day: event.is_all_day,
        location: event
            .location
            .and_then(|l| l.display_name)
            .filter(|s| !s.is_empty()),
        attendees,
        organizer,
        category,
        priority,
        source: Provider::Outlook,
        is_recurring,
        color: None,
        is_private,
        has_attachments: event.has_attachments,
        meeting_url,
    })
}
