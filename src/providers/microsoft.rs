//! Microsoft Graph calendar adapter
//!
//! Refreshes tokens against the Microsoft identity platform v2 endpoint and
//! reads events through `/me/calendarView`, following `@odata.nextLink`
//! pagination. Microsoft rotates refresh tokens on every use.

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

/// Microsoft adapter configuration
#[derive(Debug, Clone)]
pub struct MicrosoftConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Token endpoint (overridable for tests)
    pub token_url: String,
    /// Graph API base (overridable for tests)
    pub api_base_url: String,
    pub refresh_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Events requested per page
    pub page_size: u32,
    /// Upper bound on followed result pages
    pub max_pages: u32,
}

impl MicrosoftConfig {
    pub fn new(client_id: String, client_secret: Option<String>) -> Self {
        Self {
            client_id,
            client_secret,
            token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
            api_base_url: "https://graph.microsoft.com/v1.0".to_string(),
            refresh_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(10),
            page_size: 50,
            max_pages: 10,
        }
    }
}

/// Microsoft Graph calendar adapter
#[derive(Clone)]
pub struct MicrosoftAdapter {
    config: MicrosoftConfig,
    http: Client,
}

impl MicrosoftAdapter {
    pub fn new(config: MicrosoftConfig, http: Client) -> Self {
        Self { config, http }
    }

    async fn fetch_page(&self, access_token: &str, url: Url) -> Result<GraphEventPage, FetchError> {
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
                .json::<GraphEventPage>()
                .await
                .map_err(|e| FetchError::Provider(format!("malformed calendar response: {}", e)))
        } else if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Graph rejected the access token with 401");
            Err(FetchError::Unauthorized)
        } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = retry_after_seconds(&response);
            warn!(retry_after_secs, "Graph calendar fetch rate limited");
            Err(FetchError::RateLimited { retry_after_secs })
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::Provider(format!(
                "Graph returned {}: {}",
                status, body
            )))
        }
    }
}

#[async_trait]
impl ProviderAdapter for MicrosoftAdapter {
    fn provider(&self) -> Provider {
        Provider::Microsoft
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
            warn!(retry_after_secs, "Microsoft token endpoint rate limited");
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
        let mut url = Url::parse(&format!("{}/me/calendarView", self.config.api_base_url))
            .map_err(|e| FetchError::Provider(format!("invalid Graph base URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("startDateTime", &window.start.to_rfc3339())
            .append_pair("endDateTime", &window.end.to_rfc3339())
            .append_pair("$top", &self.config.page_size.to_string())
            .append_pair("$orderby", "start/dateTime");

        let mut events = Vec::new();
        let mut next = Some(url);
        let mut pages = 0;

        while let Some(page_url) = next.take() {
            if pages >= self.config.max_pages {
                debug!(pages, "stopping Graph pagination at the page cap");
                break;
            }
            pages += 1;

            let page = self.fetch_page(access_token, page_url).await?;
            for event in page.value {
                if event.is_cancelled {
                    continue;
                }
                let normalized = normalize_event(event)
                    .map_err(|e| FetchError::Provider(format!("unusable Graph event: {}", e)))?;
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
struct GraphEventPage {
    #[serde(default)]
    value: Vec<GraphEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphEvent {
    id: String,
    subject: Option<String>,
    #[serde(rename = "bodyPreview")]
    body_preview: Option<String>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    #[serde(rename = "isAllDay", default)]
    is_all_day: bool,
    #[serde(rename = "isCancelled", default)]
    is_cancelled: bool,
    location: Option<GraphLocation>,
    #[serde(default)]
    attendees: Vec<GraphAttendee>,
    organizer: Option<GraphRecipient>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    sensitivity: Option<String>,
    #[serde(rename = "hasAttachments", default)]
    has_attachments: bool,
    #[serde(rename = "onlineMeeting")]
    online_meeting: Option<GraphOnlineMeeting>,
    #[serde(rename = "onlineMeetingUrl")]
    online_meeting_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphDateTime {
    #[serde(rename = "dateTime")]
    date_time: String,
    // Always UTC given the Prefer header on the request
    #[serde(rename = "timeZone")]
    #[allow(dead_code)]
    time_zone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphLocation {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphAttendee {
    #[serde(rename = "emailAddress")]
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphOnlineMeeting {
    #[serde(rename = "joinUrl")]
    join_url: Option<String>,
}

fn parse_graph_datetime(
    field: &'static str,
    value: &GraphDateTime,
) -> Result<DateTime<Utc>, NormalizeError> {
    // Graph omits the offset when a Prefer timezone is set, but some
    // deployments return full RFC3339
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

/// Map a Graph event onto the unified model.
///
/// Pure: identical input always yields an identical event, including the
/// derived category and priority.
fn normalize_event(event: GraphEvent) -> Result<CalendarEvent, NormalizeError> {
    let start = event
        .start
        .as_ref()
        .ok_or(NormalizeError::MissingField { field: "start" })?;
    let end = event
        .end
        .as_ref()
        .ok_or(NormalizeError::MissingField { field: "end" })?;
    let start_date = parse_graph_datetime("start", start)?;
    let end_date = parse_graph_datetime("end", end)?;

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
    let meeting_url = event
        .online_meeting
        .as_ref()
        .and_then(|m| m.join_url.clone())
        .or_else(|| event.online_meeting_url.clone())
        .filter(|s| !s.is_empty());
    let is_recurring = matches!(
        event.event_type.as_deref(),
        Some("occurrence") | Some("seriesMaster")
    );
    let is_private = matches!(
        event.sensitivity.as_deref(),
        Some("private") | Some("confidential")
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
        source: Provider::Microsoft,
        is_recurring,
        color: None,
        is_private,
        has_attachments: event.has_attachments,
        meeting_url,
    })
}
