//! Unified calendar event model.
//!
//! Every provider adapter normalizes its native wire format into this
//! representation; events are never persisted, each aggregation call
//! re-fetches live data.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::provider::Provider;

/// Derived event category; never provider-native.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Meeting,
    Task,
    Reminder,
    Personal,
    Work,
}

impl EventCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventCategory::Meeting => "meeting",
            EventCategory::Task => "task",
            EventCategory::Reminder => "reminder",
            EventCategory::Personal => "personal",
            EventCategory::Work => "work",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const ALL_EVENT_CATEGORIES: &[EventCategory] = &[
    EventCategory::Meeting,
    EventCategory::Task,
    EventCategory::Reminder,
    EventCategory::Personal,
    EventCategory::Work,
];

impl FromStr for EventCategory {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_EVENT_CATEGORIES
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownEnumValue {
                field: "category",
                value: s.to_string(),
            })
    }
}

/// Derived event priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    High,
    Medium,
    Low,
}

impl EventPriority {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventPriority::High => "high",
            EventPriority::Medium => "medium",
            EventPriority::Low => "low",
        }
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const ALL_EVENT_PRIORITIES: &[EventPriority] = &[
    EventPriority::High,
    EventPriority::Medium,
    EventPriority::Low,
];

impl FromStr for EventPriority {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_EVENT_PRIORITIES
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownEnumValue {
                field: "priority",
                value: s.to_string(),
            })
    }
}

/// Error for enum fields parsed from query strings or stored text.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown {field} '{value}'")]
pub struct UnknownEnumValue {
    pub field: &'static str,
    pub value: String,
}

/// Normalized calendar event, independent of its source provider.
///
/// `id` is provider-scoped; callers must pair it with `source` for
/// identity across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub all_day: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    pub category: EventCategory,
    pub priority: EventPriority,
    /// Always one of the calendar-capable providers.
    pub source: Provider,
    pub is_recurring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub is_private: bool,
    pub has_attachments: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,
}
