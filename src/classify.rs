//! Keyword-based classification of calendar event text.
//!
//! Category and priority are derived from the event title and description
//! alone, so identical text always classifies the same way regardless of
//! which provider produced the event.

use crate::models::{EventCategory, EventPriority};

/// Ordered category rules. The first rule with a matching keyword wins.
const CATEGORY_RULES: &[(EventCategory, &[&str])] = &[
    (
        EventCategory::Meeting,
        &[
            "meeting",
            "call",
            "zoom",
            "teams",
            "standup",
            "sync",
            "1:1",
            "interview",
            "huddle",
        ],
    ),
    (
        EventCategory::Task,
        &["task", "todo", "deadline", "due", "submit", "review"],
    ),
    (
        EventCategory::Reminder,
        &["reminder", "remember", "renewal", "follow up", "follow-up"],
    ),
    (
        EventCategory::Personal,
        &[
            "birthday",
            "anniversary",
            "doctor",
            "dentist",
            "vacation",
            "holiday",
            "lunch",
            "dinner",
            "gym",
            "family",
        ],
    ),
];

/// Ordered priority rules. The first rule with a matching keyword wins.
const PRIORITY_RULES: &[(EventPriority, &[&str])] = &[
    (
        EventPriority::High,
        &["urgent", "asap", "critical", "emergency", "blocker"],
    ),
    (
        EventPriority::Medium,
        &["important", "priority", "soon", "prepare"],
    ),
];

/// Derive `(category, priority)` from event text.
///
/// Matching is a case-insensitive substring check against fixed keyword
/// tables; rules are evaluated in declaration order and the first matching
/// rule wins. Text without any matching keyword classifies as work / low.
pub fn classify_event_text(
    title: &str,
    description: Option<&str>,
) -> (EventCategory, EventPriority) {
    let haystack = match description {
        Some(description) => format!("{title} {description}").to_lowercase(),
        None => title.to_lowercase(),
    };

    (classify_category(&haystack), classify_priority(&haystack))
}

fn classify_category(haystack: &str) -> EventCategory {
    for (category, keywords) in CATEGORY_RULES {
        if keywords.iter().any(|keyword| haystack.contains(keyword)) {
            return *category;
        }
    }
    EventCategory::Work
}

fn classify_priority(haystack: &str) -> EventPriority {
    for (priority, keywords) in PRIORITY_RULES {
        if keywords.iter().any(|keyword| haystack.contains(keyword)) {
            return *priority;
        }
    }
    EventPriority::Low
}
