//! Canonical registry of supported OAuth providers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Providers a credential grant can belong to.
///
/// Variants are declared in alphabetical slug order so the derived `Ord`
/// gives the deterministic provider iteration the aggregator relies on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Hubspot,
    Microsoft,
    Outlook,
    Paypal,
    Stripe,
}

impl Provider {
    /// Return the canonical slug for this provider.
    pub const fn as_str(self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Hubspot => "hubspot",
            Provider::Microsoft => "microsoft",
            Provider::Outlook => "outlook",
            Provider::Paypal => "paypal",
            Provider::Stripe => "stripe",
        }
    }

    /// Whether this provider can act as a calendar event source.
    pub const fn is_calendar_source(self) -> bool {
        matches!(
            self,
            Provider::Google | Provider::Microsoft | Provider::Outlook
        )
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete registry of canonical providers.
pub const ALL_PROVIDERS: &[Provider] = &[
    Provider::Google,
    Provider::Hubspot,
    Provider::Microsoft,
    Provider::Outlook,
    Provider::Paypal,
    Provider::Stripe,
];

/// Error returned when a provider slug does not match the canonical set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown provider '{slug}'")]
pub struct UnknownProvider {
    pub slug: String,
}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PROVIDERS
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownProvider {
                slug: s.to_string(),
            })
    }
}
