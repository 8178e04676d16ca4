//! # Data Models
//!
//! This module contains the data models used throughout the Calsync API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod event;
pub mod oauth_token;
pub mod provider;

pub use event::{CalendarEvent, EventCategory, EventPriority};
pub use oauth_token::Entity as OauthToken;
pub use provider::{ALL_PROVIDERS, Provider, UnknownProvider};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "calsync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
