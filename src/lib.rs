//! # Calsync API Library
//!
//! OAuth token lifecycle management and multi-provider calendar
//! aggregation: encrypted token storage, coalesced refresh, provider
//! adapters, and the HTTP surface that exposes them.

pub mod aggregator;
pub mod auth;
pub mod classify;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod maintenance;
pub mod models;
pub mod providers;
pub mod server;
pub mod state_token;
pub mod store;
pub mod telemetry;
pub use migration;
