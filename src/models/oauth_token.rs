//! OAuth token entity model
//!
//! This module contains the SeaORM entity model for the oauth_tokens table,
//! which stores one credential grant per (user, provider) pair.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// OAuth token entity representing a user's credential grant for a provider
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_tokens")]
pub struct Model {
    /// Unique identifier for the row (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// User the grant belongs to
    pub user_id: Uuid,

    /// Canonical provider slug (unique per user together with user_id)
    pub provider: String,

    /// Last known lifecycle state (active|expired|revoked)
    pub status: String,

    /// Token type as issued by the provider (normally "Bearer")
    pub token_type: String,

    /// Space-delimited granted scopes
    pub scope: String,

    /// Encrypted access token
    pub access_token_ciphertext: Vec<u8>,

    /// Encrypted refresh token; absent for grant types that issue none
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Absolute expiry instant; absent means non-expiring until a 401 is seen
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the grant was first stored
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp of the last mutation
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
