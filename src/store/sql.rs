//! SQL-backed token store
//!
//! SeaORM implementation of [`TokenStore`] over the `oauth_tokens` table.
//! Token material is encrypted before it reaches the database, and the
//! upsert runs as a single statement keyed on the `(user_id, provider)`
//! unique index so racing writers resolve last-writer-wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{CryptoKey, decrypt_token_pair, encrypt_token_pair};
use crate::models::Provider;
use crate::models::oauth_token::{self, Entity as OauthToken};
use crate::store::{OAuthTokenRecord, StoreError, TokenStatus, TokenStore, TokenUpsert};

/// Repository for OAuth token database operations
#[derive(Debug, Clone)]
pub struct SqlTokenStore {
    /// Database connection pool
    db: Arc<DatabaseConnection>,
    /// Crypto key for token encryption
    crypto_key: CryptoKey,
}

impl SqlTokenStore {
    /// Creates a new SqlTokenStore instance
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    async fn find_model(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<oauth_token::Model>, StoreError> {
        Ok(OauthToken::find()
            .filter(oauth_token::Column::UserId.eq(user_id))
            .filter(oauth_token::Column::Provider.eq(provider.as_str()))
            .one(&*self.db)
            .await?)
    }

    fn record_from_model(&self, model: oauth_token::Model) -> Result<OAuthTokenRecord, StoreError> {
        let provider = Provider::from_str(&model.provider).map_err(|e| StoreError::Corrupt {
            user_id: model.user_id,
            detail: e.to_string(),
        })?;
        let status = TokenStatus::from_str(&model.status).map_err(|e| StoreError::Corrupt {
            user_id: model.user_id,
            detail: e.to_string(),
        })?;
        let (access_token, refresh_token) = decrypt_token_pair(&self.crypto_key, &model)?;

        Ok(OAuthTokenRecord {
            user_id: model.user_id,
            provider,
            status,
            access_token,
            refresh_token,
            expires_at: model.expires_at.map(|dt| dt.with_timezone(&Utc)),
            scope: model.scope,
            token_type: model.token_type,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl TokenStore for SqlTokenStore {
    async fn get(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<OAuthTokenRecord>, StoreError> {
        match self.find_model(user_id, provider).await? {
            Some(model) => Ok(Some(self.record_from_model(model)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: TokenUpsert) -> Result<OAuthTokenRecord, StoreError> {
        let (access_ciphertext, refresh_ciphertext) = encrypt_token_pair(
            &self.crypto_key,
            record.user_id,
            record.provider,
            &record.access_token,
            record.refresh_token.as_deref(),
        )?;

        let now: DateTimeWithTimeZone = Utc::now().into();
        let active = oauth_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(record.user_id),
            provider: Set(record.provider.as_str().to_string()),
            status: Set(record.status.as_str().to_string()),
            token_type: Set(record.token_type),
            scope: Set(record.scope),
            access_token_ciphertext: Set(access_ciphertext),
            refresh_token_ciphertext: Set(refresh_ciphertext),
            expires_at: Set(record.expires_at.map(Into::into)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // Single-statement upsert; an existing row keeps its id and
        // created_at, everything else is overwritten
        OauthToken::insert(active)
            .on_conflict(
                OnConflict::columns([oauth_token::Column::UserId, oauth_token::Column::Provider])
                    .update_columns([
                        oauth_token::Column::Status,
                        oauth_token::Column::TokenType,
                        oauth_token::Column::Scope,
                        oauth_token::Column::AccessTokenCiphertext,
                        oauth_token::Column::RefreshTokenCiphertext,
                        oauth_token::Column::ExpiresAt,
                        oauth_token::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        // Read back for the row id and store-managed timestamps
        let model = self
            .find_model(record.user_id, record.provider)
            .await?
            .ok_or(StoreError::NotPersisted)?;
        self.record_from_model(model)
    }

    async fn mark_status(
        &self,
        user_id: Uuid,
        provider: Provider,
        status: TokenStatus,
    ) -> Result<bool, StoreError> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = OauthToken::update_many()
            .col_expr(oauth_token::Column::Status, Expr::value(status.as_str()))
            .col_expr(oauth_token::Column::UpdatedAt, Expr::value(now))
            .filter(oauth_token::Column::UserId.eq(user_id))
            .filter(oauth_token::Column::Provider.eq(provider.as_str()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OAuthTokenRecord>, StoreError> {
        let models = OauthToken::find()
            .filter(oauth_token::Column::UserId.eq(user_id))
            .order_by_asc(oauth_token::Column::Provider)
            .all(&*self.db)
            .await?;

        models
            .into_iter()
            .map(|model| self.record_from_model(model))
            .collect()
    }

    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<OAuthTokenRecord>, StoreError> {
        let cutoff: DateTimeWithTimeZone = before.into();
        let models = OauthToken::find()
            .filter(oauth_token::Column::ExpiresAt.is_not_null())
            .filter(oauth_token::Column::ExpiresAt.lte(cutoff))
            .order_by_asc(oauth_token::Column::ExpiresAt)
            .order_by_asc(oauth_token::Column::Id)
            .all(&*self.db)
            .await?;

        models
            .into_iter()
            .map(|model| self.record_from_model(model))
            .collect()
    }

    async fn delete(&self, user_id: Uuid, provider: Provider) -> Result<bool, StoreError> {
        let result = OauthToken::delete_many()
            .filter(oauth_token::Column::UserId.eq(user_id))
            .filter(oauth_token::Column::Provider.eq(provider.as_str()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }
}
