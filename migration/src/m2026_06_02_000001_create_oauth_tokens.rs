//! Migration to create the oauth_tokens table.
//!
//! One row per (user_id, provider) credential grant, with encrypted token
//! material and expiry bookkeeping for the lifecycle manager.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OauthTokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OauthTokens::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OauthTokens::UserId).uuid().not_null())
                    .col(ColumnDef::new(OauthTokens::Provider).text().not_null())
                    .col(
                        ColumnDef::new(OauthTokens::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::TokenType)
                            .text()
                            .not_null()
                            .default("Bearer"),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::Scope)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OauthTokens::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // One credential grant per (user, provider); upserts key on this index
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_tokens_user_provider")
                    .table(OauthTokens::Table)
                    .col(OauthTokens::UserId)
                    .col(OauthTokens::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Connected-provider discovery scans by user
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_tokens_user_id")
                    .table(OauthTokens::Table)
                    .col(OauthTokens::UserId)
                    .to_owned(),
            )
            .await?;

        // Retention cleanup scans by expiry
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_tokens_expires_at")
                    .table(OauthTokens::Table)
                    .col(OauthTokens::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_oauth_tokens_expires_at").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_oauth_tokens_user_id").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth_tokens_user_provider")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(OauthTokens::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum OauthTokens {
    Table,
    Id,
    UserId,
    Provider,
    Status,
    TokenType,
    Scope,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}
