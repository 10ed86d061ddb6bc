//! Shared connection pool and registry-table bootstrap.
//!
//! All tenants live in one database; isolation happens at the schema level.
//! The registry tables themselves live in the public schema.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Connect to the database named by `DATABASE_URL`.
pub async fn connect() -> Result<PgPool, DatabaseError> {
    let url = std::env::var("DATABASE_URL")
        .map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))?;

    let cfg = &config::config().database;
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.connection_timeout))
        .connect(&url)
        .await?;

    info!("Connected database pool (max {})", cfg.max_connections);
    Ok(pool)
}

/// Create the registry tables if absent. Additive and safe to re-run at
/// every startup.
///
/// The unique constraint on `tenants.organization_id` is what lets exactly
/// one concurrent provisioner win; `tenant_encryption_keys.tenant_id` unique
/// enforces one active key per tenant.
pub async fn ensure_registry_tables(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            organization_id UUID NOT NULL,
            schema_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Uniqueness applies to live rows only, so a soft-deleted tenant does
    // not block re-provisioning its organization.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS tenants_organization_id_key
        ON tenants (organization_id) WHERE deleted_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS tenants_schema_name_key
        ON tenants (schema_name) WHERE deleted_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenant_encryption_keys (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            tenant_id UUID NOT NULL,
            organization_id UUID NOT NULL,
            encrypted_key TEXT NOT NULL,
            key_version INT NOT NULL DEFAULT 1,
            algorithm TEXT NOT NULL DEFAULT 'AES-256-GCM',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Key uniqueness follows the tenant lifecycle: a retired key row must
    // not block the replacement tenant of a re-provisioned organization
    // from acquiring its own key.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS tenant_encryption_keys_tenant_id_key
        ON tenant_encryption_keys (tenant_id) WHERE deleted_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS tenant_encryption_keys_organization_id_key
        ON tenant_encryption_keys (organization_id) WHERE deleted_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Ping the pool to confirm connectivity.
pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
