//! Tenant registry over `public.tenants`: the single source of truth for
//! whether a tenant exists and where its data lives.

use sqlx::PgPool;
use uuid::Uuid;

use super::model::{Tenant, TenantStatus};
use super::TenantError;

pub struct TenantRegistry {
    pool: PgPool,
}

impl TenantRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up the tenant for an organization, excluding soft-deleted rows.
    pub async fn find_by_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<Tenant>, TenantError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, organization_id, schema_name, status, created_at, updated_at, deleted_at
            FROM tenants
            WHERE organization_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    pub async fn find_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, TenantError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, organization_id, schema_name, status, created_at, updated_at, deleted_at
            FROM tenants
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    /// Insert the tenant row. The unique constraint on `organization_id`
    /// ensures exactly one creator wins under concurrent provisioning; the
    /// loser surfaces the violation and retries as a lookup.
    pub async fn insert(
        &self,
        organization_id: Uuid,
        schema_name: &str,
    ) -> Result<Tenant, TenantError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (organization_id, schema_name, status)
            VALUES ($1, $2, $3)
            RETURNING id, organization_id, schema_name, status, created_at, updated_at, deleted_at
            "#,
        )
        .bind(organization_id)
        .bind(schema_name)
        .bind(TenantStatus::Active.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_provisioning_conflict(&e) {
                TenantError::AlreadyExists(organization_id)
            } else {
                TenantError::Database(e)
            }
        })?;

        Ok(tenant)
    }

    /// Soft-delete a tenant. The schema itself is untouched; dropping it is
    /// a separate, explicit operation.
    pub async fn soft_delete(&self, organization_id: Uuid) -> Result<(), TenantError> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET status = $2, deleted_at = now(), updated_at = now()
            WHERE organization_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(organization_id)
        .bind(TenantStatus::Deleted.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TenantError::NotFound(organization_id));
        }

        // Retire the key along with the tenant. A later re-provisioning of
        // this organization gets a fresh tenant id and mints a fresh key;
        // the retired row stays for manual recovery of retained ciphertext.
        sqlx::query(
            r#"
            UPDATE tenant_encryption_keys
            SET deleted_at = now(), updated_at = now()
            WHERE organization_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(organization_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Tenant>, TenantError> {
        let tenants = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, organization_id, schema_name, status, created_at, updated_at, deleted_at
            FROM tenants
            WHERE deleted_at IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tenants)
    }
}

/// Unique violation (SQLSTATE 23505) on either provisioning constraint: the
/// concurrent-creator race. Schema names derive injectively from the
/// organization id, so a schema_name collision also means this organization
/// already has a live tenant. Other violations stay generic database errors
/// so provisioning can compensate.
fn is_provisioning_conflict(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db)
            if db.code().as_deref() == Some("23505")
                && matches!(
                    db.constraint(),
                    Some("tenants_organization_id_key") | Some("tenants_schema_name_key")
                )
    )
}
