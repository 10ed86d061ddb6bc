//! Tenant provisioning: idempotent creation with compensation, plus the
//! self-healing resolution path used on every request.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::crypto::TenantKeyService;

use super::model::Tenant;
use super::registry::TenantRegistry;
use super::schema::{schema_name_for, SchemaManager};
use super::TenantError;

pub struct ProvisionService {
    registry: TenantRegistry,
    schemas: SchemaManager,
    keys: Arc<TenantKeyService>,
}

impl ProvisionService {
    pub fn new(pool: PgPool, keys: Arc<TenantKeyService>) -> Self {
        Self {
            registry: TenantRegistry::new(pool.clone()),
            schemas: SchemaManager::new(pool),
            keys,
        }
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    pub fn schemas(&self) -> &SchemaManager {
        &self.schemas
    }

    /// Create the tenant for an organization.
    ///
    /// Idempotent: an existing tenant is returned unchanged. Otherwise the
    /// schema is created first, then the registry row; a row-insert failure
    /// drops the schema again before surfacing the error, but only when this
    /// call created it. Migration and key generation run after the row exists and are
    /// not rolled back on failure: the tenant is then degraded but
    /// repairable, and [`Self::get_or_create`] completes it on a later call.
    pub async fn create_tenant_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Tenant, TenantError> {
        if let Some(existing) = self.registry.find_by_organization(organization_id).await? {
            return Ok(existing);
        }

        let schema_name = schema_name_for(organization_id);

        // A schema may survive its tenant row: soft deletion keeps the data
        // in place for retention. Compensation must never cascade over one
        // of those, so record whether this call is the one creating it.
        let schema_existed = self.schemas.schema_exists(&schema_name).await?;

        // (a) Create the schema. IF NOT EXISTS keeps retries after partial
        // failures safe.
        self.schemas.create_schema(&schema_name).await?;

        // (b) Insert the registry row, compensating on failure.
        let tenant = match self.registry.insert(organization_id, &schema_name).await {
            Ok(tenant) => tenant,
            Err(TenantError::AlreadyExists(_)) => {
                // Lost the race to a concurrent creator; its row is the
                // truth. The schema is shared by name, so nothing to drop.
                return self
                    .registry
                    .find_by_organization(organization_id)
                    .await?
                    .ok_or(TenantError::NotFound(organization_id));
            }
            Err(e) => {
                error!(
                    "Tenant insert failed for org {}: {}",
                    organization_id, e
                );
                if !schema_existed {
                    if let Err(drop_err) = self.schemas.drop_schema(&schema_name).await {
                        warn!("Compensating schema drop failed: {}", drop_err);
                    }
                }
                return Err(e);
            }
        };

        // (c) Populate the table set.
        self.schemas.migrate_schema(&schema_name).await?;

        // (d) Generate and store the tenant's encryption key. A failure here
        // leaves the tenant usable for unencrypted operations and is
        // backfilled on the next resolution.
        if let Err(e) = self
            .keys
            .ensure_tenant_has_key(tenant.id, organization_id)
            .await
        {
            warn!(
                "Key generation failed for tenant {} (will retry on next resolution): {}",
                tenant.id, e
            );
        }

        info!(
            "Provisioned tenant {} for organization {} in schema {}",
            tenant.id, organization_id, schema_name
        );
        Ok(tenant)
    }

    /// Resolve the tenant for an organization, creating it on first use.
    ///
    /// On a registry hit this also reconciles degraded state from earlier
    /// partial failures: the additive migration and the key backfill both
    /// re-run as best-effort, so an interrupted provisioning attempt heals
    /// here instead of blocking the request.
    pub async fn get_or_create(&self, organization_id: Uuid) -> Result<Tenant, TenantError> {
        let tenant = match self.registry.find_by_organization(organization_id).await? {
            Some(tenant) => tenant,
            None => {
                return self
                    .create_tenant_for_organization(organization_id)
                    .await
            }
        };

        if let Err(e) = self.schemas.migrate_schema(&tenant.schema_name).await {
            warn!(
                "Schema reconciliation failed for tenant {}: {}",
                tenant.id, e
            );
        }
        if let Err(e) = self
            .keys
            .ensure_tenant_has_key(tenant.id, organization_id)
            .await
        {
            warn!("Key backfill failed for tenant {}: {}", tenant.id, e);
        }

        Ok(tenant)
    }

    /// Collaborator surface for business services: the schema and tenant id
    /// for an organization, provisioning on first use. Suspended tenants
    /// resolve to an error; no query may run against their schema.
    pub async fn resolve_tenant_context(
        &self,
        organization_id: Uuid,
    ) -> Result<super::TenantContext, TenantError> {
        let tenant = self.get_or_create(organization_id).await?;
        if !tenant.is_active() {
            return Err(TenantError::Inactive(organization_id));
        }
        Ok(super::TenantContext {
            tenant_id: tenant.id,
            organization_id: tenant.organization_id,
            schema_name: tenant.schema_name,
        })
    }

    /// Backfill encryption keys for every active tenant. Best-effort: each
    /// failure is logged and counted, never fatal.
    pub async fn backfill_keys(&self) -> Result<KeyBackfillReport, TenantError> {
        let tenants = self.registry.list().await?;
        let mut report = KeyBackfillReport::default();

        for tenant in tenants {
            match self
                .keys
                .ensure_tenant_has_key(tenant.id, tenant.organization_id)
                .await
            {
                Ok(()) => report.ensured += 1,
                Err(e) => {
                    warn!("Key backfill failed for tenant {}: {}", tenant.id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct KeyBackfillReport {
    pub ensured: usize,
    pub failed: usize,
}
