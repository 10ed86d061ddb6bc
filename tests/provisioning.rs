//! Postgres-backed provisioning and isolation tests.
//!
//! These need a reachable database; run them with
//! `DATABASE_URL=postgres://... cargo test -- --ignored`.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use practice_api::crypto::{MasterKey, MasterKeyCodec, TenantKeyService};
use practice_api::tenant::{
    schema_name_for, ProvisionService, SchemaManager, TenantError, TenantSession,
};

struct Harness {
    pool: PgPool,
    keys: Arc<TenantKeyService>,
    provisioner: ProvisionService,
}

async fn harness() -> Result<Harness> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await?;

    practice_api::db::ensure_registry_tables(&pool).await?;

    let codec = MasterKeyCodec::new(MasterKey::from_bytes(&[42u8; 32])?);
    let keys = Arc::new(TenantKeyService::new(pool.clone(), codec));
    let provisioner = ProvisionService::new(pool.clone(), keys.clone());

    Ok(Harness {
        pool,
        keys,
        provisioner,
    })
}

async fn schema_exists(pool: &PgPool, name: &str) -> Result<bool> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM information_schema.schemata WHERE schema_name = $1",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(row.get::<i64, _>("n") > 0)
}

async fn table_exists(pool: &PgPool, schema: &str, table: &str) -> Result<bool> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
    )
    .bind(schema)
    .bind(table)
    .fetch_one(pool)
    .await?;
    Ok(row.get::<i64, _>("n") > 0)
}

async fn key_row_count(pool: &PgPool, tenant_id: Uuid) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM tenant_encryption_keys WHERE tenant_id = $1")
        .bind(tenant_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

async fn live_key_count_for_org(pool: &PgPool, org: Uuid) -> Result<i64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM tenant_encryption_keys WHERE organization_id = $1 AND deleted_at IS NULL",
    )
    .bind(org)
    .fetch_one(pool)
    .await?;
    Ok(row.get("n"))
}

// A CHECK constraint rejecting one organization id makes the tenant insert
// fail with a real, non-unique-violation database error.
async fn block_org_inserts(pool: &PgPool, org: Uuid) -> Result<String> {
    let constraint = format!("tenants_reject_{}", org.simple());
    let sql = format!(
        "ALTER TABLE tenants ADD CONSTRAINT {} CHECK (organization_id <> '{}') NOT VALID",
        constraint, org
    );
    sqlx::query(&sql).execute(pool).await?;
    Ok(constraint)
}

async fn unblock_org_inserts(pool: &PgPool, constraint: &str) -> Result<()> {
    let sql = format!("ALTER TABLE tenants DROP CONSTRAINT {}", constraint);
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

async fn teardown(h: &Harness, org: Uuid) -> Result<()> {
    let schema = schema_name_for(org);
    sqlx::query("DELETE FROM tenant_encryption_keys WHERE organization_id = $1")
        .bind(org)
        .execute(&h.pool)
        .await?;
    sqlx::query("DELETE FROM tenants WHERE organization_id = $1")
        .bind(org)
        .execute(&h.pool)
        .await?;
    SchemaManager::new(h.pool.clone()).drop_schema(&schema).await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn first_request_provisions_row_schema_tables_and_key() -> Result<()> {
    let h = harness().await?;
    let org = Uuid::new_v4();

    let tenant = h.provisioner.create_tenant_for_organization(org).await?;
    assert_eq!(tenant.organization_id, org);
    assert_eq!(tenant.schema_name, schema_name_for(org));
    assert_eq!(tenant.status, "active");

    assert!(schema_exists(&h.pool, &tenant.schema_name).await?);
    for table in SchemaManager::required_tables() {
        assert!(
            table_exists(&h.pool, &tenant.schema_name, table).await?,
            "missing table {} in {}",
            table,
            tenant.schema_name
        );
    }
    assert_eq!(key_row_count(&h.pool, tenant.id).await?, 1);

    teardown(&h, org).await
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn create_tenant_is_idempotent() -> Result<()> {
    let h = harness().await?;
    let org = Uuid::new_v4();

    let first = h.provisioner.create_tenant_for_organization(org).await?;
    let second = h.provisioner.create_tenant_for_organization(org).await?;
    assert_eq!(first.id, second.id);

    let row = sqlx::query("SELECT COUNT(*) AS n FROM tenants WHERE organization_id = $1")
        .bind(org)
        .fetch_one(&h.pool)
        .await?;
    assert_eq!(row.get::<i64, _>("n"), 1);

    teardown(&h, org).await
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn concurrent_first_requests_yield_one_tenant() -> Result<()> {
    let h = harness().await?;
    let org = Uuid::new_v4();

    let (a, b) = tokio::join!(
        h.provisioner.create_tenant_for_organization(org),
        h.provisioner.create_tenant_for_organization(org),
    );
    let (a, b) = (a?, b?);
    assert_eq!(a.id, b.id);

    let row = sqlx::query("SELECT COUNT(*) AS n FROM tenants WHERE organization_id = $1")
        .bind(org)
        .fetch_one(&h.pool)
        .await?;
    assert_eq!(row.get::<i64, _>("n"), 1);
    assert_eq!(key_row_count(&h.pool, a.id).await?, 1);

    teardown(&h, org).await
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn failed_insert_drops_schema_it_created_and_retry_succeeds() -> Result<()> {
    let h = harness().await?;
    let org = Uuid::new_v4();
    let schema = schema_name_for(org);

    let constraint = block_org_inserts(&h.pool, org).await?;

    let result = h.provisioner.create_tenant_for_organization(org).await;
    assert!(result.is_err());
    assert!(
        !schema_exists(&h.pool, &schema).await?,
        "orphaned schema was not compensated"
    );

    // Clear the simulated failure; the retry must now provision cleanly.
    unblock_org_inserts(&h.pool, &constraint).await?;

    let tenant = h.provisioner.create_tenant_for_organization(org).await?;
    assert!(schema_exists(&h.pool, &tenant.schema_name).await?);

    teardown(&h, org).await
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn failed_reprovision_keeps_retained_schema_and_its_data() -> Result<()> {
    let h = harness().await?;
    let org = Uuid::new_v4();
    let tenant = h.provisioner.create_tenant_for_organization(org).await?;

    let mut session = TenantSession::begin(&h.pool, &tenant.schema_name).await?;
    sqlx::query("INSERT INTO patients (first_name, last_name) VALUES ('Grace', 'Gray')")
        .execute(session.connection())
        .await?;
    session.commit().await?;

    // Soft deletion retains the schema and its data.
    h.provisioner.registry().soft_delete(org).await?;
    assert!(schema_exists(&h.pool, &tenant.schema_name).await?);

    // A re-provisioning attempt that fails at the row insert must not take
    // the retained schema down with it.
    let constraint = block_org_inserts(&h.pool, org).await?;
    let result = h.provisioner.create_tenant_for_organization(org).await;
    assert!(result.is_err());
    assert!(
        schema_exists(&h.pool, &tenant.schema_name).await?,
        "retained schema was dropped by compensation"
    );

    let mut session = TenantSession::begin(&h.pool, &tenant.schema_name).await?;
    let rows = sqlx::query("SELECT first_name FROM patients")
        .fetch_all(session.connection())
        .await?;
    session.commit().await?;
    assert_eq!(rows.len(), 1, "retained data was lost");

    unblock_org_inserts(&h.pool, &constraint).await?;
    let replacement = h.provisioner.create_tenant_for_organization(org).await?;
    assert_ne!(replacement.id, tenant.id);

    teardown(&h, org).await
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn reprovisioned_organization_gets_a_working_key() -> Result<()> {
    let h = harness().await?;
    let org = Uuid::new_v4();

    let first = h.provisioner.create_tenant_for_organization(org).await?;
    assert_eq!(key_row_count(&h.pool, first.id).await?, 1);

    h.provisioner.registry().soft_delete(org).await?;

    let second = h.provisioner.create_tenant_for_organization(org).await?;
    assert_ne!(second.id, first.id);

    // Exactly one live key for the organization, bound to the new tenant.
    assert_eq!(key_row_count(&h.pool, second.id).await?, 1);
    assert_eq!(live_key_count_for_org(&h.pool, org).await?, 1);

    let sealed = h.keys.encrypt_field(second.id, "new lease on life").await?;
    assert_eq!(
        h.keys.decrypt_field(second.id, &sealed).await?,
        "new lease on life"
    );

    teardown(&h, org).await
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn suspended_tenant_does_not_resolve() -> Result<()> {
    let h = harness().await?;
    let org = Uuid::new_v4();
    let tenant = h.provisioner.create_tenant_for_organization(org).await?;

    let context = h.provisioner.resolve_tenant_context(org).await?;
    assert_eq!(context.tenant_id, tenant.id);
    assert_eq!(context.schema_name, tenant.schema_name);

    sqlx::query("UPDATE tenants SET status = 'suspended' WHERE organization_id = $1")
        .bind(org)
        .execute(&h.pool)
        .await?;

    let result = h.provisioner.resolve_tenant_context(org).await;
    assert!(matches!(result, Err(TenantError::Inactive(id)) if id == org));

    teardown(&h, org).await
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn ensure_key_twice_persists_one_row() -> Result<()> {
    let h = harness().await?;
    let org = Uuid::new_v4();
    let tenant = h.provisioner.create_tenant_for_organization(org).await?;

    h.keys.ensure_tenant_has_key(tenant.id, org).await?;
    h.keys.ensure_tenant_has_key(tenant.id, org).await?;
    assert_eq!(key_row_count(&h.pool, tenant.id).await?, 1);

    teardown(&h, org).await
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn field_encryption_roundtrips_through_key_hierarchy() -> Result<()> {
    let h = harness().await?;
    let org = Uuid::new_v4();
    let tenant = h.provisioner.create_tenant_for_organization(org).await?;

    let sealed = h
        .keys
        .encrypt_field(tenant.id, "allergic to penicillin")
        .await?;
    assert_ne!(sealed, "allergic to penicillin");
    let plain = h.keys.decrypt_field(tenant.id, &sealed).await?;
    assert_eq!(plain, "allergic to penicillin");

    // Another tenant's key must not decrypt it.
    let other_org = Uuid::new_v4();
    let other = h.provisioner.create_tenant_for_organization(other_org).await?;
    assert!(h.keys.decrypt_field(other.id, &sealed).await.is_err());

    teardown(&h, org).await?;
    teardown(&h, other_org).await
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn bound_sessions_never_observe_other_tenants_rows() -> Result<()> {
    let h = harness().await?;
    let org_a = Uuid::new_v4();
    let org_b = Uuid::new_v4();
    let tenant_a = h.provisioner.create_tenant_for_organization(org_a).await?;
    let tenant_b = h.provisioner.create_tenant_for_organization(org_b).await?;

    let mut session = TenantSession::begin(&h.pool, &tenant_a.schema_name).await?;
    sqlx::query("INSERT INTO patients (first_name, last_name) VALUES ('Ada', 'Alpha')")
        .execute(session.connection())
        .await?;
    session.commit().await?;

    let mut session = TenantSession::begin(&h.pool, &tenant_b.schema_name).await?;
    let rows = sqlx::query("SELECT first_name FROM patients")
        .fetch_all(session.connection())
        .await?;
    session.commit().await?;
    assert!(rows.is_empty(), "tenant B observed tenant A's rows");

    teardown(&h, org_a).await?;
    teardown(&h, org_b).await
}

#[tokio::test]
#[ignore = "requires a local Postgres via DATABASE_URL"]
async fn isolation_holds_under_concurrent_interleaved_sessions() -> Result<()> {
    let h = Arc::new(harness().await?);
    let orgs: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    let mut tenants = Vec::new();
    for org in &orgs {
        tenants.push(h.provisioner.create_tenant_for_organization(*org).await?);
    }

    // Hammer the shared pool: every task repeatedly writes its own marker
    // into its tenant and reads back, interleaving with the other tenants so
    // connections are constantly reused across schemas.
    let mut handles = Vec::new();
    for tenant in tenants.clone() {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            let marker = tenant.schema_name.clone();
            for _ in 0..25 {
                let mut session = TenantSession::begin(&h.pool, &tenant.schema_name)
                    .await
                    .expect("bind session");
                sqlx::query("INSERT INTO patients (first_name, last_name) VALUES ($1, 'X')")
                    .bind(&marker)
                    .execute(session.connection())
                    .await
                    .expect("insert");
                let rows = sqlx::query("SELECT DISTINCT first_name FROM patients")
                    .fetch_all(session.connection())
                    .await
                    .expect("select");
                session.commit().await.expect("commit");

                for row in rows {
                    let seen: String = row.get("first_name");
                    assert_eq!(seen, marker, "cross-tenant row leaked into {}", marker);
                }
            }
        }));
    }
    for handle in handles {
        handle.await?;
    }

    for org in &orgs {
        teardown(&h, *org).await?;
    }
    Ok(())
}
