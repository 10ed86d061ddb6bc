//! Per-tenant schema lifecycle: name derivation, validated DDL, migration.
//!
//! Schema names are the only raw identifiers that ever reach DDL. Everything
//! funnels through [`is_valid_schema_name`] before interpolation; consumers
//! pass either a freshly derived name or an already-validated persisted one.

use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Invalid schema name: {0}")]
    InvalidName(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Prefix for all tenant schemas.
pub const SCHEMA_PREFIX: &str = "tenant_";

/// Table set every tenant schema must contain. Structural parity across
/// tenants is an invariant: all schemas get exactly this DDL.
///
/// `medical_history` and `content` hold sealed field ciphertext, hence text.
const TENANT_TABLES: &[(&str, &str)] = &[
    (
        "patients",
        r#"
        CREATE TABLE IF NOT EXISTS "{schema}".patients (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            date_of_birth DATE,
            email TEXT,
            phone TEXT,
            medical_history TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "appointments",
        r#"
        CREATE TABLE IF NOT EXISTS "{schema}".appointments (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            patient_id UUID NOT NULL,
            clinician_id UUID NOT NULL,
            scheduled_at TIMESTAMPTZ NOT NULL,
            duration_minutes INT NOT NULL DEFAULT 30,
            status TEXT NOT NULL DEFAULT 'scheduled',
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "clinical_notes",
        r#"
        CREATE TABLE IF NOT EXISTS "{schema}".clinical_notes (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            patient_id UUID NOT NULL,
            appointment_id UUID,
            author_id UUID NOT NULL,
            content TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "invoices",
        r#"
        CREATE TABLE IF NOT EXISTS "{schema}".invoices (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            patient_id UUID NOT NULL,
            amount_cents BIGINT NOT NULL,
            currency TEXT NOT NULL DEFAULT 'USD',
            status TEXT NOT NULL DEFAULT 'draft',
            issued_at TIMESTAMPTZ,
            due_at TIMESTAMPTZ,
            paid_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "assigned_clinicians",
        r#"
        CREATE TABLE IF NOT EXISTS "{schema}".assigned_clinicians (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            patient_id UUID NOT NULL,
            clinician_id UUID NOT NULL,
            role TEXT NOT NULL DEFAULT 'primary',
            assigned_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "patient_handoffs",
        r#"
        CREATE TABLE IF NOT EXISTS "{schema}".patient_handoffs (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            patient_id UUID NOT NULL,
            from_clinician_id UUID NOT NULL,
            to_clinician_id UUID NOT NULL,
            reason TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "payment_methods",
        r#"
        CREATE TABLE IF NOT EXISTS "{schema}".payment_methods (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            patient_id UUID NOT NULL,
            provider TEXT NOT NULL,
            provider_token TEXT NOT NULL,
            last_four TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "payment_transactions",
        r#"
        CREATE TABLE IF NOT EXISTS "{schema}".payment_transactions (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            invoice_id UUID NOT NULL,
            payment_method_id UUID,
            amount_cents BIGINT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            provider_reference TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
];

/// Derive the schema name for an organization.
///
/// Pure and deterministic: the organization id with separators stripped,
/// prefixed. Distinct organizations always yield distinct names, the result
/// always passes [`is_valid_schema_name`], and no storage is consulted.
pub fn schema_name_for(organization_id: Uuid) -> String {
    format!("{}{}", SCHEMA_PREFIX, organization_id.simple())
}

/// Validate a tenant schema identifier before it reaches DDL.
///
/// Accepts only the `tenant_` prefix followed by lowercase alphanumerics and
/// underscores, within the Postgres 63-byte identifier limit.
pub fn is_valid_schema_name(name: &str) -> bool {
    if name.len() > 63 {
        return false;
    }
    let Some(rest) = name.strip_prefix(SCHEMA_PREFIX) else {
        return false;
    };
    !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn check_name(name: &str) -> Result<(), SchemaError> {
    if !is_valid_schema_name(name) {
        return Err(SchemaError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Privileged DDL over tenant schemas.
pub struct SchemaManager {
    pool: PgPool,
}

impl SchemaManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a tenant schema. Idempotent: an already existing schema is not
    /// an error, so concurrent first requests can both pass through here.
    pub async fn create_schema(&self, name: &str) -> Result<(), SchemaError> {
        check_name(name)?;
        let sql = format!(r#"CREATE SCHEMA IF NOT EXISTS "{}""#, name);
        sqlx::query(&sql).execute(&self.pool).await?;
        info!("Created schema: {}", name);
        Ok(())
    }

    /// Whether a schema of this name already exists.
    ///
    /// Provisioning consults this before creating a schema so that
    /// compensation only ever drops what the same call brought into being.
    pub async fn schema_exists(&self, name: &str) -> Result<bool, SchemaError> {
        check_name(name)?;
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<bool, _>(0))
    }

    /// Drop a tenant schema and everything in it. Irreversible; only invoked
    /// by explicit teardown or provisioning compensation, never implicitly.
    pub async fn drop_schema(&self, name: &str) -> Result<(), SchemaError> {
        check_name(name)?;
        let sql = format!(r#"DROP SCHEMA IF EXISTS "{}" CASCADE"#, name);
        sqlx::query(&sql).execute(&self.pool).await?;
        info!("Dropped schema: {}", name);
        Ok(())
    }

    /// Create any tables missing from a tenant schema.
    ///
    /// Additive and safe to re-run: used for brand-new tenants and for
    /// rolling new tables out to pre-existing ones.
    pub async fn migrate_schema(&self, name: &str) -> Result<(), SchemaError> {
        check_name(name)?;
        for (_table, ddl) in TENANT_TABLES {
            let sql = ddl.replace("{schema}", name);
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Table names every tenant schema must contain.
    pub fn required_tables() -> Vec<&'static str> {
        TENANT_TABLES.iter().map(|(table, _)| *table).collect()
    }
}
