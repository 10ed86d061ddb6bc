//! Request-scoped schema binding.
//!
//! `SET search_path` on a pooled connection is connection-scoped: left in
//! place, the next request to reuse that connection would read another
//! tenant's tables. Binding here is done with `SET LOCAL` inside a
//! transaction, so the search path cannot outlive the transaction and a
//! connection always returns to the pool unbound.

use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::schema::is_valid_schema_name;
use super::TenantError;

/// A database session bound to one tenant's schema for the duration of a
/// single transaction.
pub struct TenantSession {
    tx: Transaction<'static, Postgres>,
    schema_name: String,
}

impl TenantSession {
    /// Begin a transaction and bind it to `schema_name`.
    ///
    /// Every tenant-scoped query for the request must run through the
    /// returned session; unqualified table names resolve to the tenant
    /// schema first, then public.
    pub async fn begin(pool: &PgPool, schema_name: &str) -> Result<TenantSession, TenantError> {
        if !is_valid_schema_name(schema_name) {
            return Err(TenantError::InvalidSchemaName(schema_name.to_string()));
        }

        let mut tx = pool.begin().await?;
        let sql = format!(r#"SET LOCAL search_path = "{}", public"#, schema_name);
        sqlx::query(&sql).execute(&mut *tx).await?;

        Ok(TenantSession {
            tx,
            schema_name: schema_name.to_string(),
        })
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// The bound connection for running tenant-scoped queries.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), TenantError> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Roll back explicitly. Dropping the session unbinds and rolls back as
    /// well; this exists for callers that want the error surfaced.
    pub async fn rollback(self) -> Result<(), TenantError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
