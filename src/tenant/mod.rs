pub mod model;
pub mod provision;
pub mod registry;
pub mod schema;
pub mod session;

pub use model::{Tenant, TenantEncryptionKey, TenantStatus};
pub use provision::ProvisionService;
pub use registry::TenantRegistry;
pub use schema::{schema_name_for, SchemaManager};
pub use session::TenantSession;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Resolved tenant binding for one request. Injected as a request extension
/// by the tenant-context middleware and consumed by business services that
/// need the schema or the tenant's key.
#[derive(Clone, Debug, Serialize)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub organization_id: Uuid,
    pub schema_name: String,
}

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("Tenant already exists for organization {0}")]
    AlreadyExists(Uuid),

    #[error("No tenant found for organization {0}")]
    NotFound(Uuid),

    #[error("Tenant for organization {0} is not active")]
    Inactive(Uuid),

    #[error("Invalid schema name: {0}")]
    InvalidSchemaName(String),

    #[error(transparent)]
    Schema(#[from] schema::SchemaError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
