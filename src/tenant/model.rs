use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Registry row in `public.tenants`. One per organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub schema_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deleted => "deleted",
        }
    }
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active.as_str() && self.deleted_at.is_none()
    }
}

/// Row in `public.tenant_encryption_keys`. Exactly one active row per tenant
/// per key version; `encrypted_key` is sealed under the master key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantEncryptionKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub organization_id: Uuid,
    #[serde(skip_serializing)]
    pub encrypted_key: String,
    pub key_version: i32,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
