//! Per-tenant data keys: generation, persistence, and field encryption.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::tenant::TenantEncryptionKey;

use super::cipher;
use super::master_key::MasterKeyCodec;
use super::CryptoError;

/// Algorithm tag stored alongside each key row.
pub const KEY_ALGORITHM: &str = "AES-256-GCM";

/// Manages tenant data keys and field-level encryption.
///
/// Tenant keys are stored sealed under the master key; the plaintext key is
/// only ever held in process memory. Decrypted keys are cached per tenant,
/// since rotation is a manual operation and keys are otherwise immutable.
pub struct TenantKeyService {
    pool: PgPool,
    codec: MasterKeyCodec,
    cache: Arc<RwLock<HashMap<Uuid, Zeroizing<[u8; cipher::KEY_LEN]>>>>,
}

impl TenantKeyService {
    pub fn new(pool: PgPool, codec: MasterKeyCodec) -> Self {
        Self {
            pool,
            codec,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Generate, seal, and persist a data key for a tenant if none exists.
    ///
    /// Idempotent: an existing key row wins and the freshly generated key is
    /// discarded, so this is safe to re-invoke for backfill across all
    /// tenants and safe under concurrent first requests.
    pub async fn ensure_tenant_has_key(
        &self,
        tenant_id: Uuid,
        organization_id: Uuid,
    ) -> Result<(), CryptoError> {
        // A re-provisioned organization carries a new tenant id; any live
        // key row still bound to the old tenant must be retired first or it
        // would hold the organization's uniqueness slot forever.
        sqlx::query(
            r#"
            UPDATE tenant_encryption_keys
            SET deleted_at = now(), updated_at = now()
            WHERE organization_id = $1 AND tenant_id <> $2 AND deleted_at IS NULL
            "#,
        )
        .bind(organization_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        let plain_key = Zeroizing::new(cipher::generate_key());
        let sealed = self.codec.seal(&*plain_key)?;

        let result = sqlx::query(
            r#"
            INSERT INTO tenant_encryption_keys (tenant_id, organization_id, encrypted_key, key_version, algorithm)
            VALUES ($1, $2, $3, 1, $4)
            ON CONFLICT (tenant_id) WHERE deleted_at IS NULL DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(organization_id)
        .bind(&sealed)
        .bind(KEY_ALGORITHM)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!("Generated encryption key for tenant {}", tenant_id);
        }
        Ok(())
    }

    /// Load and unseal a tenant's data key, caching the result.
    ///
    /// A tenant without a key row cannot encrypt or decrypt anything; the
    /// caller gets an error rather than a fallback key.
    pub async fn data_key(
        &self,
        tenant_id: Uuid,
    ) -> Result<Zeroizing<[u8; cipher::KEY_LEN]>, CryptoError> {
        {
            let cache = self.cache.read().await;
            if let Some(key) = cache.get(&tenant_id) {
                return Ok(key.clone());
            }
        }

        let key_row = self
            .find_key_row(tenant_id)
            .await?
            .ok_or(CryptoError::KeyNotFound(tenant_id))?;

        let key = self.codec.unseal(&key_row.encrypted_key).map_err(|e| {
            // Unseal failure means a corrupt row or wrong master key. Log
            // without the sealed blob and surface an opaque error.
            warn!("Failed to unseal data key for tenant {}: {}", tenant_id, e);
            CryptoError::DecryptFailed
        })?;
        let key = Zeroizing::new(key);

        let mut cache = self.cache.write().await;
        cache.insert(tenant_id, key.clone());
        Ok(key)
    }

    /// Fetch the active key row for a tenant, if any.
    pub async fn find_key_row(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantEncryptionKey>, CryptoError> {
        let row = sqlx::query_as::<_, TenantEncryptionKey>(
            r#"
            SELECT id, tenant_id, organization_id, encrypted_key, key_version, algorithm,
                   created_at, updated_at, deleted_at
            FROM tenant_encryption_keys
            WHERE tenant_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Encrypt a sensitive field value with the tenant's data key.
    pub async fn encrypt_field(&self, tenant_id: Uuid, plaintext: &str) -> Result<String, CryptoError> {
        let key = self.data_key(tenant_id).await?;
        cipher::encrypt(&*key, plaintext.as_bytes())
    }

    /// Decrypt a sensitive field value. Fails closed on tampering or a
    /// missing key; never returns partial plaintext.
    pub async fn decrypt_field(&self, tenant_id: Uuid, sealed: &str) -> Result<String, CryptoError> {
        let key = self.data_key(tenant_id).await?;
        let plain = cipher::decrypt(&*key, sealed)?;
        String::from_utf8(plain).map_err(|_| CryptoError::DecryptFailed)
    }
}
