use std::sync::Arc;

use sqlx::PgPool;

use crate::crypto::{MasterKeyCodec, TenantKeyService};
use crate::tenant::ProvisionService;

/// Shared application services, injected as an axum Extension.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub keys: Arc<TenantKeyService>,
    pub provisioner: Arc<ProvisionService>,
}

impl AppState {
    /// Wire up services over a connected pool.
    ///
    /// Master-key problems surface here, at startup, rather than on the
    /// first encrypt call.
    pub async fn new(pool: PgPool) -> Result<Self, anyhow::Error> {
        crate::db::ensure_registry_tables(&pool).await?;

        let codec = MasterKeyCodec::from_env()?;
        let keys = Arc::new(TenantKeyService::new(pool.clone(), codec));
        let provisioner = Arc::new(ProvisionService::new(pool.clone(), keys.clone()));

        Ok(Self {
            pool,
            keys,
            provisioner,
        })
    }
}

pub async fn connect_state() -> Result<AppState, anyhow::Error> {
    let pool = crate::db::connect().await?;
    AppState::new(pool).await
}
