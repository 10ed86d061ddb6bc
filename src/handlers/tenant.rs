//! Tenant administration endpoints (restricted surface).

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub organization_id: Uuid,
}

/// POST /api/root/tenant - provision a tenant for an organization.
///
/// Idempotent: re-posting the same organization returns the existing tenant.
pub async fn tenant_create(
    Extension(state): Extension<AppState>,
    Json(body): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let tenant = state
        .provisioner
        .create_tenant_for_organization(body.organization_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": tenant })),
    ))
}

/// GET /api/root/tenant - list all active tenants.
pub async fn tenant_list(
    Extension(state): Extension<AppState>,
) -> Result<Json<Value>, ApiError> {
    let tenants = state.provisioner.registry().list().await?;
    Ok(Json(json!({ "success": true, "data": tenants })))
}

/// GET /api/root/tenant/:org_id
pub async fn tenant_get(
    Extension(state): Extension<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let tenant = state
        .provisioner
        .registry()
        .find_by_organization(org_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No tenant for organization {}", org_id)))?;

    Ok(Json(json!({ "success": true, "data": tenant })))
}

/// DELETE /api/root/tenant/:org_id - soft-delete the registry row.
///
/// The schema and its data stay put; dropping them is a separate call.
pub async fn tenant_delete(
    Extension(state): Extension<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    match state.provisioner.registry().soft_delete(org_id).await {
        Ok(()) => Ok(Json(json!({ "success": true }))),
        Err(crate::tenant::TenantError::NotFound(_)) => Err(ApiError::not_found(format!(
            "No tenant for organization {}",
            org_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// DELETE /api/root/tenant/:org_id/schema - irreversibly drop the tenant's
/// schema. Requires the tenant row to already be soft-deleted.
pub async fn tenant_drop_schema(
    Extension(state): Extension<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if state
        .provisioner
        .registry()
        .find_by_organization(org_id)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict(
            "Tenant must be deleted before its schema can be dropped",
        ));
    }

    let schema_name = crate::tenant::schema_name_for(org_id);
    state.provisioner.schemas().drop_schema(&schema_name).await?;
    Ok(Json(json!({ "success": true, "data": { "dropped": schema_name } })))
}

/// POST /api/root/tenant/keys/backfill - ensure every active tenant has an
/// encryption key. Best-effort per tenant; the report carries the counts.
pub async fn tenant_backfill_keys(
    Extension(state): Extension<AppState>,
) -> Result<Json<Value>, ApiError> {
    let report = state.provisioner.backfill_keys().await?;
    Ok(Json(json!({ "success": true, "data": report })))
}
