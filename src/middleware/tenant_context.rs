use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{Json, Response},
};

use super::auth::AuthPrincipal;
use crate::error::ApiError;
use crate::state::AppState;
use crate::tenant::TenantContext;

/// Middleware that resolves the caller's tenant and binds the request to it.
///
/// Runs after JWT auth. Delegates to the provisioner's
/// [`resolve_tenant_context`](crate::tenant::ProvisionService::resolve_tenant_context),
/// which looks up (or lazily provisions) the tenant for the principal's
/// organization and refuses inactive tenants, then injects the resulting
/// [`TenantContext`] request extension. Handlers never see a raw organization
/// id: every tenant-scoped query goes through the context's schema, and the
/// context is request-scoped state, never global.
pub async fn tenant_context_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<serde_json::Value>)> {
    let principal = request
        .extensions()
        .get::<AuthPrincipal>()
        .ok_or_else(|| {
            let api_error =
                ApiError::unauthorized("JWT authentication required before tenant resolution");
            error_response(api_error)
        })?
        .clone();

    let state = request
        .extensions()
        .get::<AppState>()
        .ok_or_else(|| {
            let api_error = ApiError::internal_server_error("Application state missing");
            error_response(api_error)
        })?
        .clone();

    let context: TenantContext = state
        .provisioner
        .resolve_tenant_context(principal.organization_id)
        .await
        .map_err(|e| {
            tracing::error!(
                "Failed to resolve tenant for organization {}: {}",
                principal.organization_id,
                e
            );
            error_response(ApiError::from(e))
        })?;

    tracing::debug!(
        "Tenant resolved: {} -> schema {}",
        context.tenant_id,
        context.schema_name
    );

    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

fn error_response(api_error: ApiError) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::from_u16(api_error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(api_error.to_json()),
    )
}
