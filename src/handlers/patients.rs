//! Patient endpoints.
//!
//! Representative of how business handlers consume the tenant context: all
//! queries run through a schema-bound [`TenantSession`], and sensitive
//! fields go through the tenant's data key before they touch the database.

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::tenant::{TenantContext, TenantSession};

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub medical_history: Option<String>,
}

/// POST /api/patients
pub async fn patient_create(
    Extension(state): Extension<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(body): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    // Seal the sensitive field before the session opens; history is stored
    // only as ciphertext.
    let sealed_history = match &body.medical_history {
        Some(text) => Some(state.keys.encrypt_field(ctx.tenant_id, text).await?),
        None => None,
    };

    let mut session = TenantSession::begin(&state.pool, &ctx.schema_name).await?;

    let row = sqlx::query(
        r#"
        INSERT INTO patients (first_name, last_name, email, phone, medical_history)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, first_name, last_name, created_at
        "#,
    )
    .bind(&body.first_name)
    .bind(&body.last_name)
    .bind(&body.email)
    .bind(&body.phone)
    .bind(&sealed_history)
    .fetch_one(session.connection())
    .await
    .map_err(crate::tenant::TenantError::from)?;

    let id: Uuid = row.get("id");
    session.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": {
                "id": id,
                "first_name": body.first_name,
                "last_name": body.last_name,
            }
        })),
    ))
}

/// GET /api/patients - list patients in the caller's tenant, with the
/// medical history decrypted for the response.
pub async fn patient_list(
    Extension(state): Extension<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<Value>, ApiError> {
    let mut session = TenantSession::begin(&state.pool, &ctx.schema_name).await?;

    let rows = sqlx::query(
        r#"
        SELECT id, first_name, last_name, email, phone, medical_history, created_at
        FROM patients
        WHERE deleted_at IS NULL
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(session.connection())
    .await
    .map_err(crate::tenant::TenantError::from)?;

    session.commit().await?;

    let mut patients = Vec::with_capacity(rows.len());
    for row in rows {
        let sealed: Option<String> = row.get("medical_history");
        let medical_history = match sealed {
            Some(sealed) => Some(state.keys.decrypt_field(ctx.tenant_id, &sealed).await?),
            None => None,
        };
        patients.push(json!({
            "id": row.get::<Uuid, _>("id"),
            "first_name": row.get::<String, _>("first_name"),
            "last_name": row.get::<String, _>("last_name"),
            "email": row.get::<Option<String>, _>("email"),
            "phone": row.get::<Option<String>, _>("phone"),
            "medical_history": medical_history,
            "created_at": row.get::<chrono::DateTime<chrono::Utc>, _>("created_at"),
        }));
    }

    Ok(Json(json!({ "success": true, "data": patients })))
}
