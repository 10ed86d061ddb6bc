use axum::{middleware::from_fn, routing::get, Extension, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

mod auth;
mod config;
mod crypto;
mod db;
mod error;
mod handlers;
mod middleware;
mod state;
mod tenant;

use state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET,
    // PRACTICE_MASTER_KEY, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Initialize configuration (this loads the config singleton)
    let config = crate::config::config();
    tracing::info!("Starting practice API in {:?} mode", config.environment);

    // Master-key and registry problems are fatal here, before any request.
    let state = state::connect_state()
        .await
        .unwrap_or_else(|e| panic!("startup failed: {}", e));

    let app = app(state);

    // Allow tests or deployments to override port via env
    let port = std::env::var("PRACTICE_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("practice API listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}

fn app(state: AppState) -> Router {
    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        // Tenant-scoped business API (JWT → tenant context → handler)
        .merge(patient_routes())
        // Restricted tenant administration (JWT only; no tenant binding)
        .merge(root_tenant_routes())
        // Global middleware
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn patient_routes() -> Router {
    use handlers::patients;

    Router::new()
        .route(
            "/api/patients",
            get(patients::patient_list).post(patients::patient_create),
        )
        // Order matters: tenant context requires the authenticated principal,
        // and no tenant-scoped query runs before the context exists.
        .layer(from_fn(middleware::tenant_context_middleware))
        .layer(from_fn(middleware::jwt_auth_middleware))
}

fn root_tenant_routes() -> Router {
    use axum::routing::{delete, post};
    use handlers::tenant;

    Router::new()
        .route(
            "/api/root/tenant",
            get(tenant::tenant_list).post(tenant::tenant_create),
        )
        .route(
            "/api/root/tenant/keys/backfill",
            post(tenant::tenant_backfill_keys),
        )
        .route(
            "/api/root/tenant/:org_id",
            get(tenant::tenant_get).delete(tenant::tenant_delete),
        )
        .route(
            "/api/root/tenant/:org_id/schema",
            delete(tenant::tenant_drop_schema),
        )
        .layer(from_fn(middleware::jwt_auth_middleware))
}

async fn root() -> axum::response::Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    axum::response::Json(json!({
        "success": true,
        "data": {
            "name": "Practice API",
            "version": version,
            "description": "Multi-tenant practice management backend",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "patients": "/api/patients (protected)",
                "tenants": "/api/root/tenant (restricted)",
            }
        }
    }))
}

async fn health(Extension(state): Extension<AppState>) -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    match crate::db::health_check(&state.pool).await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            axum::response::Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::response::Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
