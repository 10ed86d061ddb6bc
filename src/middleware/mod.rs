pub mod auth;
pub mod tenant_context;

pub use auth::{jwt_auth_middleware, AuthPrincipal};
pub use tenant_context::tenant_context_middleware;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware::from_fn, routing::get, Router};

    // from_fn only accepts middleware whose error type resolves to a single
    // concrete IntoResponse; composing both layers here keeps the signatures
    // honest.
    #[test]
    fn middleware_layers_compose_onto_a_router() {
        let _router: Router = Router::new()
            .route("/ping", get(|| async { "ok" }))
            .layer(from_fn(tenant_context_middleware))
            .layer(from_fn(jwt_auth_middleware));
    }
}
