//! HTTP API application wiring (Axum router + service wiring).
//!
//! Layout:
//! - `services.rs`: infrastructure wiring (event store/bus, projections,
//!   dispatcher, quoter)
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use rateforge_auth::StaticToken;
use rateforge_core::TenantId;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Runtime configuration for the API process.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// HS256 secret for operator tokens.
    pub jwt_secret: String,
    /// Static bearer secret for the machine rate feed (empty = disabled).
    pub ingest_token: String,
    /// Tenant that ingested rates are routed to.
    pub ingest_tenant_id: TenantId,
}

/// Shared state for the unauthenticated ingest endpoint.
#[derive(Clone)]
pub struct IngestState {
    pub token: StaticToken,
    pub tenant_id: TenantId,
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: ApiConfig) -> Router {
    let jwt: Arc<dyn rateforge_auth::JwtValidator> = Arc::new(
        rateforge_auth::Hs256JwtValidator::new(config.jwt_secret.into_bytes()),
    );
    let auth_state = middleware::AuthState { jwt };

    let services = Arc::new(services::build_services().await);

    let ingest_state = IngestState {
        token: StaticToken::new(config.ingest_token),
        tenant_id: config.ingest_tenant_id,
    };

    // Protected routes: require auth + tenant context.
    let protected = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    // Machine ingest: static token, no tenant claims.
    let ingest = routes::ingest::router()
        .layer(Extension(services))
        .layer(Extension(ingest_state));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/ingest", ingest)
        .merge(protected)
        .layer(ServiceBuilder::new())
}
