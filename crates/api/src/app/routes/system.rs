use std::sync::Arc;

use axum::{Extension, Json, http::StatusCode, response::IntoResponse};

use crate::app::services::{AppServices, tenant_sse_stream};
use crate::context::{PrincipalContext, TenantContext};

pub async fn health() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

pub async fn whoami(
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "tenant_id": tenant.tenant_id().to_string(),
            "principal_id": principal.principal_id().to_string(),
            "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        })),
    )
        .into_response()
}

/// SSE rate ticker: projection-update notifications for the caller's tenant.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> impl IntoResponse {
    tenant_sse_stream(services, tenant.tenant_id())
}
