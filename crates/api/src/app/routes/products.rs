use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;

use rateforge_auth::Permission;
use rateforge_catalog::{
    ActivateProduct, ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId,
    SetPricingProfile,
};
use rateforge_core::AggregateId;

use crate::app::routes::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/:id", get(get_product))
        .route("/:id/activate", post(activate_product))
        .route("/:id/archive", post(archive_product))
        .route("/:id/pricing", put(set_pricing_profile))
        .route("/:id/quote", get(quote_product))
}

async fn dispatch_product(
    services: &AppServices,
    tenant: &crate::context::TenantContext,
    principal: &crate::context::PrincipalContext,
    agg: AggregateId,
    permission: &'static str,
    cmd: ProductCommand,
    created: bool,
) -> axum::response::Response {
    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new(permission)],
    };
    if let Err(e) = crate::authz::authorize_command(tenant, principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services
        .dispatch::<Product>(
            tenant.tenant_id(),
            agg,
            "catalog.product",
            cmd_auth.inner,
            |_t, aggregate_id| Product::empty(ProductId::new(aggregate_id)),
        )
        .await
    {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    (
        status,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();
    let product_id = ProductId::new(agg);

    let cmd = ProductCommand::CreateProduct(CreateProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        sku: body.sku,
        name: body.name,
        pricing: body.pricing.map(dto::PricingProfileRequest::into_profile),
        occurred_at: Utc::now(),
    });

    dispatch_product(&services, &tenant, &principal, agg, "catalog.create", cmd, true).await
}

pub async fn activate_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };

    let cmd = ProductCommand::ActivateProduct(ActivateProduct {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        occurred_at: Utc::now(),
    });

    dispatch_product(&services, &tenant, &principal, agg, "catalog.activate", cmd, false).await
}

pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };

    let cmd = ProductCommand::ArchiveProduct(ArchiveProduct {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        occurred_at: Utc::now(),
    });

    dispatch_product(&services, &tenant, &principal, agg, "catalog.archive", cmd, false).await
}

pub async fn set_pricing_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PricingProfileRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };

    let cmd = ProductCommand::SetPricingProfile(SetPricingProfile {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        pricing: body.into_profile(),
        occurred_at: Utc::now(),
    });

    dispatch_product(&services, &tenant, &principal, agg, "catalog.price", cmd, false).await
}

/// Compute the current sell price through the quote pipeline.
pub async fn quote_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };
    let product_id = ProductId::new(agg);

    match services.quote(tenant.tenant_id(), &product_id) {
        Ok(quote) => (StatusCode::OK, Json(dto::quote_to_json(&quote))).into_response(),
        Err(e) => errors::quote_error_to_response(e),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };
    let product_id = ProductId::new(agg);
    match services.products_get(tenant.tenant_id(), &product_id) {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(&rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let items = services
        .products_list(tenant.tenant_id())
        .iter()
        .map(dto::product_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
