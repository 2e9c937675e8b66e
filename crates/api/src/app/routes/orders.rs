use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use rateforge_auth::Permission;
use rateforge_catalog::ProductId;
use rateforge_core::AggregateId;
use rateforge_orders::{
    AddQuotedLine, CloseOrder, OpenOrder, PriceOrder, PricingOrder, PricingOrderCommand,
    PricingOrderId, RateSnapshot,
};

use crate::app::routes::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/lines", post(add_line))
        .route("/:id/price", post(price_order))
        .route("/:id/close", post(close_order))
}

async fn dispatch_order(
    services: &AppServices,
    tenant: &crate::context::TenantContext,
    principal: &crate::context::PrincipalContext,
    agg: AggregateId,
    permission: &'static str,
    cmd: PricingOrderCommand,
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
        .dispatch::<PricingOrder>(
            tenant.tenant_id(),
            agg,
            "orders.order",
            cmd_auth.inner,
            |_t, aggregate_id| PricingOrder::empty(PricingOrderId::new(aggregate_id)),
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

pub async fn open_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
) -> axum::response::Response {
    let agg = AggregateId::new();

    let cmd = PricingOrderCommand::OpenOrder(OpenOrder {
        tenant_id: tenant.tenant_id(),
        order_id: PricingOrderId::new(agg),
        occurred_at: Utc::now(),
    });

    dispatch_order(&services, &tenant, &principal, agg, "orders.open", cmd, true).await
}

/// Quote a product and freeze the result as an order line.
///
/// The unit price and the rate that produced it are captured at this moment;
/// later rate movements never touch the line.
pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddOrderLineRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"),
    };

    let product_agg: AggregateId = match body.product_id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id"),
    };
    let product_id = ProductId::new(product_agg);

    // Sellability check against the catalog read model.
    match services.products_get(tenant.tenant_id(), &product_id) {
        Some(rm) if rm.status == rateforge_catalog::ProductStatus::Active => {}
        Some(_) => {
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "not_sellable",
                "product is not active",
            );
        }
        None => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }

    let quote = match services.quote(tenant.tenant_id(), &product_id) {
        Ok(q) => q,
        Err(e) => return errors::quote_error_to_response(e),
    };

    let cmd = PricingOrderCommand::AddQuotedLine(AddQuotedLine {
        tenant_id: tenant.tenant_id(),
        order_id: PricingOrderId::new(agg),
        product_id,
        quantity: body.quantity,
        unit_price: quote.price,
        rate_snapshot: RateSnapshot {
            source: quote.source,
            rate: quote.rate,
            quoted_at: quote.computed_at,
        },
        occurred_at: Utc::now(),
    });

    dispatch_order(&services, &tenant, &principal, agg, "orders.quote", cmd, false).await
}

pub async fn price_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"),
    };

    let cmd = PricingOrderCommand::PriceOrder(PriceOrder {
        tenant_id: tenant.tenant_id(),
        order_id: PricingOrderId::new(agg),
        occurred_at: Utc::now(),
    });

    dispatch_order(&services, &tenant, &principal, agg, "orders.price", cmd, false).await
}

pub async fn close_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"),
    };

    let cmd = PricingOrderCommand::CloseOrder(CloseOrder {
        tenant_id: tenant.tenant_id(),
        order_id: PricingOrderId::new(agg),
        occurred_at: Utc::now(),
    });

    dispatch_order(&services, &tenant, &principal, agg, "orders.close", cmd, false).await
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"),
    };
    let order_id = PricingOrderId::new(agg);
    match services.orders_get(tenant.tenant_id(), &order_id) {
        Some(rm) => (StatusCode::OK, Json(dto::order_to_json(&rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "order not found"),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let items = services
        .orders_list(tenant.tenant_id())
        .iter()
        .map(dto::order_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
