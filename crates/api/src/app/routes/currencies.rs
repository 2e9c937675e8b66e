use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};
use chrono::Utc;

use rateforge_auth::Permission;
use rateforge_core::AggregateId;
use rateforge_rates::{
    Currency, CurrencyCommand, CurrencyId, RateSource, RecordRate, RegisterCurrency,
    RetireCurrency, UpdateCurrencySettings,
};

use crate::app::routes::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_currency).get(list_currencies))
        .route("/:id", get(get_currency))
        .route("/:id/rates", post(record_rate))
        .route("/:id/history", get(get_history))
        .route("/:id/settings", patch(update_settings))
        .route("/:id/retire", post(retire_currency))
}

pub async fn register_currency(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::RegisterCurrencyRequest>,
) -> axum::response::Response {
    // One stream per currency code within a tenant.
    if services
        .currencies_find_by_code(tenant.tenant_id(), &body.code)
        .is_some()
    {
        return errors::json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("currency code '{}' is already registered", body.code.trim()),
        );
    }

    let agg = AggregateId::new();
    let currency_id = CurrencyId::new(agg);

    let cmd = CurrencyCommand::RegisterCurrency(RegisterCurrency {
        tenant_id: tenant.tenant_id(),
        currency_id,
        code: body.code,
        name: body.name,
        unit_symbol: body.unit_symbol,
        history_limit: body.history_limit,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("rates.register")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services
        .dispatch::<Currency>(
            tenant.tenant_id(),
            agg,
            "rates.currency",
            cmd_auth.inner,
            |_t, aggregate_id| Currency::empty(CurrencyId::new(aggregate_id)),
        )
        .await
    {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn record_rate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordRateRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid currency id"),
    };
    let currency_id = CurrencyId::new(agg);

    let now = Utc::now();
    let cmd = CurrencyCommand::RecordRate(RecordRate {
        tenant_id: tenant.tenant_id(),
        currency_id,
        value: body.value,
        source: RateSource::Manual,
        observed_at: body.observed_at.unwrap_or(now),
        occurred_at: now,
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("rates.record")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services
        .dispatch::<Currency>(
            tenant.tenant_id(),
            agg,
            "rates.currency",
            cmd_auth.inner,
            |_t, aggregate_id| Currency::empty(CurrencyId::new(aggregate_id)),
        )
        .await
    {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn update_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateCurrencySettingsRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid currency id"),
    };
    let currency_id = CurrencyId::new(agg);

    let cmd = CurrencyCommand::UpdateCurrencySettings(UpdateCurrencySettings {
        tenant_id: tenant.tenant_id(),
        currency_id,
        name: body.name,
        history_limit: body.history_limit,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("rates.configure")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services
        .dispatch::<Currency>(
            tenant.tenant_id(),
            agg,
            "rates.currency",
            cmd_auth.inner,
            |_t, aggregate_id| Currency::empty(CurrencyId::new(aggregate_id)),
        )
        .await
    {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn retire_currency(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid currency id"),
    };
    let currency_id = CurrencyId::new(agg);

    let cmd = CurrencyCommand::RetireCurrency(RetireCurrency {
        tenant_id: tenant.tenant_id(),
        currency_id,
        occurred_at: Utc::now(),
    });

    let cmd_auth = CmdAuth {
        inner: cmd,
        required: vec![Permission::new("rates.retire")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let committed = match services
        .dispatch::<Currency>(
            tenant.tenant_id(),
            agg,
            "rates.currency",
            cmd_auth.inner,
            |_t, aggregate_id| Currency::empty(CurrencyId::new(aggregate_id)),
        )
        .await
    {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
        })),
    )
        .into_response()
}

pub async fn get_currency(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid currency id"),
    };
    let currency_id = CurrencyId::new(agg);
    match services.currencies_get(tenant.tenant_id(), &currency_id) {
        Some(rm) => (StatusCode::OK, Json(dto::currency_to_json(&rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "currency not found"),
    }
}

pub async fn get_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid currency id"),
    };
    let currency_id = CurrencyId::new(agg);
    match services.currencies_get(tenant.tenant_id(), &currency_id) {
        Some(rm) => (StatusCode::OK, Json(dto::currency_history_to_json(&rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "currency not found"),
    }
}

pub async fn list_currencies(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let items = services
        .currencies_list(tenant.tenant_id())
        .iter()
        .map(dto::currency_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
