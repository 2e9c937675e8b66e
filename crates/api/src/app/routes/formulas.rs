use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use chrono::Utc;

use rateforge_auth::Permission;
use rateforge_core::AggregateId;
use rateforge_formulas::{
    ArchiveFormula, DefineFormula, Formula, FormulaCommand, FormulaId, RemoveVariable,
    UpdateExpression, UpsertVariable,
};

use crate::app::routes::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(define_formula).get(list_formulas))
        .route("/:id", get(get_formula))
        .route("/:id/expression", put(update_expression))
        .route("/:id/variables", put(upsert_variable))
        .route("/:id/variables/:code", delete(remove_variable))
        .route("/:id/archive", post(archive_formula))
        .route("/:id/preview", post(preview_formula))
}

async fn dispatch_formula(
    services: &AppServices,
    tenant: &crate::context::TenantContext,
    principal: &crate::context::PrincipalContext,
    agg: AggregateId,
    permission: &'static str,
    cmd: FormulaCommand,
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
        .dispatch::<Formula>(
            tenant.tenant_id(),
            agg,
            "formulas.formula",
            cmd_auth.inner,
            |_t, aggregate_id| Formula::empty(FormulaId::new(aggregate_id)),
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

pub async fn define_formula(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::DefineFormulaRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();
    let formula_id = FormulaId::new(agg);

    let cmd = FormulaCommand::DefineFormula(DefineFormula {
        tenant_id: tenant.tenant_id(),
        formula_id,
        name: body.name,
        expression: body.expression,
        variables: body
            .variables
            .into_iter()
            .map(dto::FormulaVariableRequest::into_variable)
            .collect(),
        occurred_at: Utc::now(),
    });

    dispatch_formula(&services, &tenant, &principal, agg, "formulas.define", cmd, true).await
}

pub async fn update_expression(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateExpressionRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid formula id"),
    };

    let cmd = FormulaCommand::UpdateExpression(UpdateExpression {
        tenant_id: tenant.tenant_id(),
        formula_id: FormulaId::new(agg),
        expression: body.expression,
        occurred_at: Utc::now(),
    });

    dispatch_formula(&services, &tenant, &principal, agg, "formulas.edit", cmd, false).await
}

pub async fn upsert_variable(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::FormulaVariableRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid formula id"),
    };

    let cmd = FormulaCommand::UpsertVariable(UpsertVariable {
        tenant_id: tenant.tenant_id(),
        formula_id: FormulaId::new(agg),
        variable: body.into_variable(),
        occurred_at: Utc::now(),
    });

    dispatch_formula(&services, &tenant, &principal, agg, "formulas.edit", cmd, false).await
}

pub async fn remove_variable(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path((id, code)): Path<(String, String)>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid formula id"),
    };

    let cmd = FormulaCommand::RemoveVariable(RemoveVariable {
        tenant_id: tenant.tenant_id(),
        formula_id: FormulaId::new(agg),
        code,
        occurred_at: Utc::now(),
    });

    dispatch_formula(&services, &tenant, &principal, agg, "formulas.edit", cmd, false).await
}

pub async fn archive_formula(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid formula id"),
    };

    let cmd = FormulaCommand::ArchiveFormula(ArchiveFormula {
        tenant_id: tenant.tenant_id(),
        formula_id: FormulaId::new(agg),
        occurred_at: Utc::now(),
    });

    dispatch_formula(&services, &tenant, &principal, agg, "formulas.archive", cmd, false).await
}

/// Evaluate a formula with optional ad-hoc binding overrides.
///
/// Always returns 200 with the fail-closed value; the evaluation error, if
/// any, rides along so operators can debug their expressions.
pub async fn preview_formula(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::PreviewFormulaRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid formula id"),
    };
    let formula_id = FormulaId::new(agg);

    let Some(rm) = services.formulas_get(tenant.tenant_id(), &formula_id) else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "formula not found");
    };

    let mut bindings = rm.bindings();
    for (code, value) in &body.overrides {
        bindings.bind(code, *value);
    }

    let (value, error) = match rateforge_pricing::evaluate(&rm.expression, &bindings) {
        Ok(v) => (v, None),
        Err(e) => (0.0, Some(e.to_string())),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "value": value,
            "error": error,
        })),
    )
        .into_response()
}

pub async fn get_formula(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid formula id"),
    };
    let formula_id = FormulaId::new(agg);
    match services.formulas_get(tenant.tenant_id(), &formula_id) {
        Some(rm) => (StatusCode::OK, Json(dto::formula_to_json(&rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "formula not found"),
    }
}

pub async fn list_formulas(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
) -> axum::response::Response {
    let items = services
        .formulas_list(tenant.tenant_id())
        .iter()
        .map(dto::formula_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
