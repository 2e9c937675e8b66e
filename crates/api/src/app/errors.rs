use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use rateforge_infra::{DispatchError, QuoteError};

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
        DispatchError::TenantIsolation(msg) => json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg),
    }
}

pub fn quote_error_to_response(err: QuoteError) -> axum::response::Response {
    match err {
        QuoteError::UnknownProduct => json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
        QuoteError::UnknownCurrency => {
            json_error(StatusCode::NOT_FOUND, "not_found", "currency not found")
        }
        QuoteError::UnknownFormula => json_error(StatusCode::NOT_FOUND, "not_found", "formula not found"),
        QuoteError::NotDynamicallyPriced => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "not_dynamically_priced",
            "product has no dynamic pricing profile",
        ),
        QuoteError::RetiredCurrency => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "retired_currency",
            "the product's currency is retired",
        ),
        QuoteError::ArchivedFormula => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "archived_formula",
            "the product's formula is archived",
        ),
        QuoteError::NoRateRecorded => json_error(
            StatusCode::CONFLICT,
            "no_rate_recorded",
            "the product's currency has no recorded rate yet",
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
