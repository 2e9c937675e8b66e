//! Machine rate ingest.
//!
//! External feeds push batches of `{ code, value }` entries authenticated by
//! the static ingest token, not a JWT. Each entry is routed to its currency
//! stream by code and accepted or rejected individually; one bad entry never
//! fails the batch.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;

use rateforge_rates::{Currency, CurrencyCommand, CurrencyId, RateSource, RecordRate};

use crate::app::IngestState;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::middleware::extract_bearer;

pub fn router() -> Router {
    Router::new().route("/rates", post(ingest_rates))
}

pub async fn ingest_rates(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(state): Extension<IngestState>,
    headers: HeaderMap,
    Json(body): Json<dto::IngestRatesRequest>,
) -> axum::response::Response {
    let token = match extract_bearer(&headers) {
        Ok(t) => t,
        Err(status) => return errors::json_error(status, "unauthorized", "missing bearer token"),
    };
    if !state.token.matches(token) {
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid ingest token");
    }

    if body.provider.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "provider is required");
    }

    let tenant_id = state.tenant_id;
    let now = Utc::now();

    let mut results = Vec::with_capacity(body.rates.len());
    let mut accepted = 0usize;

    for entry in body.rates {
        let outcome = match services.currencies_find_by_code(tenant_id, &entry.code) {
            None => Err("unknown currency code".to_string()),
            Some(rm) => {
                let currency_id: CurrencyId = rm.currency_id;
                let cmd = CurrencyCommand::RecordRate(RecordRate {
                    tenant_id,
                    currency_id,
                    value: entry.value,
                    source: RateSource::Ingest {
                        provider: body.provider.clone(),
                    },
                    observed_at: entry.observed_at.unwrap_or(now),
                    occurred_at: now,
                });

                services
                    .dispatch::<Currency>(
                        tenant_id,
                        currency_id.0,
                        "rates.currency",
                        cmd,
                        |_t, aggregate_id| Currency::empty(CurrencyId::new(aggregate_id)),
                    )
                    .await
                    .map(|_| ())
                    .map_err(|e| format!("{e:?}"))
            }
        };

        match outcome {
            Ok(()) => {
                accepted += 1;
                results.push(serde_json::json!({
                    "code": entry.code,
                    "accepted": true,
                }));
            }
            Err(reason) => {
                tracing::warn!(code = %entry.code, reason = %reason, "ingest entry rejected");
                results.push(serde_json::json!({
                    "code": entry.code,
                    "accepted": false,
                    "reason": reason,
                }));
            }
        }
    }

    let rejected = results.len() - accepted;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "accepted": accepted,
            "rejected": rejected,
            "results": results,
        })),
    )
        .into_response()
}
