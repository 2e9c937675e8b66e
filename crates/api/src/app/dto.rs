use chrono::{DateTime, Utc};
use serde::Deserialize;

use rateforge_catalog::{PriceSource, PricingProfile};
use rateforge_formulas::{FormulaVariable, VariableRole};
use rateforge_infra::PriceQuote;
use rateforge_infra::projections::{
    CurrencyReadModel, FormulaReadModel, OrderReadModel, ProductReadModel,
};
use rateforge_pricing::{PriceLimits, ProfitSpec, RoundingSpec};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterCurrencyRequest {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub unit_symbol: String,
    pub history_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RecordRateRequest {
    pub value: f64,
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCurrencySettingsRequest {
    pub name: Option<String>,
    pub history_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FormulaVariableRequest {
    pub code: String,
    pub name: String,
    pub unit: f64,
    pub value: f64,
    #[serde(default)]
    pub role: VariableRole,
}

impl FormulaVariableRequest {
    pub fn into_variable(self) -> FormulaVariable {
        FormulaVariable {
            code: self.code,
            name: self.name,
            unit: self.unit,
            value: self.value,
            role: self.role,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DefineFormulaRequest {
    pub name: String,
    pub expression: String,
    #[serde(default)]
    pub variables: Vec<FormulaVariableRequest>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateExpressionRequest {
    pub expression: String,
}

#[derive(Debug, Deserialize)]
pub struct PreviewFormulaRequest {
    /// Ad-hoc overrides applied on top of the formula's stored bindings.
    #[serde(default)]
    pub overrides: std::collections::HashMap<String, f64>,
}

/// Pricing profile as submitted by clients.
///
/// Ceiling/floor arrive as raw numbers where `0` (or below) means "unset".
#[derive(Debug, Deserialize)]
pub struct PricingProfileRequest {
    #[serde(default)]
    pub source: PriceSource,
    #[serde(default = "default_base_quantity")]
    pub base_quantity: f64,
    #[serde(default)]
    pub profit: Option<ProfitSpec>,
    #[serde(default)]
    pub rounding: Option<RoundingSpec>,
    #[serde(default)]
    pub ceiling: f64,
    #[serde(default)]
    pub floor: f64,
}

fn default_base_quantity() -> f64 {
    1.0
}

impl PricingProfileRequest {
    pub fn into_profile(self) -> PricingProfile {
        PricingProfile {
            source: self.source,
            base_quantity: self.base_quantity,
            profit: self.profit.unwrap_or_default(),
            rounding: self.rounding.unwrap_or_default(),
            limits: PriceLimits::from_unset_zero(self.ceiling, self.floor),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub pricing: Option<PricingProfileRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AddOrderLineRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct IngestRateEntry {
    pub code: String,
    pub value: f64,
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRatesRequest {
    pub provider: String,
    pub rates: Vec<IngestRateEntry>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn currency_to_json(rm: &CurrencyReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.currency_id.0.to_string(),
        "code": rm.code,
        "name": rm.name,
        "unit_symbol": rm.unit_symbol,
        "history_limit": rm.history_limit,
        "current_value": rm.current_value,
        "previous_value": rm.previous_value,
        "trend": rm.trend,
        "updated_at": rm.updated_at,
        "retired": rm.retired,
    })
}

pub fn currency_history_to_json(rm: &CurrencyReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.currency_id.0.to_string(),
        "code": rm.code,
        "history_limit": rm.history_limit,
        "observations": rm.history,
    })
}

pub fn formula_to_json(rm: &FormulaReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.formula_id.0.to_string(),
        "name": rm.name,
        "expression": rm.expression,
        "variables": rm.variables,
        "archived": rm.archived,
    })
}

pub fn product_to_json(rm: &ProductReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.product_id.0.to_string(),
        "sku": rm.sku,
        "name": rm.name,
        "status": rm.status,
        "pricing": rm.pricing,
    })
}

pub fn order_to_json(rm: &OrderReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.order_id.0.to_string(),
        "status": rm.status,
        "lines": rm.lines,
        "total": rm.total,
    })
}

pub fn quote_to_json(quote: &PriceQuote) -> serde_json::Value {
    serde_json::json!({
        "product_id": quote.product_id.0.to_string(),
        "price": quote.price,
        "rate": quote.rate,
        "source": quote.source,
        "degraded": quote.degraded,
        "computed_at": quote.computed_at,
    })
}
