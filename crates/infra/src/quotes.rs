//! Price quote service.
//!
//! Resolves a product's pricing profile against the rate board / formula
//! directory and runs the pricing pipeline. Formula evaluation is fail-closed
//! on this path: a broken formula quotes as rate 0 with `degraded = true`
//! rather than erroring, and the failure is logged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use rateforge_catalog::{PriceSource, ProductId};
use rateforge_core::TenantId;
use rateforge_formulas::FormulaId;
use rateforge_pricing::compute_price;
use rateforge_rates::CurrencyId;

use crate::projections::{
    CurrencyReadModel, FormulaDirectoryProjection, FormulaReadModel, ProductCatalogProjection,
    ProductReadModel, RateBoardProjection,
};
use crate::read_model::TenantStore;

/// A computed sell price with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceQuote {
    pub product_id: ProductId,
    pub price: f64,
    /// The rate fed into the pipeline (0 when degraded).
    pub rate: f64,
    pub source: PriceSource,
    /// True when a formula failed to evaluate and quoted as zero.
    pub degraded: bool,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuoteError {
    #[error("product not found")]
    UnknownProduct,

    #[error("product is not dynamically priced")]
    NotDynamicallyPriced,

    #[error("currency not found")]
    UnknownCurrency,

    #[error("currency is retired")]
    RetiredCurrency,

    #[error("currency has no recorded rate yet")]
    NoRateRecorded,

    #[error("formula not found")]
    UnknownFormula,

    #[error("formula is archived")]
    ArchivedFormula,
}

/// Read-side price computation over the projections.
#[derive(Debug)]
pub struct PriceQuoter<CS, FS, PS>
where
    CS: TenantStore<CurrencyId, CurrencyReadModel>,
    FS: TenantStore<FormulaId, FormulaReadModel>,
    PS: TenantStore<ProductId, ProductReadModel>,
{
    rate_board: Arc<RateBoardProjection<CS>>,
    formulas: Arc<FormulaDirectoryProjection<FS>>,
    catalog: Arc<ProductCatalogProjection<PS>>,
}

impl<CS, FS, PS> PriceQuoter<CS, FS, PS>
where
    CS: TenantStore<CurrencyId, CurrencyReadModel>,
    FS: TenantStore<FormulaId, FormulaReadModel>,
    PS: TenantStore<ProductId, ProductReadModel>,
{
    pub fn new(
        rate_board: Arc<RateBoardProjection<CS>>,
        formulas: Arc<FormulaDirectoryProjection<FS>>,
        catalog: Arc<ProductCatalogProjection<PS>>,
    ) -> Self {
        Self {
            rate_board,
            formulas,
            catalog,
        }
    }

    /// Quote the current sell price for a product.
    pub fn quote(&self, tenant_id: TenantId, product_id: &ProductId) -> Result<PriceQuote, QuoteError> {
        let product = self
            .catalog
            .get(tenant_id, product_id)
            .ok_or(QuoteError::UnknownProduct)?;

        let profile = &product.pricing;
        let (rate, degraded) = self.resolve_rate(tenant_id, &profile.source)?;

        let price = compute_price(
            profile.base_quantity,
            rate,
            &profile.profit,
            &profile.rounding,
            &profile.limits,
        );

        Ok(PriceQuote {
            product_id: product.product_id,
            price,
            rate,
            source: profile.source,
            degraded,
            computed_at: Utc::now(),
        })
    }

    fn resolve_rate(
        &self,
        tenant_id: TenantId,
        source: &PriceSource,
    ) -> Result<(f64, bool), QuoteError> {
        match source {
            PriceSource::None => Err(QuoteError::NotDynamicallyPriced),
            PriceSource::Currency { currency_id } => {
                let currency = self
                    .rate_board
                    .get(tenant_id, currency_id)
                    .ok_or(QuoteError::UnknownCurrency)?;
                if currency.retired {
                    return Err(QuoteError::RetiredCurrency);
                }
                let value = currency.current_value.ok_or(QuoteError::NoRateRecorded)?;
                Ok((value, false))
            }
            PriceSource::Formula { formula_id } => {
                let formula = self
                    .formulas
                    .get(tenant_id, formula_id)
                    .ok_or(QuoteError::UnknownFormula)?;
                if formula.archived {
                    return Err(QuoteError::ArchivedFormula);
                }
                match rateforge_pricing::evaluate(&formula.expression, &formula.bindings()) {
                    Ok(value) => Ok((value, false)),
                    Err(err) => {
                        tracing::warn!(
                            formula_id = %formula.formula_id,
                            error = %err,
                            "formula evaluation failed; quoting as zero"
                        );
                        Ok((0.0, true))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rateforge_catalog::{PricingProfile, ProductStatus};
    use rateforge_core::AggregateId;
    use rateforge_formulas::{FormulaVariable, VariableRole};
    use rateforge_pricing::{PriceLimits, ProfitSpec, RoundDirection, RoundingMode, RoundingSpec};
    use rateforge_rates::RateTrend;

    use crate::read_model::InMemoryTenantStore;

    type CurrencyStore = Arc<InMemoryTenantStore<CurrencyId, CurrencyReadModel>>;
    type FormulaStore = Arc<InMemoryTenantStore<FormulaId, FormulaReadModel>>;
    type ProductStore = Arc<InMemoryTenantStore<ProductId, ProductReadModel>>;

    struct Fixture {
        quoter: PriceQuoter<CurrencyStore, FormulaStore, ProductStore>,
        currency_store: CurrencyStore,
        formula_store: FormulaStore,
        product_store: ProductStore,
        tenant_id: TenantId,
    }

    fn fixture() -> Fixture {
        let currency_store: CurrencyStore = Arc::new(InMemoryTenantStore::new());
        let formula_store: FormulaStore = Arc::new(InMemoryTenantStore::new());
        let product_store: ProductStore = Arc::new(InMemoryTenantStore::new());

        let quoter = PriceQuoter::new(
            Arc::new(RateBoardProjection::new(currency_store.clone())),
            Arc::new(FormulaDirectoryProjection::new(formula_store.clone())),
            Arc::new(ProductCatalogProjection::new(product_store.clone())),
        );

        Fixture {
            quoter,
            currency_store,
            formula_store,
            product_store,
            tenant_id: TenantId::new(),
        }
    }

    fn currency_rm(currency_id: CurrencyId, value: Option<f64>, retired: bool) -> CurrencyReadModel {
        CurrencyReadModel {
            currency_id,
            code: "XAU".to_string(),
            name: "Gold".to_string(),
            unit_symbol: "g".to_string(),
            history_limit: 30,
            current_value: value,
            previous_value: None,
            trend: RateTrend::Flat,
            history: Vec::new(),
            updated_at: None,
            retired,
        }
    }

    fn product_rm(product_id: ProductId, pricing: PricingProfile) -> ProductReadModel {
        ProductReadModel {
            product_id,
            sku: "SKU".to_string(),
            name: "Product".to_string(),
            status: ProductStatus::Active,
            pricing,
        }
    }

    #[test]
    fn quotes_a_currency_priced_product() {
        let f = fixture();
        let currency_id = CurrencyId::new(AggregateId::new());
        let product_id = ProductId::new(AggregateId::new());

        f.currency_store
            .upsert(f.tenant_id, currency_id, currency_rm(currency_id, Some(4_000.0), false));
        f.product_store.upsert(
            f.tenant_id,
            product_id,
            product_rm(
                product_id,
                PricingProfile {
                    source: PriceSource::Currency { currency_id },
                    base_quantity: 2.0,
                    profit: ProfitSpec::Percent(10.0),
                    rounding: RoundingSpec::step(500.0, RoundDirection::Up),
                    limits: PriceLimits::default(),
                },
            ),
        );

        let quote = f.quoter.quote(f.tenant_id, &product_id).unwrap();
        // 2 * 4000 * 1.1 = 8800, stepped up to 9000.
        assert_eq!(quote.price, 9_000.0);
        assert_eq!(quote.rate, 4_000.0);
        assert!(!quote.degraded);
    }

    #[test]
    fn quotes_a_formula_priced_product() {
        let f = fixture();
        let formula_id = FormulaId::new(AggregateId::new());
        let product_id = ProductId::new(AggregateId::new());

        f.formula_store.upsert(
            f.tenant_id,
            formula_id,
            FormulaReadModel {
                formula_id,
                name: "gold".to_string(),
                expression: "[gram] * (1 + [profit] / 100)".to_string(),
                variables: vec![
                    FormulaVariable {
                        code: "gram".to_string(),
                        name: "gram".to_string(),
                        unit: 4_000.0,
                        value: 1.0,
                        role: VariableRole::Other,
                    },
                    FormulaVariable {
                        code: "profit".to_string(),
                        name: "profit".to_string(),
                        unit: 1.0,
                        value: 10.0,
                        role: VariableRole::Profit,
                    },
                ],
                archived: false,
            },
        );
        f.product_store.upsert(
            f.tenant_id,
            product_id,
            product_rm(
                product_id,
                PricingProfile {
                    source: PriceSource::Formula { formula_id },
                    base_quantity: 1.0,
                    profit: ProfitSpec::Percent(0.0),
                    rounding: RoundingSpec::none(),
                    limits: PriceLimits::default(),
                },
            ),
        );

        let quote = f.quoter.quote(f.tenant_id, &product_id).unwrap();
        assert!((quote.price - 4_400.0).abs() < 1e-9);
        assert!(!quote.degraded);
    }

    #[test]
    fn broken_formula_quotes_as_zero_and_flags_degraded() {
        let f = fixture();
        let formula_id = FormulaId::new(AggregateId::new());
        let product_id = ProductId::new(AggregateId::new());

        f.formula_store.upsert(
            f.tenant_id,
            formula_id,
            FormulaReadModel {
                formula_id,
                name: "broken".to_string(),
                expression: "10 / [zero]".to_string(),
                variables: vec![FormulaVariable {
                    code: "zero".to_string(),
                    name: "zero".to_string(),
                    unit: 1.0,
                    value: 0.0,
                    role: VariableRole::Other,
                }],
                archived: false,
            },
        );
        f.product_store.upsert(
            f.tenant_id,
            product_id,
            product_rm(
                product_id,
                PricingProfile {
                    source: PriceSource::Formula { formula_id },
                    base_quantity: 1.0,
                    profit: ProfitSpec::Fixed(0.0),
                    rounding: RoundingSpec::none(),
                    limits: PriceLimits::default(),
                },
            ),
        );

        let quote = f.quoter.quote(f.tenant_id, &product_id).unwrap();
        assert_eq!(quote.price, 0.0);
        assert!(quote.degraded);
    }

    #[test]
    fn floor_applies_even_when_degraded() {
        let f = fixture();
        let formula_id = FormulaId::new(AggregateId::new());
        let product_id = ProductId::new(AggregateId::new());

        f.formula_store.upsert(
            f.tenant_id,
            formula_id,
            FormulaReadModel {
                formula_id,
                name: "broken".to_string(),
                expression: "1 +".to_string(),
                variables: vec![],
                archived: false,
            },
        );
        f.product_store.upsert(
            f.tenant_id,
            product_id,
            product_rm(
                product_id,
                PricingProfile {
                    source: PriceSource::Formula { formula_id },
                    base_quantity: 1.0,
                    profit: ProfitSpec::Fixed(0.0),
                    rounding: RoundingSpec {
                        mode: RoundingMode::None,
                        ..RoundingSpec::default()
                    },
                    limits: PriceLimits::new(None, Some(100.0)),
                },
            ),
        );

        let quote = f.quoter.quote(f.tenant_id, &product_id).unwrap();
        assert_eq!(quote.price, 100.0);
        assert!(quote.degraded);
    }

    #[test]
    fn error_paths_are_typed() {
        let f = fixture();
        let product_id = ProductId::new(AggregateId::new());

        assert_eq!(
            f.quoter.quote(f.tenant_id, &product_id),
            Err(QuoteError::UnknownProduct)
        );

        // Conventional product: no quote.
        f.product_store.upsert(
            f.tenant_id,
            product_id,
            product_rm(product_id, PricingProfile::default()),
        );
        assert_eq!(
            f.quoter.quote(f.tenant_id, &product_id),
            Err(QuoteError::NotDynamicallyPriced)
        );

        // Currency without observations, then retired.
        let currency_id = CurrencyId::new(AggregateId::new());
        f.product_store.upsert(
            f.tenant_id,
            product_id,
            product_rm(
                product_id,
                PricingProfile {
                    source: PriceSource::Currency { currency_id },
                    ..PricingProfile::default()
                },
            ),
        );
        assert_eq!(
            f.quoter.quote(f.tenant_id, &product_id),
            Err(QuoteError::UnknownCurrency)
        );

        f.currency_store
            .upsert(f.tenant_id, currency_id, currency_rm(currency_id, None, false));
        assert_eq!(
            f.quoter.quote(f.tenant_id, &product_id),
            Err(QuoteError::NoRateRecorded)
        );

        f.currency_store
            .upsert(f.tenant_id, currency_id, currency_rm(currency_id, Some(1.0), true));
        assert_eq!(
            f.quoter.quote(f.tenant_id, &product_id),
            Err(QuoteError::RetiredCurrency)
        );
    }
}
