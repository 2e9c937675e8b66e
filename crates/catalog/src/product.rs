use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rateforge_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use rateforge_events::Event;
use rateforge_formulas::FormulaId;
use rateforge_pricing::{PriceLimits, ProfitSpec, RoundingSpec};
use rateforge_rates::CurrencyId;

/// Product identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

/// Where a product's rate comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PriceSource {
    /// Conventionally priced; the quote pipeline does not apply.
    #[default]
    None,
    /// Latest observation of a registered currency/commodity.
    Currency { currency_id: CurrencyId },
    /// Fail-closed evaluation of a pricing formula.
    Formula { formula_id: FormulaId },
}

/// How a product's sell price is derived from a rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingProfile {
    #[serde(default)]
    pub source: PriceSource,
    /// Rate-bearing quantity (e.g. weight in grams). Multiplied by the rate.
    pub base_quantity: f64,
    #[serde(default)]
    pub profit: ProfitSpec,
    #[serde(default)]
    pub rounding: RoundingSpec,
    #[serde(default)]
    pub limits: PriceLimits,
}

impl Default for PricingProfile {
    fn default() -> Self {
        Self {
            source: PriceSource::None,
            base_quantity: 1.0,
            profit: ProfitSpec::default(),
            rounding: RoundingSpec::default(),
            limits: PriceLimits::default(),
        }
    }
}

impl PricingProfile {
    fn validate(&self) -> Result<(), DomainError> {
        if !self.base_quantity.is_finite() || self.base_quantity < 0.0 {
            return Err(DomainError::validation(
                "base quantity must be finite and non-negative",
            ));
        }
        let profit_value = match self.profit {
            ProfitSpec::Percent(v) | ProfitSpec::Fixed(v) => v,
        };
        if !profit_value.is_finite() {
            return Err(DomainError::validation("profit value must be finite"));
        }
        if !self.rounding.step.is_finite() || self.rounding.step < 0.0 {
            return Err(DomainError::validation(
                "rounding step must be finite and non-negative",
            ));
        }
        if let (Some(ceiling), Some(floor)) = (self.limits.ceiling, self.limits.floor) {
            if ceiling < floor {
                return Err(DomainError::validation("ceiling cannot be below floor"));
            }
        }
        Ok(())
    }
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    sku: String,
    name: String,
    status: ProductStatus,
    pricing: PricingProfile,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: String::new(),
            name: String::new(),
            status: ProductStatus::Draft,
            pricing: PricingProfile::default(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn pricing(&self) -> &PricingProfile {
        &self.pricing
    }

    /// Check if product can be sold (must be Active, not Archived).
    pub fn can_be_sold(&self) -> bool {
        self.status == ProductStatus::Active
    }

    /// Whether the quote pipeline applies to this product.
    pub fn has_dynamic_price(&self) -> bool {
        !matches!(self.pricing.source, PriceSource::None)
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub pricing: Option<PricingProfile>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ActivateProduct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveProduct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetPricingProfile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPricingProfile {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub pricing: PricingProfile,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    ActivateProduct(ActivateProduct),
    ArchiveProduct(ArchiveProduct),
    SetPricingProfile(SetPricingProfile),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub pricing: PricingProfile,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductActivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductActivated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductArchived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PricingProfileSet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingProfileSet {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub pricing: PricingProfile,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductActivated(ProductActivated),
    ProductArchived(ProductArchived),
    PricingProfileSet(PricingProfileSet),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "catalog.product.created",
            ProductEvent::ProductActivated(_) => "catalog.product.activated",
            ProductEvent::ProductArchived(_) => "catalog.product.archived",
            ProductEvent::PricingProfileSet(_) => "catalog.product.pricing_profile_set",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductActivated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
            ProductEvent::PricingProfileSet(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.status = ProductStatus::Draft;
                self.pricing = e.pricing;
                self.created = true;
            }
            ProductEvent::ProductActivated(_) => {
                self.status = ProductStatus::Active;
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
            ProductEvent::PricingProfileSet(e) => {
                self.pricing = e.pricing;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::ActivateProduct(cmd) => self.handle_activate(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
            ProductCommand::SetPricingProfile(cmd) => self.handle_set_pricing(cmd),
        }
    }
}

impl Product {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }

        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }

        let pricing = cmd.pricing.unwrap_or_default();
        pricing.validate()?;

        // SKU uniqueness per tenant needs read-model support; the aggregate
        // can only enforce non-emptiness.

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: cmd.sku.trim().to_string(),
            name: cmd.name.trim().to_string(),
            pricing,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Active {
            return Err(DomainError::conflict("product is already active"));
        }

        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot be activated"));
        }

        Ok(vec![ProductEvent::ProductActivated(ProductActivated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product is already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_pricing(&self, cmd: &SetPricingProfile) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot be repriced"));
        }

        cmd.pricing.validate()?;

        Ok(vec![ProductEvent::PricingProfileSet(PricingProfileSet {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            pricing: cmd.pricing,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rateforge_core::AggregateId;
    use rateforge_events::execute;
    use rateforge_pricing::{RoundDirection, RoundingMode};

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn currency_profile() -> PricingProfile {
        PricingProfile {
            source: PriceSource::Currency {
                currency_id: CurrencyId::new(AggregateId::new()),
            },
            base_quantity: 2.5,
            profit: ProfitSpec::Percent(10.0),
            rounding: RoundingSpec {
                mode: RoundingMode::Step,
                direction: RoundDirection::Up,
                step: 500.0,
            },
            limits: PriceLimits::new(Some(1_000_000.0), None),
        }
    }

    fn created_product(pricing: Option<PricingProfile>) -> (Product, TenantId, ProductId) {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = Product::empty(product_id);
        execute(
            &mut product,
            &ProductCommand::CreateProduct(CreateProduct {
                tenant_id,
                product_id,
                sku: "RING-18K-01".to_string(),
                name: "18k gold ring".to_string(),
                pricing,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        (product, tenant_id, product_id)
    }

    #[test]
    fn create_product_defaults_to_conventional_pricing() {
        let (product, _, _) = created_product(None);
        assert!(!product.has_dynamic_price());
        assert_eq!(product.status(), ProductStatus::Draft);
    }

    #[test]
    fn create_product_with_currency_profile() {
        let profile = currency_profile();
        let (product, _, _) = created_product(Some(profile));
        assert!(product.has_dynamic_price());
        assert_eq!(product.pricing(), &profile);
    }

    #[test]
    fn create_product_rejects_empty_name_and_sku() {
        for (sku, name) in [("   ", "Name"), ("SKU", "  ")] {
            let product = Product::empty(test_product_id());
            let cmd = ProductCommand::CreateProduct(CreateProduct {
                tenant_id: test_tenant_id(),
                product_id: product.id_typed(),
                sku: sku.to_string(),
                name: name.to_string(),
                pricing: None,
                occurred_at: test_time(),
            });
            assert!(matches!(product.handle(&cmd), Err(DomainError::Validation(_))));
        }
    }

    #[test]
    fn create_product_rejects_duplicate_creation() {
        let (product, tenant_id, product_id) = created_product(None);
        let cmd = ProductCommand::CreateProduct(CreateProduct {
            tenant_id,
            product_id,
            sku: "X".to_string(),
            name: "Y".to_string(),
            pricing: None,
            occurred_at: test_time(),
        });
        assert!(matches!(product.handle(&cmd), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn invalid_profiles_are_rejected() {
        let bad_profiles = [
            PricingProfile {
                base_quantity: -1.0,
                ..PricingProfile::default()
            },
            PricingProfile {
                base_quantity: f64::NAN,
                ..PricingProfile::default()
            },
            PricingProfile {
                profit: ProfitSpec::Percent(f64::INFINITY),
                ..PricingProfile::default()
            },
            PricingProfile {
                rounding: RoundingSpec {
                    mode: RoundingMode::Step,
                    direction: RoundDirection::Nearest,
                    step: -2.0,
                },
                ..PricingProfile::default()
            },
            PricingProfile {
                limits: PriceLimits::new(Some(100.0), Some(200.0)),
                ..PricingProfile::default()
            },
        ];

        for profile in bad_profiles {
            let product = Product::empty(test_product_id());
            let cmd = ProductCommand::CreateProduct(CreateProduct {
                tenant_id: test_tenant_id(),
                product_id: product.id_typed(),
                sku: "SKU".to_string(),
                name: "Name".to_string(),
                pricing: Some(profile),
                occurred_at: test_time(),
            });
            assert!(
                matches!(product.handle(&cmd), Err(DomainError::Validation(_))),
                "profile {profile:?}"
            );
        }
    }

    #[test]
    fn set_pricing_profile_replaces_the_profile() {
        let (mut product, tenant_id, product_id) = created_product(None);
        let profile = currency_profile();
        execute(
            &mut product,
            &ProductCommand::SetPricingProfile(SetPricingProfile {
                tenant_id,
                product_id,
                pricing: profile,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(product.pricing(), &profile);
    }

    #[test]
    fn archived_products_reject_repricing() {
        let (mut product, tenant_id, product_id) = created_product(None);
        execute(
            &mut product,
            &ProductCommand::ArchiveProduct(ArchiveProduct {
                tenant_id,
                product_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let cmd = ProductCommand::SetPricingProfile(SetPricingProfile {
            tenant_id,
            product_id,
            pricing: currency_profile(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            product.handle(&cmd),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn lifecycle_activate_then_archive() {
        let (mut product, tenant_id, product_id) = created_product(None);
        assert!(!product.can_be_sold());

        execute(
            &mut product,
            &ProductCommand::ActivateProduct(ActivateProduct {
                tenant_id,
                product_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(product.can_be_sold());

        // Re-activation conflicts.
        let cmd = ProductCommand::ActivateProduct(ActivateProduct {
            tenant_id,
            product_id,
            occurred_at: test_time(),
        });
        assert!(matches!(product.handle(&cmd), Err(DomainError::Conflict(_))));

        execute(
            &mut product,
            &ProductCommand::ArchiveProduct(ArchiveProduct {
                tenant_id,
                product_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(!product.can_be_sold());

        // Archived products cannot be re-activated.
        let cmd = ProductCommand::ActivateProduct(ActivateProduct {
            tenant_id,
            product_id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            product.handle(&cmd),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn wrong_tenant_is_an_invariant_violation() {
        let (product, _, product_id) = created_product(None);
        let cmd = ProductCommand::ArchiveProduct(ArchiveProduct {
            tenant_id: test_tenant_id(),
            product_id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            product.handle(&cmd),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn version_increments_on_apply() {
        let (mut product, tenant_id, product_id) = created_product(None);
        assert_eq!(product.version(), 1);

        execute(
            &mut product,
            &ProductCommand::SetPricingProfile(SetPricingProfile {
                tenant_id,
                product_id,
                pricing: currency_profile(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(product.version(), 2);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: handle is pure - invoking it never mutates state.
            #[test]
            fn handle_does_not_mutate_state(
                sku in "[A-Z0-9-]{1,20}",
                name in "[A-Za-z][A-Za-z0-9 ]{0,40}",
            ) {
                let tenant_id = test_tenant_id();
                let product_id = test_product_id();
                let mut product = Product::empty(product_id);
                execute(
                    &mut product,
                    &ProductCommand::CreateProduct(CreateProduct {
                        tenant_id,
                        product_id,
                        sku,
                        name,
                        pricing: None,
                        occurred_at: test_time(),
                    }),
                )
                .unwrap();

                let before = product.clone();
                let cmd = ProductCommand::ActivateProduct(ActivateProduct {
                    tenant_id,
                    product_id,
                    occurred_at: test_time(),
                });
                let first = product.handle(&cmd);
                let second = product.handle(&cmd);

                prop_assert_eq!(&product, &before);
                prop_assert_eq!(first.is_ok(), second.is_ok());
            }

            /// Property: apply is deterministic - replaying the same events
            /// yields identical state.
            #[test]
            fn apply_is_deterministic(
                sku in "[A-Z0-9-]{1,20}",
                name in "[A-Za-z][A-Za-z0-9 ]{0,40}",
            ) {
                let tenant_id = test_tenant_id();
                let product_id = test_product_id();
                let events = vec![
                    ProductEvent::ProductCreated(ProductCreated {
                        tenant_id,
                        product_id,
                        sku,
                        name,
                        pricing: PricingProfile::default(),
                        occurred_at: test_time(),
                    }),
                    ProductEvent::ProductActivated(ProductActivated {
                        tenant_id,
                        product_id,
                        occurred_at: test_time(),
                    }),
                ];

                let mut a = Product::empty(product_id);
                let mut b = Product::empty(product_id);
                for ev in &events {
                    a.apply(ev);
                    b.apply(ev);
                }
                prop_assert_eq!(a.version(), b.version());
                prop_assert_eq!(a.status(), b.status());
                prop_assert_eq!(a.sku(), b.sku());
            }
        }
    }
}
