//! `rateforge-catalog` — products and their pricing profiles.
//!
//! A `Product` follows the usual draft → active → archived lifecycle. Its
//! `PricingProfile` decides how the sell price is derived: from a currency's
//! latest rate, from a formula evaluation, or not at all (conventional
//! pricing).

pub mod product;

pub use product::{
    ActivateProduct, ArchiveProduct, CreateProduct, PriceSource, PricingProfile,
    PricingProfileSet, Product, ProductActivated, ProductArchived, ProductCommand,
    ProductCreated, ProductEvent, ProductId, ProductStatus, SetPricingProfile,
};
