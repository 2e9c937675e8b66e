//! Read-model projections.
//!
//! Projections consume tenant-scoped envelopes from the bus and maintain
//! queryable views. They are idempotent (duplicate envelopes are skipped via
//! per-stream cursors), reject cross-tenant payload mismatches, and can be
//! rebuilt from scratch by replaying the store.

pub mod cursors;
pub mod formula_directory;
pub mod order_book;
pub mod product_catalog;
pub mod rate_board;

pub use formula_directory::{FormulaDirectoryProjection, FormulaReadModel};
pub use order_book::{OrderBookProjection, OrderReadModel};
pub use product_catalog::{ProductCatalogProjection, ProductReadModel};
pub use rate_board::{CurrencyReadModel, RateBoardProjection};

use thiserror::Error;

/// Projection apply failure.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}
