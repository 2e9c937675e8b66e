//! `rateforge-pricing` — the pure pricing core.
//!
//! Two pieces, no I/O in either:
//!
//! - [`calculator`]: the price computation pipeline (profit application,
//!   rounding, ceiling/floor limits, non-negative clamp).
//! - [`formula`]: the expression engine for user-authored pricing formulas
//!   (`[code]` substitution, character whitelist, parse, evaluate).
//!
//! Both are deterministic and side-effect free so they can be exercised
//! exhaustively with property tests.

pub mod calculator;
pub mod formula;

pub use calculator::{
    PriceLimits, ProfitSpec, RoundDirection, RoundingMode, RoundingSpec, compute_price,
};
pub use formula::{FormulaError, VariableBindings, evaluate, evaluate_or_zero, validate_expression};
