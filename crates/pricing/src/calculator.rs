//! Price computation pipeline.
//!
//! Sell prices are derived in four steps, in this order:
//!
//! 1. raw price from base quantity x rate, with profit applied
//! 2. rounding (none / whole units / step snapping)
//! 3. ceiling/floor limits
//! 4. clamp to a minimum of zero
//!
//! All arithmetic is `f64`; the pipeline never returns NaN for finite inputs
//! (a NaN intermediate collapses to `0.0` at the final clamp).

use serde::{Deserialize, Serialize};

/// How profit is added on top of `base * rate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ProfitSpec {
    /// Percentage margin. Values at or below -100 clamp the multiplier to zero.
    Percent(f64),
    /// Flat amount added after the rate conversion.
    Fixed(f64),
}

impl Default for ProfitSpec {
    fn default() -> Self {
        Self::Percent(0.0)
    }
}

/// Rounding family applied to the raw price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    /// Leave the raw price untouched.
    #[default]
    None,
    /// Round to the nearest whole unit (direction does not apply).
    Integer,
    /// Snap to the nearest multiple of `step`, directed by [`RoundDirection`].
    Step,
}

/// Direction used by step rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoundDirection {
    #[default]
    Nearest,
    Up,
    Down,
}

/// Full rounding specification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RoundingSpec {
    #[serde(default)]
    pub mode: RoundingMode,
    #[serde(default)]
    pub direction: RoundDirection,
    /// Step size for [`RoundingMode::Step`]. A non-positive step degrades to
    /// no rounding rather than erroring.
    #[serde(default)]
    pub step: f64,
}

impl RoundingSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn integer() -> Self {
        Self {
            mode: RoundingMode::Integer,
            ..Self::default()
        }
    }

    pub fn step(step: f64, direction: RoundDirection) -> Self {
        Self {
            mode: RoundingMode::Step,
            direction,
            step,
        }
    }

    fn apply(&self, value: f64) -> f64 {
        match self.mode {
            RoundingMode::None => value,
            RoundingMode::Integer => value.round(),
            RoundingMode::Step => {
                if self.step <= 0.0 || !self.step.is_finite() {
                    return value;
                }
                let factor = 1.0 / self.step;
                let scaled = value * factor;
                let snapped = match self.direction {
                    RoundDirection::Nearest => scaled.round(),
                    RoundDirection::Up => scaled.ceil(),
                    RoundDirection::Down => scaled.floor(),
                };
                snapped / factor
            }
        }
    }
}

/// Optional ceiling/floor limits.
///
/// Internally a missing limit is `None`; at the DTO boundary a limit of `0`
/// (or below) means "unset".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PriceLimits {
    pub ceiling: Option<f64>,
    pub floor: Option<f64>,
}

impl PriceLimits {
    pub fn new(ceiling: Option<f64>, floor: Option<f64>) -> Self {
        Self { ceiling, floor }
    }

    /// Build limits from raw values where `<= 0` means "unset".
    pub fn from_unset_zero(ceiling: f64, floor: f64) -> Self {
        let normalize = |v: f64| if v > 0.0 && v.is_finite() { Some(v) } else { None };
        Self {
            ceiling: normalize(ceiling),
            floor: normalize(floor),
        }
    }

    /// Clamp `value` into the configured window.
    ///
    /// Idempotent: clamping an already-clamped value changes nothing.
    pub fn clamp(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(ceiling) = self.ceiling {
            if v > ceiling {
                v = ceiling;
            }
        }
        if let Some(floor) = self.floor {
            if v < floor {
                v = floor;
            }
        }
        v
    }
}

fn apply_profit(base: f64, rate: f64, profit: &ProfitSpec) -> f64 {
    match *profit {
        ProfitSpec::Percent(p) => {
            // Margins below -100% would price the product negative; the
            // multiplier bottoms out at zero instead.
            let multiplier = 1.0 + p.max(-100.0) / 100.0;
            base * rate * multiplier
        }
        ProfitSpec::Fixed(f) => base * rate + f,
    }
}

/// Compute a sell price from a base quantity and a rate.
///
/// `base` is the product's rate-bearing quantity (e.g. weight in grams),
/// `rate` the current per-unit rate (from a currency observation or a formula
/// evaluation). The result is rounded, limited, and never negative.
pub fn compute_price(
    base: f64,
    rate: f64,
    profit: &ProfitSpec,
    rounding: &RoundingSpec,
    limits: &PriceLimits,
) -> f64 {
    let raw = apply_profit(base, rate, profit);
    let rounded = rounding.apply(raw);
    let limited = limits.clamp(rounded);
    // f64::max treats NaN as "the other operand", so a poisoned intermediate
    // collapses to zero here instead of leaking NaN to callers.
    limited.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "expected {b}, got {a}");
    }

    #[test]
    fn percent_profit_matches_closed_form() {
        let price = compute_price(
            2.0,
            150.0,
            &ProfitSpec::Percent(10.0),
            &RoundingSpec::none(),
            &PriceLimits::default(),
        );
        assert_close(price, 2.0 * 150.0 * 1.1);
    }

    #[test]
    fn fixed_profit_is_added_after_rate_conversion() {
        let price = compute_price(
            3.0,
            100.0,
            &ProfitSpec::Fixed(25.0),
            &RoundingSpec::none(),
            &PriceLimits::default(),
        );
        assert_close(price, 325.0);
    }

    #[test]
    fn percent_profit_at_or_below_minus_hundred_clamps_to_zero() {
        for p in [-100.0, -150.0, -1e9] {
            let price = compute_price(
                5.0,
                40.0,
                &ProfitSpec::Percent(p),
                &RoundingSpec::none(),
                &PriceLimits::default(),
            );
            assert_close(price, 0.0);
        }
    }

    #[test]
    fn integer_rounding_snaps_to_nearest_whole_unit() {
        let spec = RoundingSpec::integer();
        assert_close(spec.apply(10.4), 10.0);
        assert_close(spec.apply(10.5), 11.0);
        assert_close(spec.apply(-0.2), 0.0);
    }

    #[test]
    fn step_rounding_up_returns_next_multiple() {
        let spec = RoundingSpec::step(500.0, RoundDirection::Up);
        assert_close(spec.apply(1201.0), 1500.0);
        assert_close(spec.apply(1500.0), 1500.0);
    }

    #[test]
    fn step_rounding_down_returns_previous_multiple() {
        let spec = RoundingSpec::step(500.0, RoundDirection::Down);
        assert_close(spec.apply(1999.0), 1500.0);
        assert_close(spec.apply(2000.0), 2000.0);
    }

    #[test]
    fn step_rounding_nearest_picks_closest_multiple() {
        let spec = RoundingSpec::step(250.0, RoundDirection::Nearest);
        assert_close(spec.apply(1120.0), 1000.0);
        assert_close(spec.apply(1130.0), 1250.0);
    }

    #[test]
    fn fractional_steps_are_supported() {
        let spec = RoundingSpec::step(0.05, RoundDirection::Nearest);
        assert_close(spec.apply(9.97), 9.95);
        assert_close(spec.apply(9.98), 10.0);
    }

    #[test]
    fn non_positive_step_degrades_to_no_rounding() {
        let spec = RoundingSpec::step(0.0, RoundDirection::Up);
        assert_close(spec.apply(123.456), 123.456);

        let spec = RoundingSpec::step(-5.0, RoundDirection::Down);
        assert_close(spec.apply(123.456), 123.456);
    }

    #[test]
    fn ceiling_caps_the_price() {
        let price = compute_price(
            1.0,
            10_000.0,
            &ProfitSpec::Percent(0.0),
            &RoundingSpec::none(),
            &PriceLimits::new(Some(9_000.0), None),
        );
        assert_close(price, 9_000.0);
    }

    #[test]
    fn floor_raises_the_price() {
        let price = compute_price(
            1.0,
            100.0,
            &ProfitSpec::Percent(0.0),
            &RoundingSpec::none(),
            &PriceLimits::new(None, Some(250.0)),
        );
        assert_close(price, 250.0);
    }

    #[test]
    fn zero_limit_means_unset() {
        let limits = PriceLimits::from_unset_zero(0.0, 0.0);
        assert_eq!(limits, PriceLimits::default());

        let limits = PriceLimits::from_unset_zero(500.0, 0.0);
        assert_eq!(limits.ceiling, Some(500.0));
        assert_eq!(limits.floor, None);
    }

    #[test]
    fn clamping_is_idempotent() {
        let limits = PriceLimits::new(Some(900.0), Some(100.0));
        for v in [-5.0, 50.0, 500.0, 5_000.0] {
            let once = limits.clamp(v);
            assert_close(limits.clamp(once), once);
        }
    }

    #[test]
    fn final_price_is_never_negative() {
        let price = compute_price(
            1.0,
            10.0,
            &ProfitSpec::Fixed(-1_000.0),
            &RoundingSpec::none(),
            &PriceLimits::default(),
        );
        assert_close(price, 0.0);
    }

    #[test]
    fn rounding_happens_before_limits() {
        // Raw 980 rounds up to 1000, then the ceiling pulls it back to 990.
        let price = compute_price(
            1.0,
            980.0,
            &ProfitSpec::Percent(0.0),
            &RoundingSpec::step(1000.0, RoundDirection::Up),
            &PriceLimits::new(Some(990.0), None),
        );
        assert_close(price, 990.0);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// Property: percent pricing equals the closed form for p > -100.
            #[test]
            fn percent_price_matches_closed_form(
                base in 0.0f64..1e6,
                rate in 0.0f64..1e6,
                p in -99.9f64..1e4,
            ) {
                let price = compute_price(
                    base,
                    rate,
                    &ProfitSpec::Percent(p),
                    &RoundingSpec::none(),
                    &PriceLimits::default(),
                );
                let expected = (base * rate * (1.0 + p / 100.0)).max(0.0);
                prop_assert!((price - expected).abs() <= 1e-6 * expected.abs().max(1.0));
            }

            /// Property: step-up rounding returns a multiple of step >= raw.
            #[test]
            fn step_up_is_a_multiple_not_below_raw(
                raw in 0.0f64..1e6,
                step in 0.01f64..1e4,
            ) {
                let spec = RoundingSpec::step(step, RoundDirection::Up);
                let rounded = spec.apply(raw);
                let tolerance = 1e-6 * raw.abs().max(step);
                prop_assert!(rounded >= raw - tolerance);
                let remainder = (rounded / step) - (rounded / step).round();
                prop_assert!(remainder.abs() < 1e-6);
            }

            /// Property: step-down rounding returns a multiple of step <= raw.
            #[test]
            fn step_down_is_a_multiple_not_above_raw(
                raw in 0.0f64..1e6,
                step in 0.01f64..1e4,
            ) {
                let spec = RoundingSpec::step(step, RoundDirection::Down);
                let rounded = spec.apply(raw);
                let tolerance = 1e-6 * raw.abs().max(step);
                prop_assert!(rounded <= raw + tolerance);
                let remainder = (rounded / step) - (rounded / step).round();
                prop_assert!(remainder.abs() < 1e-6);
            }

            /// Property: limit clamping is idempotent.
            #[test]
            fn clamping_is_idempotent(
                value in -1e9f64..1e9,
                floor in 0.0f64..1e6,
                spread in 0.0f64..1e6,
            ) {
                let limits = PriceLimits::new(Some(floor + spread), Some(floor));
                let once = limits.clamp(value);
                prop_assert_eq!(limits.clamp(once), once);
            }

            /// Property: the pipeline output is finite and non-negative for
            /// finite non-negative inputs.
            #[test]
            fn price_is_finite_and_non_negative(
                base in 0.0f64..1e6,
                rate in 0.0f64..1e6,
                p in -1e4f64..1e4,
                step in 0.0f64..1e3,
            ) {
                let price = compute_price(
                    base,
                    rate,
                    &ProfitSpec::Percent(p),
                    &RoundingSpec::step(step, RoundDirection::Nearest),
                    &PriceLimits::default(),
                );
                prop_assert!(price.is_finite());
                prop_assert!(price >= 0.0);
            }
        }
    }
}
