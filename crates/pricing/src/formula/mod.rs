//! Expression engine for user-authored pricing formulas.
//!
//! A formula is a small arithmetic expression over named variables, e.g.
//!
//! ```text
//! ([gold_18k] * [weight]) * (1 + [profit] / 100) + [charge]
//! ```
//!
//! Evaluation runs in fixed stages, each of which fails closed:
//!
//! 1. **Substitution** — `[code]` tokens are replaced with the bound value
//!    (case-insensitive). Unbound tokens abort the evaluation.
//! 2. **Whitelist** — after substitution the text may contain only digits,
//!    ASCII letters, `_ . + - * / ^ % ( ) ,` and whitespace. Anything else
//!    aborts. This is the hard safety boundary for untrusted input.
//! 3. **Parse** — recursive descent over the token stream (see [`parser`]).
//! 4. **Evaluate** — `f64` arithmetic; division/modulo by zero and non-finite
//!    results abort.
//!
//! Public quote paths use [`evaluate_or_zero`], which maps every failure to
//! `0.0` so a broken formula degrades to "no price" instead of an error page.
//! Command validation uses [`validate_expression`], which runs stages 1-3
//! only (a formula that divides by a zero-valued variable is structurally
//! fine; its quotes simply degrade until the variable is updated).

mod eval;
mod lexer;
mod parser;

use std::collections::HashMap;

use thiserror::Error;

/// Formula failure. Every variant maps to `0.0` on public quote paths.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    /// A `[code]` token had no binding.
    #[error("unbound variable: [{0}]")]
    UnboundVariable(String),

    /// A `[` without a matching `]`, or an empty `[]` token.
    #[error("malformed variable token: {0}")]
    MalformedToken(String),

    /// A character outside the post-substitution whitelist.
    #[error("forbidden character in expression: {0:?}")]
    ForbiddenCharacter(char),

    /// The expression did not parse.
    #[error("parse error: {0}")]
    Parse(String),

    /// Arithmetic failure (division by zero, non-finite result, bad call).
    #[error("evaluation error: {0}")]
    Eval(String),
}

/// Named values available to a formula, keyed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableBindings {
    values: HashMap<String, f64>,
}

impl VariableBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, code: impl AsRef<str>, value: f64) {
        self.values.insert(code.as_ref().to_ascii_lowercase(), value);
    }

    pub fn with(mut self, code: impl AsRef<str>, value: f64) -> Self {
        self.bind(code, value);
        self
    }

    pub fn get(&self, code: &str) -> Option<f64> {
        self.values.get(&code.to_ascii_lowercase()).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl<S: AsRef<str>> FromIterator<(S, f64)> for VariableBindings {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut bindings = Self::new();
        for (code, value) in iter {
            bindings.bind(code, value);
        }
        bindings
    }
}

/// Replace `[code]` tokens with their bound values.
///
/// Values are spliced in parenthesized (`(-3.25)`) so negative bindings keep
/// their sign under any surrounding operator.
fn substitute(expression: &str, bindings: &VariableBindings) -> Result<String, FormulaError> {
    let mut out = String::with_capacity(expression.len());
    let mut chars = expression.char_indices();

    while let Some((start, c)) = chars.next() {
        if c != '[' {
            out.push(c);
            continue;
        }

        let mut code = String::new();
        let mut closed = false;
        for (_, inner) in chars.by_ref() {
            if inner == ']' {
                closed = true;
                break;
            }
            code.push(inner);
        }

        if !closed {
            return Err(FormulaError::MalformedToken(format!(
                "unterminated '[' at offset {start}"
            )));
        }
        let code = code.trim();
        if code.is_empty() {
            return Err(FormulaError::MalformedToken(format!(
                "empty variable token at offset {start}"
            )));
        }

        let value = bindings
            .get(code)
            .ok_or_else(|| FormulaError::UnboundVariable(code.to_string()))?;

        // `{:?}` prints the shortest round-trip decimal form of an f64.
        out.push('(');
        out.push_str(&format!("{value:?}"));
        out.push(')');
    }

    Ok(out)
}

/// Reject any character outside the safe numeric/operator set.
fn check_charset(expression: &str) -> Result<(), FormulaError> {
    for c in expression.chars() {
        let allowed = c.is_ascii_alphanumeric()
            || c.is_whitespace()
            || matches!(c, '_' | '.' | '+' | '-' | '*' | '/' | '^' | '%' | '(' | ')' | ',');
        if !allowed {
            return Err(FormulaError::ForbiddenCharacter(c));
        }
    }
    Ok(())
}

/// Evaluate an expression against the given bindings.
pub fn evaluate(expression: &str, bindings: &VariableBindings) -> Result<f64, FormulaError> {
    let substituted = substitute(expression, bindings)?;
    check_charset(&substituted)?;
    let tokens = lexer::tokenize(&substituted)?;
    let ast = parser::parse(&tokens)?;
    eval::evaluate(&ast)
}

/// Evaluate, mapping every failure to `0.0` (fail-closed quote semantics).
pub fn evaluate_or_zero(expression: &str, bindings: &VariableBindings) -> f64 {
    evaluate(expression, bindings).unwrap_or(0.0)
}

/// Structural validation: substitution, whitelist, and parse - no arithmetic.
///
/// Used at command time so a formula definition with a zero-valued divisor
/// variable is accepted (its quotes degrade to zero until the value changes).
pub fn validate_expression(
    expression: &str,
    bindings: &VariableBindings,
) -> Result<(), FormulaError> {
    let substituted = substitute(expression, bindings)?;
    check_charset(&substituted)?;
    let tokens = lexer::tokenize(&substituted)?;
    parser::parse(&tokens)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold_bindings() -> VariableBindings {
        VariableBindings::new()
            .with("gold_18k", 4_250.0)
            .with("weight", 2.5)
            .with("profit", 12.0)
            .with("charge", 150.0)
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "expected {b}, got {a}");
    }

    #[test]
    fn evaluates_a_realistic_pricing_formula() {
        let expr = "([gold_18k] * [weight]) * (1 + [profit] / 100) + [charge]";
        let value = evaluate(expr, &gold_bindings()).unwrap();
        assert_close(value, 4_250.0 * 2.5 * 1.12 + 150.0);
    }

    #[test]
    fn variable_codes_match_case_insensitively() {
        let bindings = VariableBindings::new().with("USD", 42.0);
        assert_close(evaluate("[usd] + [Usd]", &bindings).unwrap(), 84.0);
    }

    #[test]
    fn operator_precedence_and_associativity() {
        let bindings = VariableBindings::new();
        assert_close(evaluate("2 + 3 * 4", &bindings).unwrap(), 14.0);
        assert_close(evaluate("2 * 3 ^ 2", &bindings).unwrap(), 18.0);
        // `^` is right-associative.
        assert_close(evaluate("2 ^ 3 ^ 2", &bindings).unwrap(), 512.0);
        assert_close(evaluate("10 - 4 - 3", &bindings).unwrap(), 3.0);
        assert_close(evaluate("10 % 4", &bindings).unwrap(), 2.0);
    }

    #[test]
    fn unary_minus_binds_tighter_than_addition() {
        let bindings = VariableBindings::new();
        assert_close(evaluate("-2 + 5", &bindings).unwrap(), 3.0);
        assert_close(evaluate("--4", &bindings).unwrap(), 4.0);
        // Conventional: -2^2 = -(2^2).
        assert_close(evaluate("-2 ^ 2", &bindings).unwrap(), -4.0);
    }

    #[test]
    fn negative_bindings_keep_their_sign() {
        let bindings = VariableBindings::new().with("adj", -3.0);
        assert_close(evaluate("2 * [adj]", &bindings).unwrap(), -6.0);
        assert_close(evaluate("10 - [adj]", &bindings).unwrap(), 13.0);
    }

    #[test]
    fn builtin_functions_work() {
        let bindings = VariableBindings::new();
        assert_close(evaluate("min(3, 8)", &bindings).unwrap(), 3.0);
        assert_close(evaluate("max(3, 8, 5)", &bindings).unwrap(), 8.0);
        assert_close(evaluate("abs(-4.5)", &bindings).unwrap(), 4.5);
        assert_close(evaluate("ceil(2.1)", &bindings).unwrap(), 3.0);
        assert_close(evaluate("floor(2.9)", &bindings).unwrap(), 2.0);
        assert_close(evaluate("round(2.5)", &bindings).unwrap(), 3.0);
        assert_close(evaluate("sqrt(16)", &bindings).unwrap(), 4.0);
    }

    #[test]
    fn unbound_variable_is_an_error() {
        let err = evaluate("[missing] * 2", &VariableBindings::new()).unwrap_err();
        assert_eq!(err, FormulaError::UnboundVariable("missing".to_string()));
    }

    #[test]
    fn forbidden_characters_are_rejected() {
        let bindings = VariableBindings::new();
        for expr in ["1 + 2; 3", "exec!", "2 > 1", "a = 4", "$100", "\"x\"", "1 & 2"] {
            match evaluate(expr, &bindings) {
                Err(FormulaError::ForbiddenCharacter(_)) => {}
                other => panic!("expected ForbiddenCharacter for {expr:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn forbidden_characters_quote_as_zero() {
        assert_eq!(evaluate_or_zero("1 + 2; drop", &VariableBindings::new()), 0.0);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let bindings = VariableBindings::new().with("x", 1.0);
        assert!(matches!(
            evaluate("[x * 2", &bindings),
            Err(FormulaError::MalformedToken(_))
        ));
        assert!(matches!(
            evaluate("[] + 2", &bindings),
            Err(FormulaError::MalformedToken(_))
        ));
    }

    #[test]
    fn parse_errors_quote_as_zero() {
        let bindings = VariableBindings::new();
        for expr in ["2 +", "* 3", "(1 + 2", "min(1,)", "2 2", ""] {
            assert_eq!(evaluate_or_zero(expr, &bindings), 0.0, "expr {expr:?}");
        }
    }

    #[test]
    fn division_by_zero_quotes_as_zero() {
        let bindings = VariableBindings::new().with("x", 0.0);
        assert_eq!(evaluate_or_zero("10 / [x]", &bindings), 0.0);
        assert_eq!(evaluate_or_zero("10 % [x]", &bindings), 0.0);
    }

    #[test]
    fn non_finite_results_quote_as_zero() {
        let bindings = VariableBindings::new();
        assert_eq!(evaluate_or_zero("10 ^ 10000", &bindings), 0.0);
        assert_eq!(evaluate_or_zero("sqrt(0 - 4)", &bindings), 0.0);
    }

    #[test]
    fn unknown_function_is_an_eval_error() {
        let err = evaluate("frobnicate(2)", &VariableBindings::new()).unwrap_err();
        assert!(matches!(err, FormulaError::Eval(_)), "got {err:?}");
    }

    #[test]
    fn validate_accepts_structurally_sound_expressions() {
        let bindings = VariableBindings::new().with("x", 0.0);
        // Divides by a zero-valued variable: structurally fine.
        validate_expression("10 / [x]", &bindings).unwrap();
    }

    #[test]
    fn validate_rejects_unbound_and_unparsable_expressions() {
        let bindings = VariableBindings::new().with("x", 1.0);
        assert!(validate_expression("[y] + 1", &bindings).is_err());
        assert!(validate_expression("[x] +", &bindings).is_err());
        assert!(validate_expression("[x] | 1", &bindings).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: any expression containing a character outside the
            /// whitelist quotes as zero, never panics, never evaluates.
            #[test]
            fn out_of_whitelist_input_quotes_as_zero(
                prefix in "[0-9+*/ ().]{0,12}",
                bad in "[;=&|!<>$#@'\"`~{}]",
                suffix in "[0-9+*/ ().]{0,12}",
            ) {
                let expr = format!("{prefix}{bad}{suffix}");
                prop_assert_eq!(evaluate_or_zero(&expr, &VariableBindings::new()), 0.0);
            }

            /// Property: evaluation never panics on arbitrary input.
            #[test]
            fn evaluation_never_panics(expr in ".{0,64}") {
                let bindings = VariableBindings::new().with("x", 2.0);
                let _ = evaluate_or_zero(&expr, &bindings);
            }

            /// Property: a bound variable round-trips through substitution.
            #[test]
            fn bound_variable_round_trips(value in -1e9f64..1e9) {
                let bindings = VariableBindings::new().with("v", value);
                let result = evaluate("[v]", &bindings).unwrap();
                prop_assert_eq!(result, value);
            }
        }
    }
}
