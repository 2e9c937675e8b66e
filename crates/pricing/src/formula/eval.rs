//! AST evaluation over `f64`.

use super::FormulaError;
use super::parser::{BinOp, Expr};

/// Evaluate a parsed expression.
///
/// Division/modulo by zero and non-finite results are errors; callers on
/// public quote paths map them to `0.0`.
pub fn evaluate(expr: &Expr) -> Result<f64, FormulaError> {
    let value = eval_node(expr)?;
    if !value.is_finite() {
        return Err(FormulaError::Eval(format!("non-finite result: {value}")));
    }
    Ok(value)
}

fn eval_node(expr: &Expr) -> Result<f64, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Neg(inner) => Ok(-eval_node(inner)?),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval_node(lhs)?;
            let r = eval_node(rhs)?;
            match op {
                BinOp::Add => Ok(l + r),
                BinOp::Sub => Ok(l - r),
                BinOp::Mul => Ok(l * r),
                BinOp::Div => {
                    if r == 0.0 {
                        return Err(FormulaError::Eval("division by zero".to_string()));
                    }
                    Ok(l / r)
                }
                BinOp::Rem => {
                    if r == 0.0 {
                        return Err(FormulaError::Eval("modulo by zero".to_string()));
                    }
                    Ok(l % r)
                }
                BinOp::Pow => Ok(l.powf(r)),
            }
        }
        Expr::Call { function, args } => call(function, args),
    }
}

fn call(function: &str, args: &[Expr]) -> Result<f64, FormulaError> {
    let values: Vec<f64> = args.iter().map(eval_node).collect::<Result<_, _>>()?;

    let unary = |values: &[f64]| -> Result<f64, FormulaError> {
        match values {
            [v] => Ok(*v),
            _ => Err(FormulaError::Eval(format!(
                "{function} takes exactly one argument, got {}",
                values.len()
            ))),
        }
    };

    match function {
        "abs" => Ok(unary(&values)?.abs()),
        "ceil" => Ok(unary(&values)?.ceil()),
        "floor" => Ok(unary(&values)?.floor()),
        "round" => Ok(unary(&values)?.round()),
        "sqrt" => Ok(unary(&values)?.sqrt()),
        "min" | "max" => {
            if values.len() < 2 {
                return Err(FormulaError::Eval(format!(
                    "{function} takes at least two arguments, got {}",
                    values.len()
                )));
            }
            let mut acc = values[0];
            for v in &values[1..] {
                acc = if function == "min" { acc.min(*v) } else { acc.max(*v) };
            }
            Ok(acc)
        }
        other => Err(FormulaError::Eval(format!("unknown function: {other}"))),
    }
}
