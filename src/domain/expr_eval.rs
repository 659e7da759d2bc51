//! Expression evaluation.
//!
//! Evaluates a parsed [`Expr`] against a [`Context`]. Evaluation is pure: it
//! reads bindings and never writes them.
//!
//! # Evaluation Semantics
//!
//! - Arithmetic is `f64`; division or remainder by zero and non-finite
//!   results are errors
//! - `%` follows the sign of the divisor
//! - `==`/`!=` on numbers compare within `EPSILON`
//! - `and`/`or` short-circuit and require booleans on both sides
//! - Chained comparisons stop at the first pair that does not hold
//! - Strings and booleans support only `==`/`!=`; mixing types is an error

use crate::domain::context::Context;
use crate::domain::error::DslError;
use crate::domain::expr::{BinaryOp, Builtin, CompareOp, Expr, UnaryOp};
use crate::domain::expr_parser;
use crate::domain::value::Value;

pub const EPSILON: f64 = 1e-9;

pub fn evaluate(expr: &Expr, ctx: &Context) -> Result<Value, DslError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Text(s) => Ok(Value::Text(s.clone())),
        Expr::Variable(name) => ctx.get(name),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, ctx)?;
            match op {
                UnaryOp::Neg => Ok(Value::Number(-expect_number(&value, "-")?)),
                UnaryOp::Plus => Ok(Value::Number(expect_number(&value, "+")?)),
                UnaryOp::Not => Ok(Value::Bool(!expect_bool(&value, "not")?)),
            }
        }
        Expr::Binary { op, left, right } => {
            let symbol = op.to_string();
            let a = expect_number(&evaluate(left, ctx)?, &symbol)?;
            let b = expect_number(&evaluate(right, ctx)?, &symbol)?;
            arithmetic(*op, a, b).map(Value::Number)
        }
        Expr::Compare { first, rest } => {
            let mut lhs = evaluate(first, ctx)?;
            for (op, e) in rest {
                let rhs = evaluate(e, ctx)?;
                if !compare(&lhs, *op, &rhs)? {
                    return Ok(Value::Bool(false));
                }
                lhs = rhs;
            }
            Ok(Value::Bool(true))
        }
        Expr::And(left, right) => {
            if !expect_bool(&evaluate(left, ctx)?, "and")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(expect_bool(&evaluate(right, ctx)?, "and")?))
        }
        Expr::Or(left, right) => {
            if expect_bool(&evaluate(left, ctx)?, "or")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(expect_bool(&evaluate(right, ctx)?, "or")?))
        }
        Expr::Call { func, args } => call(*func, args, ctx),
    }
}

/// Evaluate a condition; anything but a boolean is an error.
pub fn evaluate_bool(expr: &Expr, ctx: &Context) -> Result<bool, DslError> {
    match evaluate(expr, ctx)? {
        Value::Bool(b) => Ok(b),
        other => Err(DslError::evaluation(format!(
            "condition '{}' evaluated to {} {}, expected a boolean",
            expr,
            other.type_name(),
            other
        ))),
    }
}

pub fn evaluate_number(expr: &Expr, ctx: &Context) -> Result<f64, DslError> {
    match evaluate(expr, ctx)? {
        Value::Number(n) => Ok(n),
        other => Err(DslError::evaluation(format!(
            "expression '{}' evaluated to {} {}, expected a number",
            expr,
            other.type_name(),
            other
        ))),
    }
}

/// Parse and evaluate `source` in one step.
pub fn evaluate_str(source: &str, ctx: &Context) -> Result<Value, DslError> {
    let expr = expr_parser::parse(source)?;
    evaluate(&expr, ctx)
}

fn expect_number(value: &Value, op: &str) -> Result<f64, DslError> {
    value.as_number().ok_or_else(|| {
        DslError::evaluation(format!(
            "operator '{}' expects a number, got {} {}",
            op,
            value.type_name(),
            value
        ))
    })
}

fn expect_bool(value: &Value, op: &str) -> Result<bool, DslError> {
    value.as_bool().ok_or_else(|| {
        DslError::evaluation(format!(
            "'{}' expects a boolean, got {} {}",
            op,
            value.type_name(),
            value
        ))
    })
}

fn arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<f64, DslError> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(DslError::evaluation(format!("division by zero: {} / 0", a)));
            }
            a / b
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                return Err(DslError::evaluation(format!("modulo by zero: {} % 0", a)));
            }
            a - b * (a / b).floor()
        }
        BinaryOp::Pow => a.powf(b),
    };
    if !result.is_finite() {
        return Err(DslError::evaluation(format!(
            "{} {} {} is not a finite number",
            a, op, b
        )));
    }
    Ok(result)
}

fn compare(lhs: &Value, op: CompareOp, rhs: &Value) -> Result<bool, DslError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(match op {
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Eq => (a - b).abs() < EPSILON,
            CompareOp::Ne => (a - b).abs() >= EPSILON,
        }),
        (Value::Bool(_), Value::Bool(_)) | (Value::Text(_), Value::Text(_)) => match op {
            CompareOp::Eq => Ok(lhs == rhs),
            CompareOp::Ne => Ok(lhs != rhs),
            _ => Err(DslError::evaluation(format!(
                "operator '{}' is not defined for {} values",
                op,
                lhs.type_name()
            ))),
        },
        _ => Err(DslError::evaluation(format!(
            "cannot compare {} {} with {} {}",
            lhs.type_name(),
            lhs,
            rhs.type_name(),
            rhs
        ))),
    }
}

fn call(func: Builtin, args: &[Expr], ctx: &Context) -> Result<Value, DslError> {
    let (min, max) = func.arity();
    if args.len() < min || max.map(|m| args.len() > m).unwrap_or(false) {
        return Err(DslError::evaluation(format!(
            "{}() called with {} argument(s)",
            func.name(),
            args.len()
        )));
    }

    let values = args
        .iter()
        .map(|a| evaluate(a, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    match func {
        Builtin::Min | Builtin::Max | Builtin::Abs => {
            let numbers = values
                .iter()
                .map(|v| expect_number(v, func.name()))
                .collect::<Result<Vec<_>, _>>()?;
            let result = match func {
                Builtin::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
                Builtin::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                _ => numbers[0].abs(),
            };
            Ok(Value::Number(result))
        }
        Builtin::Implies | Builtin::Iff | Builtin::Xor | Builtin::Nand | Builtin::Nor => {
            let a = expect_bool(&values[0], func.name())?;
            let b = expect_bool(&values[1], func.name())?;
            let result = match func {
                Builtin::Implies => !a || b,
                Builtin::Iff => a == b,
                Builtin::Xor => a != b,
                Builtin::Nand => !(a && b),
                _ => !(a || b),
            };
            Ok(Value::Bool(result))
        }
    }
}
