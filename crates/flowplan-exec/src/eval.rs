//! Row-level evaluation of expression sub-plans.
//!
//! Nulls propagate through comparisons and arithmetic; `AND`/`OR` use
//! three-valued logic; integer division by zero yields null.

use std::cmp::Ordering;

use flowplan_core::id::NodeId;
use flowplan_core::types::Value;
use flowplan_operators::{ArithOp, CompareOp, ExprOp, ExpressionPlan};

use crate::engine::ExecError;

/// Evaluate `expr` where projections of input `i` read `inputs[i]`.
pub fn eval(expr: &ExpressionPlan, inputs: &[&[Value]]) -> Result<Value, ExecError> {
    eval_node(expr, expr.root()?, inputs)
}

/// Only a true boolean passes a predicate.
pub fn holds(expr: &ExpressionPlan, inputs: &[&[Value]]) -> Result<bool, ExecError> {
    Ok(matches!(eval(expr, inputs)?, Value::Boolean(true)))
}

fn eval_node(expr: &ExpressionPlan, id: NodeId, inputs: &[&[Value]]) -> Result<Value, ExecError> {
    let op = expr.graph().node(id)?;
    let operands = expr.operands(id);
    let arg = |i: usize| -> Result<Value, ExecError> {
        let child = operands
            .get(i)
            .ok_or_else(|| ExecError::Eval(format!("operand {i} missing")))?;
        eval_node(expr, *child, inputs)
    };

    Ok(match op {
        ExprOp::Constant(v) => v.clone(),
        ExprOp::Project { input, column, .. } => inputs
            .get(*input)
            .and_then(|row| row.get(*column))
            .cloned()
            .unwrap_or(Value::Null),
        ExprOp::MapLookup { key } => match arg(0)? {
            Value::Map(m) => m.get(key).cloned().unwrap_or(Value::Null),
            Value::Null => Value::Null,
            other => return Err(type_error("map lookup", &other)),
        },
        ExprOp::Not => match truth(arg(0)?)? {
            Some(b) => Value::Boolean(!b),
            None => Value::Null,
        },
        ExprOp::IsNull => Value::Boolean(arg(0)?.is_null()),
        ExprOp::Negative => negate(arg(0)?)?,
        ExprOp::And => {
            let left = truth(arg(0)?)?;
            if left == Some(false) {
                return Ok(Value::Boolean(false));
            }
            match (left, truth(arg(1)?)?) {
                (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            }
        }
        ExprOp::Or => {
            let left = truth(arg(0)?)?;
            if left == Some(true) {
                return Ok(Value::Boolean(true));
            }
            match (left, truth(arg(1)?)?) {
                (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            }
        }
        ExprOp::Compare(c) => {
            let (a, b) = (arg(0)?, arg(1)?);
            if a.is_null() || b.is_null() {
                Value::Null
            } else {
                Value::Boolean(compare(*c, a.total_cmp(&b)))
            }
        }
        ExprOp::Arithmetic(a) => arithmetic(*a, arg(0)?, arg(1)?)?,
    })
}

fn type_error(what: &str, v: &Value) -> ExecError {
    let found = v.data_type().map(|t| t.name()).unwrap_or("null");
    ExecError::Eval(format!("{what} is not defined for {found}"))
}

fn truth(v: Value) -> Result<Option<bool>, ExecError> {
    match v {
        Value::Boolean(b) => Ok(Some(b)),
        Value::Null => Ok(None),
        other => Err(type_error("boolean logic", &other)),
    }
}

fn compare(op: CompareOp, ord: Ordering) -> bool {
    match op {
        CompareOp::Eq => ord.is_eq(),
        CompareOp::Ne => ord.is_ne(),
        CompareOp::Lt => ord.is_lt(),
        CompareOp::Le => ord.is_le(),
        CompareOp::Gt => ord.is_gt(),
        CompareOp::Ge => ord.is_ge(),
    }
}

fn negate(v: Value) -> Result<Value, ExecError> {
    Ok(match v {
        Value::Null => Value::Null,
        Value::Int(i) => Value::Int(i.wrapping_neg()),
        Value::Long(l) => Value::Long(l.wrapping_neg()),
        Value::Float(f) => Value::Float(-f),
        Value::Double(d) => Value::Double(-d),
        other => return Err(type_error("negation", &other)),
    })
}

fn int_arith(op: ArithOp, x: i64, y: i64) -> Option<i64> {
    match op {
        ArithOp::Add => Some(x.wrapping_add(y)),
        ArithOp::Sub => Some(x.wrapping_sub(y)),
        ArithOp::Mul => Some(x.wrapping_mul(y)),
        ArithOp::Div => (y != 0).then(|| x.wrapping_div(y)),
        ArithOp::Mod => (y != 0).then(|| x.wrapping_rem(y)),
    }
}

fn float_arith(op: ArithOp, x: f64, y: f64) -> Option<f64> {
    match op {
        ArithOp::Add => Some(x + y),
        ArithOp::Sub => Some(x - y),
        ArithOp::Mul => Some(x * y),
        ArithOp::Div => (y != 0.0).then(|| x / y),
        ArithOp::Mod => (y != 0.0).then(|| x % y),
    }
}

fn arithmetic(op: ArithOp, a: Value, b: Value) -> Result<Value, ExecError> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    let result = match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => {
            int_arith(op, i64::from(*x), i64::from(*y)).map(|r| Value::Int(r as i32))
        }
        (Value::Int(_) | Value::Long(_), Value::Int(_) | Value::Long(_)) => {
            match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => int_arith(op, x, y).map(Value::Long),
                _ => None,
            }
        }
        _ => {
            let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                let bad = if a.as_f64().is_none() { &a } else { &b };
                return Err(type_error("arithmetic", bad));
            };
            let double = matches!(a, Value::Double(_)) || matches!(b, Value::Double(_))
                || matches!(a, Value::Long(_)) || matches!(b, Value::Long(_));
            float_arith(op, x, y).map(|r| {
                if double {
                    Value::Double(r)
                } else {
                    Value::Float(r as f32)
                }
            })
        }
    };
    Ok(result.unwrap_or(Value::Null))
}
