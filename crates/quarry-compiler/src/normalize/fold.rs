//! Constant folding over literal operands
//!
//! Only pure operators are evaluated. Anything that could fail at run time
//! (division by zero, overflow) or whose result depends on SQL NULL
//! semantics is left for the database.

use crate::query::{
    rewrite_lambda, rewrite_node, BinOp, ConvertTarget, Expr, Lambda, QueryNode, TreeRewriter, UnOp,
};
use quarry_core::{SqlType, Value};
use std::cmp::Ordering;

/// Replace constant subtrees by their value
pub fn fold_constants(tree: QueryNode) -> QueryNode {
    rewrite_node(tree, &mut Folder)
}

pub(crate) fn fold_lambda(lambda: Lambda) -> Lambda {
    rewrite_lambda(lambda, &mut Folder)
}

struct Folder;

impl TreeRewriter for Folder {
    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Unary { op, operand } => match fold_unary(op, &operand) {
                Some(v) => Expr::Constant(v),
                None => Expr::Unary { op, operand },
            },
            Expr::Binary { op, left, right } => fold_binary(op, *left, *right),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => match test.as_constant().and_then(Value::as_bool) {
                Some(true) => *if_true,
                Some(false) => *if_false,
                None => Expr::Conditional {
                    test,
                    if_true,
                    if_false,
                },
            },
            Expr::IsNull { operand, negated } => match operand.as_constant() {
                Some(v) => Expr::Constant(Value::Boolean(v.is_null() != negated)),
                None => Expr::IsNull { operand, negated },
            },
            Expr::Convert {
                operand,
                target: ConvertTarget::Type(ty),
            } => match operand.as_constant().and_then(|v| convert(v, &ty)) {
                Some(v) => Expr::Constant(v),
                None => Expr::Convert {
                    operand,
                    target: ConvertTarget::Type(ty),
                },
            },
            Expr::Call { function, args } => {
                let values: Option<Vec<&Value>> = args.iter().map(Expr::as_constant).collect();
                match values.and_then(|v| fold_call(&function, &v)) {
                    Some(v) => Expr::Constant(v),
                    None => Expr::Call { function, args },
                }
            }
            other => other,
        }
    }
}

fn fold_unary(op: UnOp, operand: &Expr) -> Option<Value> {
    match (op, operand.as_constant()?) {
        (UnOp::Not, Value::Boolean(b)) => Some(Value::Boolean(!b)),
        (UnOp::Negate, Value::Integer(i)) => i.checked_neg().map(Value::Integer),
        (UnOp::Negate, Value::Float(f)) => Some(Value::Float(-f)),
        _ => None,
    }
}

fn fold_binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    // Boolean identities hold under three-valued logic when one side is known.
    match (op, left.as_constant(), right.as_constant()) {
        (BinOp::And, Some(Value::Boolean(true)), _) => return right,
        (BinOp::And, _, Some(Value::Boolean(true))) => return left,
        (BinOp::And, Some(Value::Boolean(false)), _) | (BinOp::And, _, Some(Value::Boolean(false))) => {
            return Expr::constant(false)
        }
        (BinOp::Or, Some(Value::Boolean(false)), _) => return right,
        (BinOp::Or, _, Some(Value::Boolean(false))) => return left,
        (BinOp::Or, Some(Value::Boolean(true)), _) | (BinOp::Or, _, Some(Value::Boolean(true))) => {
            return Expr::constant(true)
        }
        (_, Some(l), Some(r)) => {
            if let Some(v) = eval_binary(op, l, r) {
                return Expr::Constant(v);
            }
        }
        _ => {}
    }
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn eval_binary(op: BinOp, l: &Value, r: &Value) -> Option<Value> {
    if l.is_null() || r.is_null() {
        return None;
    }
    if op.is_comparison() {
        let ordering = compare(l, r)?;
        let result = match op {
            BinOp::Eq => ordering == Ordering::Equal,
            BinOp::NotEq => ordering != Ordering::Equal,
            BinOp::Lt => ordering == Ordering::Less,
            BinOp::LtEq => ordering != Ordering::Greater,
            BinOp::Gt => ordering == Ordering::Greater,
            BinOp::GtEq => ordering != Ordering::Less,
            _ => return None,
        };
        return Some(Value::Boolean(result));
    }
    match (op, l, r) {
        (BinOp::Concat, Value::String(a), Value::String(b)) => Some(Value::String(format!("{a}{b}"))),
        (_, Value::Integer(a), Value::Integer(b)) => eval_integer(op, *a, *b).map(Value::Integer),
        (_, Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            eval_float(op, as_f64(l)?, as_f64(r)?).map(Value::Float)
        }
        _ => None,
    }
}

fn eval_integer(op: BinOp, a: i64, b: i64) -> Option<i64> {
    match op {
        BinOp::Plus => a.checked_add(b),
        BinOp::Minus => a.checked_sub(b),
        BinOp::Multiply => a.checked_mul(b),
        BinOp::Divide => a.checked_div(b),
        BinOp::Modulo => a.checked_rem(b),
        _ => None,
    }
}

fn eval_float(op: BinOp, a: f64, b: f64) -> Option<f64> {
    let result = match op {
        BinOp::Plus => a + b,
        BinOp::Minus => a - b,
        BinOp::Multiply => a * b,
        BinOp::Divide if b != 0.0 => a / b,
        _ => return None,
    };
    result.is_finite().then_some(result)
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        _ => as_f64(l)?.partial_cmp(&as_f64(r)?),
    }
}

fn convert(v: &Value, ty: &SqlType) -> Option<Value> {
    match (v, ty) {
        (Value::Integer(i), SqlType::Float) => Some(Value::Float(*i as f64)),
        (Value::Integer(_), SqlType::Integer { .. }) => Some(v.clone()),
        (Value::Integer(i), SqlType::String { .. }) => Some(Value::String(i.to_string())),
        (Value::String(_), SqlType::String { .. }) => Some(v.clone()),
        (Value::Boolean(_), SqlType::Boolean) => Some(v.clone()),
        _ => None,
    }
}

fn fold_call(function: &str, args: &[&Value]) -> Option<Value> {
    match (function, args) {
        ("upper", [Value::String(s)]) => Some(Value::String(s.to_uppercase())),
        ("lower", [Value::String(s)]) => Some(Value::String(s.to_lowercase())),
        ("trim", [Value::String(s)]) => Some(Value::String(s.trim().to_string())),
        ("length", [Value::String(s)]) => i64::try_from(s.chars().count()).ok().map(Value::Integer),
        ("abs", [Value::Integer(i)]) => i.checked_abs().map(Value::Integer),
        ("abs", [Value::Float(f)]) => Some(Value::Float(f.abs())),
        ("concat", parts) if !parts.is_empty() => parts
            .iter()
            .map(|p| p.as_str())
            .collect::<Option<Vec<&str>>>()
            .map(|s| Value::String(s.concat())),
        _ => None,
    }
}
