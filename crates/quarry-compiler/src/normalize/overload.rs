//! Overload simplification
//!
//! Collapses conversion and operator-dispatch wrappers into the single
//! operation they stand for, so the binder sees one canonical node per
//! semantic operation.

use crate::query::{
    rewrite_lambda, rewrite_node, BinOp, ConvertTarget, Expr, Lambda, QueryNode, TreeRewriter, UnOp,
};
use quarry_core::Value;

/// Canonicalize dispatch calls and redundant conversions
pub fn simplify_overloads(tree: QueryNode) -> QueryNode {
    rewrite_node(tree, &mut Simplifier)
}

pub(crate) fn simplify_lambda(lambda: Lambda) -> Lambda {
    rewrite_lambda(lambda, &mut Simplifier)
}

struct Simplifier;

impl TreeRewriter for Simplifier {
    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Convert {
                operand,
                target: ConvertTarget::Nullable,
            } => *operand,
            Expr::Convert {
                operand,
                target: ConvertTarget::Type(ty),
            } => match *operand {
                Expr::Convert {
                    operand: inner,
                    target: ConvertTarget::Type(inner_ty),
                } if inner_ty == ty => Expr::Convert {
                    operand: inner,
                    target: ConvertTarget::Type(ty),
                },
                operand => Expr::Convert {
                    operand: Box::new(operand),
                    target: ConvertTarget::Type(ty),
                },
            },
            Expr::Call { function, args } => simplify_call(function, args),
            Expr::Binary { op, left, right } if op.is_comparison() => {
                simplify_compare(op, *left, *right)
            }
            other => other,
        }
    }
}

fn dispatch_operator(function: &str) -> Option<BinOp> {
    Some(match function {
        "equals" | "op_Equality" => BinOp::Eq,
        "op_Inequality" => BinOp::NotEq,
        "op_LessThan" => BinOp::Lt,
        "op_LessThanOrEqual" => BinOp::LtEq,
        "op_GreaterThan" => BinOp::Gt,
        "op_GreaterThanOrEqual" => BinOp::GtEq,
        "op_Addition" => BinOp::Plus,
        "op_Subtraction" => BinOp::Minus,
        "op_Multiply" => BinOp::Multiply,
        "op_Division" => BinOp::Divide,
        "op_Modulus" => BinOp::Modulo,
        "op_BitwiseAnd" => BinOp::And,
        "op_BitwiseOr" => BinOp::Or,
        _ => return None,
    })
}

fn simplify_call(function: String, mut args: Vec<Expr>) -> Expr {
    if args.len() == 2 {
        if let Some(op) = dispatch_operator(&function) {
            let right = args.pop();
            let left = args.pop();
            if let (Some(left), Some(right)) = (left, right) {
                return left.binary(op, right);
            }
        }
    }
    if args.len() == 1 && function == "op_LogicalNot" {
        if let Some(operand) = args.pop() {
            return operand.not();
        }
    }
    if args.len() == 1 && function == "op_UnaryNegation" {
        if let Some(operand) = args.pop() {
            return Expr::Unary {
                op: UnOp::Negate,
                operand: Box::new(operand),
            };
        }
    }
    Expr::Call { function, args }
}

/// `compare(a, b) <op> 0` becomes `a <op> b`; `0 <op> compare(a, b)` is flipped
fn simplify_compare(op: BinOp, left: Expr, right: Expr) -> Expr {
    if is_zero(&right) {
        if let Some((a, b)) = compare_operands(&left) {
            return a.binary(op, b);
        }
    }
    if is_zero(&left) {
        if let Some((a, b)) = compare_operands(&right) {
            return a.binary(op.flipped(), b);
        }
    }
    left.binary(op, right)
}

fn compare_operands(expr: &Expr) -> Option<(Expr, Expr)> {
    match expr {
        Expr::Call { function, args } if function == "compare" && args.len() == 2 => {
            Some((args[0].clone(), args[1].clone()))
        }
        _ => None,
    }
}

fn is_zero(expr: &Expr) -> bool {
    matches!(expr.as_constant(), Some(Value::Integer(0)))
}
