//! Scalar expression binding

use super::shape::Shape;
use super::{scalar, Binder};
use crate::error::{CompileError, CompileResult};
use crate::ir::{SqlExpr, SqlFunction};
use crate::query::{BinOp, ConvertTarget, Expr, QueryNode, UnOp};
use quarry_core::{RelationKind, Value};

impl<'a> Binder<'a> {
    pub(super) fn bind_expr(&mut self, expr: &Expr) -> CompileResult<Shape> {
        match expr {
            Expr::Param(name) => self
                .env
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, shape)| shape.clone())
                .ok_or_else(|| CompileError::binding(format!("unknown parameter '{name}'"))),
            Expr::Constant(Value::Null) => Ok(Shape::Scalar(SqlExpr::Null)),
            Expr::Constant(value) => Ok(Shape::Scalar(SqlExpr::Parameter(value.clone()))),
            Expr::Member { target, name } => {
                let owner = self.bind_expr(target)?;
                match self.relation_of(&owner, name) {
                    Some(rel) if rel.kind == RelationKind::Collection => {
                        self.nested(|b| b.related_leaf(&owner, name, false))
                    }
                    _ => self.member(owner, name),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.bind_expr(left)?;
                let right = self.bind_expr(right)?;
                self.bind_binary(*op, left, right)
            }
            Expr::Unary { op, operand } => {
                let operand = scalar(self.bind_expr(operand)?, "operand")?;
                Ok(Shape::Scalar(SqlExpr::Unary {
                    op: *op,
                    operand: Box::new(operand),
                }))
            }
            Expr::Call { function, args } => self.bind_call(function, args),
            Expr::Convert { operand, target } => match target {
                ConvertTarget::Nullable => self.bind_expr(operand),
                ConvertTarget::Type(sql_type) => {
                    let operand = scalar(self.bind_expr(operand)?, "conversion operand")?;
                    Ok(Shape::Scalar(SqlExpr::Cast {
                        operand: Box::new(operand),
                        target: sql_type.clone(),
                    }))
                }
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = scalar(self.bind_expr(test)?, "condition")?;
                let if_true = scalar(self.bind_expr(if_true)?, "conditional branch")?;
                let if_false = scalar(self.bind_expr(if_false)?, "conditional branch")?;
                Ok(Shape::Scalar(SqlExpr::Case {
                    whens: vec![(test, if_true)],
                    otherwise: Some(Box::new(if_false)),
                }))
            }
            Expr::IsNull { operand, negated } => {
                let operand = self.bind_expr(operand)?;
                self.is_null(operand, *negated)
            }
            Expr::New { type_name, fields } => {
                let fields = fields
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), self.bind_expr(e)?)))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(Shape::Construct {
                    type_name: type_name.clone(),
                    fields,
                })
            }
            Expr::Aggregate {
                kind,
                source,
                selector,
            } => self.bind_aggregate(*kind, source, selector.as_ref()),
            Expr::Any { source, predicate } => self.bind_any(source, predicate.as_ref()),
            Expr::Subquery(node) => match node.as_ref() {
                QueryNode::Aggregate { .. } => {
                    let bound = self.with_mode(super::Correlate::Predicate, |b| b.bind_node(node))?;
                    Ok(Shape::Scalar(SqlExpr::Subquery(Box::new(bound.select))))
                }
                _ => self.nested(|b| b.bind_node(node)),
            },
            Expr::Macro { name, .. } => Err(CompileError::binding(format!(
                "unexpanded macro '{name}'"
            ))),
        }
    }

    /// Member access on a bound value (relationship collections excepted)
    pub(super) fn member(&mut self, owner: Shape, name: &str) -> CompileResult<Shape> {
        match owner {
            Shape::Entity { ref entity, .. } => {
                if let Some(field) = owner.entity_field(name) {
                    return Ok(Shape::Scalar(field.clone()));
                }
                match self.relation_of(&owner, name) {
                    Some(rel) if rel.kind == RelationKind::Reference => self.navigate(&owner, rel),
                    _ => Err(CompileError::binding(format!(
                        "member '{name}' of entity '{entity}'"
                    ))),
                }
            }
            Shape::Construct { fields, type_name } => fields
                .into_iter()
                .find(|(n, _)| n == name)
                .map(|(_, s)| s)
                .ok_or_else(|| {
                    CompileError::binding(format!(
                        "member '{name}' of {}",
                        type_name.as_deref().unwrap_or("an anonymous object")
                    ))
                }),
            Shape::Group { key, .. } if name == "key" => Ok(*key),
            Shape::Group { .. } => Err(CompileError::binding(format!(
                "member '{name}' of a grouping"
            ))),
            Shape::Scalar(_) | Shape::Nested(_) => Err(CompileError::binding(format!(
                "member '{name}' of a non-object value"
            ))),
        }
    }

    fn bind_binary(&mut self, op: BinOp, left: Shape, right: Shape) -> CompileResult<Shape> {
        let equality = matches!(op, BinOp::Eq | BinOp::NotEq);
        let negated = op == BinOp::NotEq;
        match (left, right) {
            (value, Shape::Scalar(SqlExpr::Null)) | (Shape::Scalar(SqlExpr::Null), value)
                if equality =>
            {
                self.is_null(value, negated)
            }
            (Shape::Scalar(l), Shape::Scalar(r)) => Ok(Shape::Scalar(SqlExpr::binary(op, l, r))),
            (l, r) if equality => {
                let eq = self.equate(l, r, "comparison")?;
                Ok(Shape::Scalar(if negated {
                    SqlExpr::Unary {
                        op: UnOp::Not,
                        operand: Box::new(eq),
                    }
                } else {
                    eq
                }))
            }
            _ => Err(CompileError::binding(format!(
                "operator '{}' on non-scalar values",
                op.sql()
            ))),
        }
    }

    fn is_null(&self, operand: Shape, negated: bool) -> CompileResult<Shape> {
        let tested = match &operand {
            Shape::Scalar(e) => e.clone(),
            Shape::Entity { presence, .. } => match presence {
                Some(p) => p.clone(),
                None => self.entity_key(&operand)?,
            },
            _ => {
                return Err(CompileError::binding(
                    "null test of a non-scalar value".to_string(),
                ))
            }
        };
        Ok(Shape::Scalar(SqlExpr::IsNull {
            operand: Box::new(tested),
            negated,
        }))
    }

    fn bind_call(&mut self, function: &str, args: &[Expr]) -> CompileResult<Shape> {
        if let Some(position) = LikePosition::from_name(function) {
            let [operand, pattern] = args else {
                return Err(CompileError::binding(format!(
                    "'{function}' with {} arguments",
                    args.len()
                )));
            };
            let operand = scalar(self.bind_expr(operand)?, "string operand")?;
            let pattern = match pattern.as_constant() {
                Some(Value::String(text)) => {
                    SqlExpr::Parameter(Value::String(position.pattern(&escape_like(text))))
                }
                _ => {
                    let bound = scalar(self.bind_expr(pattern)?, "string pattern")?;
                    position.wrap(bound)
                }
            };
            return Ok(Shape::Scalar(SqlExpr::Like {
                operand: Box::new(operand),
                pattern: Box::new(pattern),
            }));
        }
        let sql_function = SqlFunction::from_name(function)
            .ok_or_else(|| CompileError::binding(format!("function '{function}'")))?;
        let args = args
            .iter()
            .map(|a| scalar(self.bind_expr(a)?, "function argument"))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Shape::Scalar(SqlExpr::Function {
            function: sql_function,
            args,
        }))
    }
}

/// Where a substring test anchors its pattern
#[derive(Debug, Clone, Copy)]
enum LikePosition {
    Start,
    End,
    Anywhere,
}

impl LikePosition {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "starts_with" => Some(LikePosition::Start),
            "ends_with" => Some(LikePosition::End),
            "contains" => Some(LikePosition::Anywhere),
            _ => None,
        }
    }

    fn pattern(self, escaped: &str) -> String {
        match self {
            LikePosition::Start => format!("{escaped}%"),
            LikePosition::End => format!("%{escaped}"),
            LikePosition::Anywhere => format!("%{escaped}%"),
        }
    }

    /// Pattern for a computed operand; wildcards inside it stay live
    fn wrap(self, operand: SqlExpr) -> SqlExpr {
        let wildcard = || SqlExpr::Parameter(Value::String("%".to_string()));
        match self {
            LikePosition::Start => SqlExpr::binary(BinOp::Concat, operand, wildcard()),
            LikePosition::End => SqlExpr::binary(BinOp::Concat, wildcard(), operand),
            LikePosition::Anywhere => SqlExpr::binary(
                BinOp::Concat,
                SqlExpr::binary(BinOp::Concat, wildcard(), operand),
                wildcard(),
            ),
        }
    }
}

/// Escape LIKE wildcards with `\`
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
