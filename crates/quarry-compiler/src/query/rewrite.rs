//! Post-order rebuilding of operator trees
//!
//! A [`TreeRewriter`] sees every expression and node after its children
//! have been rebuilt, so hooks only handle the one node kind they care about.

use super::{Expr, Lambda, QueryNode, SortKey};

/// Hooks invoked bottom-up while a tree is rebuilt
pub trait TreeRewriter {
    /// Called for every expression after its children are rewritten
    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        expr
    }

    /// Called for every operator node after its inputs and lambdas are rewritten
    fn rewrite_node(&mut self, node: QueryNode) -> QueryNode {
        node
    }

    /// Called before a lambda body is rewritten; may rename the parameters
    fn enter_lambda(&mut self, params: Vec<String>) -> Vec<String> {
        params
    }

    /// Called after a lambda body is rewritten
    fn exit_lambda(&mut self) {}
}

/// Rebuild a lambda's body
pub fn rewrite_lambda<R: TreeRewriter + ?Sized>(lambda: Lambda, r: &mut R) -> Lambda {
    let params = r.enter_lambda(lambda.params);
    let body = Box::new(rewrite_expr(*lambda.body, r));
    r.exit_lambda();
    Lambda { params, body }
}

fn boxed<R: TreeRewriter + ?Sized>(expr: Box<Expr>, r: &mut R) -> Box<Expr> {
    Box::new(rewrite_expr(*expr, r))
}

fn boxed_node<R: TreeRewriter + ?Sized>(node: Box<QueryNode>, r: &mut R) -> Box<QueryNode> {
    Box::new(rewrite_node(*node, r))
}

/// Rebuild an expression bottom-up, descending into nested query nodes
pub fn rewrite_expr<R: TreeRewriter + ?Sized>(expr: Expr, r: &mut R) -> Expr {
    let rebuilt = match expr {
        Expr::Param(_) | Expr::Constant(_) => expr,
        Expr::Member { target, name } => Expr::Member {
            target: boxed(target, r),
            name,
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: boxed(left, r),
            right: boxed(right, r),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: boxed(operand, r),
        },
        Expr::Call { function, args } => Expr::Call {
            function,
            args: args.into_iter().map(|a| rewrite_expr(a, r)).collect(),
        },
        Expr::Convert { operand, target } => Expr::Convert {
            operand: boxed(operand, r),
            target,
        },
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => Expr::Conditional {
            test: boxed(test, r),
            if_true: boxed(if_true, r),
            if_false: boxed(if_false, r),
        },
        Expr::IsNull { operand, negated } => Expr::IsNull {
            operand: boxed(operand, r),
            negated,
        },
        Expr::New { type_name, fields } => Expr::New {
            type_name,
            fields: fields
                .into_iter()
                .map(|(n, e)| (n, rewrite_expr(e, r)))
                .collect(),
        },
        Expr::Aggregate {
            kind,
            source,
            selector,
        } => Expr::Aggregate {
            kind,
            source: boxed(source, r),
            selector: selector.map(|l| rewrite_lambda(l, r)),
        },
        Expr::Any { source, predicate } => Expr::Any {
            source: boxed(source, r),
            predicate: predicate.map(|l| rewrite_lambda(l, r)),
        },
        Expr::Subquery(node) => Expr::Subquery(boxed_node(node, r)),
        Expr::Macro { name, args } => Expr::Macro {
            name,
            args: args.into_iter().map(|a| rewrite_expr(a, r)).collect(),
        },
    };
    r.rewrite_expr(rebuilt)
}

/// Rebuild an operator tree bottom-up
pub fn rewrite_node<R: TreeRewriter + ?Sized>(node: QueryNode, r: &mut R) -> QueryNode {
    let rebuilt = match node {
        QueryNode::Source { .. } => node,
        QueryNode::Related {
            owner,
            relation,
            entity,
            secured,
        } => QueryNode::Related {
            owner: rewrite_expr(owner, r),
            relation,
            entity,
            secured,
        },
        QueryNode::Filter { input, predicate } => QueryNode::Filter {
            input: boxed_node(input, r),
            predicate: rewrite_lambda(predicate, r),
        },
        QueryNode::Project { input, selector } => QueryNode::Project {
            input: boxed_node(input, r),
            selector: rewrite_lambda(selector, r),
        },
        QueryNode::Join {
            kind,
            left,
            right,
            left_key,
            right_key,
            result,
        } => QueryNode::Join {
            kind,
            left: boxed_node(left, r),
            right: boxed_node(right, r),
            left_key: rewrite_lambda(left_key, r),
            right_key: rewrite_lambda(right_key, r),
            result: rewrite_lambda(result, r),
        },
        QueryNode::SelectMany {
            input,
            collection,
            result,
            outer,
        } => QueryNode::SelectMany {
            input: boxed_node(input, r),
            collection: rewrite_lambda(collection, r),
            result: result.map(|l| rewrite_lambda(l, r)),
            outer,
        },
        QueryNode::GroupBy {
            input,
            key,
            element,
        } => QueryNode::GroupBy {
            input: boxed_node(input, r),
            key: rewrite_lambda(key, r),
            element: element.map(|l| rewrite_lambda(l, r)),
        },
        QueryNode::OrderBy { input, keys } => QueryNode::OrderBy {
            input: boxed_node(input, r),
            keys: keys
                .into_iter()
                .map(|k| SortKey {
                    key: rewrite_lambda(k.key, r),
                    descending: k.descending,
                })
                .collect(),
        },
        QueryNode::Aggregate {
            input,
            kind,
            selector,
        } => QueryNode::Aggregate {
            input: boxed_node(input, r),
            kind,
            selector: selector.map(|l| rewrite_lambda(l, r)),
        },
        QueryNode::Take { input, count } => QueryNode::Take {
            input: boxed_node(input, r),
            count: rewrite_expr(count, r),
        },
        QueryNode::Skip { input, count } => QueryNode::Skip {
            input: boxed_node(input, r),
            count: rewrite_expr(count, r),
        },
        QueryNode::Distinct { input } => QueryNode::Distinct {
            input: boxed_node(input, r),
        },
        QueryNode::SetOp { kind, left, right } => QueryNode::SetOp {
            kind,
            left: boxed_node(left, r),
            right: boxed_node(right, r),
        },
    };
    r.rewrite_node(rebuilt)
}
