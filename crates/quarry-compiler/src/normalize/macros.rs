//! Custom query operators (macros) and their inline expansion

use crate::error::{CompileError, CompileResult};
use crate::query::{
    rewrite_expr, rewrite_lambda, rewrite_node, Expr, Lambda, QueryNode, TreeRewriter,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Definition of a custom operator: parameters substituted into a body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDef {
    pub params: Vec<String>,
    pub body: Expr,
}

impl MacroDef {
    pub fn new<I, S>(params: I, body: Expr) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            body,
        }
    }
}

/// Registered custom operators
///
/// A definition may only reference macros registered before it, so the
/// registry can never contain a cycle and expansion always terminates.
#[derive(Debug, Clone, Default)]
pub struct MacroRegistry {
    macros: BTreeMap<String, MacroDef>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a macro, validating every macro its body invokes
    pub fn register(&mut self, name: impl Into<String>, def: MacroDef) -> CompileResult<()> {
        let name = name.into();
        let reject = |message: String| CompileError::MacroRegistration {
            name: name.clone(),
            message,
        };

        if self.macros.contains_key(&name) {
            return Err(reject("already registered".to_string()));
        }
        let distinct: BTreeSet<&String> = def.params.iter().collect();
        if distinct.len() != def.params.len() {
            return Err(reject("duplicate parameter name".to_string()));
        }

        let mut problem = None;
        def.body.walk(&mut |e| {
            let Expr::Macro { name: used, args } = e else {
                return;
            };
            if problem.is_some() {
                return;
            }
            problem = if *used == name {
                Some("invokes itself".to_string())
            } else {
                match self.macros.get(used) {
                    None => Some(format!("invokes unregistered macro '{used}'")),
                    Some(target) if target.params.len() != args.len() => Some(format!(
                        "passes {} arguments to '{used}', which takes {}",
                        args.len(),
                        target.params.len()
                    )),
                    Some(_) => None,
                }
            };
        });
        if let Some(message) = problem {
            return Err(reject(message));
        }

        log::debug!("Registered macro '{}' ({} params)", name, def.params.len());
        self.macros.insert(name, def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MacroDef> {
        self.macros.get(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

/// Replace every registered macro invocation by its definition, recursively
///
/// Invocations of unknown macros, invocations with the wrong arity, and
/// expansions nested deeper than `max_depth` are left in place.
pub fn expand_macros(tree: QueryNode, registry: &MacroRegistry, max_depth: usize) -> QueryNode {
    if registry.is_empty() {
        return tree;
    }
    let mut expander = Expander {
        registry,
        depth: 0,
        max_depth,
        fresh: 0,
    };
    rewrite_node(tree, &mut expander)
}

pub(crate) fn expand_lambda(lambda: Lambda, registry: &MacroRegistry, max_depth: usize) -> Lambda {
    if registry.is_empty() {
        return lambda;
    }
    let mut expander = Expander {
        registry,
        depth: 0,
        max_depth,
        fresh: 0,
    };
    rewrite_lambda(lambda, &mut expander)
}

struct Expander<'a> {
    registry: &'a MacroRegistry,
    depth: usize,
    max_depth: usize,
    fresh: usize,
}

impl TreeRewriter for Expander<'_> {
    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        let Expr::Macro { name, args } = expr else {
            return expr;
        };
        let registry = self.registry;
        let def = match registry.get(&name) {
            Some(def) if def.params.len() == args.len() => def,
            _ => return Expr::Macro { name, args },
        };
        if self.depth >= self.max_depth {
            log::warn!(
                "Macro '{}' not expanded: nesting exceeds {} levels",
                name,
                self.max_depth
            );
            return Expr::Macro { name, args };
        }

        let expanded = substitute(def, args, &mut self.fresh);
        self.depth += 1;
        let result = rewrite_expr(expanded, self);
        self.depth -= 1;
        result
    }
}

/// Substitute arguments for parameters in a macro body, renaming body
/// lambda parameters that would capture a name free in an argument
fn substitute(def: &MacroDef, args: Vec<Expr>, fresh: &mut usize) -> Expr {
    let mut free = BTreeSet::new();
    for arg in &args {
        arg.walk(&mut |e| {
            if let Expr::Param(p) = e {
                free.insert(p.clone());
            }
        });
    }
    let bindings: BTreeMap<String, Expr> = def.params.iter().cloned().zip(args).collect();
    let mut substituter = Substituter {
        scopes: vec![bindings],
        free,
        fresh,
    };
    rewrite_expr(def.body.clone(), &mut substituter)
}

struct Substituter<'a> {
    scopes: Vec<BTreeMap<String, Expr>>,
    free: BTreeSet<String>,
    fresh: &'a mut usize,
}

impl TreeRewriter for Substituter<'_> {
    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Param(p) => match self.scopes.last().and_then(|s| s.get(&p)) {
                Some(replacement) => replacement.clone(),
                None => Expr::Param(p),
            },
            other => other,
        }
    }

    fn enter_lambda(&mut self, params: Vec<String>) -> Vec<String> {
        let mut scope = self.scopes.last().cloned().unwrap_or_default();
        let renamed = params
            .into_iter()
            .map(|p| {
                scope.remove(&p);
                if self.free.contains(&p) {
                    let fresh = format!("{p}#{}", *self.fresh);
                    *self.fresh += 1;
                    scope.insert(p, Expr::Param(fresh.clone()));
                    fresh
                } else {
                    p
                }
            })
            .collect();
        self.scopes.push(scope);
        renamed
    }

    fn exit_lambda(&mut self) {
        self.scopes.pop();
    }
}

#[cfg(test)]
#[path = "macros_test.rs"]
mod tests;
