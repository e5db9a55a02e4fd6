//! Normalizer: macro expansion, constant folding, overload simplification
//!
//! `normalize` is pure and total. Anything it cannot simplify is left in
//! place for the binder to translate or reject.

mod fold;
mod macros;
mod overload;

pub use fold::fold_constants;
pub use macros::{expand_macros, MacroDef, MacroRegistry};
pub use overload::simplify_overloads;

use crate::query::{Lambda, QueryNode};
use quarry_core::NormalizerConfig;

/// Run the three normalization passes in order
pub fn normalize(tree: QueryNode, macros: &MacroRegistry, config: &NormalizerConfig) -> QueryNode {
    let expanded = expand_macros(tree, macros, config.max_expansion_depth);
    let folded = fold_constants(expanded);
    simplify_overloads(folded)
}

/// [`normalize`] for a lambda passed alongside a tree (command assignments
/// and insert selectors)
pub fn normalize_lambda(
    lambda: Lambda,
    macros: &MacroRegistry,
    config: &NormalizerConfig,
) -> Lambda {
    let expanded = macros::expand_lambda(lambda, macros, config.max_expansion_depth);
    let folded = fold::fold_lambda(expanded);
    overload::simplify_lambda(folded)
}
