//! Shared test utilities for quarry-compiler

use crate::ir::{ScopeArena, ScopeId, ScopeKind, SelectNode, Source};
use crate::provider::QueryProvider;
use crate::query::{Expr, Lambda};
use quarry_core::{Catalog, Config, EntityDef, IntBitWidth, SqlType};

/// Shorthand for `SqlType::Integer { bits: IntBitWidth::I64 }`
pub fn int64() -> SqlType {
    SqlType::Integer {
        bits: IntBitWidth::I64,
    }
}

/// Shorthand for `SqlType::String { max_length: None }`
pub fn varchar() -> SqlType {
    SqlType::String { max_length: None }
}

/// User: orders (collection), optional country (reference)
pub fn user_entity() -> EntityDef {
    EntityDef::new("User", "users", "id")
        .column("id", int64())
        .column("name", varchar())
        .column("age", int64())
        .nullable_column("country_id", int64())
        .column("tenant_id", int64())
        .collection("orders", "Order", "user_id")
        .reference("country", "Country", "country_id", true)
}

/// Order: required user (reference)
pub fn order_entity() -> EntityDef {
    EntityDef::new("Order", "orders", "id")
        .column("id", int64())
        .column("user_id", int64())
        .column("amount", SqlType::Float)
        .column("status", varchar())
        .reference("user", "User", "user_id", false)
}

pub fn country_entity() -> EntityDef {
    EntityDef::new("Country", "countries", "id")
        .column("id", int64())
        .column("name", varchar())
        .collection("citizens", "User", "country_id")
}

/// Users, orders and countries
pub fn sample_catalog() -> Catalog {
    Catalog::new(vec![user_entity(), order_entity(), country_entity()])
        .expect("sample catalog is valid")
}

/// Provider over [`sample_catalog`] with the default configuration
pub fn sample_provider() -> QueryProvider {
    QueryProvider::new(sample_catalog(), Config::default())
}

/// `param => body`
pub fn lambda(param: &str, body: Expr) -> Lambda {
    Lambda::new(param, body)
}

/// `param.member`
pub fn field(param: &str, member: &str) -> Expr {
    Expr::param(param).member(member)
}

/// A base-table source with a fresh scope
pub fn table_source(arena: &mut ScopeArena, table: &str, columns: &[&str]) -> (ScopeId, Source) {
    let scope = arena.alloc(ScopeKind::Table);
    let source = Source::Table {
        scope,
        table: table.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
    };
    (scope, source)
}

/// A select with no columns over `inner` as a derived table
pub fn derived(arena: &mut ScopeArena, inner: SelectNode) -> SelectNode {
    SelectNode::new(
        arena.alloc(ScopeKind::Select),
        Source::Select(Box::new(inner)),
    )
}
