//! SQL identifier quoting utilities
//!
//! Provides safe quoting for SQL identifiers so table, column and alias names
//! can never break out of the command text.

use crate::config::Dialect;

/// Quote a SQL identifier using the ANSI double-quote convention.
///
/// Embedded double quotes are escaped by doubling them.
///
/// # Examples
/// ```
/// use quarry_core::sql_utils::quote_ident;
/// assert_eq!(quote_ident("users"), r#""users""#);
/// assert_eq!(quote_ident(r#"my"table"#), r#""my""table""#);
/// ```
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a SQL identifier using square brackets (SQL Server).
///
/// # Examples
/// ```
/// use quarry_core::sql_utils::quote_bracketed;
/// assert_eq!(quote_bracketed("order"), "[order]");
/// assert_eq!(quote_bracketed("a]b"), "[a]]b]");
/// ```
pub fn quote_bracketed(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

/// Quote a potentially schema-qualified name (e.g. `schema.table`) for a dialect.
///
/// Splits on `.` and individually quotes each component.
///
/// # Examples
/// ```
/// use quarry_core::{sql_utils::quote_qualified, Dialect};
/// assert_eq!(quote_qualified("staging.orders", Dialect::DuckDb), r#""staging"."orders""#);
/// assert_eq!(quote_qualified("dbo.orders", Dialect::SqlServer), "[dbo].[orders]");
/// ```
pub fn quote_qualified(name: &str, dialect: Dialect) -> String {
    name.split('.')
        .map(|part| dialect.quote_ident(part))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_simple() {
        assert_eq!(quote_ident("users"), r#""users""#);
    }

    #[test]
    fn test_quote_ident_with_embedded_quotes() {
        assert_eq!(quote_ident(r#"my"table"#), r#""my""table""#);
    }

    #[test]
    fn test_quote_ident_empty() {
        assert_eq!(quote_ident(""), r#""""#);
    }

    #[test]
    fn test_quote_bracketed_escapes_closing_bracket() {
        assert_eq!(quote_bracketed("x]y"), "[x]]y]");
    }

    #[test]
    fn test_quote_qualified_two_parts() {
        assert_eq!(
            quote_qualified("staging.orders", Dialect::Postgres),
            r#""staging"."orders""#
        );
    }
}
