//! SQL text writer
//!
//! Renders an optimized select tree as command text for one dialect. Every
//! value taken from the caller becomes a placeholder; the bound values are
//! collected in the order their placeholders appear in the text.

use super::Parameter;
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    AggregateExpr, ColumnExpr, JoinKind, JoinNode, OrderKey, ScopeId, SelectNode, Source, SqlExpr,
};
use crate::query::UnOp;
use quarry_core::sql_utils::quote_qualified;
use quarry_core::{Dialect, Value};

/// Accumulates parameters while rendering one command
pub(crate) struct SqlWriter {
    dialect: Dialect,
    parameters: Vec<Parameter>,
    /// Scope rendered as a bare table name (the row an UPDATE assigns to)
    target: Option<(ScopeId, String)>,
    /// Selects currently being rendered; above 1 inside a subquery
    depth: usize,
}

impl SqlWriter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            parameters: Vec::new(),
            target: None,
            depth: 0,
        }
    }

    /// Qualify columns of `scope` with `table` instead of an alias
    pub fn with_target(mut self, scope: ScopeId, table: &str) -> Self {
        self.target = Some((scope, table.to_string()));
        self
    }

    pub fn into_parameters(self) -> Vec<Parameter> {
        self.parameters
    }

    pub fn ident(&self, name: &str) -> String {
        self.dialect.quote_ident(name)
    }

    pub fn table(&self, name: &str) -> String {
        quote_qualified(name, self.dialect)
    }

    fn alias(&self, scope: ScopeId) -> String {
        self.ident(&scope.alias())
    }

    /// Render a complete SELECT statement
    pub fn select(&mut self, select: &SelectNode) -> CompileResult<String> {
        self.depth += 1;
        let sql = self.select_body(select);
        self.depth -= 1;
        sql
    }

    /// Render a SELECT used as a subquery of a command
    pub fn subquery(&mut self, select: &SelectNode) -> CompileResult<String> {
        self.depth += 1;
        let sql = self.select(select);
        self.depth -= 1;
        sql
    }

    fn select_body(&mut self, select: &SelectNode) -> CompileResult<String> {
        if select.columns.is_empty() {
            return Err(CompileError::Translation {
                message: format!("select {} has no columns", select.scope),
            });
        }
        let mut sql = String::from("SELECT ");
        if select.distinct {
            sql.push_str("DISTINCT ");
        }
        let mut columns = Vec::with_capacity(select.columns.len());
        for column in &select.columns {
            let expr = self.expr(&column.expr)?;
            columns.push(format!("{expr} AS {}", self.ident(&column.name)));
        }
        sql.push_str(&columns.join(", "));

        if let Some(from) = &select.from {
            sql.push_str(" FROM ");
            sql.push_str(&self.source(from)?);
        }
        if let Some(predicate) = &select.predicate {
            sql.push_str(" WHERE ");
            sql.push_str(&self.expr(predicate)?);
        }
        if !select.group_by.is_empty() {
            let keys = self.exprs(&select.group_by)?;
            sql.push_str(" GROUP BY ");
            sql.push_str(&keys.join(", "));
        }
        self.order_and_paging(select, &mut sql)?;
        Ok(sql)
    }

    fn order_and_paging(&mut self, select: &SelectNode, sql: &mut String) -> CompileResult<()> {
        let paged = select.limit.is_some() || select.offset.is_some();
        // SQL Server rejects ORDER BY in a subquery without OFFSET
        let subquery_order = self.depth > 1 && !paged && self.dialect == Dialect::SqlServer;
        if !select.order_by.is_empty() && !subquery_order {
            let keys = self.order_keys(&select.order_by)?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        } else if paged && self.dialect == Dialect::SqlServer {
            // OFFSET .. FETCH requires an ORDER BY clause
            sql.push_str(" ORDER BY (SELECT NULL)");
        }
        if !paged {
            return Ok(());
        }
        match self.dialect {
            Dialect::SqlServer => {
                sql.push_str(&format!(" OFFSET {} ROWS", select.offset.unwrap_or(0)));
                if let Some(limit) = select.limit {
                    sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                }
            }
            Dialect::Sqlite => {
                // SQLite only accepts OFFSET after a LIMIT; -1 means no limit
                let limit = select.limit.map_or_else(|| "-1".to_string(), |l| l.to_string());
                sql.push_str(&format!(" LIMIT {limit}"));
                if let Some(offset) = select.offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
            }
            Dialect::DuckDb | Dialect::Postgres => {
                if let Some(limit) = select.limit {
                    sql.push_str(&format!(" LIMIT {limit}"));
                }
                if let Some(offset) = select.offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
            }
        }
        Ok(())
    }

    fn order_keys(&mut self, keys: &[OrderKey]) -> CompileResult<Vec<String>> {
        keys.iter()
            .map(|key| {
                let expr = self.expr(&key.expr)?;
                Ok(if key.descending {
                    format!("{expr} DESC")
                } else {
                    expr
                })
            })
            .collect()
    }

    fn source(&mut self, source: &Source) -> CompileResult<String> {
        match source {
            Source::Table { scope, table, .. } => {
                Ok(format!("{} AS {}", self.table(table), self.alias(*scope)))
            }
            Source::Select(select) => {
                let body = self.select(select)?;
                Ok(format!("({body}) AS {}", self.alias(select.scope)))
            }
            Source::Join(join) => self.join(join),
            Source::SetOp {
                scope,
                kind,
                left,
                right,
            } => {
                let left = self.set_operand(left)?;
                let right = self.set_operand(right)?;
                Ok(format!(
                    "({left} {} {right}) AS {}",
                    kind.sql(),
                    self.alias(*scope)
                ))
            }
        }
    }

    /// Operands carrying their own ordering or paging need parentheses
    fn set_operand(&mut self, select: &SelectNode) -> CompileResult<String> {
        let body = self.select(select)?;
        let bare = select.order_by.is_empty() && select.limit.is_none() && select.offset.is_none();
        Ok(if bare { body } else { format!("({body})") })
    }

    fn join(&mut self, join: &JoinNode) -> CompileResult<String> {
        let left = self.source(&join.left)?;
        let right = self.source(&join.right)?;
        let on = join.predicate.as_ref().map(|p| self.expr(p)).transpose()?;
        let apply = self.dialect.uses_apply();
        if self.dialect == Dialect::Sqlite
            && matches!(join.kind, JoinKind::CrossApply | JoinKind::OuterApply)
        {
            return Err(CompileError::Translation {
                message: "SQLite has no lateral joins".to_string(),
            });
        }
        let sql = match (join.kind, on) {
            (JoinKind::Inner, on) | (JoinKind::Cross, on @ Some(_)) => {
                format!("{left} INNER JOIN {right} ON {}", self.on_clause(on))
            }
            (JoinKind::LeftOuter, on) => {
                format!("{left} LEFT JOIN {right} ON {}", self.on_clause(on))
            }
            (JoinKind::Cross, None) => format!("{left} CROSS JOIN {right}"),
            (JoinKind::CrossApply | JoinKind::OuterApply, Some(_)) if apply => {
                return Err(CompileError::Translation {
                    message: "APPLY join with a join predicate".to_string(),
                })
            }
            (JoinKind::CrossApply, None) if apply => format!("{left} CROSS APPLY {right}"),
            (JoinKind::OuterApply, None) if apply => format!("{left} OUTER APPLY {right}"),
            (JoinKind::CrossApply, None) => format!("{left} CROSS JOIN LATERAL {right}"),
            (JoinKind::CrossApply, on @ Some(_)) => {
                format!("{left} INNER JOIN LATERAL {right} ON {}", self.on_clause(on))
            }
            (JoinKind::OuterApply, on) => {
                format!("{left} LEFT JOIN LATERAL {right} ON {}", self.on_clause(on))
            }
        };
        Ok(sql)
    }

    fn on_clause(&self, on: Option<String>) -> String {
        on.unwrap_or_else(|| match self.dialect {
            Dialect::SqlServer => "1 = 1".to_string(),
            _ => "TRUE".to_string(),
        })
    }

    fn exprs(&mut self, exprs: &[SqlExpr]) -> CompileResult<Vec<String>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    /// Render a scalar expression
    pub fn expr(&mut self, expr: &SqlExpr) -> CompileResult<String> {
        Ok(match expr {
            SqlExpr::Column(column) => self.column(column),
            SqlExpr::Parameter(value) => self.parameter(value),
            SqlExpr::Null => "NULL".to_string(),
            SqlExpr::Literal(n) => n.to_string(),
            SqlExpr::Binary { op, left, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                format!("({left} {} {right})", op.sql())
            }
            SqlExpr::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                match op {
                    UnOp::Not => format!("(NOT {operand})"),
                    UnOp::Negate => format!("(-{operand})"),
                }
            }
            SqlExpr::Function { function, args } => {
                let args = self.exprs(args)?;
                format!("{}({})", function.sql(), args.join(", "))
            }
            SqlExpr::Case { whens, otherwise } => {
                if whens.is_empty() {
                    return Err(CompileError::Translation {
                        message: "CASE without WHEN branches".to_string(),
                    });
                }
                let mut sql = String::from("CASE");
                for (condition, result) in whens {
                    let condition = self.expr(condition)?;
                    let result = self.expr(result)?;
                    sql.push_str(&format!(" WHEN {condition} THEN {result}"));
                }
                if let Some(otherwise) = otherwise {
                    sql.push_str(&format!(" ELSE {}", self.expr(otherwise)?));
                }
                sql.push_str(" END");
                sql
            }
            SqlExpr::IsNull { operand, negated } => {
                let operand = self.expr(operand)?;
                if *negated {
                    format!("({operand} IS NOT NULL)")
                } else {
                    format!("({operand} IS NULL)")
                }
            }
            SqlExpr::Cast { operand, target } => {
                format!("CAST({} AS {target})", self.expr(operand)?)
            }
            SqlExpr::Like { operand, pattern } => {
                let operand = self.expr(operand)?;
                let pattern = self.expr(pattern)?;
                format!("({operand} LIKE {pattern} ESCAPE '\\')")
            }
            SqlExpr::Aggregate(aggregate) => self.aggregate(aggregate)?,
            // left pending when the aggregate rewriter is disabled
            SqlExpr::AggregateSubquery { subquery, .. } | SqlExpr::Subquery(subquery) => {
                format!("({})", self.select(subquery)?)
            }
            SqlExpr::Exists(subquery) => format!("EXISTS ({})", self.select(subquery)?),
            SqlExpr::In { operand, subquery } => {
                let operand = self.expr(operand)?;
                format!("({operand} IN ({}))", self.select(subquery)?)
            }
        })
    }

    fn aggregate(&mut self, aggregate: &AggregateExpr) -> CompileResult<String> {
        let function = aggregate.kind.sql();
        let Some(arg) = &aggregate.arg else {
            return Ok(format!("{function}(*)"));
        };
        let arg = self.expr(arg)?;
        Ok(if aggregate.distinct {
            format!("{function}(DISTINCT {arg})")
        } else {
            format!("{function}({arg})")
        })
    }

    fn column(&self, column: &ColumnExpr) -> String {
        let qualifier = match &self.target {
            Some((scope, table)) if *scope == column.scope => self.table(table),
            _ => self.alias(column.scope),
        };
        format!("{qualifier}.{}", self.ident(&column.name))
    }

    fn parameter(&mut self, value: &Value) -> String {
        let index = self.parameters.len();
        self.parameters.push(Parameter {
            name: self.dialect.parameter_name(index),
            value: value.clone(),
            sql_type: value.sql_type(),
        });
        self.dialect.placeholder(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ColumnDef, ScopeArena, ScopeKind};
    use crate::query::{AggregateKind, BinOp, SetOpKind};
    use crate::test_utils::table_source;

    /// `SELECT t0.name FROM users WHERE t0.age > ?`
    fn named_adults(arena: &mut ScopeArena) -> SelectNode {
        let (t, users) = table_source(arena, "users", &["name", "age"]);
        let mut select = SelectNode::new(arena.alloc(ScopeKind::Select), users);
        select.add_predicate(SqlExpr::binary(
            BinOp::Gt,
            SqlExpr::column(t, "age"),
            SqlExpr::Parameter(18i64.into()),
        ));
        select
            .columns
            .push(ColumnDef::new("name", SqlExpr::column(t, "name")));
        select
    }

    #[test]
    fn test_select_qualifies_and_aliases_every_column() {
        let mut arena = ScopeArena::new();
        let select = named_adults(&mut arena);
        let mut writer = SqlWriter::new(Dialect::DuckDb);
        let sql = writer.select(&select).unwrap();
        assert_eq!(
            sql,
            r#"SELECT "t0"."name" AS "name" FROM "users" AS "t0" WHERE ("t0"."age" > $1)"#
        );
        let parameters = writer.into_parameters();
        assert_eq!(parameters.len(), 1);
        assert_eq!(parameters[0].name, "p1");
        assert_eq!(parameters[0].value, Value::Integer(18));
    }

    #[test]
    fn test_sqlserver_brackets_and_named_placeholders() {
        let mut arena = ScopeArena::new();
        let mut select = named_adults(&mut arena);
        select.limit = Some(10);
        let mut writer = SqlWriter::new(Dialect::SqlServer);
        let sql = writer.select(&select).unwrap();
        assert_eq!(
            sql,
            "SELECT [t0].[name] AS [name] FROM [users] AS [t0] WHERE ([t0].[age] > @p0) \
             ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(writer.into_parameters()[0].name, "@p0");
    }

    #[test]
    fn test_sqlite_offset_without_limit() {
        let mut arena = ScopeArena::new();
        let mut select = named_adults(&mut arena);
        select.offset = Some(5);
        let sql = SqlWriter::new(Dialect::Sqlite).select(&select).unwrap();
        assert!(sql.ends_with("WHERE (\"t0\".\"age\" > ?) LIMIT -1 OFFSET 5"), "{sql}");
    }

    #[test]
    fn test_parameters_follow_text_order() {
        let mut arena = ScopeArena::new();
        let (t, users) = table_source(&mut arena, "users", &["name"]);
        let mut select = SelectNode::new(arena.alloc(ScopeKind::Select), users);
        select.columns.push(ColumnDef::new(
            "greeting",
            SqlExpr::binary(
                BinOp::Concat,
                SqlExpr::Parameter("hi ".into()),
                SqlExpr::column(t, "name"),
            ),
        ));
        select.add_predicate(SqlExpr::eq(
            SqlExpr::column(t, "name"),
            SqlExpr::Parameter("o'brien".into()),
        ));
        let mut writer = SqlWriter::new(Dialect::Postgres);
        let sql = writer.select(&select).unwrap();

        assert!(sql.contains("($1 || \"t0\".\"name\")"));
        assert!(sql.contains("(\"t0\".\"name\" = $2)"));
        assert!(!sql.contains("o'brien"));
        let values: Vec<Value> = writer.into_parameters().into_iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Value::from("hi "), Value::from("o'brien")]);
    }

    #[test]
    fn test_lateral_join_spelling_per_dialect() {
        let mut arena = ScopeArena::new();
        let (u, users) = table_source(&mut arena, "users", &["id"]);
        let (o, orders) = table_source(&mut arena, "orders", &["user_id"]);
        let mut right = SelectNode::new(arena.alloc(ScopeKind::Select), orders);
        right.add_predicate(SqlExpr::eq(SqlExpr::column(o, "user_id"), SqlExpr::column(u, "id")));
        right
            .columns
            .push(ColumnDef::new("user_id", SqlExpr::column(o, "user_id")));
        let mut select = SelectNode::new(
            arena.alloc(ScopeKind::Select),
            Source::Join(Box::new(JoinNode {
                kind: JoinKind::OuterApply,
                left: users,
                right: Source::Select(Box::new(right)),
                predicate: None,
            })),
        );
        select
            .columns
            .push(ColumnDef::new("id", SqlExpr::column(u, "id")));

        let duck = SqlWriter::new(Dialect::DuckDb).select(&select).unwrap();
        assert!(duck.contains("LEFT JOIN LATERAL (SELECT"), "{duck}");
        assert!(duck.ends_with("AS \"s2\" ON TRUE"), "{duck}");
        let mssql = SqlWriter::new(Dialect::SqlServer).select(&select).unwrap();
        assert!(mssql.contains("[t0] OUTER APPLY (SELECT"), "{mssql}");
        let err = SqlWriter::new(Dialect::Sqlite).select(&select).unwrap_err();
        assert!(matches!(err, CompileError::Translation { .. }));
    }

    #[test]
    fn test_sqlserver_drops_unpaged_subquery_order() {
        let mut arena = ScopeArena::new();
        let (o, orders) = table_source(&mut arena, "orders", &["amount"]);
        let mut inner = SelectNode::new(arena.alloc(ScopeKind::Select), orders);
        inner
            .columns
            .push(ColumnDef::new("amount", SqlExpr::column(o, "amount")));
        inner.order_by.push(OrderKey {
            expr: SqlExpr::column(o, "amount"),
            descending: false,
        });
        let inner_scope = inner.scope;
        let derived = |inner: SelectNode, arena: &mut ScopeArena| {
            let mut outer = SelectNode::new(
                arena.alloc(ScopeKind::Select),
                Source::Select(Box::new(inner)),
            );
            outer.distinct = true;
            outer
                .columns
                .push(ColumnDef::new("amount", SqlExpr::column(inner_scope, "amount")));
            outer
        };

        let unpaged = derived(inner.clone(), &mut arena);
        let mssql = SqlWriter::new(Dialect::SqlServer).select(&unpaged).unwrap();
        assert!(!mssql.contains("ORDER BY"), "{mssql}");
        let duck = SqlWriter::new(Dialect::DuckDb).select(&unpaged).unwrap();
        assert!(duck.contains("ORDER BY"), "{duck}");

        let mut paged_inner = inner;
        paged_inner.limit = Some(3);
        let paged = derived(paged_inner, &mut arena);
        let mssql = SqlWriter::new(Dialect::SqlServer).select(&paged).unwrap();
        assert!(mssql.contains("ORDER BY [t0].[amount] OFFSET 0 ROWS FETCH NEXT 3 ROWS ONLY"), "{mssql}");
    }

    #[test]
    fn test_set_operation_and_aggregates() {
        let mut arena = ScopeArena::new();
        let left = named_adults(&mut arena);
        let right = named_adults(&mut arena);
        let u = arena.alloc(ScopeKind::SetOp);
        let mut select = SelectNode::new(
            arena.alloc(ScopeKind::Select),
            Source::SetOp {
                scope: u,
                kind: SetOpKind::Union,
                left: Box::new(left),
                right: Box::new(right),
            },
        );
        select.columns.push(ColumnDef::new(
            "count",
            SqlExpr::Aggregate(AggregateExpr::new(AggregateKind::Count, None)),
        ));
        let mut writer = SqlWriter::new(Dialect::DuckDb);
        let sql = writer.select(&select).unwrap();

        assert!(sql.starts_with("SELECT COUNT(*) AS \"count\" FROM (SELECT"), "{sql}");
        assert!(sql.contains(" UNION SELECT "), "{sql}");
        assert!(sql.ends_with(") AS \"u4\""), "{sql}");
        let names: Vec<String> = writer.into_parameters().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["p1", "p2"]);
    }

    #[test]
    fn test_quotes_in_identifiers_are_escaped() {
        let mut arena = ScopeArena::new();
        let (t, weird) = table_source(&mut arena, "odd\"table", &["a\"b"]);
        let mut select = SelectNode::new(arena.alloc(ScopeKind::Select), weird);
        select
            .columns
            .push(ColumnDef::new("a\"b", SqlExpr::column(t, "a\"b")));
        let sql = SqlWriter::new(Dialect::DuckDb).select(&select).unwrap();
        assert_eq!(
            sql,
            r#"SELECT "t0"."a""b" AS "a""b" FROM "odd""table" AS "t0""#
        );
    }

    #[test]
    fn test_empty_select_is_translation_error() {
        let mut arena = ScopeArena::new();
        let select = SelectNode::without_source(arena.alloc(ScopeKind::Select));
        let err = SqlWriter::new(Dialect::DuckDb).select(&select).unwrap_err();
        assert!(matches!(err, CompileError::Translation { .. }));
    }
}
