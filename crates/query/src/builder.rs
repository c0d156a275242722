//! Fluent query builder.
//!
//! ```rust
//! use strand_query::ast::Expr;
//! use strand_query::Query;
//!
//! let ir = Query::from("todo", "todos")
//!     .where_(Expr::eq(Expr::col("todo.done"), Expr::val(false)))
//!     .order_by_asc(Expr::col("todo.id"))
//!     .limit(1)
//!     .build()
//!     .unwrap();
//! assert_eq!(ir.limit, Some(1));
//! ```

use crate::ast::{
    Expr, JoinClause, JoinType, OrderByClause, QueryIr, RowMapper, Select, Source, SourceTarget,
    WhereClause,
};
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use strand_core::{CompareOptions, Error, Result, Value};

/// Alias under which `having` and `order_by` may reference select outputs.
pub const SELECTED_ALIAS: &str = "$selected";

/// Builder producing a validated [`QueryIr`].
#[derive(Clone, Debug)]
pub struct Query {
    ir: QueryIr,
}

impl Query {
    /// Starts a query over `target` bound to `alias`.
    pub fn from(alias: &str, target: impl Into<SourceTarget>) -> Self {
        Self {
            ir: QueryIr::new(Source::new(alias, target)),
        }
    }

    /// Adds a join. The `on` expressions may be given in either order.
    pub fn join(
        mut self,
        alias: &str,
        target: impl Into<SourceTarget>,
        join_type: JoinType,
        left: Expr,
        right: Expr,
    ) -> Self {
        self.ir.joins.push(JoinClause {
            source: Source::new(alias, target),
            join_type,
            left,
            right,
        });
        self
    }

    pub fn inner_join(self, alias: &str, target: impl Into<SourceTarget>, left: Expr, right: Expr) -> Self {
        self.join(alias, target, JoinType::Inner, left, right)
    }

    pub fn left_join(self, alias: &str, target: impl Into<SourceTarget>, left: Expr, right: Expr) -> Self {
        self.join(alias, target, JoinType::Left, left, right)
    }

    pub fn right_join(self, alias: &str, target: impl Into<SourceTarget>, left: Expr, right: Expr) -> Self {
        self.join(alias, target, JoinType::Right, left, right)
    }

    pub fn full_join(self, alias: &str, target: impl Into<SourceTarget>, left: Expr, right: Expr) -> Self {
        self.join(alias, target, JoinType::Full, left, right)
    }

    /// Adds a where clause. Multiple clauses are AND-ed.
    pub fn where_(mut self, predicate: Expr) -> Self {
        self.ir.where_clauses.push(WhereClause::new(predicate));
        self
    }

    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.ir.group_by.extend(exprs);
        self
    }

    pub fn having(mut self, predicate: Expr) -> Self {
        self.ir.having.push(WhereClause::new(predicate));
        self
    }

    pub fn order_by(mut self, expr: Expr, options: CompareOptions) -> Self {
        self.ir.order_by.push(OrderByClause::new(expr, options));
        self
    }

    pub fn order_by_asc(self, expr: Expr) -> Self {
        self.order_by(expr, CompareOptions::asc())
    }

    pub fn order_by_desc(self, expr: Expr) -> Self {
        self.order_by(expr, CompareOptions::desc())
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.ir.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.ir.offset = Some(n);
        self
    }

    /// Projects named fields.
    pub fn select<S: Into<String>>(mut self, fields: Vec<(S, Expr)>) -> Self {
        self.ir.select = Some(Select::Fields(
            fields.into_iter().map(|(name, e)| (name.into(), e)).collect(),
        ));
        self
    }

    /// Projects with a closure over the namespaced row.
    pub fn select_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + 'static,
    {
        self.ir.select = Some(Select::Map(RowMapper::new(f)));
        self
    }

    /// Removes duplicate output values.
    pub fn distinct(mut self) -> Self {
        self.ir.distinct = true;
        self
    }

    /// Validates and returns the IR.
    pub fn build(self) -> Result<QueryIr> {
        let mut ir = self.ir;
        validate(&mut ir)?;
        Ok(ir)
    }
}

fn validate(ir: &mut QueryIr) -> Result<()> {
    let mut scope: Vec<String> = Vec::new();
    bind(&mut scope, &ir.from)?;

    for join in ir.joins.iter_mut() {
        bind(&mut scope, &join.source)?;
        normalize_join(join, &scope)?;
    }

    for clause in &ir.where_clauses {
        if clause.expr.contains_aggregate() {
            return Err(Error::invalid_query("aggregates are not allowed in where"));
        }
        check_refs(&clause.expr, &scope, false)?;
    }

    let grouped = ir.is_grouped();
    for expr in &ir.group_by {
        check_refs(expr, &scope, false)?;
    }
    match &ir.select {
        Some(Select::Fields(fields)) => {
            for (_, expr) in fields {
                check_refs(expr, &scope, false)?;
            }
        }
        Some(Select::Map(_)) if grouped => {
            return Err(Error::invalid_query(
                "grouped queries must select named fields",
            ))
        }
        None if grouped => {
            return Err(Error::invalid_query("group by requires a select clause"));
        }
        _ => {}
    }

    if !ir.having.is_empty() && !grouped {
        return Err(Error::HavingRequiresGroupBy);
    }
    for clause in &ir.having {
        check_refs(&clause.expr, &scope, true)?;
    }

    for clause in &ir.order_by {
        check_refs(&clause.expr, &scope, true)?;
    }

    if (ir.limit.is_some() || ir.offset.is_some()) && ir.order_by.is_empty() {
        return Err(Error::LimitRequiresOrderBy);
    }
    Ok(())
}

fn bind(scope: &mut Vec<String>, source: &Source) -> Result<()> {
    if source.alias.is_empty() || source.alias == SELECTED_ALIAS {
        return Err(Error::invalid_query("invalid source alias"));
    }
    if scope.contains(&source.alias) {
        return Err(Error::duplicate_alias(source.alias.clone()));
    }
    scope.push(source.alias.clone());
    Ok(())
}

/// Orients a join condition so `left` reads earlier aliases and `right`
/// reads the joined alias.
fn normalize_join(join: &mut JoinClause, scope: &[String]) -> Result<()> {
    check_refs(&join.left, scope, false)?;
    check_refs(&join.right, scope, false)?;

    let joined = join.source.alias.as_str();
    let reads_joined = |e: &Expr| e.aliases().iter().any(|a| a == joined);
    let reads_only_joined = |e: &Expr| {
        let aliases = e.aliases();
        !aliases.is_empty() && aliases.iter().all(|a| a == joined)
    };

    if reads_only_joined(&join.left) && !reads_joined(&join.right) {
        core::mem::swap(&mut join.left, &mut join.right);
    }
    if !reads_only_joined(&join.right) || reads_joined(&join.left) {
        return Err(Error::invalid_query(alloc::format!(
            "join on `{}` must compare an earlier source with `{}`",
            join.source.alias, joined
        )));
    }
    Ok(())
}

fn check_refs(expr: &Expr, scope: &[String], allow_selected: bool) -> Result<()> {
    for r in expr.refs() {
        let alias = r.alias().unwrap_or_default();
        let known = scope.iter().any(|s| s == alias) || (allow_selected && alias == SELECTED_ALIAS);
        if !known {
            return Err(Error::unknown_alias(alias.to_string()));
        }
    }
    Ok(())
}
