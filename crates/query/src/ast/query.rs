//! Query IR: the immutable description of a live query.

use crate::ast::expr::Expr;
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use strand_core::{CompareOptions, Result, Value};

/// Reference to a source collection by id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    pub id: String,
}

impl CollectionRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// What an alias is bound to.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceTarget {
    /// A base collection.
    Collection(CollectionRef),
    /// A nested query whose result rows feed the outer query.
    Query(Box<QueryIr>),
}

impl From<CollectionRef> for SourceTarget {
    fn from(r: CollectionRef) -> Self {
        SourceTarget::Collection(r)
    }
}

impl From<QueryIr> for SourceTarget {
    fn from(q: QueryIr) -> Self {
        SourceTarget::Query(Box::new(q))
    }
}

impl From<&str> for SourceTarget {
    fn from(id: &str) -> Self {
        SourceTarget::Collection(CollectionRef::new(id))
    }
}

/// An alias bound to a source.
#[derive(Clone, Debug, PartialEq)]
pub struct Source {
    pub alias: String,
    pub target: SourceTarget,
}

impl Source {
    pub fn new(alias: impl Into<String>, target: impl Into<SourceTarget>) -> Self {
        Self {
            alias: alias.into(),
            target: target.into(),
        }
    }

    /// The collection id when bound directly to a collection.
    pub fn collection_id(&self) -> Option<&str> {
        match &self.target {
            SourceTarget::Collection(r) => Some(r.id.as_str()),
            SourceTarget::Query(_) => None,
        }
    }
}

/// Join types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

/// `join <source> on <left> = <right>`.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinClause {
    pub source: Source,
    pub join_type: JoinType,
    pub left: Expr,
    pub right: Expr,
}

/// One `where` (or `having`) clause.
#[derive(Clone, Debug, PartialEq)]
pub struct WhereClause {
    pub expr: Expr,
    /// Set when the clause could not be pushed to a source subscription and
    /// is evaluated against materialized rows instead.
    pub residual: bool,
}

impl WhereClause {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            residual: false,
        }
    }

    pub fn residual(expr: Expr) -> Self {
        Self {
            expr,
            residual: true,
        }
    }
}

/// One `orderBy` term.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrderByClause {
    pub expr: Expr,
    pub options: CompareOptions,
}

impl OrderByClause {
    pub fn new(expr: Expr, options: CompareOptions) -> Self {
        Self { expr, options }
    }

    pub fn asc(expr: Expr) -> Self {
        Self::new(expr, CompareOptions::asc())
    }

    pub fn desc(expr: Expr) -> Self {
        Self::new(expr, CompareOptions::desc())
    }
}

/// A user supplied projection closure.
///
/// Receives the namespaced row (`{alias: row, ...}`) and returns the
/// output value. Errors surface as graph errors of the live query.
#[derive(Clone)]
pub struct RowMapper(pub Rc<dyn Fn(&Value) -> Result<Value>>);

impl RowMapper {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + 'static,
    {
        Self(Rc::new(f))
    }

    pub fn call(&self, row: &Value) -> Result<Value> {
        (self.0)(row)
    }
}

impl fmt::Debug for RowMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RowMapper(..)")
    }
}

impl PartialEq for RowMapper {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// The select list of a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Select {
    /// Named output fields.
    Fields(Vec<(String, Expr)>),
    /// A closure producing the whole output value.
    Map(RowMapper),
}

/// The compiled-once description of a live query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryIr {
    pub from: Source,
    pub select: Option<Select>,
    pub joins: Vec<JoinClause>,
    pub where_clauses: Vec<WhereClause>,
    pub group_by: Vec<Expr>,
    pub having: Vec<WhereClause>,
    pub order_by: Vec<OrderByClause>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub distinct: bool,
}

impl QueryIr {
    /// A query that returns every row of `from`.
    pub fn new(from: Source) -> Self {
        Self {
            from,
            select: None,
            joins: Vec::new(),
            where_clauses: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
        }
    }

    /// Aliases bound at this level (from + joins), in binding order.
    pub fn aliases(&self) -> Vec<&str> {
        core::iter::once(self.from.alias.as_str())
            .chain(self.joins.iter().map(|j| j.source.alias.as_str()))
            .collect()
    }

    /// Every source bound at this level.
    pub fn sources(&self) -> Vec<&Source> {
        core::iter::once(&self.from)
            .chain(self.joins.iter().map(|j| &j.source))
            .collect()
    }

    /// Collection ids referenced anywhere in the tree, including subqueries.
    pub fn collection_ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_collection_ids(&mut out);
        out
    }

    fn collect_collection_ids(&self, out: &mut Vec<String>) {
        for source in self.sources() {
            match &source.target {
                SourceTarget::Collection(r) => {
                    if !out.contains(&r.id) {
                        out.push(r.id.clone());
                    }
                }
                SourceTarget::Query(q) => q.collect_collection_ids(out),
            }
        }
    }

    /// True when the query groups rows or selects aggregates.
    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
            || match &self.select {
                Some(Select::Fields(fields)) => fields.iter().any(|(_, e)| e.contains_aggregate()),
                _ => false,
            }
    }

    /// True for an ordered query bounded by `limit`.
    pub fn is_windowed(&self) -> bool {
        !self.order_by.is_empty() && self.limit.is_some()
    }
}
