//! AST module for query expressions and the query IR.

mod expr;
mod query;

pub use expr::{AggregateFunc, Expr, Func, PropRef};
pub use query::{
    CollectionRef, JoinClause, JoinType, OrderByClause, QueryIr, RowMapper, Select, Source,
    SourceTarget, WhereClause,
};
