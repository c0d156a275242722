//! QueryIr → DataflowNode compiler.
//!
//! The node tree is built in a fixed order:
//!
//! 1. one source per alias, joined left-deep in binding order
//! 2. residual where clauses as one filter
//! 3. group-by with the aggregates used anywhere after it
//! 4. a map writing the select output under `$selected`
//! 5. having, distinct, then an ordered window when `order_by` is set
//! 6. a final map unwrapping `$selected`
//!
//! Where clauses reading exactly one alias are not compiled into the tree.
//! They are pushed down to that alias's source subscription, with the
//! alias segment stripped, unless an outer join can null the alias out.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use strand_core::{Error, Result, Value};
use strand_incremental::{Aggregate, DataflowNode, SortKeyFn, TopK};
use strand_query::ast::{Expr, JoinType, OrderByClause, QueryIr, Select, Source};
use strand_query::eval::{compile, compile_predicate, evaluate, sort_tuple, Evaluator};
use strand_query::SELECTED_ALIAS;

/// Field of a grouped row holding the group-by values.
const GROUP_FIELD: &str = "$group";

/// One aliased input of a compiled query.
#[derive(Clone, Debug)]
pub(crate) struct SourcePlan {
    pub source: Source,
    /// Pushed-down filter over the bare source row.
    pub filter: Option<Expr>,
}

/// Ordered window that can be filled lazily from a single source.
#[derive(Clone, Debug)]
pub(crate) struct LazyWindow {
    pub alias: String,
    /// Order over the bare source row.
    pub order_by: Vec<OrderByClause>,
}

pub(crate) struct CompiledQuery {
    pub root: DataflowNode,
    pub sources: Vec<SourcePlan>,
    pub lazy: Option<LazyWindow>,
}

pub(crate) fn compile_query(ir: &QueryIr) -> Result<CompiledQuery> {
    let nullable = nullable_aliases(ir);
    let (pushed, residual) = split_where(ir, &nullable);

    let sources = ir
        .sources()
        .into_iter()
        .map(|source| SourcePlan {
            source: source.clone(),
            filter: pushed.get(&source.alias).map(|exprs| and_all(exprs.clone())),
        })
        .collect();

    let mut root = DataflowNode::source(ir.from.alias.clone());
    for join in &ir.joins {
        root = DataflowNode::join(
            root,
            DataflowNode::source(join.source.alias.clone()),
            join.join_type,
            compile(&join.left),
            compile(&join.right),
        );
    }
    if !residual.is_empty() {
        root = DataflowNode::filter(root, compile_predicate(&and_all(residual)));
    }

    let grouping = if ir.is_grouped() { Some(Grouping::new(ir)?) } else { None };
    if let Some(grouping) = &grouping {
        root = DataflowNode::group_by(root, grouping.key_fn(), grouping.aggregates());
    }
    let rewrite = |expr: &Expr| match &grouping {
        Some(grouping) => grouping.rewrite(expr),
        None => expr.clone(),
    };

    root = DataflowNode::map(root, select_fn(ir, &rewrite));

    if !ir.having.is_empty() {
        let having = and_all(ir.having.iter().map(|c| rewrite(&c.expr)).collect());
        root = DataflowNode::filter(root, compile_predicate(&having));
    }
    if ir.distinct {
        root = DataflowNode::distinct(root, compile(&Expr::prop([SELECTED_ALIAS])));
    }
    if !ir.order_by.is_empty() {
        let exprs: Vec<Expr> = ir.order_by.iter().map(|c| rewrite(&c.expr)).collect();
        let options = ir.order_by.iter().map(|c| c.options).collect();
        let sort_fn: SortKeyFn = Rc::new(move |row: &Value| sort_tuple(&exprs, row));
        root = DataflowNode::top_k(root, TopK::new(sort_fn, options, ir.offset.unwrap_or(0), ir.limit));
    }
    root = DataflowNode::map(
        root,
        Rc::new(|row: &Value| Ok(row.get(SELECTED_ALIAS).cloned().unwrap_or(Value::Null))),
    );

    Ok(CompiledQuery {
        root,
        sources,
        lazy: lazy_window(ir),
    })
}

/// Aliases an outer join may leave unmatched.
fn nullable_aliases(ir: &QueryIr) -> BTreeSet<String> {
    let mut nullable = BTreeSet::new();
    let mut bound = vec![ir.from.alias.clone()];
    for join in &ir.joins {
        if matches!(join.join_type, JoinType::Right | JoinType::Full) {
            nullable.extend(bound.iter().cloned());
        }
        if matches!(join.join_type, JoinType::Left | JoinType::Full) {
            nullable.insert(join.source.alias.clone());
        }
        bound.push(join.source.alias.clone());
    }
    nullable
}

/// Splits the where clauses into per-alias pushdowns and residual clauses.
fn split_where(ir: &QueryIr, nullable: &BTreeSet<String>) -> (BTreeMap<String, Vec<Expr>>, Vec<Expr>) {
    let bound: Vec<&str> = ir.aliases();
    let mut pushed: BTreeMap<String, Vec<Expr>> = BTreeMap::new();
    let mut residual = Vec::new();
    for clause in &ir.where_clauses {
        if clause.residual {
            residual.push(clause.expr.clone());
            continue;
        }
        for conjunct in clause.expr.conjuncts() {
            let aliases = conjunct.aliases();
            let single = match aliases.len() {
                1 => aliases.into_iter().next(),
                _ => None,
            };
            match single {
                Some(alias) if bound.contains(&alias.as_str()) && !nullable.contains(&alias) => {
                    let stripped = conjunct.strip_alias(&alias);
                    pushed.entry(alias).or_default().push(stripped);
                }
                _ => residual.push(conjunct.clone()),
            }
        }
    }
    (pushed, residual)
}

fn and_all(mut exprs: Vec<Expr>) -> Expr {
    if exprs.len() == 1 {
        exprs.remove(0)
    } else {
        Expr::and(exprs)
    }
}

/// Builds the map writing the select output under `$selected`.
fn select_fn(ir: &QueryIr, rewrite: &dyn Fn(&Expr) -> Expr) -> Evaluator {
    let project: Evaluator = match &ir.select {
        Some(Select::Fields(fields)) => {
            let fields: Vec<(String, Expr)> = fields.iter().map(|(name, e)| (name.clone(), rewrite(e))).collect();
            Rc::new(move |row: &Value| {
                let mut out = BTreeMap::new();
                for (name, expr) in &fields {
                    out.insert(name.clone(), evaluate(expr, row)?);
                }
                Ok(Value::Object(out))
            })
        }
        Some(Select::Map(mapper)) => {
            let mapper = mapper.clone();
            Rc::new(move |row: &Value| mapper.call(row))
        }
        None if ir.joins.is_empty() => {
            let alias = ir.from.alias.clone();
            Rc::new(move |row: &Value| Ok(row.get(&alias).cloned().unwrap_or(Value::Null)))
        }
        None => Rc::new(|row: &Value| Ok(row.clone())),
    };
    Rc::new(move |row: &Value| {
        let selected = project(row)?;
        let mut out = row.clone();
        match out.as_object_mut() {
            Some(fields) => {
                fields.insert(SELECTED_ALIAS.to_string(), selected);
            }
            None => return Err(Error::expression("pipeline rows must be objects")),
        }
        Ok(out)
    })
}

/// The group-by of a query and the aggregates it computes.
struct Grouping {
    keys: Vec<Expr>,
    aggregates: Vec<Expr>,
}

impl Grouping {
    fn new(ir: &QueryIr) -> Result<Self> {
        let fields = match &ir.select {
            Some(Select::Fields(fields)) => fields,
            _ => return Err(Error::invalid_query("grouped queries must select named fields")),
        };
        let mut aggregates = Vec::new();
        let mut collect = |expr: &Expr| {
            expr.walk(&mut |e| {
                if matches!(e, Expr::Agg { .. }) && !aggregates.contains(e) {
                    aggregates.push(e.clone());
                }
            })
        };
        for (_, expr) in fields {
            collect(expr);
        }
        for clause in &ir.having {
            collect(&clause.expr);
        }
        for clause in &ir.order_by {
            collect(&clause.expr);
        }
        Ok(Self {
            keys: ir.group_by.clone(),
            aggregates,
        })
    }

    fn key_fn(&self) -> Evaluator {
        let keys = self.keys.clone();
        Rc::new(move |row: &Value| {
            let mut group = BTreeMap::new();
            for (i, expr) in keys.iter().enumerate() {
                group.insert(format!("g{i}"), evaluate(expr, row)?);
            }
            Ok(Value::object([(GROUP_FIELD, Value::Object(group))]))
        })
    }

    fn aggregates(&self) -> Vec<(String, Aggregate)> {
        self.aggregates
            .iter()
            .enumerate()
            .filter_map(|(j, expr)| match expr {
                Expr::Agg { func, arg } => Some((format!("$agg{j}"), Aggregate::builtin(*func, compile(arg)))),
                _ => None,
            })
            .collect()
    }

    /// Points group-by expressions and aggregates at the grouped row.
    fn rewrite(&self, expr: &Expr) -> Expr {
        expr.rewrite(&mut |e| {
            if let Some(j) = self.aggregates.iter().position(|a| a == e) {
                return Some(Expr::prop([format!("$agg{j}")]));
            }
            self.keys
                .iter()
                .position(|k| k == e)
                .map(|i| Expr::prop([GROUP_FIELD.to_string(), format!("g{i}")]))
        })
    }
}

/// An ordered, limited query over one source whose order only reads that
/// source can load its window incrementally.
fn lazy_window(ir: &QueryIr) -> Option<LazyWindow> {
    if !ir.joins.is_empty() || ir.is_grouped() || ir.distinct || !ir.is_windowed() {
        return None;
    }
    let alias = ir.from.alias.as_str();
    let reads_only_source = ir.order_by.iter().all(|c| {
        let aliases = c.expr.aliases();
        aliases.len() == 1 && aliases.contains(alias)
    });
    if !reads_only_source {
        return None;
    }
    Some(LazyWindow {
        alias: alias.to_string(),
        order_by: ir
            .order_by
            .iter()
            .map(|c| OrderByClause::new(c.expr.strip_alias(alias), c.options))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::Key;
    use strand_incremental::{DataflowGraph, Delta, KeyedRow};
    use strand_query::ast::Expr;
    use strand_query::Query;

    fn todo(id: i64, owner: i64, done: bool) -> KeyedRow {
        KeyedRow::new(
            Key::Int(id),
            Value::object([
                ("id", Value::Int64(id)),
                ("owner", Value::Int64(owner)),
                ("done", Value::Boolean(done)),
            ]),
        )
    }

    #[test]
    fn test_single_alias_clauses_pushed_down() {
        let ir = Query::from("todo", "todos")
            .inner_join("user", "users", Expr::col("todo.owner"), Expr::col("user.id"))
            .where_(Expr::and(vec![
                Expr::eq(Expr::col("todo.done"), Expr::val(false)),
                Expr::eq(Expr::col("user.name"), Expr::col("todo.title")),
            ]))
            .build()
            .unwrap();
        let compiled = compile_query(&ir).unwrap();
        assert_eq!(
            compiled.sources[0].filter,
            Some(Expr::eq(Expr::col("done"), Expr::val(false)))
        );
        assert_eq!(compiled.sources[1].filter, None);
        assert!(compiled.lazy.is_none());
    }

    #[test]
    fn test_outer_join_side_not_pushed() {
        let ir = Query::from("todo", "todos")
            .left_join("user", "users", Expr::col("todo.owner"), Expr::col("user.id"))
            .where_(Expr::eq(Expr::col("user.active"), Expr::val(true)))
            .build()
            .unwrap();
        let compiled = compile_query(&ir).unwrap();
        assert!(compiled.sources.iter().all(|s| s.filter.is_none()));
        assert_eq!(nullable_aliases(&ir), BTreeSet::from(["user".to_string()]));
    }

    #[test]
    fn test_grouped_pipeline() {
        let ir = Query::from("todo", "todos")
            .group_by(vec![Expr::col("todo.owner")])
            .select(vec![
                ("owner", Expr::col("todo.owner")),
                ("open", Expr::count(Expr::col("todo.id"))),
            ])
            .having(Expr::gt(Expr::count(Expr::col("todo.id")), Expr::val(1)))
            .build()
            .unwrap();
        let mut graph = DataflowGraph::new(compile_query(&ir).unwrap().root);
        graph
            .push("todo", vec![Delta::insert(todo(1, 7, false)), Delta::insert(todo(2, 7, false)), Delta::insert(todo(3, 8, false))])
            .unwrap();
        let output = graph.run().unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(
            output[0].data.value,
            Value::object([("open", Value::Int64(2)), ("owner", Value::Int64(7))])
        );
    }

    #[test]
    fn test_windowed_query_is_lazy() {
        let ir = Query::from("todo", "todos")
            .where_(Expr::eq(Expr::col("todo.done"), Expr::val(false)))
            .order_by_asc(Expr::col("todo.id"))
            .limit(1)
            .build()
            .unwrap();
        let compiled = compile_query(&ir).unwrap();
        let lazy = compiled.lazy.unwrap();
        assert_eq!(lazy.alias, "todo");
        assert_eq!(lazy.order_by[0].expr, Expr::col("id"));

        let mut graph = DataflowGraph::new(compiled.root);
        graph
            .push("todo", vec![Delta::insert(todo(2, 1, false)), Delta::insert(todo(1, 1, false))])
            .unwrap();
        let output = graph.run().unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].data.key, Key::Int(1));
        assert_eq!(output[0].data.index.as_deref(), Some("V"));
    }
}
