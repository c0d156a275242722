//! Expression AST definitions.

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use strand_core::Value;

/// Reference to a (possibly nested) field.
///
/// Inside a query the first segment is the source alias: `todo.done`
/// is `["todo", "done"]`. Expressions evaluated against a single row
/// (subscription filters, index expressions) omit the alias.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropRef {
    pub path: Vec<String>,
}

impl PropRef {
    /// Creates a reference from path segments.
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a dotted path such as `todo.owner.name`.
    pub fn parse(dotted: &str) -> Self {
        Self::new(dotted.split('.').filter(|s| !s.is_empty()))
    }

    /// The leading segment, which names the alias inside a query.
    pub fn alias(&self) -> Option<&str> {
        self.path.first().map(String::as_str)
    }

    /// The path below the alias.
    pub fn field_path(&self) -> &[String] {
        self.path.get(1..).unwrap_or(&[])
    }

    /// Dotted rendering of the path.
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }
}

/// Scalar functions and operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Func {
    // Comparison
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    // Logical
    And,
    Or,
    Not,
    // Set / pattern
    In,
    Like,
    Ilike,
    IsNull,
    // String
    Upper,
    Lower,
    Length,
    Concat,
    Coalesce,
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Abs,
    Floor,
    Ceil,
    Round,
}

impl Func {
    /// The operator name used in debug renderings.
    pub fn name(&self) -> &'static str {
        match self {
            Func::Eq => "eq",
            Func::Gt => "gt",
            Func::Gte => "gte",
            Func::Lt => "lt",
            Func::Lte => "lte",
            Func::And => "and",
            Func::Or => "or",
            Func::Not => "not",
            Func::In => "in",
            Func::Like => "like",
            Func::Ilike => "ilike",
            Func::IsNull => "isNull",
            Func::Upper => "upper",
            Func::Lower => "lower",
            Func::Length => "length",
            Func::Concat => "concat",
            Func::Coalesce => "coalesce",
            Func::Add => "add",
            Func::Subtract => "subtract",
            Func::Multiply => "multiply",
            Func::Divide => "divide",
            Func::Abs => "abs",
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Round => "round",
        }
    }

    /// True for the binary comparison operators.
    pub fn is_comparison(&self) -> bool {
        matches!(self, Func::Eq | Func::Gt | Func::Gte | Func::Lt | Func::Lte)
    }

    /// The operator obtained by swapping the operands (`a < b` == `b > a`).
    pub fn flipped(&self) -> Func {
        match self {
            Func::Gt => Func::Lt,
            Func::Gte => Func::Lte,
            Func::Lt => Func::Gt,
            Func::Lte => Func::Gte,
            other => *other,
        }
    }
}

/// Aggregate functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Median,
    Mode,
}

impl AggregateFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
            AggregateFunc::Median => "median",
            AggregateFunc::Mode => "mode",
        }
    }
}

/// Expression AST node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expr {
    /// Field reference.
    Ref(PropRef),
    /// Literal value.
    Val(Value),
    /// Function call.
    Func { func: Func, args: Vec<Expr> },
    /// Aggregate call.
    Agg { func: AggregateFunc, arg: Box<Expr> },
}

impl Expr {
    /// Reference to a dotted path: `Expr::col("todo.done")`.
    pub fn col(path: &str) -> Self {
        Expr::Ref(PropRef::parse(path))
    }

    /// Reference from explicit segments.
    pub fn prop<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::Ref(PropRef::new(path))
    }

    pub fn val(value: impl Into<Value>) -> Self {
        Expr::Val(value.into())
    }

    pub fn func(func: Func, args: Vec<Expr>) -> Self {
        Expr::Func { func, args }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::func(Func::Eq, alloc::vec![left, right])
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Self::func(Func::Gt, alloc::vec![left, right])
    }

    pub fn gte(left: Expr, right: Expr) -> Self {
        Self::func(Func::Gte, alloc::vec![left, right])
    }

    pub fn lt(left: Expr, right: Expr) -> Self {
        Self::func(Func::Lt, alloc::vec![left, right])
    }

    pub fn lte(left: Expr, right: Expr) -> Self {
        Self::func(Func::Lte, alloc::vec![left, right])
    }

    /// Conjunction. A single operand is returned unchanged.
    pub fn and(mut args: Vec<Expr>) -> Self {
        if args.len() == 1 {
            return args.remove(0);
        }
        Self::func(Func::And, args)
    }

    /// Disjunction. A single operand is returned unchanged.
    pub fn or(mut args: Vec<Expr>) -> Self {
        if args.len() == 1 {
            return args.remove(0);
        }
        Self::func(Func::Or, args)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Self::func(Func::Not, alloc::vec![expr])
    }

    /// Membership test against a literal list.
    pub fn in_list(expr: Expr, values: Vec<Value>) -> Self {
        Self::func(Func::In, alloc::vec![expr, Expr::Val(Value::Array(values))])
    }

    pub fn like(expr: Expr, pattern: &str) -> Self {
        Self::func(Func::Like, alloc::vec![expr, Expr::val(pattern)])
    }

    pub fn ilike(expr: Expr, pattern: &str) -> Self {
        Self::func(Func::Ilike, alloc::vec![expr, Expr::val(pattern)])
    }

    pub fn is_null(expr: Expr) -> Self {
        Self::func(Func::IsNull, alloc::vec![expr])
    }

    pub fn upper(expr: Expr) -> Self {
        Self::func(Func::Upper, alloc::vec![expr])
    }

    pub fn lower(expr: Expr) -> Self {
        Self::func(Func::Lower, alloc::vec![expr])
    }

    pub fn length(expr: Expr) -> Self {
        Self::func(Func::Length, alloc::vec![expr])
    }

    pub fn concat(args: Vec<Expr>) -> Self {
        Self::func(Func::Concat, args)
    }

    pub fn coalesce(args: Vec<Expr>) -> Self {
        Self::func(Func::Coalesce, args)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(left: Expr, right: Expr) -> Self {
        Self::func(Func::Add, alloc::vec![left, right])
    }

    pub fn subtract(left: Expr, right: Expr) -> Self {
        Self::func(Func::Subtract, alloc::vec![left, right])
    }

    pub fn multiply(left: Expr, right: Expr) -> Self {
        Self::func(Func::Multiply, alloc::vec![left, right])
    }

    pub fn divide(left: Expr, right: Expr) -> Self {
        Self::func(Func::Divide, alloc::vec![left, right])
    }

    pub fn aggregate(func: AggregateFunc, arg: Expr) -> Self {
        Expr::Agg {
            func,
            arg: Box::new(arg),
        }
    }

    pub fn count(arg: Expr) -> Self {
        Self::aggregate(AggregateFunc::Count, arg)
    }

    pub fn sum(arg: Expr) -> Self {
        Self::aggregate(AggregateFunc::Sum, arg)
    }

    pub fn avg(arg: Expr) -> Self {
        Self::aggregate(AggregateFunc::Avg, arg)
    }

    pub fn min(arg: Expr) -> Self {
        Self::aggregate(AggregateFunc::Min, arg)
    }

    pub fn max(arg: Expr) -> Self {
        Self::aggregate(AggregateFunc::Max, arg)
    }

    pub fn median(arg: Expr) -> Self {
        Self::aggregate(AggregateFunc::Median, arg)
    }

    pub fn mode(arg: Expr) -> Self {
        Self::aggregate(AggregateFunc::Mode, arg)
    }

    /// Returns the reference if this is a field reference.
    pub fn as_prop(&self) -> Option<&PropRef> {
        match self {
            Expr::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the literal if this is a value.
    pub fn as_val(&self) -> Option<&Value> {
        match self {
            Expr::Val(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the function and its arguments if this is a call.
    pub fn as_func(&self) -> Option<(Func, &[Expr])> {
        match self {
            Expr::Func { func, args } => Some((*func, args.as_slice())),
            _ => None,
        }
    }

    /// Visits this node and every descendant, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Ref(_) | Expr::Val(_) => {}
            Expr::Func { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Agg { arg, .. } => arg.walk(visit),
        }
    }

    /// Every field reference in the tree.
    pub fn refs(&self) -> Vec<&PropRef> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Ref(r) = e {
                out.push(r);
            }
        });
        out
    }

    /// The set of aliases referenced by the tree.
    pub fn aliases(&self) -> BTreeSet<String> {
        self.refs()
            .into_iter()
            .filter_map(|r| r.alias().map(ToString::to_string))
            .collect()
    }

    /// True when the tree contains an aggregate call.
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Agg { .. }) {
                found = true;
            }
        });
        found
    }

    /// Rebuilds the tree bottom-up, letting `f` replace any node.
    ///
    /// `f` sees each node before its children are rewritten; returning
    /// `Some` replaces the node (and skips its children).
    pub fn rewrite(&self, f: &mut dyn FnMut(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replacement) = f(self) {
            return replacement;
        }
        match self {
            Expr::Ref(_) | Expr::Val(_) => self.clone(),
            Expr::Func { func, args } => Expr::Func {
                func: *func,
                args: args.iter().map(|a| a.rewrite(f)).collect(),
            },
            Expr::Agg { func, arg } => Expr::Agg {
                func: *func,
                arg: Box::new(arg.rewrite(f)),
            },
        }
    }

    /// Drops the alias segment of every reference to `alias`.
    ///
    /// Used to push a clause that only touches one source down to that
    /// source's row-level filter.
    pub fn strip_alias(&self, alias: &str) -> Expr {
        self.rewrite(&mut |e| match e {
            Expr::Ref(r) if r.alias() == Some(alias) => {
                Some(Expr::Ref(PropRef::new(r.field_path().iter().cloned())))
            }
            _ => None,
        })
    }

    /// Splits a conjunction into its operands.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Func {
                func: Func::And,
                args,
            } => args.iter().flat_map(|a| a.conjuncts()).collect(),
            other => alloc::vec![other],
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ref(r) => f.write_str(&r.dotted()),
            Expr::Val(v) => write!(f, "{}", v),
            Expr::Func { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Agg { func, arg } => write!(f, "{}({})", func.name(), arg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::vec;

    #[test]
    fn test_prop_ref_parse() {
        let r = PropRef::parse("todo.owner.name");
        assert_eq!(r.alias(), Some("todo"));
        assert_eq!(r.field_path(), &["owner".to_string(), "name".to_string()]);
        assert_eq!(r.dotted(), "todo.owner.name");
    }

    #[test]
    fn test_builders_and_display() {
        let e = Expr::and(vec![
            Expr::eq(Expr::col("todo.done"), Expr::val(false)),
            Expr::gt(Expr::col("todo.id"), Expr::val(3i64)),
        ]);
        assert_eq!(format!("{}", e), "and(eq(todo.done, false), gt(todo.id, 3))");
        assert_eq!(Expr::and(vec![Expr::val(true)]), Expr::val(true));
    }

    #[test]
    fn test_aliases_and_aggregates() {
        let e = Expr::eq(Expr::col("a.x"), Expr::col("b.y"));
        let aliases: Vec<_> = e.aliases().into_iter().collect();
        assert_eq!(aliases, vec!["a".to_string(), "b".to_string()]);
        assert!(!e.contains_aggregate());
        assert!(Expr::add(Expr::count(Expr::col("a.x")), Expr::val(1i64)).contains_aggregate());
    }

    #[test]
    fn test_strip_alias() {
        let e = Expr::eq(Expr::col("todo.done"), Expr::val(false));
        let stripped = e.strip_alias("todo");
        assert_eq!(stripped, Expr::eq(Expr::col("done"), Expr::val(false)));
        // Other aliases stay untouched
        assert_eq!(e.strip_alias("user"), e);
    }

    #[test]
    fn test_conjuncts_flatten() {
        let e = Expr::and(vec![
            Expr::val(true),
            Expr::and(vec![Expr::col("a.x"), Expr::col("a.y")]),
        ]);
        assert_eq!(e.conjuncts().len(), 3);
    }
}
