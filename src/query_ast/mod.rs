//! Source-side query AST.
//!
//! A query is a chain of operators (`QueryExpr`) rooted at an entity set or a
//! collection-valued expression. Operators carry lambdas (`Lambda`) whose
//! bodies are value expressions (`Expr`). Nested queries inside a lambda
//! appear as `Expr::Subquery`.
//!
//! The AST is plain data: it derives `Serialize` so that the compiler can
//! fingerprint it for caching, and `Deserialize` so that HTTP clients can
//! submit pre-built trees instead of query text.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryExpr {
    /// Query root over a named entity set, e.g. `Orders`
    EntitySet(String),
    /// A collection-valued expression used as a source, e.g. `c.Orders`
    Collection(Box<Expr>),
    Filter {
        source: Box<QueryExpr>,
        predicate: Lambda,
    },
    Project {
        source: Box<QueryExpr>,
        selector: Lambda,
    },
    ProjectMany {
        source: Box<QueryExpr>,
        selector: Lambda,
    },
    Join {
        outer: Box<QueryExpr>,
        inner: Box<QueryExpr>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
        kind: JoinKind,
    },
    OrderBy {
        source: Box<QueryExpr>,
        key: Lambda,
        descending: bool,
        /// `ThenBy`: append to existing orderings instead of replacing them
        append: bool,
    },
    GroupBy {
        source: Box<QueryExpr>,
        key: Lambda,
    },
    Take {
        source: Box<QueryExpr>,
        count: Expr,
    },
    Skip {
        source: Box<QueryExpr>,
        count: Expr,
    },
    Distinct {
        source: Box<QueryExpr>,
    },
    SetOperation {
        operator: SetOperator,
        left: Box<QueryExpr>,
        right: Box<QueryExpr>,
    },
    /// Terminal aggregate. `argument` is the selector (`Sum(o => o.Total)`)
    /// or predicate (`Any(o => ...)`, `Count(o => ...)`).
    Aggregate {
        source: Box<QueryExpr>,
        operator: AggregateOperator,
        argument: Option<Lambda>,
    },
    /// Terminal membership test, e.g. `@ids.Contains(o.Id)`
    Contains {
        source: Box<QueryExpr>,
        item: Box<Expr>,
    },
    Element {
        source: Box<QueryExpr>,
        kind: ElementKind,
        predicate: Option<Lambda>,
        or_default: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOperator {
    Union,
    Concat,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOperator {
    Count,
    LongCount,
    Sum,
    Min,
    Max,
    Average,
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    First,
    Single,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// A lambda parameter in scope, e.g. `o`
    Parameter(String),
    Member {
        target: Box<Expr>,
        name: String,
    },
    Constant(Value),
    /// A value supplied at execution time, e.g. `@minTotal`
    QueryParameter(String),
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    /// Instance (`target` set) or static (`Math.Abs`) method call
    Call {
        target: Option<Box<Expr>>,
        method: String,
        args: Vec<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    /// Anonymous object construction, `new { o.Id, Total = o.Amount }`
    New(Vec<(String, Expr)>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    ArrayLiteral(Vec<Expr>),
    Subquery(Box<QueryExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
    Array(Vec<Value>),
}

impl Lambda {
    pub fn new(param: impl Into<String>, body: Expr) -> Self {
        Lambda {
            params: vec![param.into()],
            body,
        }
    }

    pub fn with_params(params: Vec<&str>, body: Expr) -> Self {
        Lambda {
            params: params.into_iter().map(String::from).collect(),
            body,
        }
    }
}

// Fluent builders. The parser produces the same trees; the builders keep
// hand-written ASTs in tests and library callers readable.
impl QueryExpr {
    pub fn entity_set(name: impl Into<String>) -> Self {
        QueryExpr::EntitySet(name.into())
    }

    pub fn collection(expr: Expr) -> Self {
        QueryExpr::Collection(Box::new(expr))
    }

    pub fn filter(self, predicate: Lambda) -> Self {
        QueryExpr::Filter {
            source: Box::new(self),
            predicate,
        }
    }

    pub fn project(self, selector: Lambda) -> Self {
        QueryExpr::Project {
            source: Box::new(self),
            selector,
        }
    }

    pub fn project_many(self, selector: Lambda) -> Self {
        QueryExpr::ProjectMany {
            source: Box::new(self),
            selector,
        }
    }

    pub fn order_by(self, key: Lambda, descending: bool) -> Self {
        QueryExpr::OrderBy {
            source: Box::new(self),
            key,
            descending,
            append: false,
        }
    }

    pub fn then_by(self, key: Lambda, descending: bool) -> Self {
        QueryExpr::OrderBy {
            source: Box::new(self),
            key,
            descending,
            append: true,
        }
    }

    pub fn group_by(self, key: Lambda) -> Self {
        QueryExpr::GroupBy {
            source: Box::new(self),
            key,
        }
    }

    pub fn take(self, count: Expr) -> Self {
        QueryExpr::Take {
            source: Box::new(self),
            count,
        }
    }

    pub fn skip(self, count: Expr) -> Self {
        QueryExpr::Skip {
            source: Box::new(self),
            count,
        }
    }

    pub fn distinct(self) -> Self {
        QueryExpr::Distinct {
            source: Box::new(self),
        }
    }

    pub fn set_operation(self, operator: SetOperator, right: QueryExpr) -> Self {
        QueryExpr::SetOperation {
            operator,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn aggregate(self, operator: AggregateOperator, argument: Option<Lambda>) -> Self {
        QueryExpr::Aggregate {
            source: Box::new(self),
            operator,
            argument,
        }
    }

    pub fn element(self, kind: ElementKind, predicate: Option<Lambda>, or_default: bool) -> Self {
        QueryExpr::Element {
            source: Box::new(self),
            kind,
            predicate,
            or_default,
        }
    }

    pub fn join(
        self,
        inner: QueryExpr,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
        kind: JoinKind,
    ) -> Self {
        QueryExpr::Join {
            outer: Box::new(self),
            inner: Box::new(inner),
            outer_key,
            inner_key,
            result,
            kind,
        }
    }

    /// Upstream operator, `None` for roots and set operations
    pub fn source(&self) -> Option<&QueryExpr> {
        match self {
            QueryExpr::EntitySet(_) | QueryExpr::Collection(_) => None,
            QueryExpr::SetOperation { .. } => None,
            QueryExpr::Join { outer, .. } => Some(outer),
            QueryExpr::Filter { source, .. }
            | QueryExpr::Project { source, .. }
            | QueryExpr::ProjectMany { source, .. }
            | QueryExpr::OrderBy { source, .. }
            | QueryExpr::GroupBy { source, .. }
            | QueryExpr::Take { source, .. }
            | QueryExpr::Skip { source, .. }
            | QueryExpr::Distinct { source }
            | QueryExpr::Aggregate { source, .. }
            | QueryExpr::Contains { source, .. }
            | QueryExpr::Element { source, .. } => Some(source),
        }
    }

    /// Terminal operators produce a single value instead of a sequence
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryExpr::Aggregate { .. } | QueryExpr::Contains { .. } | QueryExpr::Element { .. }
        )
    }

    /// Operator name as written in query text, used in error messages
    pub fn operator_name(&self) -> &'static str {
        match self {
            QueryExpr::EntitySet(_) => "EntitySet",
            QueryExpr::Collection(_) => "Collection",
            QueryExpr::Filter { .. } => "Where",
            QueryExpr::Project { .. } => "Select",
            QueryExpr::ProjectMany { .. } => "SelectMany",
            QueryExpr::Join {
                kind: JoinKind::Inner,
                ..
            } => "Join",
            QueryExpr::Join {
                kind: JoinKind::Left,
                ..
            } => "LeftJoin",
            QueryExpr::OrderBy {
                append: false,
                descending: false,
                ..
            } => "OrderBy",
            QueryExpr::OrderBy {
                append: false,
                descending: true,
                ..
            } => "OrderByDescending",
            QueryExpr::OrderBy {
                descending: false,
                ..
            } => "ThenBy",
            QueryExpr::OrderBy { .. } => "ThenByDescending",
            QueryExpr::GroupBy { .. } => "GroupBy",
            QueryExpr::Take { .. } => "Take",
            QueryExpr::Skip { .. } => "Skip",
            QueryExpr::Distinct { .. } => "Distinct",
            QueryExpr::SetOperation { operator, .. } => match operator {
                SetOperator::Union => "Union",
                SetOperator::Concat => "Concat",
                SetOperator::Intersect => "Intersect",
                SetOperator::Except => "Except",
            },
            QueryExpr::Aggregate { operator, .. } => operator.method_name(),
            QueryExpr::Contains { .. } => "Contains",
            QueryExpr::Element {
                kind, or_default, ..
            } => match (kind, or_default) {
                (ElementKind::First, false) => "First",
                (ElementKind::First, true) => "FirstOrDefault",
                (ElementKind::Single, false) => "Single",
                (ElementKind::Single, true) => "SingleOrDefault",
            },
        }
    }
}

impl AggregateOperator {
    pub fn method_name(&self) -> &'static str {
        match self {
            AggregateOperator::Count => "Count",
            AggregateOperator::LongCount => "LongCount",
            AggregateOperator::Sum => "Sum",
            AggregateOperator::Min => "Min",
            AggregateOperator::Max => "Max",
            AggregateOperator::Average => "Average",
            AggregateOperator::Any => "Any",
            AggregateOperator::All => "All",
        }
    }
}

impl Expr {
    pub fn param(name: impl Into<String>) -> Self {
        Expr::Parameter(name.into())
    }

    pub fn query_param(name: impl Into<String>) -> Self {
        Expr::QueryParameter(name.into())
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    pub fn member(self, name: impl Into<String>) -> Self {
        Expr::Member {
            target: Box::new(self),
            name: name.into(),
        }
    }

    pub fn binary(self, op: BinaryOperator, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Equal, right)
    }

    pub fn gt(self, right: Expr) -> Self {
        self.binary(BinaryOperator::GreaterThan, right)
    }

    pub fn and(self, right: Expr) -> Self {
        self.binary(BinaryOperator::AndAlso, right)
    }

    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOperator::Not,
            operand: Box::new(self),
        }
    }

    pub fn call(self, method: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            target: Some(Box::new(self)),
            method: method.into(),
            args,
        }
    }

    pub fn index(self, index: Expr) -> Self {
        Expr::Index {
            target: Box::new(self),
            index: Box::new(index),
        }
    }

    pub fn subquery(query: QueryExpr) -> Self {
        Expr::Subquery(Box::new(query))
    }

    /// Splits `p.a.b.c` into (`p`, [a, b, c]). Returns `None` when the chain
    /// is not rooted at a lambda parameter.
    pub fn as_member_chain(&self) -> Option<(&str, Vec<&str>)> {
        let mut members = Vec::new();
        let mut current = self;
        loop {
            match current {
                Expr::Member { target, name } => {
                    members.push(name.as_str());
                    current = target;
                }
                Expr::Parameter(root) => {
                    members.reverse();
                    return Some((root.as_str(), members));
                }
                _ => return None,
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::AndAlso => "&&",
            BinaryOperator::OrElse => "||",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Coalesce => "??",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::LessThan
                | BinaryOperator::LessThanOrEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterThanOrEqual
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::DateTime(dt) => write!(f, "DateTime(\"{}\")", dt.format("%Y-%m-%dT%H:%M:%S")),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Renders expressions back in method-chain syntax for diagnostics.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Parameter(name) => write!(f, "{}", name),
            Expr::Member { target, name } => write!(f, "{}.{}", target, name),
            Expr::Constant(value) => write!(f, "{}", value),
            Expr::QueryParameter(name) => write!(f, "@{}", name),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Unary { op, operand } => match op {
                UnaryOperator::Not => write!(f, "!{}", operand),
                UnaryOperator::Negate => write!(f, "-{}", operand),
            },
            Expr::Call {
                target,
                method,
                args,
            } => {
                if let Some(target) = target {
                    write!(f, "{}.", target)?;
                }
                write!(f, "{}(", method)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "({} ? {} : {})", test, if_true, if_false),
            Expr::New(members) => {
                write!(f, "new {{ ")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, value)?;
                }
                write!(f, " }}")
            }
            Expr::Index { target, index } => write!(f, "{}[{}]", target, index),
            Expr::ArrayLiteral(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Expr::Subquery(query) => write!(f, "{}", query),
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.len() == 1 {
            write!(f, "{} => {}", self.params[0], self.body)
        } else {
            write!(f, "({}) => {}", self.params.join(", "), self.body)
        }
    }
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpr::EntitySet(name) => write!(f, "{}", name),
            QueryExpr::Collection(expr) => write!(f, "{}", expr),
            QueryExpr::SetOperation { left, right, .. } => {
                write!(f, "{}.{}({})", left, self.operator_name(), right)
            }
            QueryExpr::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
                ..
            } => write!(
                f,
                "{}.{}({}, {}, {}, {})",
                outer,
                self.operator_name(),
                inner,
                outer_key,
                inner_key,
                result
            ),
            QueryExpr::Filter { source, predicate } => {
                write!(f, "{}.Where({})", source, predicate)
            }
            QueryExpr::Project { source, selector } | QueryExpr::ProjectMany { source, selector } => {
                write!(f, "{}.{}({})", source, self.operator_name(), selector)
            }
            QueryExpr::OrderBy { source, key, .. } | QueryExpr::GroupBy { source, key } => {
                write!(f, "{}.{}({})", source, self.operator_name(), key)
            }
            QueryExpr::Take { source, count } | QueryExpr::Skip { source, count } => {
                write!(f, "{}.{}({})", source, self.operator_name(), count)
            }
            QueryExpr::Distinct { source } => write!(f, "{}.Distinct()", source),
            QueryExpr::Aggregate {
                source, argument, ..
            } => match argument {
                Some(arg) => write!(f, "{}.{}({})", source, self.operator_name(), arg),
                None => write!(f, "{}.{}()", source, self.operator_name()),
            },
            QueryExpr::Contains { source, item } => write!(f, "{}.Contains({})", source, item),
            QueryExpr::Element {
                source, predicate, ..
            } => match predicate {
                Some(p) => write!(f, "{}.{}({})", source, self.operator_name(), p),
                None => write!(f, "{}.{}()", source, self.operator_name()),
            },
        }
    }
}
