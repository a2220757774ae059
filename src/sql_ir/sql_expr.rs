use serde::{Deserialize, Serialize};

use crate::model::ValueType;
use crate::query_ast::Value;

use super::SelectExpression;

/// Scalar and structural expressions of the relational IR.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum SqlExpr {
    Column(ColumnRef),

    /// The whole row or document bound to a source alias (`c` in `SELECT VALUE c`)
    SourceRef(SourceRef),

    Literal(Literal),

    Parameter(SqlParameter),

    Binary(SqlBinary),

    Unary(SqlUnary),

    /// Canonical function; the dialect decides how it is spelled
    Function(SqlFunction),

    Aggregate(SqlAggregate),

    Case(SqlCase),

    In(SqlIn),

    /// Path read into a JSON value. Never a column reference: reading it
    /// requires dialect-specific decoding.
    DynamicField(DynamicField),

    Exists(Box<SelectExpression>),

    ScalarSubquery(Box<SelectExpression>),

    /// A subquery materialized as an array value, `ARRAY(SELECT VALUE ...)`
    ArrayWrap(Box<SelectExpression>),

    ArrayLiteral(Vec<SqlExpr>),

    /// Object construction, `{"a": x}` or `JSON_OBJECT('a', x)`
    ObjectWrap(Vec<(String, SqlExpr)>),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table_alias: String,
    pub column: String,
    pub value_type: ValueType,
    pub nullable: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub alias: String,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Literal {
    pub value: Value,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SqlParameter {
    pub name: String,
    pub value_type: ValueType,
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum SqlBinaryOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    /// String concatenation, spelled per dialect
    Concat,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SqlBinary {
    pub operator: SqlBinaryOperator,
    pub left: Box<SqlExpr>,
    pub right: Box<SqlExpr>,
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum SqlUnaryOperator {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SqlUnary {
    pub operator: SqlUnaryOperator,
    pub operand: Box<SqlExpr>,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalFunction {
    StartsWith,
    EndsWith,
    /// String containment
    Contains,
    ToUpper,
    ToLower,
    Trim,
    Length,
    Substring,
    Replace,
    IndexOf,
    Abs,
    Ceiling,
    Floor,
    Round,
    Power,
    Sqrt,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Now,
    Coalesce,
    /// Membership of a value in an array-valued expression or parameter
    ArrayContains,
    ArrayLength,
}

impl CanonicalFunction {
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalFunction::StartsWith => "starts_with",
            CanonicalFunction::EndsWith => "ends_with",
            CanonicalFunction::Contains => "contains",
            CanonicalFunction::ToUpper => "to_upper",
            CanonicalFunction::ToLower => "to_lower",
            CanonicalFunction::Trim => "trim",
            CanonicalFunction::Length => "length",
            CanonicalFunction::Substring => "substring",
            CanonicalFunction::Replace => "replace",
            CanonicalFunction::IndexOf => "index_of",
            CanonicalFunction::Abs => "abs",
            CanonicalFunction::Ceiling => "ceiling",
            CanonicalFunction::Floor => "floor",
            CanonicalFunction::Round => "round",
            CanonicalFunction::Power => "power",
            CanonicalFunction::Sqrt => "sqrt",
            CanonicalFunction::Year => "year",
            CanonicalFunction::Month => "month",
            CanonicalFunction::Day => "day",
            CanonicalFunction::Hour => "hour",
            CanonicalFunction::Minute => "minute",
            CanonicalFunction::Second => "second",
            CanonicalFunction::Now => "now",
            CanonicalFunction::Coalesce => "coalesce",
            CanonicalFunction::ArrayContains => "array_contains",
            CanonicalFunction::ArrayLength => "array_length",
        }
    }

    /// Functions whose result is a boolean condition
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            CanonicalFunction::StartsWith
                | CanonicalFunction::EndsWith
                | CanonicalFunction::Contains
                | CanonicalFunction::ArrayContains
        )
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SqlFunction {
    pub function: CanonicalFunction,
    pub args: Vec<SqlExpr>,
    pub value_type: ValueType,
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    LongCount,
    Sum,
    Min,
    Max,
    Average,
    /// Aggregates one JSON object per row into a JSON array
    JsonArray,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SqlAggregate {
    pub function: AggregateFunction,
    /// `None` means `COUNT(*)`
    pub argument: Option<Box<SqlExpr>>,
    pub distinct: bool,
    pub value_type: ValueType,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SqlCase {
    pub when_then: Vec<(SqlExpr, SqlExpr)>,
    pub else_expr: Option<Box<SqlExpr>>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SqlIn {
    pub item: Box<SqlExpr>,
    pub values: Vec<SqlExpr>,
    pub negated: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum PathSegment {
    Property(String),
    Index(Box<SqlExpr>),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DynamicField {
    pub base: Box<SqlExpr>,
    pub path: Vec<PathSegment>,
    pub value_type: ValueType,
}

impl SqlBinaryOperator {
    /// Binding strength, higher binds tighter
    pub fn precedence(&self) -> u8 {
        match self {
            SqlBinaryOperator::Or => 1,
            SqlBinaryOperator::And => 2,
            SqlBinaryOperator::Equal
            | SqlBinaryOperator::NotEqual
            | SqlBinaryOperator::LessThan
            | SqlBinaryOperator::LessThanOrEqual
            | SqlBinaryOperator::GreaterThan
            | SqlBinaryOperator::GreaterThanOrEqual => 4,
            SqlBinaryOperator::Add | SqlBinaryOperator::Subtract | SqlBinaryOperator::Concat => 5,
            SqlBinaryOperator::Multiply | SqlBinaryOperator::Divide | SqlBinaryOperator::Modulo => {
                6
            }
        }
    }

    /// `a op (b op c)` == `(a op b) op c`
    pub fn is_associative(&self) -> bool {
        matches!(
            self,
            SqlBinaryOperator::And
                | SqlBinaryOperator::Or
                | SqlBinaryOperator::Add
                | SqlBinaryOperator::Multiply
                | SqlBinaryOperator::Concat
        )
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 4
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, SqlBinaryOperator::And | SqlBinaryOperator::Or)
    }
}

impl SqlExpr {
    pub fn column(
        table_alias: impl Into<String>,
        column: impl Into<String>,
        value_type: ValueType,
        nullable: bool,
    ) -> Self {
        SqlExpr::Column(ColumnRef {
            table_alias: table_alias.into(),
            column: column.into(),
            value_type,
            nullable,
        })
    }

    pub fn source_ref(alias: impl Into<String>) -> Self {
        SqlExpr::SourceRef(SourceRef {
            alias: alias.into(),
        })
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        SqlExpr::Literal(Literal {
            value: value.into(),
        })
    }

    pub fn null() -> Self {
        SqlExpr::Literal(Literal { value: Value::Null })
    }

    pub fn binary(operator: SqlBinaryOperator, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary(SqlBinary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(operator: SqlUnaryOperator, operand: SqlExpr) -> Self {
        SqlExpr::Unary(SqlUnary {
            operator,
            operand: Box::new(operand),
        })
    }

    pub fn equal(left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::binary(SqlBinaryOperator::Equal, left, right)
    }

    pub fn and(left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::binary(SqlBinaryOperator::And, left, right)
    }

    pub fn or(left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::binary(SqlBinaryOperator::Or, left, right)
    }

    pub fn not(operand: SqlExpr) -> Self {
        SqlExpr::unary(SqlUnaryOperator::Not, operand)
    }

    pub fn function(function: CanonicalFunction, args: Vec<SqlExpr>, value_type: ValueType) -> Self {
        SqlExpr::Function(SqlFunction {
            function,
            args,
            value_type,
        })
    }

    pub fn dynamic_field(base: SqlExpr, path: Vec<PathSegment>, value_type: ValueType) -> Self {
        SqlExpr::DynamicField(DynamicField {
            base: Box::new(base),
            path,
            value_type,
        })
    }

    /// AND-combines an optional list of conditions
    pub fn and_all(conditions: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
        conditions.into_iter().reduce(SqlExpr::and)
    }

    /// Best-effort static type of the expression
    pub fn value_type(&self) -> ValueType {
        match self {
            SqlExpr::Column(c) => c.value_type,
            SqlExpr::SourceRef(_) => ValueType::Json,
            SqlExpr::Literal(l) => match &l.value {
                Value::Null => ValueType::Unknown,
                Value::Bool(_) => ValueType::Bool,
                Value::Int(_) => ValueType::Int,
                Value::Float(_) => ValueType::Double,
                Value::String(_) => ValueType::String,
                Value::DateTime(_) => ValueType::DateTime,
                Value::Array(_) => ValueType::Array,
            },
            SqlExpr::Parameter(p) => p.value_type,
            SqlExpr::Binary(b) => {
                if b.operator.is_comparison() || b.operator.is_logical() {
                    ValueType::Bool
                } else if b.operator == SqlBinaryOperator::Concat {
                    ValueType::String
                } else {
                    match (b.left.value_type(), b.right.value_type()) {
                        (ValueType::Unknown, other) | (other, _) => other,
                    }
                }
            }
            SqlExpr::Unary(u) => match u.operator {
                SqlUnaryOperator::Negate => u.operand.value_type(),
                _ => ValueType::Bool,
            },
            SqlExpr::Function(f) => f.value_type,
            SqlExpr::Aggregate(a) => a.value_type,
            SqlExpr::Case(c) => c
                .when_then
                .first()
                .map(|(_, then)| then.value_type())
                .unwrap_or(ValueType::Unknown),
            SqlExpr::In(_) | SqlExpr::Exists(_) => ValueType::Bool,
            SqlExpr::DynamicField(d) => d.value_type,
            SqlExpr::ScalarSubquery(select) => select
                .projection
                .first()
                .map(|item| item.expression.value_type())
                .unwrap_or(ValueType::Unknown),
            SqlExpr::ArrayWrap(_) | SqlExpr::ArrayLiteral(_) => ValueType::Array,
            SqlExpr::ObjectWrap(_) => ValueType::Json,
        }
    }

    /// Whether the expression is a search condition (as opposed to a value)
    pub fn is_condition(&self) -> bool {
        match self {
            SqlExpr::Binary(b) => b.operator.is_comparison() || b.operator.is_logical(),
            SqlExpr::Unary(u) => u.operator != SqlUnaryOperator::Negate,
            SqlExpr::In(_) | SqlExpr::Exists(_) => true,
            SqlExpr::Function(f) => f.function.is_predicate(),
            _ => false,
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            SqlExpr::Column(c) => c.nullable,
            SqlExpr::Literal(l) => l.value == Value::Null,
            SqlExpr::Binary(b) => b.left.is_nullable() || b.right.is_nullable(),
            SqlExpr::Parameter(_)
            | SqlExpr::DynamicField(_)
            | SqlExpr::ScalarSubquery(_)
            | SqlExpr::Case(_) => true,
            SqlExpr::Aggregate(a) => !matches!(
                a.function,
                AggregateFunction::Count | AggregateFunction::LongCount
            ),
            SqlExpr::Function(f) => f.args.iter().any(SqlExpr::is_nullable),
            _ => false,
        }
    }

    pub fn is_true_constant(&self) -> bool {
        matches!(self, SqlExpr::Literal(Literal { value: Value::Bool(true) }))
    }

    /// Whether the expression contains an aggregate outside nested selects
    pub fn contains_aggregate(&self) -> bool {
        match self {
            SqlExpr::Aggregate(_) => true,
            SqlExpr::Binary(b) => b.left.contains_aggregate() || b.right.contains_aggregate(),
            SqlExpr::Unary(u) => u.operand.contains_aggregate(),
            SqlExpr::Function(f) => f.args.iter().any(SqlExpr::contains_aggregate),
            SqlExpr::Case(c) => {
                c.when_then
                    .iter()
                    .any(|(w, t)| w.contains_aggregate() || t.contains_aggregate())
                    || c.else_expr.as_ref().is_some_and(|e| e.contains_aggregate())
            }
            SqlExpr::In(i) => {
                i.item.contains_aggregate() || i.values.iter().any(SqlExpr::contains_aggregate)
            }
            SqlExpr::DynamicField(d) => d.base.contains_aggregate(),
            SqlExpr::ObjectWrap(members) => members.iter().any(|(_, e)| e.contains_aggregate()),
            SqlExpr::ArrayLiteral(items) => items.iter().any(SqlExpr::contains_aggregate),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_inference() {
        let id = SqlExpr::column("o", "Id", ValueType::Int, false);
        let name = SqlExpr::column("c", "Name", ValueType::String, true);
        assert_eq!(
            SqlExpr::binary(SqlBinaryOperator::Add, id.clone(), SqlExpr::literal(1)).value_type(),
            ValueType::Int
        );
        assert_eq!(
            SqlExpr::equal(name.clone(), SqlExpr::literal("Ann")).value_type(),
            ValueType::Bool
        );
        assert!(SqlExpr::equal(name.clone(), SqlExpr::literal("Ann")).is_condition());
        assert!(!name.is_condition());
        assert!(name.is_nullable());
        assert!(!id.is_nullable());
    }

    #[test]
    fn test_and_all() {
        assert!(SqlExpr::and_all(Vec::new()).is_none());
        let a = SqlExpr::column("o", "A", ValueType::Bool, false);
        let b = SqlExpr::column("o", "B", ValueType::Bool, false);
        assert_eq!(
            SqlExpr::and_all(vec![a.clone(), b.clone()]),
            Some(SqlExpr::and(a, b))
        );
    }

    #[test]
    fn test_contains_aggregate_ignores_nested_selects() {
        let count = SqlExpr::Aggregate(SqlAggregate {
            function: AggregateFunction::Count,
            argument: None,
            distinct: false,
            value_type: ValueType::Int,
        });
        assert!(SqlExpr::binary(SqlBinaryOperator::GreaterThan, count.clone(), SqlExpr::literal(1))
            .contains_aggregate());
        let mut inner = SelectExpression::default();
        inner.projection.push(super::super::ProjectionItem {
            expression: count,
            alias: "c".to_string(),
        });
        assert!(!SqlExpr::ScalarSubquery(Box::new(inner)).contains_aggregate());
    }
}
