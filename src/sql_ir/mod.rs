//! Relational intermediate representation.
//!
//! A [`SelectExpression`] is the unit of composition: the translator mutates
//! the current select while operators can be merged into it, and wraps it as
//! a subquery source once a further operator would change its meaning (see
//! [`SelectExpression::needs_wrapping`]). The `apply_*` methods refuse to
//! merge into a select whose state makes the merge unsound and report a
//! [`CompositionViolation`](crate::errors::QueryCompilationError) instead.

pub mod shaper;
pub mod sql_expr;

use serde::{Deserialize, Serialize};

use crate::errors::{CompilationResult, QueryCompilationError};

pub use shaper::{Shaper, ValueSlot};
pub use sql_expr::{
    AggregateFunction, CanonicalFunction, ColumnRef, DynamicField, Literal, PathSegment,
    SourceRef, SqlAggregate, SqlBinary, SqlBinaryOperator, SqlCase, SqlExpr, SqlFunction, SqlIn,
    SqlParameter, SqlUnary, SqlUnaryOperator,
};

#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct SelectExpression {
    pub projection: Vec<ProjectionItem>,
    pub projection_form: ProjectionForm,
    pub sources: Vec<Source>,
    pub predicate: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub having: Option<SqlExpr>,
    pub orderings: Vec<Ordering>,
    pub limit: Option<SqlExpr>,
    pub offset: Option<SqlExpr>,
    pub distinct: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ProjectionItem {
    pub expression: SqlExpr,
    pub alias: String,
}

/// Relational rows (`SELECT a, b`) or a single value per row (`SELECT VALUE x`)
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum ProjectionForm {
    #[default]
    Rows,
    Value,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Ordering {
    pub expression: SqlExpr,
    pub ascending: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Source {
    pub alias: String,
    pub kind: SourceKind,
    pub join: JoinType,
    pub on: Option<SqlExpr>,
    /// Iteration variable bound to an array-valued expression (`o IN c.Orders`)
    pub with_in: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum SourceKind {
    Table(TableRef),
    Subquery(Box<SelectExpression>),
    Expression(SqlExpr),
    SetOperation(SetOperation),
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    pub schema: Option<String>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SetOperation {
    pub operator: SetOperator,
    pub left: Box<SelectExpression>,
    pub right: Box<SelectExpression>,
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum SetOperator {
    Union,
    UnionAll,
    Intersect,
    Except,
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum JoinType {
    /// First source of the FROM clause
    From,
    Inner,
    Left,
    Cross,
}

/// Operators that may be composed on top of an existing select
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum CompositionOperator {
    Filter,
    Project,
    OrderBy,
    GroupBy,
    Take,
    Skip,
    Distinct,
    Join,
    Aggregate,
    SetOperand,
}

impl Source {
    pub fn table(alias: impl Into<String>, name: impl Into<String>, schema: Option<String>) -> Self {
        Source {
            alias: alias.into(),
            kind: SourceKind::Table(TableRef {
                name: name.into(),
                schema,
            }),
            join: JoinType::From,
            on: None,
            with_in: false,
        }
    }

    pub fn subquery(alias: impl Into<String>, select: SelectExpression) -> Self {
        Source {
            alias: alias.into(),
            kind: SourceKind::Subquery(Box::new(select)),
            join: JoinType::From,
            on: None,
            with_in: false,
        }
    }

    /// `alias IN expr` iteration source
    pub fn iteration(alias: impl Into<String>, array: SqlExpr) -> Self {
        Source {
            alias: alias.into(),
            kind: SourceKind::Expression(array),
            join: JoinType::From,
            on: None,
            with_in: true,
        }
    }

    pub fn joined(mut self, join: JoinType, on: Option<SqlExpr>) -> Self {
        self.join = join;
        self.on = on;
        self
    }
}

impl SelectExpression {
    pub fn from_source(source: Source) -> Self {
        SelectExpression {
            sources: vec![source],
            ..Default::default()
        }
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }

    /// Whether composing `operator` onto this select requires wrapping it in
    /// a subquery first.
    pub fn needs_wrapping(&self, operator: CompositionOperator) -> bool {
        let paged = self.limit.is_some() || self.offset.is_some();
        match operator {
            CompositionOperator::Filter => {
                paged || self.distinct || !self.orderings.is_empty()
            }
            CompositionOperator::Project => self.distinct,
            CompositionOperator::OrderBy => paged || self.distinct,
            CompositionOperator::GroupBy => paged || self.distinct || self.is_grouped(),
            CompositionOperator::Take => self.limit.is_some(),
            CompositionOperator::Skip => {
                paged || (self.distinct && self.orderings.is_empty())
            }
            CompositionOperator::Distinct => paged,
            CompositionOperator::Join => paged || self.distinct || self.is_grouped(),
            CompositionOperator::Aggregate => paged || self.distinct || self.is_grouped(),
            CompositionOperator::SetOperand => paged,
        }
    }

    /// A single plain table source with nothing composed on top of it
    pub fn as_plain_table(&self) -> Option<&Source> {
        match self.sources.as_slice() {
            [source @ Source {
                kind: SourceKind::Table(_),
                ..
            }] if self.predicate.is_none()
                && self.group_by.is_empty()
                && self.having.is_none()
                && self.orderings.is_empty()
                && self.limit.is_none()
                && self.offset.is_none()
                && !self.distinct =>
            {
                Some(source)
            }
            _ => None,
        }
    }

    fn ensure(&self, operator: CompositionOperator, name: &str) -> CompilationResult<()> {
        if self.needs_wrapping(operator) {
            Err(QueryCompilationError::composition(
                name,
                format!(
                    "select has limit={}, offset={}, distinct={}, orderings={}, grouped={}",
                    self.limit.is_some(),
                    self.offset.is_some(),
                    self.distinct,
                    self.orderings.len(),
                    self.is_grouped()
                ),
            ))
        } else {
            Ok(())
        }
    }

    /// AND-combines `predicate` into WHERE, or HAVING once grouped. A
    /// constant `true` is dropped.
    pub fn apply_predicate(&mut self, predicate: SqlExpr) -> CompilationResult<()> {
        if predicate.is_true_constant() {
            return Ok(());
        }
        // Orderings survive a merged predicate; paging and distinct do not.
        if self.limit.is_some() || self.offset.is_some() || self.distinct {
            return Err(QueryCompilationError::composition(
                "predicate",
                "select is paged or distinct",
            ));
        }
        let slot = if self.is_grouped() {
            &mut self.having
        } else {
            &mut self.predicate
        };
        *slot = Some(match slot.take() {
            Some(existing) => SqlExpr::and(existing, predicate),
            None => predicate,
        });
        Ok(())
    }

    pub fn apply_ordering(&mut self, ordering: Ordering, append: bool) -> CompilationResult<()> {
        self.ensure(CompositionOperator::OrderBy, "ordering")?;
        if !append {
            self.orderings.clear();
        }
        if !self
            .orderings
            .iter()
            .any(|o| o.expression == ordering.expression)
        {
            self.orderings.push(ordering);
        }
        Ok(())
    }

    pub fn apply_limit(&mut self, limit: SqlExpr) -> CompilationResult<()> {
        self.ensure(CompositionOperator::Take, "limit")?;
        self.limit = Some(limit);
        Ok(())
    }

    pub fn apply_offset(&mut self, offset: SqlExpr) -> CompilationResult<()> {
        self.ensure(CompositionOperator::Skip, "offset")?;
        self.offset = Some(offset);
        Ok(())
    }

    /// Marks the select distinct; orderings below a distinct are meaningless
    pub fn apply_distinct(&mut self) -> CompilationResult<()> {
        self.ensure(CompositionOperator::Distinct, "distinct")?;
        self.distinct = true;
        self.orderings.clear();
        Ok(())
    }

    pub fn apply_grouping(&mut self, keys: Vec<SqlExpr>) -> CompilationResult<()> {
        self.ensure(CompositionOperator::GroupBy, "grouping")?;
        self.orderings.clear();
        self.group_by = keys;
        Ok(())
    }

    pub fn add_source(&mut self, source: Source) {
        self.sources.push(source);
    }

    pub fn source(&self, alias: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.alias == alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValueType;

    fn orders() -> SelectExpression {
        SelectExpression::from_source(Source::table("o", "Orders", None))
    }

    fn col(name: &str) -> SqlExpr {
        SqlExpr::column("o", name, ValueType::Int, false)
    }

    #[test]
    fn test_predicates_are_and_combined() {
        let mut select = orders();
        select
            .apply_predicate(SqlExpr::equal(col("A"), SqlExpr::literal(1)))
            .unwrap();
        select
            .apply_predicate(SqlExpr::equal(col("B"), SqlExpr::literal(2)))
            .unwrap();
        assert!(matches!(
            select.predicate,
            Some(SqlExpr::Binary(SqlBinary {
                operator: SqlBinaryOperator::And,
                ..
            }))
        ));
    }

    #[test]
    fn test_true_predicate_is_dropped() {
        let mut select = orders();
        select.apply_predicate(SqlExpr::literal(true)).unwrap();
        assert!(select.predicate.is_none());
    }

    #[test]
    fn test_predicate_goes_to_having_when_grouped() {
        let mut select = orders();
        select.apply_grouping(vec![col("CustomerId")]).unwrap();
        select
            .apply_predicate(SqlExpr::equal(col("CustomerId"), SqlExpr::literal(1)))
            .unwrap();
        assert!(select.predicate.is_none());
        assert!(select.having.is_some());
    }

    #[test]
    fn test_merging_into_limited_select_is_a_violation() {
        let mut select = orders();
        select.apply_limit(SqlExpr::literal(10)).unwrap();
        assert!(select.needs_wrapping(CompositionOperator::Filter));
        let err = select
            .apply_predicate(SqlExpr::equal(col("A"), SqlExpr::literal(1)))
            .unwrap_err();
        assert!(matches!(err, QueryCompilationError::CompositionViolation { .. }));
        assert!(select.apply_limit(SqlExpr::literal(5)).is_err());
    }

    #[test]
    fn test_distinct_clears_orderings() {
        let mut select = orders();
        select
            .apply_ordering(
                Ordering {
                    expression: col("Id"),
                    ascending: true,
                },
                false,
            )
            .unwrap();
        select.apply_distinct().unwrap();
        assert!(select.orderings.is_empty());
        assert!(select.needs_wrapping(CompositionOperator::Skip));
        assert!(!select.needs_wrapping(CompositionOperator::Take));
    }

    #[test]
    fn test_then_by_appends() {
        let mut select = orders();
        let by = |name: &str| Ordering {
            expression: col(name),
            ascending: true,
        };
        select.apply_ordering(by("A"), false).unwrap();
        select.apply_ordering(by("B"), true).unwrap();
        assert_eq!(select.orderings.len(), 2);
        select.apply_ordering(by("C"), false).unwrap();
        assert_eq!(select.orderings.len(), 1);
    }

    #[test]
    fn test_plain_table_detection() {
        let select = orders();
        assert!(select.as_plain_table().is_some());
        let mut filtered = orders();
        filtered
            .apply_predicate(SqlExpr::equal(col("A"), SqlExpr::literal(1)))
            .unwrap();
        assert!(filtered.as_plain_table().is_none());
    }
}
