//! Projection, pushdown and result shaping.

use crate::errors::{CompilationResult, QueryCompilationError};
use crate::model::ValueType;
use crate::query_ast::QueryExpr;
use crate::sql_ir::{
    AggregateFunction, CompositionOperator, Ordering, ProjectionForm, ProjectionItem, SelectExpression, Shaper,
    Source, SourceKind, SqlAggregate, SqlCase, SqlExpr, ValueSlot,
};

use super::row_shape::{extend_path, EntityProjection, EntityStorage, RowShape, ShapedQuery};
use super::QueryTranslator;

const GROUP_NOT_PROJECTED: &str =
    "a grouping must be projected, e.g. Select(g => new { g.Key, Count = g.Count() })";

impl<'a> QueryTranslator<'a> {
    /// Search condition for WHERE, ON, CASE WHEN. Dialects without boolean
    /// conditions over bit values compare against `TRUE`.
    pub(super) fn as_condition(&self, expr: SqlExpr) -> SqlExpr {
        if !expr.is_condition() && !self.dialect.native_booleans() && expr.value_type() == ValueType::Bool {
            return SqlExpr::equal(expr, SqlExpr::literal(true));
        }
        expr
    }

    /// Value for projections and comparisons. Dialects without boolean
    /// values turn conditions into `CASE WHEN c THEN TRUE ELSE FALSE END`.
    pub(super) fn as_value(&self, expr: SqlExpr) -> SqlExpr {
        if self.dialect.native_booleans() || !expr.is_condition() {
            return expr;
        }
        SqlExpr::Case(SqlCase {
            when_then: vec![(expr, SqlExpr::literal(true))],
            else_expr: Some(Box::new(SqlExpr::literal(false))),
        })
    }

    pub(super) fn single_value_select(&self, mut select: SelectExpression, value: SqlExpr) -> SelectExpression {
        select.projection = vec![ProjectionItem {
            expression: value,
            alias: String::new(),
        }];
        select.projection_form = if self.dialect.is_document() {
            ProjectionForm::Value
        } else {
            ProjectionForm::Rows
        };
        select
    }

    /// `SELECT 1 FROM ...` for EXISTS; orderings only matter when paged
    pub(super) fn exists_select(&self, mut select: SelectExpression) -> SelectExpression {
        select.projection.clear();
        select.projection_form = ProjectionForm::Rows;
        if select.limit.is_none() && select.offset.is_none() {
            select.orderings.clear();
        }
        select
    }

    // ===== PUSHDOWN =====

    /// Wraps the current select as a subquery source and rebinds the row
    /// shape to the subquery's output columns.
    pub(super) fn push_down(&mut self, q: ShapedQuery) -> CompilationResult<ShapedQuery> {
        let alias = self.aliases.next("t");
        let ShapedQuery { mut select, shape, .. } = q;

        let (shape, orderings) = if self.dialect.is_document() {
            let (value, _) = self.element_value(&shape)?;
            select.projection = vec![ProjectionItem {
                expression: value,
                alias: String::new(),
            }];
            select.projection_form = ProjectionForm::Value;
            // orderings cannot be lifted through a VALUE projection
            (rebase_document(&shape, &SqlExpr::source_ref(alias.clone()))?, Vec::new())
        } else {
            let mut items = Vec::new();
            let rebased = self.rebase_rows(&shape, &mut items, &alias, "", true)?;
            let mut lifted = Vec::new();
            if !select.distinct {
                for ordering in &select.orderings {
                    let index = add_projection(&mut items, self.as_value(ordering.expression.clone()), "c", true);
                    lifted.push(Ordering {
                        expression: outer_column(&alias, &items[index]),
                        ascending: ordering.ascending,
                    });
                }
            }
            select.projection = items;
            select.projection_form = ProjectionForm::Rows;
            (rebased, lifted)
        };

        if select.limit.is_none() && select.offset.is_none() {
            select.orderings.clear();
        }
        let mut outer = SelectExpression::from_source(Source::subquery(alias, select));
        outer.orderings = orderings;
        Ok(ShapedQuery::new(outer, shape))
    }

    /// One side of a set operation: projected, without dedupe so both sides
    /// keep positional columns. Returns the select and the shape rebound to
    /// the set-operation source `alias`.
    pub(super) fn set_operand(
        &mut self,
        mut q: ShapedQuery,
        alias: &str,
    ) -> CompilationResult<(SelectExpression, RowShape)> {
        if q.select.needs_wrapping(CompositionOperator::SetOperand) {
            q = self.push_down(q)?;
        }
        if q.select.limit.is_none() && q.select.offset.is_none() {
            q.select.orderings.clear();
        }
        let mut items = Vec::new();
        let shape = self.rebase_rows(&q.shape, &mut items, alias, "", false)?;
        q.select.projection = items;
        q.select.projection_form = ProjectionForm::Rows;
        Ok((q.select, shape))
    }

    /// Projects `shape` into `items` and returns the same shape over the
    /// output columns of the source `alias`.
    fn rebase_rows(
        &self,
        shape: &RowShape,
        items: &mut Vec<ProjectionItem>,
        alias: &str,
        hint: &str,
        dedupe: bool,
    ) -> CompilationResult<RowShape> {
        match shape {
            RowShape::Scalar(expr) => {
                let index = add_projection(items, self.as_value(expr.clone()), hint, dedupe);
                Ok(RowShape::Scalar(outer_column(alias, &items[index])))
            }
            RowShape::Entity(entity) => {
                let storage = match &entity.storage {
                    EntityStorage::Columns(members) => {
                        let mut rebased = Vec::with_capacity(members.len());
                        for (name, expr) in members {
                            let index = add_projection(items, expr.clone(), name, dedupe);
                            rebased.push((name.clone(), outer_column(alias, &items[index])));
                        }
                        EntityStorage::Columns(rebased)
                    }
                    EntityStorage::Document(document) => {
                        let hint = if hint.is_empty() { entity.entity_type.as_str() } else { hint };
                        let index = add_projection(items, document.clone(), hint, dedupe);
                        EntityStorage::Document(outer_column(alias, &items[index]))
                    }
                };
                Ok(RowShape::Entity(EntityProjection {
                    storage,
                    ..entity.clone()
                }))
            }
            RowShape::Object(members) => {
                let mut rebased = Vec::with_capacity(members.len());
                for (name, member) in members {
                    rebased.push((name.clone(), self.rebase_rows(member, items, alias, name, dedupe)?));
                }
                Ok(RowShape::Object(rebased))
            }
            RowShape::Collection { value, element } => {
                let index = add_projection(items, value.clone(), hint, dedupe);
                Ok(RowShape::Collection {
                    value: outer_column(alias, &items[index]),
                    element: element.clone(),
                })
            }
            // Only the key survives a pushed-down grouping
            RowShape::Group { key, .. } => Ok(RowShape::Object(vec![(
                "Key".to_string(),
                self.rebase_rows(key, items, alias, "Key", dedupe)?,
            )])),
        }
    }

    // ===== FINAL PROJECTION =====

    /// Writes the projection for the final row shape and builds the shaper
    /// that reads it back.
    pub(super) fn finalize(&mut self, q: ShapedQuery) -> CompilationResult<(SelectExpression, Shaper)> {
        let ShapedQuery { mut select, shape, .. } = q;
        if self.dialect.is_document() {
            let (value, shaper) = self.element_value(&shape)?;
            select.projection = vec![ProjectionItem {
                expression: value,
                alias: String::new(),
            }];
            select.projection_form = ProjectionForm::Value;
            return Ok((select, shaper));
        }

        let mut items = Vec::new();
        let shaper = match &shape {
            // A lone computed value keeps the database's default column name
            RowShape::Scalar(expr) => {
                items.push(ProjectionItem {
                    expression: self.as_value(expr.clone()),
                    alias: String::new(),
                });
                Shaper::Scalar { slot: ValueSlot::new(0) }
            }
            other => self.shape_rows(other, &mut items, "")?,
        };
        if shaper.arity() != items.len() {
            return Err(QueryCompilationError::composition(
                "final projection",
                format!("shaper reads {} columns but {} are projected", shaper.arity(), items.len()),
            ));
        }
        select.projection = items;
        select.projection_form = ProjectionForm::Rows;
        Ok((select, shaper))
    }

    fn shape_rows(&self, shape: &RowShape, items: &mut Vec<ProjectionItem>, hint: &str) -> CompilationResult<Shaper> {
        match shape {
            RowShape::Scalar(expr) => {
                let index = add_projection(items, self.as_value(expr.clone()), hint, true);
                Ok(Shaper::Scalar { slot: ValueSlot::new(index) })
            }
            RowShape::Entity(entity) => {
                let properties = match &entity.storage {
                    EntityStorage::Columns(members) => members
                        .iter()
                        .map(|(name, expr)| (name.clone(), ValueSlot::new(add_projection(items, expr.clone(), name, true))))
                        .collect(),
                    EntityStorage::Document(document) => {
                        let hint = if hint.is_empty() { entity.entity_type.as_str() } else { hint };
                        let index = add_projection(items, document.clone(), hint, true);
                        self.document_slots(entity, index)?
                    }
                };
                Ok(Shaper::Entity {
                    entity_type: entity.entity_type.clone(),
                    properties,
                    nullable: entity.nullable,
                })
            }
            RowShape::Object(members) => {
                let mut shapers = Vec::with_capacity(members.len());
                for (name, member) in members {
                    shapers.push((name.clone(), self.shape_rows(member, items, name)?));
                }
                Ok(Shaper::Object { members: shapers })
            }
            RowShape::Collection { value, element } => {
                let index = add_projection(items, value.clone(), hint, true);
                Ok(Shaper::Collection {
                    slot: ValueSlot::new(index),
                    element: Box::new(element.clone()),
                })
            }
            RowShape::Group { .. } => Err(QueryCompilationError::untranslatable("GroupBy", GROUP_NOT_PROJECTED)),
        }
    }

    /// Property slots reading a JSON document held in column `index`
    fn document_slots(&self, entity: &EntityProjection, index: usize) -> CompilationResult<Vec<(String, ValueSlot)>> {
        let entity_type = self.entity_type(&entity.entity_type)?;
        let mut slots: Vec<(String, ValueSlot)> = entity_type
            .properties()
            .iter()
            .map(|p| (p.name.clone(), ValueSlot::with_path(index, vec![p.column.clone()])))
            .collect();
        slots.extend(
            entity_type
                .navigations()
                .iter()
                .filter(|n| n.owned)
                .map(|n| (n.name.clone(), ValueSlot::with_path(index, vec![n.column.clone()]))),
        );
        Ok(slots)
    }

    /// A row shape as one JSON value, with the shaper reading that value as
    /// slot 0. Used for `SELECT VALUE`, document pushdown and collection
    /// elements.
    pub(super) fn element_value(&self, shape: &RowShape) -> CompilationResult<(SqlExpr, Shaper)> {
        match shape {
            RowShape::Scalar(expr) => Ok((
                self.as_value(expr.clone()),
                Shaper::Scalar { slot: ValueSlot::new(0) },
            )),
            RowShape::Entity(entity) => match &entity.storage {
                EntityStorage::Document(document) => Ok((
                    document.clone(),
                    Shaper::Entity {
                        entity_type: entity.entity_type.clone(),
                        properties: self.document_slots(entity, 0)?,
                        nullable: entity.nullable,
                    },
                )),
                EntityStorage::Columns(members) => Ok((
                    SqlExpr::ObjectWrap(members.clone()),
                    Shaper::Entity {
                        entity_type: entity.entity_type.clone(),
                        properties: members
                            .iter()
                            .map(|(name, _)| (name.clone(), ValueSlot::with_path(0, vec![name.clone()])))
                            .collect(),
                        nullable: entity.nullable,
                    },
                )),
            },
            RowShape::Object(members) => {
                let mut values = Vec::with_capacity(members.len());
                let mut shapers = Vec::with_capacity(members.len());
                for (name, member) in members {
                    let (value, shaper) = self.element_value(member)?;
                    values.push((name.clone(), value));
                    shapers.push((name.clone(), prefix_paths(shaper, name)));
                }
                Ok((SqlExpr::ObjectWrap(values), Shaper::Object { members: shapers }))
            }
            RowShape::Collection { value, element } => Ok((
                value.clone(),
                Shaper::Collection {
                    slot: ValueSlot::new(0),
                    element: Box::new(element.clone()),
                },
            )),
            RowShape::Group { .. } => Err(QueryCompilationError::untranslatable("GroupBy", GROUP_NOT_PROJECTED)),
        }
    }

    // ===== COLLECTION PROJECTION =====

    /// A nested sequence projected as one array-valued column.
    ///
    /// A bare iteration over an array (nothing filtered, ordered or
    /// projected) is the array itself; document dialects wrap anything else
    /// in `ARRAY(SELECT VALUE ...)`, relational dialects aggregate the
    /// elements into a JSON array in a scalar subquery.
    pub(super) fn collection_shape(&mut self, query: &QueryExpr) -> CompilationResult<RowShape> {
        let inner = self.translate_query(query)?;
        if let Some(array) = bare_array(&inner) {
            let (_, element) = self.element_value(&inner.shape)?;
            return Ok(RowShape::Collection { value: array, element });
        }

        if self.dialect.is_document() {
            let (value, element) = self.element_value(&inner.shape)?;
            let select = self.single_value_select(inner.select, value);
            return Ok(RowShape::Collection {
                value: SqlExpr::ArrayWrap(Box::new(select)),
                element,
            });
        }

        let inner = if inner.select.needs_wrapping(CompositionOperator::Aggregate) {
            self.push_down(inner)?
        } else {
            inner
        };
        let (value, element) = self.element_value(&inner.shape)?;
        let aggregate = SqlExpr::Aggregate(SqlAggregate {
            function: AggregateFunction::JsonArray,
            argument: Some(Box::new(value)),
            distinct: false,
            value_type: ValueType::Array,
        });
        let mut select = inner.select;
        // JSON array aggregation does not keep row order
        select.orderings.clear();
        Ok(RowShape::Collection {
            value: SqlExpr::ScalarSubquery(Box::new(self.single_value_select(select, aggregate))),
            element,
        })
    }
}

/// Marks a shape as reached through an outer join
pub(super) fn make_nullable(shape: RowShape) -> RowShape {
    match shape {
        RowShape::Entity(mut entity) => {
            entity.nullable = true;
            if let EntityStorage::Columns(members) = &mut entity.storage {
                for (_, expr) in members.iter_mut() {
                    if let SqlExpr::Column(column) = expr {
                        column.nullable = true;
                    }
                }
            }
            RowShape::Entity(entity)
        }
        RowShape::Scalar(SqlExpr::Column(mut column)) => {
            column.nullable = true;
            RowShape::Scalar(SqlExpr::Column(column))
        }
        RowShape::Object(members) => RowShape::Object(
            members
                .into_iter()
                .map(|(name, member)| (name, make_nullable(member)))
                .collect(),
        ),
        other => other,
    }
}

/// The array behind an untouched `x IN array` iteration
fn bare_array(q: &ShapedQuery) -> Option<SqlExpr> {
    let select = &q.select;
    let [source] = select.sources.as_slice() else {
        return None;
    };
    let SourceKind::Expression(array) = &source.kind else {
        return None;
    };
    let untouched = source.with_in
        && select.predicate.is_none()
        && select.orderings.is_empty()
        && select.limit.is_none()
        && select.offset.is_none()
        && !select.distinct
        && select.group_by.is_empty()
        && select.having.is_none();
    let element_is_source = match &q.shape {
        RowShape::Entity(EntityProjection {
            storage: EntityStorage::Document(SqlExpr::SourceRef(element)),
            ..
        })
        | RowShape::Scalar(SqlExpr::SourceRef(element)) => element.alias == source.alias,
        _ => false,
    };
    (untouched && element_is_source).then(|| array.clone())
}

/// Rebinds a shape to the value a document subquery yields per row
fn rebase_document(shape: &RowShape, base: &SqlExpr) -> CompilationResult<RowShape> {
    Ok(match shape {
        RowShape::Scalar(_) => RowShape::Scalar(base.clone()),
        RowShape::Entity(entity) => RowShape::Entity(EntityProjection {
            storage: EntityStorage::Document(base.clone()),
            ..entity.clone()
        }),
        RowShape::Object(members) => {
            let mut rebased = Vec::with_capacity(members.len());
            for (name, member) in members {
                let value_type = match member {
                    RowShape::Scalar(expr) => expr.value_type(),
                    RowShape::Collection { .. } => ValueType::Array,
                    _ => ValueType::Json,
                };
                let path = extend_path(
                    base,
                    crate::sql_ir::PathSegment::Property(name.clone()),
                    value_type,
                    true,
                );
                rebased.push((name.clone(), rebase_document(member, &path)?));
            }
            RowShape::Object(rebased)
        }
        RowShape::Collection { element, .. } => RowShape::Collection {
            value: base.clone(),
            element: element.clone(),
        },
        RowShape::Group { .. } => {
            return Err(QueryCompilationError::untranslatable("GroupBy", GROUP_NOT_PROJECTED))
        }
    })
}

/// Adds a projection item (reusing an identical one when `dedupe`) and
/// returns its position. Aliases are unique: `Id`, `Id0`, `Id1`.
fn add_projection(items: &mut Vec<ProjectionItem>, expression: SqlExpr, hint: &str, dedupe: bool) -> usize {
    if dedupe {
        if let Some(index) = items.iter().position(|item| item.expression == expression) {
            return index;
        }
    }
    let base = match (&expression, hint.is_empty()) {
        (_, false) => hint.to_string(),
        (SqlExpr::Column(column), true) => column.column.clone(),
        (_, true) => "c".to_string(),
    };
    let alias = unique_alias(items, &base);
    items.push(ProjectionItem { expression, alias });
    items.len() - 1
}

fn unique_alias(items: &[ProjectionItem], base: &str) -> String {
    let taken = |name: &str| items.iter().any(|item| item.alias == name);
    if !taken(base) {
        return base.to_string();
    }
    (0..)
        .map(|i| format!("{}{}", base, i))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Reference to a projection item from the select that wraps it
fn outer_column(alias: &str, item: &ProjectionItem) -> SqlExpr {
    SqlExpr::column(
        alias,
        item.alias.clone(),
        item.expression.value_type(),
        item.expression.is_nullable(),
    )
}

/// Prefixes every slot path, for members nested inside a JSON object
fn prefix_paths(shaper: Shaper, prefix: &str) -> Shaper {
    let prefixed = |slot: ValueSlot| {
        let mut path = vec![prefix.to_string()];
        path.extend(slot.path);
        ValueSlot::with_path(slot.index, path)
    };
    match shaper {
        Shaper::Scalar { slot } => Shaper::Scalar { slot: prefixed(slot) },
        Shaper::Entity {
            entity_type,
            properties,
            nullable,
        } => Shaper::Entity {
            entity_type,
            properties: properties
                .into_iter()
                .map(|(name, slot)| (name, prefixed(slot)))
                .collect(),
            nullable,
        },
        Shaper::Object { members } => Shaper::Object {
            members: members
                .into_iter()
                .map(|(name, member)| (name, prefix_paths(member, prefix)))
                .collect(),
        },
        Shaper::Collection { slot, element } => Shaper::Collection {
            slot: prefixed(slot),
            element,
        },
    }
}
