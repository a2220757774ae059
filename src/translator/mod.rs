//! Query translation.
//!
//! [`QueryTranslator`] walks a [`QueryExpr`] operator by operator and keeps
//! one [`ShapedQuery`] current: the select being built plus the meaning of
//! its rows. Operators merge into the current select while that is sound and
//! push it down into a subquery source once it is not (see
//! [`SelectExpression::needs_wrapping`]).
//!
//! Lambda bodies are translated against a [`BindingContext`] mapping each
//! lambda parameter to the row shape it ranges over. Member chains go
//! through the [`Binder`]; a join request from the binder is executed here
//! and the chain is bound again.

pub mod binder;
pub mod binding_context;
mod expressions;
pub mod method_registry;
pub mod row_shape;
mod shaping;

use serde::{Deserialize, Serialize};

use crate::errors::{CompilationResult, QueryCompilationError};
use crate::model::{EntityType, Model, NavigationKind, ValueType};
use crate::query_ast::{
    AggregateOperator, ElementKind, Expr, JoinKind, Lambda, QueryExpr, SetOperator as QuerySetOperator,
};
use crate::sql_generator::DialectPolicy;
use crate::sql_ir::{
    AggregateFunction, CompositionOperator, JoinType, Ordering, SelectExpression, SetOperation,
    SetOperator, Shaper, Source, SourceKind, SqlAggregate, SqlExpr,
};

pub use binder::{Binder, CollectionBinding, JoinRequest, MemberBinding};
pub use binding_context::{AliasGenerator, BindingContext};
pub use row_shape::{EntityProjection, EntityStorage, RowShape, ShapedQuery};

/// How many rows the caller should expect back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Many,
    /// Exactly one row: aggregates, `First`, `Single`
    Single,
    /// Zero or one row: `FirstOrDefault`, `SingleOrDefault`
    SingleOrDefault,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    pub select: SelectExpression,
    pub shaper: Shaper,
    /// Query parameter names in order of first use
    pub parameters: Vec<String>,
    pub cardinality: Cardinality,
}

/// Translates `query` against `model`. The dialect decides the data shape
/// (relational rows or documents) and which constructs are available.
pub fn translate(query: &QueryExpr, model: &Model, dialect: &DialectPolicy) -> CompilationResult<TranslatedQuery> {
    QueryTranslator::new(model, dialect).translate(query)
}

pub struct QueryTranslator<'a> {
    model: &'a Model,
    dialect: &'a DialectPolicy,
    context: BindingContext,
    aliases: AliasGenerator,
    next_instance: u32,
    parameters: Vec<String>,
}

impl<'a> QueryTranslator<'a> {
    pub fn new(model: &'a Model, dialect: &'a DialectPolicy) -> Self {
        QueryTranslator {
            model,
            dialect,
            context: BindingContext::new(),
            aliases: AliasGenerator::new(),
            next_instance: 0,
            parameters: Vec::new(),
        }
    }

    pub fn translate(mut self, query: &QueryExpr) -> CompilationResult<TranslatedQuery> {
        let (shaped, cardinality) = if query.is_terminal() {
            self.translate_terminal(query)?
        } else {
            (self.translate_query(query)?, Cardinality::Many)
        };
        let (select, shaper) = self.finalize(shaped)?;
        Ok(TranslatedQuery {
            select,
            shaper,
            parameters: self.parameters,
            cardinality,
        })
    }

    // ===== SEQUENCE OPERATORS =====

    pub(crate) fn translate_query(&mut self, query: &QueryExpr) -> CompilationResult<ShapedQuery> {
        match query {
            QueryExpr::EntitySet(name) => self.translate_entity_set(name),
            QueryExpr::Collection(expr) => self.translate_collection_root(expr),
            QueryExpr::Filter { source, predicate } => {
                let q = self.translate_query(source)?;
                self.filter(q, predicate)
            }
            QueryExpr::Project { source, selector } => {
                let mut q = self.translate_query(source)?;
                if q.select.needs_wrapping(CompositionOperator::Project) {
                    q = self.push_down(q)?;
                }
                q = self.prepare_for_joins(q, selector)?;
                let shape = self.in_lambda(&mut q, selector, |t, q, body| t.translate_shape(q, body))?;
                q.shape = shape;
                Ok(q)
            }
            QueryExpr::ProjectMany { source, selector } => self.project_many(source, selector),
            QueryExpr::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
                kind,
            } => self.translate_join(outer, inner, outer_key, inner_key, result, *kind),
            QueryExpr::OrderBy {
                source,
                key,
                descending,
                append,
            } => {
                let mut q = self.translate_query(source)?;
                if q.select.needs_wrapping(CompositionOperator::OrderBy) {
                    q = self.push_down(q)?;
                }
                q = self.prepare_for_joins(q, key)?;
                let shape = self.in_lambda(&mut q, key, |t, q, body| t.translate_shape(q, body))?;
                let operator = query.operator_name();
                for (i, expression) in self.scalar_terms(shape, operator)?.into_iter().enumerate() {
                    q.select.apply_ordering(
                        Ordering {
                            expression,
                            ascending: !descending,
                        },
                        *append || i > 0,
                    )?;
                }
                Ok(q)
            }
            QueryExpr::GroupBy { source, key } => {
                let mut q = self.translate_query(source)?;
                if q.select.needs_wrapping(CompositionOperator::GroupBy) {
                    q = self.push_down(q)?;
                }
                q = self.prepare_for_joins(q, key)?;
                let key_shape = self.in_lambda(&mut q, key, |t, q, body| t.translate_shape(q, body))?;
                let keys = self.scalar_terms(key_shape.clone(), "GroupBy")?;
                q.select.apply_grouping(keys)?;
                let element = std::mem::replace(&mut q.shape, RowShape::Object(Vec::new()));
                q.shape = RowShape::Group {
                    key: Box::new(key_shape),
                    element: Box::new(element),
                };
                Ok(q)
            }
            QueryExpr::Take { source, count } => {
                let mut q = self.translate_query(source)?;
                if q.select.needs_wrapping(CompositionOperator::Take) {
                    q = self.push_down(q)?;
                }
                let count = self.translate_value(&mut q, count)?;
                q.select.apply_limit(count)?;
                Ok(q)
            }
            QueryExpr::Skip { source, count } => {
                let mut q = self.translate_query(source)?;
                if q.select.needs_wrapping(CompositionOperator::Skip) {
                    q = self.push_down(q)?;
                }
                let count = self.translate_value(&mut q, count)?;
                q.select.apply_offset(count)?;
                Ok(q)
            }
            QueryExpr::Distinct { source } => {
                let mut q = self.translate_query(source)?;
                if q.select.needs_wrapping(CompositionOperator::Distinct) {
                    q = self.push_down(q)?;
                }
                q.select.apply_distinct()?;
                Ok(q)
            }
            QueryExpr::SetOperation { operator, left, right } => {
                self.translate_set_operation(*operator, left, right)
            }
            QueryExpr::Aggregate { .. } | QueryExpr::Contains { .. } | QueryExpr::Element { .. } => {
                Err(QueryCompilationError::untranslatable(
                    query.operator_name(),
                    "a single value used where a sequence is expected",
                ))
            }
        }
    }

    fn translate_entity_set(&mut self, name: &str) -> CompilationResult<ShapedQuery> {
        let entity = self
            .model
            .entity_type_for_set(name)
            .ok_or_else(|| QueryCompilationError::unresolved(name, "no entity set with this name"))?;
        let instance = self.instance();
        let alias = self.aliases.next(name);
        let mut q = if self.dialect.is_document() {
            let root = self.dialect.root_source()?;
            let select = SelectExpression::from_source(Source::table(alias.clone(), root, None));
            let projection = EntityProjection::for_document(entity, SqlExpr::source_ref(alias), instance, false);
            ShapedQuery::new(select, RowShape::Entity(projection))
        } else {
            let select = SelectExpression::from_source(Source::table(
                alias.clone(),
                table_name(entity),
                entity.schema.clone(),
            ));
            ShapedQuery::new(
                select,
                RowShape::Entity(EntityProjection::for_table(entity, &alias, instance, false)),
            )
        };
        if let Some(condition) = self.discriminator_condition(entity, &q.shape) {
            q.select.apply_predicate(condition)?;
        }
        Ok(q)
    }

    /// A collection-valued expression as a query root: a navigation reached
    /// from an outer lambda parameter, an owned collection or a primitive array.
    fn translate_collection_root(&mut self, expr: &Expr) -> CompilationResult<ShapedQuery> {
        // Joins needed to reach the collection's owner land in the new select
        let mut scratch = ShapedQuery::new(SelectExpression::default(), RowShape::Object(Vec::new()));
        let binding = match expr.as_member_chain() {
            Some((root, members)) if !members.is_empty() => self.resolve_chain(&mut scratch, root, &members)?,
            Some((root, _)) => MemberBinding::Shape(self.lookup(root)?.clone()),
            None => MemberBinding::Shape(RowShape::Scalar(self.translate_scalar(&mut scratch, expr)?)),
        };

        let mut q = match binding {
            MemberBinding::Collection(binding) if binding.navigation.owned => {
                let array = self.owned_array(&binding)?;
                let target = self.entity_type(&binding.navigation.target)?;
                let alias = self.aliases.next(&target.name);
                let instance = self.instance();
                ShapedQuery::new(
                    SelectExpression::from_source(Source::iteration(alias.clone(), array)),
                    RowShape::Entity(EntityProjection::for_document(
                        target,
                        SqlExpr::source_ref(alias),
                        instance,
                        false,
                    )),
                )
            }
            MemberBinding::Collection(binding) => self.correlated_collection(&binding)?,
            MemberBinding::Shape(RowShape::Scalar(array)) if is_array_valued(&array) => {
                let alias = self.aliases.next("item");
                ShapedQuery::new(
                    SelectExpression::from_source(Source::iteration(alias.clone(), array)),
                    RowShape::Scalar(SqlExpr::source_ref(alias)),
                )
            }
            MemberBinding::Shape(RowShape::Group { .. }) => {
                return Err(QueryCompilationError::untranslatable(
                    "GroupBy",
                    "operators over a grouping translate only as aggregates, e.g. g.Count() or g.Sum(x => x.Total)",
                ))
            }
            MemberBinding::Shape(_) => {
                return Err(QueryCompilationError::untranslatable(
                    "Collection",
                    format!("'{}' is not a collection", expr),
                ))
            }
            MemberBinding::NotBindable { chain, reason } => {
                return Err(QueryCompilationError::unresolved(chain, reason))
            }
            MemberBinding::Join(request) => {
                return Err(QueryCompilationError::composition(
                    "collection root",
                    format!("unexecuted join request for '{}'", request.navigation.name),
                ))
            }
        };
        q.select.sources.extend(scratch.select.sources);
        q.expansions.extend(scratch.expansions);
        Ok(q)
    }

    /// `FROM target WHERE target.fk = owner.pk`, correlated to the owner row
    fn correlated_collection(&mut self, binding: &CollectionBinding) -> CompilationResult<ShapedQuery> {
        if self.dialect.is_document() {
            return Err(QueryCompilationError::unsupported(
                &self.dialect.name,
                "navigations to other documents",
            ));
        }
        let navigation = &binding.navigation;
        let target = self.entity_type(&navigation.target)?;
        let owner_type = self.entity_type(&binding.owner.entity_type)?;
        let alias = self.aliases.next(&table_name(target));
        let instance = self.instance();
        let projection = EntityProjection::for_table(target, &alias, instance, false);
        let correlation = key_equality(
            &projection,
            target,
            &navigation.foreign_key,
            &binding.owner,
            owner_type,
            &navigation.principal_key,
        )?;

        let mut select =
            SelectExpression::from_source(Source::table(alias, table_name(target), target.schema.clone()));
        select.apply_predicate(correlation)?;
        let mut q = ShapedQuery::new(select, RowShape::Entity(projection));
        if let Some(condition) = self.discriminator_condition(target, &q.shape) {
            q.select.apply_predicate(condition)?;
        }
        Ok(q)
    }

    fn filter(&mut self, mut q: ShapedQuery, predicate: &Lambda) -> CompilationResult<ShapedQuery> {
        if q.select.needs_wrapping(CompositionOperator::Filter) {
            q = self.push_down(q)?;
        }
        let condition = self.in_lambda(&mut q, predicate, |t, q, body| t.translate_condition(q, body))?;
        q.select.apply_predicate(condition)?;
        Ok(q)
    }

    fn project_many(&mut self, source: &QueryExpr, selector: &Lambda) -> CompilationResult<ShapedQuery> {
        let mut q = self.translate_query(source)?;
        if q.select.needs_wrapping(CompositionOperator::Join) {
            q = self.push_down(q)?;
        }
        let param = lambda_param(selector, "SelectMany")?.to_string();
        let (collection, filters) = peel_filters(&selector.body)?;
        let outer = q.shape.clone();
        // The outer parameter stays visible while the collection's filters
        // are applied; they may reference it.
        self.with_scope(vec![(param, outer)], move |t| {
            let mut q = q;
            q.shape = t.join_collection(&mut q, collection)?;
            for predicate in filters.into_iter().rev() {
                q = t.filter(q, predicate)?;
            }
            Ok(q)
        })
    }

    /// Flattens a collection into the current select and returns the shape
    /// of its elements.
    fn join_collection(&mut self, q: &mut ShapedQuery, expr: &Expr) -> CompilationResult<RowShape> {
        let binding = match expr.as_member_chain() {
            Some((root, members)) if !members.is_empty() => self.resolve_chain(q, root, &members)?,
            _ => MemberBinding::Shape(RowShape::Scalar(self.translate_scalar(q, expr)?)),
        };
        match binding {
            MemberBinding::Collection(binding) if binding.navigation.owned => {
                self.dialect.require_iteration_sources()?;
                let array = self.owned_array(&binding)?;
                let target = self.entity_type(&binding.navigation.target)?;
                let alias = self.aliases.next(&target.name);
                let instance = self.instance();
                q.select
                    .add_source(Source::iteration(alias.clone(), array).joined(JoinType::Cross, None));
                Ok(RowShape::Entity(EntityProjection::for_document(
                    target,
                    SqlExpr::source_ref(alias),
                    instance,
                    false,
                )))
            }
            MemberBinding::Collection(binding) => {
                if self.dialect.is_document() {
                    return Err(QueryCompilationError::unsupported(
                        &self.dialect.name,
                        "navigations to other documents",
                    ));
                }
                let navigation = &binding.navigation;
                let target = self.entity_type(&navigation.target)?;
                let owner_type = self.entity_type(&binding.owner.entity_type)?;
                let alias = self.aliases.next(&table_name(target));
                let instance = self.instance();
                let projection = EntityProjection::for_table(target, &alias, instance, false);
                let mut on = key_equality(
                    &projection,
                    target,
                    &navigation.foreign_key,
                    &binding.owner,
                    owner_type,
                    &navigation.principal_key,
                )?;
                let shape = RowShape::Entity(projection);
                if let Some(condition) = self.discriminator_condition(target, &shape) {
                    on = SqlExpr::and(on, condition);
                }
                q.select.add_source(
                    Source::table(alias, table_name(target), target.schema.clone())
                        .joined(JoinType::Inner, Some(on)),
                );
                Ok(shape)
            }
            MemberBinding::Shape(RowShape::Scalar(array)) if is_array_valued(&array) => {
                self.dialect.require_iteration_sources()?;
                let alias = self.aliases.next("item");
                q.select
                    .add_source(Source::iteration(alias.clone(), array).joined(JoinType::Cross, None));
                Ok(RowShape::Scalar(SqlExpr::source_ref(alias)))
            }
            MemberBinding::Shape(_) => Err(QueryCompilationError::untranslatable(
                "SelectMany",
                format!("'{}' is not a collection", expr),
            )),
            MemberBinding::NotBindable { chain, reason } => Err(QueryCompilationError::unresolved(chain, reason)),
            MemberBinding::Join(request) => Err(QueryCompilationError::composition(
                "SelectMany",
                format!("unexecuted join request for '{}'", request.navigation.name),
            )),
        }
    }

    fn translate_join(
        &mut self,
        outer: &QueryExpr,
        inner: &QueryExpr,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
        kind: JoinKind,
    ) -> CompilationResult<ShapedQuery> {
        if self.dialect.is_document() {
            return Err(QueryCompilationError::unsupported(&self.dialect.name, "joins across documents"));
        }
        let operator = if kind == JoinKind::Left { "LeftJoin" } else { "Join" };
        let mut q = self.translate_query(outer)?;
        if q.select.needs_wrapping(CompositionOperator::Join) {
            q = self.push_down(q)?;
        }

        let inner_q = self.translate_query(inner)?;
        let inner_q = if inner_q.select.as_plain_table().is_some() {
            inner_q
        } else {
            self.push_down(inner_q)?
        };
        let ShapedQuery {
            select: mut inner_select,
            shape: inner_shape,
            ..
        } = inner_q;
        let mut source = inner_select.sources.remove(0);
        let inner_shape = if kind == JoinKind::Left {
            shaping::make_nullable(inner_shape)
        } else {
            inner_shape
        };
        source.join = if kind == JoinKind::Left { JoinType::Left } else { JoinType::Inner };
        q.select.add_source(source);
        let source_index = q.select.sources.len() - 1;

        let outer_shape = self.in_lambda(&mut q, outer_key, |t, q, body| t.translate_shape(q, body))?;
        let outer_terms = self.scalar_terms(outer_shape, operator)?;
        let inner_param = lambda_param(inner_key, operator)?.to_string();
        let inner_terms = self.with_scope(vec![(inner_param, inner_shape.clone())], |t| {
            let shape = t.translate_shape(&mut q, &inner_key.body)?;
            t.scalar_terms(shape, operator)
        })?;
        if outer_terms.len() != inner_terms.len() {
            return Err(QueryCompilationError::untranslatable(
                operator,
                format!(
                    "outer key has {} part(s) but inner key has {}",
                    outer_terms.len(),
                    inner_terms.len()
                ),
            ));
        }
        let on = SqlExpr::and_all(
            outer_terms
                .into_iter()
                .zip(inner_terms)
                .map(|(outer, inner)| SqlExpr::equal(outer, inner)),
        )
        .ok_or_else(|| QueryCompilationError::untranslatable(operator, "empty join key"))?;
        q.select.sources[source_index].on = Some(on);

        let [outer_param, inner_param] = result.params.as_slice() else {
            return Err(QueryCompilationError::untranslatable(
                operator,
                "result selector must take the outer and inner rows",
            ));
        };
        let bindings = vec![
            (outer_param.clone(), q.shape.clone()),
            (inner_param.clone(), inner_shape),
        ];
        let shape = self.with_scope(bindings, |t| t.translate_shape(&mut q, &result.body))?;
        q.shape = shape;
        Ok(q)
    }

    fn translate_set_operation(
        &mut self,
        operator: QuerySetOperator,
        left: &QueryExpr,
        right: &QueryExpr,
    ) -> CompilationResult<ShapedQuery> {
        let name = match operator {
            QuerySetOperator::Union => "Union",
            QuerySetOperator::Concat => "Concat",
            QuerySetOperator::Intersect => "Intersect",
            QuerySetOperator::Except => "Except",
        };
        if self.dialect.is_document() {
            return Err(QueryCompilationError::unsupported(&self.dialect.name, "set operations"));
        }
        let left = self.translate_query(left)?;
        let right = self.translate_query(right)?;
        let alias = self.aliases.next("union");
        let (left, shape) = self.set_operand(left, &alias)?;
        let (right, _) = self.set_operand(right, &alias)?;
        if left.projection.len() != right.projection.len() {
            return Err(QueryCompilationError::untranslatable(
                name,
                format!(
                    "operands project {} and {} columns",
                    left.projection.len(),
                    right.projection.len()
                ),
            ));
        }
        let operator = match operator {
            QuerySetOperator::Union => SetOperator::Union,
            QuerySetOperator::Concat => SetOperator::UnionAll,
            QuerySetOperator::Intersect => SetOperator::Intersect,
            QuerySetOperator::Except => SetOperator::Except,
        };
        let source = Source {
            alias,
            kind: SourceKind::SetOperation(SetOperation {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            }),
            join: JoinType::From,
            on: None,
            with_in: false,
        };
        Ok(ShapedQuery::new(SelectExpression::from_source(source), shape))
    }

    // ===== TERMINAL OPERATORS =====

    fn translate_terminal(&mut self, query: &QueryExpr) -> CompilationResult<(ShapedQuery, Cardinality)> {
        let single_value = |value: SqlExpr| ShapedQuery::new(SelectExpression::default(), RowShape::Scalar(value));
        match query {
            QueryExpr::Aggregate {
                source,
                operator: AggregateOperator::Any,
                argument,
            } => {
                let exists = self.exists(source, argument.as_ref(), false)?;
                Ok((single_value(exists), Cardinality::Single))
            }
            QueryExpr::Aggregate {
                source,
                operator: AggregateOperator::All,
                argument,
            } => {
                let predicate = argument
                    .as_ref()
                    .ok_or_else(|| QueryCompilationError::untranslatable("All", "a predicate is required"))?;
                let none_violate = SqlExpr::not(self.exists(source, Some(predicate), true)?);
                Ok((single_value(none_violate), Cardinality::Single))
            }
            QueryExpr::Aggregate {
                source,
                operator,
                argument,
            } => {
                let q = self.translate_query(source)?;
                let (select, value) = self.aggregate(q, *operator, argument.as_ref())?;
                Ok((ShapedQuery::new(select, RowShape::Scalar(value)), Cardinality::Single))
            }
            QueryExpr::Contains { source, item } => {
                // No outer row: the item may only use constants and parameters
                let mut scratch = ShapedQuery::new(SelectExpression::default(), RowShape::Object(Vec::new()));
                let contains = self.translate_contains(&mut scratch, source, item)?;
                Ok((single_value(contains), Cardinality::Single))
            }
            QueryExpr::Element {
                source,
                kind,
                predicate,
                or_default,
            } => {
                let mut q = self.translate_query(source)?;
                if let Some(predicate) = predicate {
                    q = self.filter(q, predicate)?;
                }
                if q.select.needs_wrapping(CompositionOperator::Take) {
                    q = self.push_down(q)?;
                }
                // Single fetches two rows so the caller can detect duplicates
                let rows = match kind {
                    ElementKind::First => 1,
                    ElementKind::Single => 2,
                };
                q.select.apply_limit(SqlExpr::literal(rows))?;
                let cardinality = if *or_default {
                    Cardinality::SingleOrDefault
                } else {
                    Cardinality::Single
                };
                Ok((q, cardinality))
            }
            other => Err(QueryCompilationError::composition(
                "terminal operator",
                format!("'{}' is not terminal", other.operator_name()),
            )),
        }
    }

    /// `EXISTS(source [WHERE predicate])`; `negate_predicate` tests for rows
    /// violating the predicate, which is how `All` is expressed.
    fn exists(
        &mut self,
        source: &QueryExpr,
        predicate: Option<&Lambda>,
        negate_predicate: bool,
    ) -> CompilationResult<SqlExpr> {
        let mut q = self.translate_query(source)?;
        if let Some(predicate) = predicate {
            if q.select.needs_wrapping(CompositionOperator::Filter) {
                q = self.push_down(q)?;
            }
            let mut condition =
                self.in_lambda(&mut q, predicate, |t, q, body| t.translate_condition(q, body))?;
            if negate_predicate {
                condition = SqlExpr::not(condition);
            }
            q.select.apply_predicate(condition)?;
        }
        Ok(SqlExpr::Exists(Box::new(self.exists_select(q.select))))
    }

    /// Aggregates the rows of `q`. Returns the select to aggregate over and
    /// the aggregate expression to project from it.
    fn aggregate(
        &mut self,
        mut q: ShapedQuery,
        operator: AggregateOperator,
        argument: Option<&Lambda>,
    ) -> CompilationResult<(SelectExpression, SqlExpr)> {
        let value = match operator {
            AggregateOperator::Count | AggregateOperator::LongCount => {
                if let Some(predicate) = argument {
                    q = self.filter(q, predicate)?;
                }
                if q.select.needs_wrapping(CompositionOperator::Aggregate) {
                    q = self.push_down(q)?;
                }
                count(operator, None, false)
            }
            AggregateOperator::Sum | AggregateOperator::Min | AggregateOperator::Max | AggregateOperator::Average => {
                if q.select.needs_wrapping(CompositionOperator::Aggregate) {
                    q = self.push_down(q)?;
                }
                let value = match argument {
                    Some(selector) => self.in_lambda(&mut q, selector, |t, q, body| t.translate_value(q, body))?,
                    None => self.scalar_of(&q.shape, operator.method_name())?,
                };
                aggregate_of(operator, value, false)
            }
            AggregateOperator::Any | AggregateOperator::All => {
                return Err(QueryCompilationError::composition(
                    "aggregate",
                    "Any and All translate to EXISTS",
                ))
            }
        };
        q.select.orderings.clear();
        Ok((q.select, value))
    }

    // ===== BINDING =====

    fn in_lambda<T>(
        &mut self,
        q: &mut ShapedQuery,
        lambda: &Lambda,
        body: impl FnOnce(&mut Self, &mut ShapedQuery, &Expr) -> CompilationResult<T>,
    ) -> CompilationResult<T> {
        let param = lambda_param(lambda, "lambda")?.to_string();
        let shape = q.shape.clone();
        self.with_scope(vec![(param, shape)], |t| body(t, q, &lambda.body))
    }

    fn with_scope<T>(
        &mut self,
        bindings: Vec<(String, RowShape)>,
        f: impl FnOnce(&mut Self) -> CompilationResult<T>,
    ) -> CompilationResult<T> {
        self.context.push_scope(bindings);
        let result = f(self);
        self.context.pop_scope();
        result
    }

    fn lookup(&self, param: &str) -> CompilationResult<&RowShape> {
        self.context
            .lookup(param)
            .ok_or_else(|| QueryCompilationError::unresolved(param, "not a lambda parameter in scope"))
    }

    /// Binds `root.members`, executing join requests against `q` until the
    /// binder reports something else.
    fn resolve_chain(&mut self, q: &mut ShapedQuery, root: &str, members: &[&str]) -> CompilationResult<MemberBinding> {
        let shape = self.lookup(root)?.clone();
        loop {
            match Binder::new(self.model).bind(root, &shape, members, &q.expansions) {
                MemberBinding::Join(request) => self.expand_navigation(q, request)?,
                binding => return Ok(binding),
            }
        }
    }

    fn expand_navigation(&mut self, q: &mut ShapedQuery, request: JoinRequest) -> CompilationResult<()> {
        if self.dialect.is_document() {
            return Err(QueryCompilationError::unsupported(
                &self.dialect.name,
                "navigations to other documents",
            ));
        }
        if q.select.needs_wrapping(CompositionOperator::Join) {
            return Err(QueryCompilationError::composition(
                "navigation join",
                format!(
                    "cannot join '{}' into a paged, distinct or grouped select",
                    request.navigation.name
                ),
            ));
        }
        let JoinRequest { owner, navigation } = request;
        let owner_type = self.entity_type(&owner.entity_type)?;
        let target = self.entity_type(&navigation.target)?;
        let outer = owner.nullable || navigation.kind == NavigationKind::Optional;
        let alias = self.aliases.next(&table_name(target));
        let instance = self.instance();
        let projection = EntityProjection::for_table(target, &alias, instance, outer);
        // Reference navigations keep the foreign key on the owner
        let on = key_equality(
            &owner,
            owner_type,
            &navigation.foreign_key,
            &projection,
            target,
            &navigation.principal_key,
        )?;
        let join = if outer { JoinType::Left } else { JoinType::Inner };
        q.select.add_source(
            Source::table(alias, table_name(target), target.schema.clone()).joined(join, Some(on)),
        );
        q.expansions.insert((owner.instance, navigation.name.clone()), projection);
        Ok(())
    }

    /// Pushes `q` down before a lambda that would need a join on a select
    /// that cannot take one.
    fn prepare_for_joins(&mut self, q: ShapedQuery, lambda: &Lambda) -> CompilationResult<ShapedQuery> {
        if q.select.needs_wrapping(CompositionOperator::Join) && self.lambda_requires_join(&q, lambda) {
            self.push_down(q)
        } else {
            Ok(q)
        }
    }

    fn lambda_requires_join(&self, q: &ShapedQuery, lambda: &Lambda) -> bool {
        let Some(param) = lambda.params.first() else {
            return false;
        };
        let binder = Binder::new(self.model);
        let mut requires = false;
        visit_member_chains(&lambda.body, &mut |root, members| {
            if root == param.as_str()
                && matches!(
                    binder.bind(root, &q.shape, members, &q.expansions),
                    MemberBinding::Join(_)
                )
            {
                requires = true;
            }
        });
        requires
    }

    // ===== HELPERS =====

    fn instance(&mut self) -> u32 {
        let instance = self.next_instance;
        self.next_instance += 1;
        instance
    }

    fn entity_type(&self, name: &str) -> CompilationResult<&'a EntityType> {
        self.model
            .entity_type(name)
            .ok_or_else(|| QueryCompilationError::composition("entity lookup", format!("no entity type '{}'", name)))
    }

    fn owned_array(&self, binding: &CollectionBinding) -> CompilationResult<SqlExpr> {
        Binder::new(self.model)
            .owned_collection(&binding.owner, &binding.navigation)
            .ok_or_else(|| {
                QueryCompilationError::unresolved(
                    binding.navigation.name.clone(),
                    "owned collection is not projected",
                )
            })
    }

    fn discriminator_condition(&self, entity: &EntityType, shape: &RowShape) -> Option<SqlExpr> {
        let discriminator = entity.discriminator.as_ref()?;
        let property = entity.property(&discriminator.property)?;
        let RowShape::Entity(projection) = shape else {
            return None;
        };
        let column = projection.property(property)?;
        Some(SqlExpr::equal(column, SqlExpr::literal(discriminator.value.clone())))
    }

    /// Key expressions of an entity, for comparisons, grouping and ordering
    fn key_columns(&self, entity: &EntityProjection) -> CompilationResult<Vec<SqlExpr>> {
        let entity_type = self.entity_type(&entity.entity_type)?;
        if entity_type.key.is_empty() {
            // Keyless owned entities compare as a whole JSON value
            return match &entity.storage {
                EntityStorage::Document(document) => Ok(vec![document.clone()]),
                EntityStorage::Columns(_) => Err(QueryCompilationError::untranslatable(
                    "==",
                    format!("'{}' has no key", entity.entity_type),
                )),
            };
        }
        entity_type
            .key_properties()
            .into_iter()
            .map(|property| {
                entity.property(property).ok_or_else(|| {
                    QueryCompilationError::unresolved(
                        format!("{}.{}", entity.entity_type, property.name),
                        "key property is not projected",
                    )
                })
            })
            .collect()
    }

    /// Flattens a key shape into the scalar expressions it compares by
    fn scalar_terms(&self, shape: RowShape, operator: &str) -> CompilationResult<Vec<SqlExpr>> {
        match shape {
            RowShape::Scalar(expr) => Ok(vec![self.as_value(expr)]),
            RowShape::Object(members) => {
                let mut terms = Vec::new();
                for (_, member) in members {
                    terms.extend(self.scalar_terms(member, operator)?);
                }
                Ok(terms)
            }
            RowShape::Entity(entity) => self.key_columns(&entity),
            _ => Err(QueryCompilationError::untranslatable(
                operator,
                "key must be a scalar, an entity or an anonymous object of scalars",
            )),
        }
    }

    /// The single value a row shape stands for
    fn scalar_of(&self, shape: &RowShape, context: &str) -> CompilationResult<SqlExpr> {
        match shape {
            RowShape::Scalar(expr) => Ok(expr.clone()),
            RowShape::Entity(EntityProjection {
                storage: EntityStorage::Document(document),
                ..
            }) => Ok(document.clone()),
            RowShape::Collection { value, .. } => Ok(value.clone()),
            _ => Err(QueryCompilationError::untranslatable(
                context,
                "expected a single value, found an entity or anonymous object",
            )),
        }
    }
}

fn table_name(entity: &EntityType) -> String {
    entity.table.clone().unwrap_or_else(|| entity.name.clone())
}

fn lambda_param<'l>(lambda: &'l Lambda, operator: &str) -> CompilationResult<&'l str> {
    lambda
        .params
        .first()
        .map(String::as_str)
        .ok_or_else(|| QueryCompilationError::untranslatable(operator, "lambda has no parameter"))
}

/// Pairwise `left.lk = right.rk` over two key property lists
fn key_equality(
    left: &EntityProjection,
    left_type: &EntityType,
    left_keys: &[String],
    right: &EntityProjection,
    right_type: &EntityType,
    right_keys: &[String],
) -> CompilationResult<SqlExpr> {
    let read = |projection: &EntityProjection, entity: &EntityType, name: &str| {
        entity
            .property(name)
            .and_then(|property| projection.property(property))
            .ok_or_else(|| {
                QueryCompilationError::unresolved(format!("{}.{}", entity.name, name), "key property is not mapped")
            })
    };
    let mut conditions = Vec::with_capacity(left_keys.len());
    for (l, r) in left_keys.iter().zip(right_keys) {
        conditions.push(SqlExpr::equal(read(left, left_type, l)?, read(right, right_type, r)?));
    }
    SqlExpr::and_all(conditions).ok_or_else(|| {
        QueryCompilationError::composition(
            "join condition",
            format!("no key properties between '{}' and '{}'", left_type.name, right_type.name),
        )
    })
}

/// Expressions that can be iterated with `alias IN expr`
fn is_array_valued(expr: &SqlExpr) -> bool {
    match expr {
        SqlExpr::Parameter(_) => true,
        SqlExpr::DynamicField(_) => true,
        other => other.value_type() == ValueType::Array,
    }
}

/// Splits `c.Orders.Where(..).Where(..)` into the collection and its
/// filters, outermost first.
fn peel_filters(body: &Expr) -> CompilationResult<(&Expr, Vec<&Lambda>)> {
    let Expr::Subquery(query) = body else {
        return Ok((body, Vec::new()));
    };
    let mut filters = Vec::new();
    let mut current: &QueryExpr = query;
    loop {
        match current {
            QueryExpr::Filter { source, predicate } => {
                filters.push(predicate);
                current = source;
            }
            QueryExpr::Collection(expr) => return Ok((expr, filters)),
            other => {
                return Err(QueryCompilationError::untranslatable(
                    "SelectMany",
                    format!(
                        "a collection selector may only filter its collection, found {}",
                        other.operator_name()
                    ),
                ))
            }
        }
    }
}

/// Visits every member chain rooted at a parameter, outside nested queries
fn visit_member_chains<F: FnMut(&str, &[&str])>(expr: &Expr, visit: &mut F) {
    if let Some((root, members)) = expr.as_member_chain() {
        if !members.is_empty() {
            visit(root, &members);
        }
        return;
    }
    match expr {
        Expr::Member { target, .. } => visit_member_chains(target, visit),
        Expr::Binary { left, right, .. } => {
            visit_member_chains(left, visit);
            visit_member_chains(right, visit);
        }
        Expr::Unary { operand, .. } => visit_member_chains(operand, visit),
        Expr::Call { target, args, .. } => {
            if let Some(target) = target {
                visit_member_chains(target, visit);
            }
            for arg in args {
                visit_member_chains(arg, visit);
            }
        }
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            visit_member_chains(test, visit);
            visit_member_chains(if_true, visit);
            visit_member_chains(if_false, visit);
        }
        Expr::New(members) => {
            for (_, member) in members {
                visit_member_chains(member, visit);
            }
        }
        Expr::Index { target, index } => {
            visit_member_chains(target, visit);
            visit_member_chains(index, visit);
        }
        Expr::ArrayLiteral(items) => {
            for item in items {
                visit_member_chains(item, visit);
            }
        }
        Expr::Parameter(_) | Expr::Constant(_) | Expr::QueryParameter(_) | Expr::Subquery(_) => {}
    }
}

fn count(operator: AggregateOperator, argument: Option<SqlExpr>, distinct: bool) -> SqlExpr {
    let (function, value_type) = match operator {
        AggregateOperator::LongCount => (AggregateFunction::LongCount, ValueType::Long),
        _ => (AggregateFunction::Count, ValueType::Int),
    };
    SqlExpr::Aggregate(SqlAggregate {
        function,
        argument: argument.map(Box::new),
        distinct,
        value_type,
    })
}

/// SUM/MIN/MAX/AVG over `value`; AVG of integers is a double
fn aggregate_of(operator: AggregateOperator, value: SqlExpr, distinct: bool) -> SqlExpr {
    let value_type = value.value_type();
    let (function, value_type) = match operator {
        AggregateOperator::Sum => (AggregateFunction::Sum, value_type),
        AggregateOperator::Min => (AggregateFunction::Min, value_type),
        AggregateOperator::Max => (AggregateFunction::Max, value_type),
        _ if value_type == ValueType::Decimal => (AggregateFunction::Average, ValueType::Decimal),
        _ => (AggregateFunction::Average, ValueType::Double),
    };
    SqlExpr::Aggregate(SqlAggregate {
        function,
        argument: Some(Box::new(value)),
        distinct,
        value_type,
    })
}
