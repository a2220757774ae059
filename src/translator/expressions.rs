//! Value expressions inside lambda bodies.

use crate::errors::{CompilationResult, QueryCompilationError};
use crate::model::ValueType;
use crate::query_ast::{AggregateOperator, BinaryOperator, Expr, Lambda, QueryExpr, UnaryOperator, Value};
use crate::sql_ir::{
    CompositionOperator, Literal, PathSegment, SqlBinaryOperator, SqlCase, SqlExpr, SqlIn, SqlParameter,
    SqlUnaryOperator,
};

use super::binder::is_dynamic;
use super::method_registry::{self, MethodMapping};
use super::row_shape::{extend_path, EntityProjection, RowShape, ShapedQuery};
use super::{aggregate_of, count, lambda_param, MemberBinding, QueryTranslator};

/// Parameter introduced when `q.First().Member` is rewritten into
/// `q.Select(x => x.Member).First()`
const ELEMENT_PARAM: &str = "$element";

impl<'a> QueryTranslator<'a> {
    pub(super) fn translate_value(&mut self, q: &mut ShapedQuery, expr: &Expr) -> CompilationResult<SqlExpr> {
        let value = self.translate_scalar(q, expr)?;
        Ok(self.as_value(value))
    }

    pub(super) fn translate_condition(&mut self, q: &mut ShapedQuery, expr: &Expr) -> CompilationResult<SqlExpr> {
        let value = self.translate_scalar(q, expr)?;
        Ok(self.as_condition(value))
    }

    /// Translates a value expression. Joins needed by member chains are
    /// added to `q.select`.
    pub(super) fn translate_scalar(&mut self, q: &mut ShapedQuery, expr: &Expr) -> CompilationResult<SqlExpr> {
        match expr {
            Expr::Parameter(name) => {
                let shape = self.lookup(name)?.clone();
                self.scalar_of(&shape, name)
            }
            Expr::Member { target, name } => self.translate_member(q, expr, target, name),
            Expr::Constant(value) => Ok(SqlExpr::Literal(Literal { value: value.clone() })),
            Expr::QueryParameter(name) => {
                if !self.parameters.contains(name) {
                    self.parameters.push(name.clone());
                }
                Ok(SqlExpr::Parameter(SqlParameter {
                    name: name.clone(),
                    value_type: ValueType::Unknown,
                }))
            }
            Expr::Binary { op, left, right } => self.translate_binary(q, *op, left, right),
            Expr::Unary {
                op: UnaryOperator::Not,
                operand,
            } => Ok(SqlExpr::not(self.translate_condition(q, operand)?)),
            Expr::Unary {
                op: UnaryOperator::Negate,
                operand,
            } => Ok(SqlExpr::unary(
                SqlUnaryOperator::Negate,
                self.translate_value(q, operand)?,
            )),
            Expr::Call { target, method, args } => self.translate_call(q, target.as_deref(), method, args),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = self.translate_condition(q, test)?;
                let if_true = self.translate_value(q, if_true)?;
                let if_false = self.translate_value(q, if_false)?;
                Ok(SqlExpr::Case(SqlCase {
                    when_then: vec![(test, if_true)],
                    else_expr: Some(Box::new(if_false)),
                }))
            }
            Expr::New(_) => Err(QueryCompilationError::untranslatable(
                "new",
                "anonymous objects can be projected but not computed with",
            )),
            Expr::Index { target, index } => self.translate_index(q, target, index),
            Expr::ArrayLiteral(items) => {
                let values = items
                    .iter()
                    .map(|item| self.translate_value(q, item))
                    .collect::<CompilationResult<Vec<_>>>()?;
                Ok(SqlExpr::ArrayLiteral(values))
            }
            Expr::Subquery(query) => self.translate_subquery(q, query),
        }
    }

    /// Row shape of a projected expression: anonymous objects, entities and
    /// collections keep their structure, everything else is a scalar.
    pub(super) fn translate_shape(&mut self, q: &mut ShapedQuery, expr: &Expr) -> CompilationResult<RowShape> {
        match expr {
            Expr::New(members) => {
                let mut shapes = Vec::with_capacity(members.len());
                for (name, member) in members {
                    shapes.push((name.clone(), self.translate_shape(q, member)?));
                }
                Ok(RowShape::Object(shapes))
            }
            Expr::Parameter(name) => Ok(self.lookup(name)?.clone()),
            Expr::Member { .. } => {
                if let Some((root, members)) = expr.as_member_chain() {
                    match self.resolve_chain(q, root, &members)? {
                        MemberBinding::Shape(shape) => return Ok(shape),
                        MemberBinding::Collection(_) => {
                            return self.collection_shape(&QueryExpr::Collection(Box::new(expr.clone())))
                        }
                        // member functions and unresolved chains
                        _ => {}
                    }
                }
                Ok(RowShape::Scalar(self.translate_value(q, expr)?))
            }
            Expr::Subquery(query) if !query.is_terminal() => self.collection_shape(query),
            _ => Ok(RowShape::Scalar(self.translate_value(q, expr)?)),
        }
    }

    fn translate_member(
        &mut self,
        q: &mut ShapedQuery,
        expr: &Expr,
        target: &Expr,
        name: &str,
    ) -> CompilationResult<SqlExpr> {
        if let Some(rewritten) = rewrite_element_member(expr) {
            return self.translate_scalar(q, &rewritten);
        }

        if let Some((root, members)) = expr.as_member_chain() {
            return match self.resolve_chain(q, root, &members)? {
                MemberBinding::Shape(shape) => self.scalar_of(&shape, &expr.to_string()),
                MemberBinding::Collection(_) => Err(QueryCompilationError::untranslatable(
                    "member access",
                    format!("collection navigation '{}' used as a value", expr),
                )),
                MemberBinding::NotBindable { chain, reason } => {
                    // `o.Name.Length`, `c.Orders.Count`: not model members,
                    // but translatable against the target
                    let (target_root, target_members) = (root, &members[..members.len() - 1]);
                    let target_binding = if target_members.is_empty() {
                        MemberBinding::Shape(self.lookup(target_root)?.clone())
                    } else {
                        self.resolve_chain(q, target_root, target_members)?
                    };
                    let fallback = match target_binding {
                        MemberBinding::Shape(RowShape::Scalar(value)) => member_function(value, name),
                        MemberBinding::Collection(_) if name == "Count" => {
                            Some(self.count_collection(q, target)?)
                        }
                        _ => None,
                    };
                    fallback.ok_or_else(|| QueryCompilationError::unresolved(chain, reason))
                }
                MemberBinding::Join(request) => Err(QueryCompilationError::composition(
                    "member access",
                    format!("unexecuted join request for '{}'", request.navigation.name),
                )),
            };
        }

        let value = self.translate_scalar(q, target)?;
        if is_dynamic(&value) {
            return Ok(extend_path(
                &value,
                PathSegment::Property(name.to_string()),
                ValueType::Unknown,
                true,
            ));
        }
        member_function(value, name).ok_or_else(|| {
            QueryCompilationError::untranslatable("member access", format!("no translation for '{}'", expr))
        })
    }

    fn count_collection(&mut self, q: &mut ShapedQuery, collection: &Expr) -> CompilationResult<SqlExpr> {
        let count = QueryExpr::Aggregate {
            source: Box::new(QueryExpr::Collection(Box::new(collection.clone()))),
            operator: AggregateOperator::Count,
            argument: None,
        };
        self.translate_subquery(q, &count)
    }

    fn translate_binary(
        &mut self,
        q: &mut ShapedQuery,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> CompilationResult<SqlExpr> {
        let operator = match op {
            BinaryOperator::AndAlso => {
                let left = self.translate_condition(q, left)?;
                let right = self.translate_condition(q, right)?;
                return Ok(SqlExpr::and(left, right));
            }
            BinaryOperator::OrElse => {
                let left = self.translate_condition(q, left)?;
                let right = self.translate_condition(q, right)?;
                return Ok(SqlExpr::or(left, right));
            }
            BinaryOperator::Equal => return self.translate_equality(q, true, left, right),
            BinaryOperator::NotEqual => return self.translate_equality(q, false, left, right),
            BinaryOperator::Coalesce => {
                let left = self.translate_value(q, left)?;
                let right = self.translate_value(q, right)?;
                let value_type = match left.value_type() {
                    ValueType::Unknown => right.value_type(),
                    other => other,
                };
                return Ok(SqlExpr::function(
                    crate::sql_ir::CanonicalFunction::Coalesce,
                    vec![left, right],
                    value_type,
                ));
            }
            BinaryOperator::LessThan => SqlBinaryOperator::LessThan,
            BinaryOperator::LessThanOrEqual => SqlBinaryOperator::LessThanOrEqual,
            BinaryOperator::GreaterThan => SqlBinaryOperator::GreaterThan,
            BinaryOperator::GreaterThanOrEqual => SqlBinaryOperator::GreaterThanOrEqual,
            BinaryOperator::Add => SqlBinaryOperator::Add,
            BinaryOperator::Subtract => SqlBinaryOperator::Subtract,
            BinaryOperator::Multiply => SqlBinaryOperator::Multiply,
            BinaryOperator::Divide => SqlBinaryOperator::Divide,
            BinaryOperator::Modulo => SqlBinaryOperator::Modulo,
        };
        let left = self.translate_value(q, left)?;
        let right = self.translate_value(q, right)?;
        let operator = if operator == SqlBinaryOperator::Add
            && (left.value_type() == ValueType::String || right.value_type() == ValueType::String)
        {
            SqlBinaryOperator::Concat
        } else {
            operator
        };
        Ok(SqlExpr::binary(operator, left, right))
    }

    /// `==` / `!=`: entities compare by key, `x == null` becomes `IS NULL`
    fn translate_equality(
        &mut self,
        q: &mut ShapedQuery,
        equal: bool,
        left: &Expr,
        right: &Expr,
    ) -> CompilationResult<SqlExpr> {
        let is_null = |e: &Expr| matches!(e, Expr::Constant(Value::Null));
        let null_test = |value: SqlExpr| {
            let operator = if equal {
                SqlUnaryOperator::IsNull
            } else {
                SqlUnaryOperator::IsNotNull
            };
            SqlExpr::unary(operator, value)
        };

        let left_entity = self.try_entity(q, left)?;
        let right_entity = self.try_entity(q, right)?;
        match (left_entity, right_entity) {
            (Some(l), Some(r)) => {
                let pairs = self.key_columns(&l)?.into_iter().zip(self.key_columns(&r)?);
                let keys_equal = SqlExpr::and_all(pairs.map(|(l, r)| SqlExpr::equal(l, r)))
                    .ok_or_else(|| QueryCompilationError::untranslatable("==", "entity without key"))?;
                Ok(if equal { keys_equal } else { SqlExpr::not(keys_equal) })
            }
            (Some(entity), None) if is_null(right) => self.entity_null_test(&entity, equal),
            (None, Some(entity)) if is_null(left) => self.entity_null_test(&entity, equal),
            (Some(_), _) | (_, Some(_)) => Err(QueryCompilationError::untranslatable(
                if equal { "==" } else { "!=" },
                "an entity can only be compared with another entity or null",
            )),
            (None, None) => {
                if is_null(right) {
                    return Ok(null_test(self.translate_value(q, left)?));
                }
                if is_null(left) {
                    return Ok(null_test(self.translate_value(q, right)?));
                }
                let left = self.translate_value(q, left)?;
                let right = self.translate_value(q, right)?;
                let operator = if equal {
                    SqlBinaryOperator::Equal
                } else {
                    SqlBinaryOperator::NotEqual
                };
                Ok(SqlExpr::binary(operator, left, right))
            }
        }
    }

    fn entity_null_test(&self, entity: &EntityProjection, equal: bool) -> CompilationResult<SqlExpr> {
        let key = self
            .key_columns(entity)?
            .into_iter()
            .next()
            .ok_or_else(|| QueryCompilationError::untranslatable("==", "entity without key"))?;
        let operator = if equal {
            SqlUnaryOperator::IsNull
        } else {
            SqlUnaryOperator::IsNotNull
        };
        Ok(SqlExpr::unary(operator, key))
    }

    fn try_entity(&mut self, q: &mut ShapedQuery, expr: &Expr) -> CompilationResult<Option<EntityProjection>> {
        let binding = match expr {
            Expr::Parameter(name) => MemberBinding::Shape(self.lookup(name)?.clone()),
            Expr::Member { .. } => match expr.as_member_chain() {
                Some((root, members)) => self.resolve_chain(q, root, &members)?,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(match binding {
            MemberBinding::Shape(RowShape::Entity(entity)) => Some(entity),
            _ => None,
        })
    }

    fn translate_call(
        &mut self,
        q: &mut ShapedQuery,
        target: Option<&Expr>,
        method: &str,
        args: &[Expr],
    ) -> CompilationResult<SqlExpr> {
        let Some(target) = target else {
            if matches!(method, "string.IsNullOrEmpty" | "String.IsNullOrEmpty") {
                let [value] = args else {
                    return Err(QueryCompilationError::untranslatable(method, "expected one argument"));
                };
                let value = self.translate_value(q, value)?;
                return Ok(SqlExpr::or(
                    SqlExpr::unary(SqlUnaryOperator::IsNull, value.clone()),
                    SqlExpr::equal(value, SqlExpr::literal("")),
                ));
            }
            let mapping = method_registry::static_method(method)
                .ok_or_else(|| QueryCompilationError::untranslatable(method, "no translation for this method"))?;
            return self.apply_mapping(q, method, mapping, Vec::new(), args);
        };

        if method == "Contains" && args.len() == 1 && self.is_collection_expr(q, target)? {
            let source = match target {
                Expr::Subquery(query) => query.as_ref().clone(),
                other => QueryExpr::Collection(Box::new(other.clone())),
            };
            return self.translate_contains(q, &source, &args[0]);
        }
        let mapping = method_registry::instance_method(method)
            .ok_or_else(|| QueryCompilationError::untranslatable(method, "no translation for this method"))?;
        let target = self.translate_value(q, target)?;
        self.apply_mapping(q, method, mapping, vec![target], args)
    }

    fn apply_mapping(
        &mut self,
        q: &mut ShapedQuery,
        method: &str,
        mapping: MethodMapping,
        mut values: Vec<SqlExpr>,
        args: &[Expr],
    ) -> CompilationResult<SqlExpr> {
        for arg in args {
            values.push(self.translate_value(q, arg)?);
        }
        if values.len() != mapping.arity {
            return Err(QueryCompilationError::untranslatable(
                method,
                format!("wrong number of arguments ({})", args.len()),
            ));
        }
        let types: Vec<ValueType> = values.iter().map(SqlExpr::value_type).collect();
        Ok(SqlExpr::function(mapping.function, values, mapping.result_type(&types)))
    }

    /// Whether `Contains` on `target` is a membership test rather than
    /// substring search
    fn is_collection_expr(&mut self, q: &mut ShapedQuery, target: &Expr) -> CompilationResult<bool> {
        match target {
            Expr::Constant(Value::Array(_)) | Expr::ArrayLiteral(_) | Expr::QueryParameter(_) => Ok(true),
            Expr::Subquery(query) => Ok(!query.is_terminal()),
            Expr::Member { .. } => match target.as_member_chain() {
                Some((root, members)) => Ok(match self.resolve_chain(q, root, &members)? {
                    MemberBinding::Collection(_) => true,
                    MemberBinding::Shape(RowShape::Scalar(value)) => value.value_type() == ValueType::Array,
                    _ => false,
                }),
                None => Ok(false),
            },
            _ => Ok(false),
        }
    }

    /// Membership test: `IN` list for constants, array containment for
    /// array values and parameters, `EXISTS` for queries.
    pub(super) fn translate_contains(
        &mut self,
        q: &mut ShapedQuery,
        source: &QueryExpr,
        item: &Expr,
    ) -> CompilationResult<SqlExpr> {
        let item = self.translate_value(q, item)?;
        if let QueryExpr::Collection(collection) = source {
            match collection.as_ref() {
                Expr::Constant(Value::Array(values)) => {
                    let values = values
                        .iter()
                        .map(|value| SqlExpr::Literal(Literal { value: value.clone() }))
                        .collect();
                    return Ok(in_list(item, values));
                }
                Expr::ArrayLiteral(values) => {
                    let values = values
                        .iter()
                        .map(|value| self.translate_value(q, value))
                        .collect::<CompilationResult<Vec<_>>>()?;
                    return Ok(in_list(item, values));
                }
                Expr::QueryParameter(_) => {
                    let array = self.translate_scalar(q, collection)?;
                    return Ok(array_contains(array, item));
                }
                other => {
                    if let Some((root, members)) = other.as_member_chain().filter(|(_, m)| !m.is_empty()) {
                        if let MemberBinding::Shape(RowShape::Scalar(array)) = self.resolve_chain(q, root, &members)? {
                            if array.value_type() == ValueType::Array {
                                return Ok(array_contains(array, item));
                            }
                        }
                    }
                }
            }
        }

        let mut inner = self.translate_query(source)?;
        if inner.select.needs_wrapping(CompositionOperator::Filter) {
            inner = self.push_down(inner)?;
        }
        let element = match &inner.shape {
            RowShape::Entity(entity) => match self.key_columns(entity)?.as_slice() {
                [key] => key.clone(),
                _ => {
                    return Err(QueryCompilationError::untranslatable(
                        "Contains",
                        "entity membership needs a single-column key",
                    ))
                }
            },
            shape => self.scalar_of(shape, "Contains")?,
        };
        let element = self.as_value(element);
        inner.select.apply_predicate(SqlExpr::equal(element, item))?;
        Ok(SqlExpr::Exists(Box::new(self.exists_select(inner.select))))
    }

    fn translate_index(&mut self, q: &mut ShapedQuery, target: &Expr, index: &Expr) -> CompilationResult<SqlExpr> {
        let base = self.translate_scalar(q, target)?;
        if !is_dynamic(&base) && base.value_type() != ValueType::Array {
            return Err(QueryCompilationError::untranslatable(
                "[]",
                format!("indexing is supported on JSON and array values, not '{}'", target),
            ));
        }
        let segment = match index {
            Expr::Constant(Value::String(key)) => PathSegment::Property(key.clone()),
            Expr::Constant(Value::Int(i)) => PathSegment::Index(Box::new(SqlExpr::literal(*i))),
            other => PathSegment::Index(Box::new(self.translate_value(q, other)?)),
        };
        Ok(extend_path(&base, segment, ValueType::Unknown, true))
    }

    // ===== NESTED QUERIES =====

    /// A terminal query inside a lambda: correlated scalar subquery or
    /// EXISTS, or an aggregate over the current group.
    fn translate_subquery(&mut self, q: &mut ShapedQuery, query: &QueryExpr) -> CompilationResult<SqlExpr> {
        match query {
            QueryExpr::Aggregate {
                source,
                operator,
                argument,
            } => {
                if let Some(aggregate) = self.try_group_aggregate(q, source, *operator, argument.as_ref())? {
                    return Ok(aggregate);
                }
                match operator {
                    AggregateOperator::Any => self.exists(source, argument.as_ref(), false),
                    AggregateOperator::All => {
                        let predicate = argument
                            .as_ref()
                            .ok_or_else(|| QueryCompilationError::untranslatable("All", "a predicate is required"))?;
                        Ok(SqlExpr::not(self.exists(source, Some(predicate), true)?))
                    }
                    _ => {
                        let inner = self.translate_query(source)?;
                        let (select, value) = self.aggregate(inner, *operator, argument.as_ref())?;
                        Ok(SqlExpr::ScalarSubquery(Box::new(self.single_value_select(select, value))))
                    }
                }
            }
            QueryExpr::Contains { source, item } => self.translate_contains(q, source, item),
            QueryExpr::Element { source, predicate, .. } => {
                let mut inner = self.translate_query(source)?;
                if let Some(predicate) = predicate {
                    inner = self.filter(inner, predicate)?;
                }
                if inner.select.needs_wrapping(CompositionOperator::Take) {
                    inner = self.push_down(inner)?;
                }
                inner.select.apply_limit(SqlExpr::literal(1))?;
                let value = self.scalar_of(&inner.shape, query.operator_name())?;
                let value = self.as_value(value);
                Ok(SqlExpr::ScalarSubquery(Box::new(self.single_value_select(inner.select, value))))
            }
            other => Err(QueryCompilationError::untranslatable(
                other.operator_name(),
                "a sequence used where a single value is expected",
            )),
        }
    }

    /// Aggregates over a grouping parameter translate in place over the
    /// grouped select: `g.Count(x => p)` is `COUNT(CASE WHEN p THEN 1 END)`.
    fn try_group_aggregate(
        &mut self,
        q: &mut ShapedQuery,
        source: &QueryExpr,
        operator: AggregateOperator,
        argument: Option<&Lambda>,
    ) -> CompilationResult<Option<SqlExpr>> {
        // Operators between the grouping and the aggregate, outermost first
        let mut operators = Vec::new();
        let mut current = source;
        let element = loop {
            match current {
                QueryExpr::Filter { source, .. }
                | QueryExpr::Project { source, .. }
                | QueryExpr::Distinct { source } => {
                    operators.push(current);
                    current = source;
                }
                QueryExpr::Collection(expr) => {
                    let Expr::Parameter(param) = expr.as_ref() else {
                        return Ok(None);
                    };
                    match self.context.lookup(param) {
                        Some(RowShape::Group { element, .. }) => break (**element).clone(),
                        _ => return Ok(None),
                    }
                }
                _ => return Ok(None),
            }
        };

        let method = operator.method_name();
        let mut shape = element;
        let mut conditions = Vec::new();
        let mut distinct = false;
        for operator in operators.into_iter().rev() {
            match operator {
                QueryExpr::Filter { predicate, .. } => {
                    conditions.push(self.translate_over(q, &shape, predicate, Self::translate_condition)?);
                }
                QueryExpr::Project { selector, .. } => {
                    shape = self.translate_over(q, &shape, selector, Self::translate_shape)?;
                }
                _ => distinct = true,
            }
        }

        let aggregate = match operator {
            AggregateOperator::Count | AggregateOperator::LongCount => {
                if let Some(predicate) = argument {
                    conditions.push(self.translate_over(q, &shape, predicate, Self::translate_condition)?);
                }
                let condition = SqlExpr::and_all(conditions);
                let counted = if distinct {
                    let value = self.scalar_of(&shape, method)?;
                    Some(conditional(condition, self.as_value(value)))
                } else {
                    condition.map(|c| conditional(Some(c), SqlExpr::literal(1)))
                };
                count(operator, counted, distinct)
            }
            AggregateOperator::Sum | AggregateOperator::Min | AggregateOperator::Max | AggregateOperator::Average => {
                let value = match argument {
                    Some(selector) => self.translate_over(q, &shape, selector, Self::translate_value)?,
                    None => {
                        let value = self.scalar_of(&shape, method)?;
                        self.as_value(value)
                    }
                };
                aggregate_of(operator, conditional(SqlExpr::and_all(conditions), value), distinct)
            }
            AggregateOperator::Any => {
                if let Some(predicate) = argument {
                    conditions.push(self.translate_over(q, &shape, predicate, Self::translate_condition)?);
                }
                let matching = SqlExpr::and_all(conditions).map(|c| conditional(Some(c), SqlExpr::literal(1)));
                SqlExpr::binary(
                    SqlBinaryOperator::GreaterThan,
                    count(AggregateOperator::Count, matching, false),
                    SqlExpr::literal(0),
                )
            }
            AggregateOperator::All => {
                let predicate =
                    argument.ok_or_else(|| QueryCompilationError::untranslatable("All", "a predicate is required"))?;
                let holds = self.translate_over(q, &shape, predicate, Self::translate_condition)?;
                conditions.push(SqlExpr::not(holds));
                let violating = SqlExpr::and_all(conditions).map(|c| conditional(Some(c), SqlExpr::literal(1)));
                SqlExpr::equal(
                    count(AggregateOperator::Count, violating, false),
                    SqlExpr::literal(0),
                )
            }
        };
        Ok(Some(aggregate))
    }

    /// Translates a lambda body with its parameter bound to `shape`
    fn translate_over<T>(
        &mut self,
        q: &mut ShapedQuery,
        shape: &RowShape,
        lambda: &Lambda,
        translate: fn(&mut Self, &mut ShapedQuery, &Expr) -> CompilationResult<T>,
    ) -> CompilationResult<T> {
        let param = lambda_param(lambda, "lambda")?.to_string();
        self.with_scope(vec![(param, shape.clone())], |t| translate(t, q, &lambda.body))
    }
}

fn member_function(value: SqlExpr, name: &str) -> Option<SqlExpr> {
    let value_type = value.value_type();
    method_registry::member_function(value_type, name)
        .map(|mapping| SqlExpr::function(mapping.function, vec![value], mapping.result_type(&[value_type])))
}

fn in_list(item: SqlExpr, values: Vec<SqlExpr>) -> SqlExpr {
    if values.is_empty() {
        return SqlExpr::literal(false);
    }
    SqlExpr::In(SqlIn {
        item: Box::new(item),
        values,
        negated: false,
    })
}

fn array_contains(array: SqlExpr, item: SqlExpr) -> SqlExpr {
    SqlExpr::function(
        crate::sql_ir::CanonicalFunction::ArrayContains,
        vec![array, item],
        ValueType::Bool,
    )
}

/// `CASE WHEN condition THEN value END`, or `value` without a condition
fn conditional(condition: Option<SqlExpr>, value: SqlExpr) -> SqlExpr {
    match condition {
        Some(condition) => SqlExpr::Case(SqlCase {
            when_then: vec![(condition, value)],
            else_expr: None,
        }),
        None => value,
    }
}

/// `q.First().A.B` reads `A.B` of the first element; rewritten as
/// `q.Select(x => x.A.B).First()` so the member is projected by the subquery.
fn rewrite_element_member(expr: &Expr) -> Option<Expr> {
    let mut members = Vec::new();
    let mut current = expr;
    loop {
        match current {
            Expr::Member { target, name } => {
                members.push(name.clone());
                current = target;
            }
            Expr::Subquery(query) if !members.is_empty() => {
                let QueryExpr::Element {
                    source,
                    kind,
                    predicate,
                    or_default,
                } = query.as_ref()
                else {
                    return None;
                };
                let source = match predicate {
                    Some(predicate) => Box::new(QueryExpr::Filter {
                        source: source.clone(),
                        predicate: predicate.clone(),
                    }),
                    None => source.clone(),
                };
                let body = members
                    .iter()
                    .rev()
                    .fold(Expr::param(ELEMENT_PARAM), |body, name| body.member(name.clone()));
                let projected = QueryExpr::Project {
                    source,
                    selector: Lambda::new(ELEMENT_PARAM, body),
                };
                return Some(Expr::Subquery(Box::new(QueryExpr::Element {
                    source: Box::new(projected),
                    kind: *kind,
                    predicate: None,
                    or_default: *or_default,
                })));
            }
            _ => return None,
        }
    }
}
