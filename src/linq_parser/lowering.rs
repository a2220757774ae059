//! Lowering from surface syntax to the query AST.
//!
//! A call is a query operator when its method name is one of the sequence
//! operators below. The chain under an operator becomes its source: a bare
//! identifier that is not a lambda parameter is an entity set, anything else
//! is a collection-valued expression. Inside lambda bodies, operator chains
//! become nested queries (`Expr::Subquery`); `Contains` stays a call so the
//! translator can pick between membership and substring search.

use chrono::NaiveDate;

use crate::query_ast::{
    AggregateOperator, ElementKind, Expr, JoinKind, Lambda, QueryExpr, SetOperator, UnaryOperator, Value,
};

use super::ast::Syntax;
use super::errors::ParseError;

const QUERY_OPERATORS: &[&str] = &[
    "Where",
    "Select",
    "SelectMany",
    "Join",
    "LeftJoin",
    "OrderBy",
    "OrderByDescending",
    "ThenBy",
    "ThenByDescending",
    "GroupBy",
    "Take",
    "Skip",
    "Distinct",
    "Union",
    "Concat",
    "Intersect",
    "Except",
    "Count",
    "LongCount",
    "Sum",
    "Min",
    "Max",
    "Average",
    "Any",
    "All",
    "Contains",
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
];

/// Type names whose members are static: `Math.Abs(x)`, `DateTime.Now`
const STATIC_TYPES: &[&str] = &["Math", "DateTime", "string", "String"];

pub fn is_query_operator(method: &str) -> bool {
    QUERY_OPERATORS.contains(&method)
}

pub fn lower_query(syntax: &Syntax<'_>) -> Result<QueryExpr, ParseError> {
    Lowering::default().query(syntax)
}

#[derive(Default)]
struct Lowering<'s> {
    scope: Vec<&'s str>,
}

impl<'s> Lowering<'s> {
    fn in_scope(&self, name: &str) -> bool {
        self.scope.contains(&name)
    }

    fn is_static_type(&self, syntax: &Syntax<'s>) -> Option<&'s str> {
        match syntax {
            Syntax::Identifier(name) if !self.in_scope(name) && STATIC_TYPES.contains(name) => Some(*name),
            _ => None,
        }
    }

    fn query(&mut self, syntax: &Syntax<'s>) -> Result<QueryExpr, ParseError> {
        match syntax {
            Syntax::Identifier(name) if !self.in_scope(name) => Ok(QueryExpr::entity_set(*name)),
            Syntax::Call { target, method, args }
                if is_query_operator(method) && self.is_static_type(target).is_none() =>
            {
                self.operator(target, method, args)
            }
            other => Ok(QueryExpr::collection(self.expr(other)?)),
        }
    }

    fn operator(&mut self, target: &Syntax<'s>, method: &str, args: &[Syntax<'s>]) -> Result<QueryExpr, ParseError> {
        let source = self.query(target)?;
        let query = match (method, args) {
            ("Where", [predicate]) => source.filter(self.lambda(predicate, method, 1)?),
            ("Select", [selector]) => source.project(self.lambda(selector, method, 1)?),
            ("SelectMany", [selector]) => source.project_many(self.lambda(selector, method, 1)?),
            ("OrderBy", [key]) => source.order_by(self.lambda(key, method, 1)?, false),
            ("OrderByDescending", [key]) => source.order_by(self.lambda(key, method, 1)?, true),
            ("ThenBy", [key]) => source.then_by(self.lambda(key, method, 1)?, false),
            ("ThenByDescending", [key]) => source.then_by(self.lambda(key, method, 1)?, true),
            ("GroupBy", [key]) => source.group_by(self.lambda(key, method, 1)?),
            ("Take", [count]) => source.take(self.expr(count)?),
            ("Skip", [count]) => source.skip(self.expr(count)?),
            ("Distinct", []) => source.distinct(),
            ("Union" | "Concat" | "Intersect" | "Except", [other]) => {
                let operator = match method {
                    "Union" => SetOperator::Union,
                    "Concat" => SetOperator::Concat,
                    "Intersect" => SetOperator::Intersect,
                    _ => SetOperator::Except,
                };
                let right = self.query(other)?;
                source.set_operation(operator, right)
            }
            ("Join" | "LeftJoin", [inner, outer_key, inner_key, result]) => {
                let inner = self.query(inner)?;
                let outer_key = self.lambda(outer_key, method, 1)?;
                let inner_key = self.lambda(inner_key, method, 1)?;
                let result = self.lambda(result, method, 2)?;
                let kind = if method == "Join" { JoinKind::Inner } else { JoinKind::Left };
                source.join(inner, outer_key, inner_key, result, kind)
            }
            ("Contains", [item]) => QueryExpr::Contains {
                source: Box::new(source),
                item: Box::new(self.expr(item)?),
            },
            ("All", [predicate]) => source.aggregate(AggregateOperator::All, Some(self.lambda(predicate, method, 1)?)),
            ("Count" | "LongCount" | "Sum" | "Min" | "Max" | "Average" | "Any", [] | [_]) => {
                let operator = match method {
                    "Count" => AggregateOperator::Count,
                    "LongCount" => AggregateOperator::LongCount,
                    "Sum" => AggregateOperator::Sum,
                    "Min" => AggregateOperator::Min,
                    "Max" => AggregateOperator::Max,
                    "Average" => AggregateOperator::Average,
                    _ => AggregateOperator::Any,
                };
                let argument = match args.first() {
                    Some(arg) => Some(self.lambda(arg, method, 1)?),
                    None => None,
                };
                source.aggregate(operator, argument)
            }
            ("First" | "FirstOrDefault" | "Single" | "SingleOrDefault", [] | [_]) => {
                let kind = if method.starts_with("First") {
                    ElementKind::First
                } else {
                    ElementKind::Single
                };
                let predicate = match args.first() {
                    Some(arg) => Some(self.lambda(arg, method, 1)?),
                    None => None,
                };
                source.element(kind, predicate, method.ends_with("OrDefault"))
            }
            _ => {
                return Err(ParseError::lowering(
                    format!("{}(...)", method),
                    format!("unexpected number of arguments ({})", args.len()),
                ))
            }
        };
        Ok(query)
    }

    fn lambda(&mut self, syntax: &Syntax<'s>, method: &str, arity: usize) -> Result<Lambda, ParseError> {
        let Syntax::Lambda { params, body } = syntax else {
            return Err(ParseError::lowering(
                syntax.describe(),
                format!("{} expects a lambda argument", method),
            ));
        };
        if params.len() != arity {
            return Err(ParseError::lowering(
                syntax.describe(),
                format!("{} expects a lambda with {} parameter(s)", method, arity),
            ));
        }

        let depth = self.scope.len();
        self.scope.extend(params.iter().copied());
        let body = self.expr(body);
        self.scope.truncate(depth);

        Ok(Lambda {
            params: params.iter().map(|p| p.to_string()).collect(),
            body: body?,
        })
    }

    fn exprs(&mut self, items: &[Syntax<'s>]) -> Result<Vec<Expr>, ParseError> {
        items.iter().map(|item| self.expr(item)).collect()
    }

    fn expr(&mut self, syntax: &Syntax<'s>) -> Result<Expr, ParseError> {
        match syntax {
            Syntax::Identifier(name) if self.in_scope(name) => Ok(Expr::param(*name)),
            Syntax::Identifier(name) => Err(ParseError::lowering(
                *name,
                "not a lambda parameter in scope; entity sets are only valid as query sources",
            )),
            Syntax::Parameter(name) => Ok(Expr::query_param(*name)),
            Syntax::Literal(value) => Ok(Expr::Constant(value.clone())),
            Syntax::Member { target, name } => match self.is_static_type(target) {
                Some(type_name) => Ok(Expr::Call {
                    target: None,
                    method: format!("{}.{}", type_name, name),
                    args: Vec::new(),
                }),
                None => Ok(self.expr(target)?.member(*name)),
            },
            Syntax::Call { target, method, args } => {
                if let Some(type_name) = self.is_static_type(target) {
                    return Ok(Expr::Call {
                        target: None,
                        method: format!("{}.{}", type_name, method),
                        args: self.exprs(args)?,
                    });
                }
                if *method == "Contains" {
                    let target = self.sequence_value(target)?;
                    return Ok(target.call("Contains", self.exprs(args)?));
                }
                if is_query_operator(method) {
                    return Ok(Expr::subquery(self.query(syntax)?));
                }
                let target = self.expr(target)?;
                Ok(target.call(*method, self.exprs(args)?))
            }
            Syntax::Index { target, index } => Ok(self.expr(target)?.index(self.expr(index)?)),
            Syntax::Lambda { .. } => Err(ParseError::lowering(
                syntax.describe(),
                "lambdas are only valid as query operator arguments",
            )),
            Syntax::Binary { op, left, right } => Ok(self.expr(left)?.binary(*op, self.expr(right)?)),
            Syntax::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                Ok(match (op, operand) {
                    (UnaryOperator::Negate, Expr::Constant(Value::Int(i))) => Expr::Constant(Value::Int(-i)),
                    (UnaryOperator::Negate, Expr::Constant(Value::Float(x))) => Expr::Constant(Value::Float(-x)),
                    (op, operand) => Expr::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                })
            }
            Syntax::Conditional {
                test,
                if_true,
                if_false,
            } => Ok(Expr::Conditional {
                test: Box::new(self.expr(test)?),
                if_true: Box::new(self.expr(if_true)?),
                if_false: Box::new(self.expr(if_false)?),
            }),
            Syntax::AnonymousObject(members) => {
                let mut fields = Vec::with_capacity(members.len());
                for (name, value) in members {
                    let name = match name {
                        Some(name) => name.to_string(),
                        None => inferred_member_name(value).ok_or_else(|| {
                            ParseError::lowering(
                                value.describe(),
                                "anonymous object members need a name, e.g. `Total = ...`",
                            )
                        })?,
                    };
                    if fields.iter().any(|(existing, _)| *existing == name) {
                        return Err(ParseError::lowering(
                            syntax.describe(),
                            format!("duplicate anonymous member '{}'", name),
                        ));
                    }
                    fields.push((name, self.expr(value)?));
                }
                Ok(Expr::New(fields))
            }
            Syntax::ArrayLiteral(items) => Ok(Expr::ArrayLiteral(self.exprs(items)?)),
            Syntax::Construct { type_name, args } => construct(type_name, &self.exprs(args)?)
                .ok_or_else(|| ParseError::lowering(syntax.describe(), "unsupported constructor arguments")),
        }
    }

    /// Target of `Contains`: entity sets are accepted here as sequences
    fn sequence_value(&mut self, syntax: &Syntax<'s>) -> Result<Expr, ParseError> {
        match syntax {
            Syntax::Identifier(name) if !self.in_scope(name) => Ok(Expr::subquery(QueryExpr::entity_set(*name))),
            other => self.expr(other),
        }
    }
}

fn inferred_member_name(syntax: &Syntax<'_>) -> Option<String> {
    match syntax {
        Syntax::Member { name, .. } => Some(name.to_string()),
        Syntax::Identifier(name) | Syntax::Parameter(name) => Some(name.to_string()),
        _ => None,
    }
}

/// `new DateTime(y, m, d)` and `new DateTime(y, m, d, h, min, s)`
fn construct(type_name: &str, args: &[Expr]) -> Option<Expr> {
    if type_name != "DateTime" {
        return None;
    }
    let parts = args
        .iter()
        .map(|arg| match arg {
            Expr::Constant(Value::Int(i)) => u32::try_from(*i).ok(),
            _ => None,
        })
        .collect::<Option<Vec<u32>>>()?;
    let (date, time) = match parts.as_slice() {
        [y, m, d] => ((*y, *m, *d), (0, 0, 0)),
        [y, m, d, h, min, s] => ((*y, *m, *d), (*h, *min, *s)),
        _ => return None,
    };
    let year = i32::try_from(date.0).ok()?;
    let datetime = NaiveDate::from_ymd_opt(year, date.1, date.2)?.and_hms_opt(time.0, time.1, time.2)?;
    Some(Expr::Constant(Value::DateTime(datetime)))
}
