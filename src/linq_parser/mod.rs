//! Method-chain query text front end.
//!
//! Parses text such as
//! `Orders.Where(o => o.Customer.Name == "Ann").Select(o => o.Id)` into the
//! query AST. Parsing produces a borrowed surface syntax tree ([`ast::Syntax`]);
//! [`lowering`] then resolves which calls are query operators.

use nom::{combinator::all_consuming, Parser};

use crate::query_ast::QueryExpr;

pub mod ast;
pub mod common;
pub mod errors;
pub mod expression;
pub mod lowering;

pub use errors::ParseError;

use common::ws;

pub fn parse_query(input: &str) -> Result<QueryExpr, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let syntax = match ws(expression::parse_expression).parse(input) {
        Ok((remainder, syntax)) => {
            if !remainder.trim().is_empty() {
                return Err(ParseError::trailing(input, remainder));
            }
            syntax
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => return Err(ParseError::syntax(input, e.input)),
        Err(nom::Err::Incomplete(_)) => return Err(ParseError::syntax(input, "")),
    };
    lowering::lower_query(&syntax)
}

/// Parses a single lambda such as `o => o.Total > 10`, for callers that build
/// queries programmatically but keep predicates as text.
pub fn parse_lambda(input: &str) -> Result<crate::query_ast::Lambda, ParseError> {
    let syntax = match all_consuming(ws(expression::parse_lambda)).parse(input) {
        Ok((_, syntax)) => syntax,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => return Err(ParseError::syntax(input, e.input)),
        Err(nom::Err::Incomplete(_)) => return Err(ParseError::syntax(input, "")),
    };
    // Lower as the predicate of a placeholder filter to reuse operator scoping
    let wrapped = ast::Syntax::Call {
        target: Box::new(ast::Syntax::Identifier("_")),
        method: "Where",
        args: vec![syntax],
    };
    match lowering::lower_query(&wrapped)? {
        QueryExpr::Filter { predicate, .. } => Ok(predicate),
        other => Err(ParseError::lowering(other.to_string(), "expected a lambda")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_ast::{Expr, Lambda};

    #[test]
    fn test_round_trip_query_text() {
        let query = parse_query("Orders.Where(o => o.Customer.Name == \"Ann\").Select(o => o.Id)").unwrap();
        let expected = QueryExpr::entity_set("Orders")
            .filter(Lambda::new(
                "o",
                Expr::param("o")
                    .member("Customer")
                    .member("Name")
                    .eq(Expr::constant("Ann")),
            ))
            .project(Lambda::new("o", Expr::param("o").member("Id")));
        assert_eq!(query, expected);
    }

    #[test]
    fn test_multiline_text() {
        let query = parse_query(
            "
            Orders
                .OrderByDescending(o => o.Total)
                .ThenBy(o => o.Id)
                .Skip(@offset)
                .Take(10)
            ",
        )
        .unwrap();
        assert_eq!(
            query.to_string(),
            "Orders.OrderByDescending(o => o.Total).ThenBy(o => o.Id).Skip(@offset).Take(10)"
        );
    }

    #[test]
    fn test_errors_carry_position() {
        assert_eq!(parse_query("   "), Err(ParseError::Empty));
        assert!(matches!(
            parse_query("Orders.Where(o => o.Id == 1) extra"),
            Err(ParseError::TrailingInput { offset: 29, .. })
        ));
        assert!(matches!(parse_query("Orders.Where(o => o.Name == \"Ann)"), Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn test_standalone_lambda() {
        let lambda = parse_lambda("o => o.Total > 10").unwrap();
        assert_eq!(
            lambda,
            Lambda::new("o", Expr::param("o").member("Total").gt(Expr::constant(10)))
        );
        assert!(parse_lambda("o.Total > 10").is_err());
    }
}
