//! Unit tests for query text parsing edge cases and error handling
//!
//! Tests malformed queries, edge cases, and error conditions to ensure
//! robust parsing without panics.

#[cfg(test)]
mod parser_robustness_tests {
    use queryforge::linq_parser::{parse_lambda, parse_query, ParseError};
    use queryforge::query_ast::{BinaryOperator, Expr, Lambda, QueryExpr, Value};
    use test_case::test_case;

    /// Test that malformed queries don't cause panics
    #[test]
    fn test_malformed_queries_no_panic() {
        let malformed_queries = vec![
            "",
            ".",
            "Orders.",
            "Orders.Where(",
            "Orders.Where(o =>",
            "Orders.Where(o => o.Id ==)",
            "Orders.Where(o => o.Id == 1",
            "Orders.Where(o => o.Id == 1))",
            "Orders.Select(o => new { o.Id, }",
            "Orders.Select(o => new { = 1 })",
            "Orders[",
            "Orders.Take(@)",
            "(((((",
            "=> =>",
            "\"unterminated",
            "Orders.Where(o => o.Name == 'x)",
            "Orders.Where(o => o.Id == 1 ? )",
        ];

        for query in malformed_queries {
            assert!(parse_query(query).is_err(), "expected error for {:?}", query);
        }
    }

    #[test]
    fn test_deep_nesting_does_not_overflow() {
        let depth = 16;
        let predicate = format!("{}o.Id{}", "(".repeat(depth), ")".repeat(depth));
        let query = parse_query(&format!("Orders.Where(o => {} == 1)", predicate)).unwrap();
        assert_eq!(
            query,
            QueryExpr::entity_set("Orders").filter(Lambda::new(
                "o",
                Expr::param("o").member("Id").eq(Expr::constant(1))
            ))
        );
    }

    #[test]
    fn test_unicode_string_literals() {
        let query = parse_query("Customers.Where(c => c.Name == \"Zoë \\\"Ø\\\" 日本\")").unwrap();
        let QueryExpr::Filter { predicate, .. } = query else {
            panic!("expected a filter");
        };
        assert_eq!(
            predicate.body,
            Expr::param("c").member("Name").eq(Expr::constant("Zoë \"Ø\" 日本"))
        );
    }

    #[test_case("Orders.Where(o => x.Id == 1)" ; "unknown identifier in lambda")]
    #[test_case("Orders.Take(1, 2)" ; "too many arguments")]
    #[test_case("Orders.Where(o.Id == 1)" ; "predicate without lambda")]
    #[test_case("Orders.Join(Customers, o => o.CustomerId)" ; "incomplete join")]
    #[test_case("Orders.Join(Customers, o => o.CustomerId, c => c.Id, o => o)" ; "join result with one parameter")]
    #[test_case("Orders.Select(o => new { A = o.Id, A = o.Total })" ; "duplicate anonymous member")]
    #[test_case("Orders.All()" ; "all without predicate")]
    fn test_lowering_errors(query: &str) {
        match parse_query(query) {
            Err(ParseError::Lowering { .. }) => {}
            other => panic!("expected lowering error for {:?}, got {:?}", query, other),
        }
    }

    #[test]
    fn test_error_offsets_point_into_query() {
        let query = "Orders.Where(o => o.Id == 1)  .Take(2) garbage";
        match parse_query(query) {
            Err(ParseError::TrailingInput { offset, near }) => {
                assert_eq!(&query[offset..].trim_start()[..7], "garbage");
                assert_eq!(near, "garbage");
            }
            other => panic!("expected trailing input, got {:?}", other),
        }
    }

    #[test]
    fn test_whitespace_and_newlines_are_insignificant() {
        let compact = parse_query("Orders.Where(o=>o.Total>10&&!o.IsArchived).Select(o=>o.Id)").unwrap();
        let spaced = parse_query(
            "Orders
                .Where( o => o.Total > 10 && !o.IsArchived )
                .Select( o => o.Id )",
        )
        .unwrap();
        assert_eq!(compact, spaced);
    }

    #[test]
    fn test_numeric_suffixes_and_negation() {
        let lambda = parse_lambda("o => o.Total > -10.5m && o.Count < 3L").unwrap();
        let expected = Expr::param("o")
            .member("Total")
            .gt(Expr::Constant(Value::Float(-10.5)))
            .and(
                Expr::param("o")
                    .member("Count")
                    .binary(BinaryOperator::LessThan, Expr::Constant(Value::Int(3))),
            );
        assert_eq!(lambda.body, expected);
    }

    #[test]
    fn test_nested_operator_chains_are_subqueries() {
        let query = parse_query("Customers.Where(c => c.Orders.Any(o => o.Total > 100))").unwrap();
        let QueryExpr::Filter { predicate, .. } = query else {
            panic!("expected a filter");
        };
        assert!(matches!(predicate.body, Expr::Subquery(_)), "{:?}", predicate.body);
    }

    #[test]
    fn test_display_round_trips_through_parser() {
        let texts = [
            "Orders.Where(o => o.Customer.Name == \"Ann\").Select(o => o.Id)",
            "Orders.GroupBy(o => o.CustomerId).Select(g => new { Key = g.Key, Count = g.Count() })",
            "Orders.OrderBy(o => o.Total).Skip(@skip).Take(@take)",
        ];
        for text in texts {
            let first = parse_query(text).unwrap();
            let second = parse_query(&first.to_string()).unwrap();
            assert_eq!(first, second, "{}", text);
        }
    }
}
