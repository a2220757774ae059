#[cfg(test)]
mod translation_tests {
    use queryforge::compiler::compile_uncached;
    use queryforge::errors::QueryCompilationError;
    use queryforge::linq_parser::parse_query;
    use queryforge::sql_generator::{generate_sql, DialectPolicy};
    use queryforge::sql_ir::{JoinType, Shaper, SourceKind, SqlExpr};
    use queryforge::translator::row_shape::Expansions;
    use queryforge::translator::{Binder, Cardinality, EntityProjection, MemberBinding, RowShape};
    use serde_json::json;
    use test_case::test_case;

    use crate::test_models::{compile, compile_error, shop_model};

    #[test]
    fn test_navigation_filter_round_trip() {
        let compiled = compile(
            "Orders.Where(o => o.Customer.Name == \"Ann\").Select(o => o.Id)",
            &DialectPolicy::sqlserver(),
        );
        assert_eq!(
            compiled.sql,
            "SELECT [o].[Id]\n\
             FROM [Orders] AS [o]\n\
             INNER JOIN [Customers] AS [c] ON [o].[CustomerId] = [c].[Id]\n\
             WHERE [c].[Name] = N'Ann'"
        );

        let joins: Vec<_> = compiled
            .select
            .sources
            .iter()
            .filter(|s| s.join != JoinType::From)
            .collect();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].join, JoinType::Inner);
        assert_eq!(compiled.cardinality, Cardinality::Many);
        assert!(compiled.parameters.is_empty());
    }

    #[test]
    fn test_navigation_used_twice_joins_once() {
        let compiled = compile(
            "Orders.Where(o => o.Customer.Name == \"Ann\").Select(o => new { o.Id, o.Customer.IsActive })",
            &DialectPolicy::postgres(),
        );
        assert_eq!(compiled.select.sources.len(), 2);
        assert_eq!(compiled.sql.matches("INNER JOIN").count(), 1);
    }

    #[test]
    fn test_take_zero_is_a_zero_limit() {
        let compiled = compile("Orders.Take(0)", &DialectPolicy::sqlserver());
        assert_eq!(compiled.select.limit, Some(SqlExpr::literal(0)));
        assert!(compiled.sql.starts_with("SELECT TOP(0) "), "{}", compiled.sql);

        let compiled = compile("Orders.Take(0)", &DialectPolicy::postgres());
        assert!(compiled.sql.ends_with("LIMIT 0"), "{}", compiled.sql);
    }

    #[test_case("Orders.Take(5)" ; "after take")]
    #[test_case("Orders.Skip(5)" ; "after skip")]
    #[test_case("Orders.OrderBy(o => o.Total).Skip(2).Take(5)" ; "after paging")]
    #[test_case("Orders.Distinct()" ; "after distinct")]
    fn test_filter_on_shaped_select_is_pushed_down(prefix: &str) {
        let text = format!("{}.Where(o => o.Total > 10)", prefix);
        let compiled = compile(&text, &DialectPolicy::sqlserver());
        let select = &compiled.select;
        let SourceKind::Subquery(inner) = &select.sources[0].kind else {
            panic!("expected a subquery source for {}, got {:?}", text, select.sources[0].kind);
        };
        assert!(inner.predicate.is_none(), "predicate leaked into the inner select of {}", text);
        assert!(select.predicate.is_some());
        assert_eq!(compiled.shaper.arity(), select.projection.len());
    }

    #[test_case("Orders.Distinct()" ; "after distinct")]
    #[test_case("Orders.Take(5).Distinct()" ; "after paged distinct")]
    #[test_case("Orders.Where(o => o.Total > 10).Distinct()" ; "after filtered distinct")]
    fn test_projection_on_distinct_select_is_pushed_down(prefix: &str) {
        let text = format!("{}.Select(o => o.Id)", prefix);
        let compiled = compile(&text, &DialectPolicy::sqlserver());
        let select = &compiled.select;
        let SourceKind::Subquery(inner) = &select.sources[0].kind else {
            panic!("expected a subquery source for {}, got {:?}", text, select.sources[0].kind);
        };
        assert!(inner.distinct, "inner select of {} lost DISTINCT", text);
        assert!(!select.distinct, "outer select of {} must not be DISTINCT", text);
        assert_eq!(select.projection.len(), 1);
        assert_eq!(compiled.shaper.arity(), select.projection.len());
    }

    #[test_case("Orders.Take(5)" ; "after take")]
    #[test_case("Orders.Skip(5)" ; "after skip")]
    #[test_case("Orders.OrderBy(o => o.Total)" ; "after ordering")]
    fn test_projection_on_paged_or_ordered_select_stays_in_place(prefix: &str) {
        let text = format!("{}.Select(o => o.Id)", prefix);
        let compiled = compile(&text, &DialectPolicy::sqlserver());
        let select = &compiled.select;
        assert!(matches!(select.sources[0].kind, SourceKind::Table(_)), "{:?}", select.sources[0].kind);
        assert!(
            select.limit.is_some() || select.offset.is_some() || !select.orderings.is_empty(),
            "{} lost its paging or ordering",
            text
        );
        assert_eq!(select.projection.len(), 1);
        assert!(compiled.sql.starts_with("SELECT "), "{}", compiled.sql);
    }

    #[test]
    fn test_nested_negation_keeps_predicate_live() {
        let compiled = compile("Orders.Where(o => -(-o.Id) > 5).Select(o => o.Id)", &DialectPolicy::sqlserver());
        assert!(compiled.sql.contains("WHERE -(-[o].[Id]) > 5"), "{}", compiled.sql);
        assert!(!compiled.sql.contains("--"), "{}", compiled.sql);
    }

    #[test]
    fn test_placeholder_text_in_function_argument_is_literal() {
        let compiled = compile("Customers.Select(c => c.Name.IndexOf(\"{0}\"))", &DialectPolicy::sqlserver());
        assert!(compiled.sql.contains("CHARINDEX(N'{0}', [c].[Name]) - 1"), "{}", compiled.sql);
    }

    #[test]
    fn test_consecutive_filters_share_one_select() {
        let compiled = compile(
            "Orders.Where(o => o.Total > 10).Where(o => o.CustomerId == 3)",
            &DialectPolicy::sqlserver(),
        );
        assert!(matches!(compiled.select.sources[0].kind, SourceKind::Table(_)));
        assert!(compiled.sql.contains("WHERE [o].[Total] > "), "{}", compiled.sql);
        assert!(compiled.sql.ends_with(" AND [o].[CustomerId] = 3"), "{}", compiled.sql);
    }

    #[test]
    fn test_group_by_with_aggregates() {
        let compiled = compile(
            "Orders.GroupBy(o => o.CustomerId).Select(g => new { Key = g.Key, Count = g.Count(), Total = g.Sum(x => x.Total) })",
            &DialectPolicy::sqlserver(),
        );
        assert_eq!(
            compiled.sql,
            "SELECT [o].[CustomerId] AS [Key], COUNT(*) AS [Count], SUM([o].[Total]) AS [Total]\n\
             FROM [Orders] AS [o]\n\
             GROUP BY [o].[CustomerId]"
        );
    }

    #[test]
    fn test_correlated_count_in_projection() {
        let compiled = compile(
            "Customers.Select(c => new { c.Name, OrderCount = c.Orders.Count() })",
            &DialectPolicy::sqlserver(),
        );
        assert!(compiled.sql.contains("COUNT(*)"), "{}", compiled.sql);
        assert!(compiled.sql.contains("[o].[CustomerId] = [c].[Id]"), "{}", compiled.sql);
        assert_eq!(compiled.select.sources.len(), 1);
    }

    #[test]
    fn test_generated_sql_is_idempotent() {
        let dialect = DialectPolicy::sqlserver();
        let text = "Orders.Where(o => o.Customer.Name == \"Ann\").OrderByDescending(o => o.Total).Skip(10).Take(5)";
        let first = compile(text, &dialect);
        let second = compile(text, &dialect);
        assert_eq!(first, second);
        assert_eq!(generate_sql(&first.select, &dialect).unwrap(), first.sql);
        assert_eq!(
            generate_sql(&first.select, &dialect).unwrap(),
            generate_sql(&first.select, &dialect).unwrap()
        );
    }

    #[test]
    fn test_binder_is_deterministic() {
        let model = shop_model();
        let order = model.entity_type("Order").unwrap();
        let customer = model.entity_type("Customer").unwrap();
        let root = RowShape::Entity(EntityProjection::for_table(order, "o", 0, false));
        let binder = Binder::new(&model);

        let mut expansions = Expansions::new();
        let first = binder.bind("o", &root, &["Customer", "Name"], &expansions);
        let second = binder.bind("o", &root, &["Customer", "Name"], &expansions);
        assert_eq!(first, second);
        match &first {
            MemberBinding::Join(request) => assert_eq!(request.navigation.name, "Customer"),
            other => panic!("expected a join request, got {:?}", other),
        }

        expansions.insert(
            (0, "Customer".to_string()),
            EntityProjection::for_table(customer, "c", 1, false),
        );
        let bound = binder.bind("o", &root, &["Customer", "Name"], &expansions);
        assert!(matches!(bound, MemberBinding::Shape(RowShape::Scalar(_))), "{:?}", bound);
        assert_eq!(bound, binder.bind("o", &root, &["Customer", "Name"], &expansions));

        let unknown = binder.bind("o", &root, &["Nmae"], &expansions);
        assert!(matches!(unknown, MemberBinding::NotBindable { ref chain, .. } if chain == "o.Nmae"));
    }

    #[test]
    fn test_parameters_listed_in_order_of_use() {
        let compiled = compile(
            "Orders.Where(o => o.Total > @min && o.CustomerId == @customer).Take(@n)",
            &DialectPolicy::sqlserver(),
        );
        assert_eq!(compiled.parameters, vec!["min", "customer", "n"]);
        assert!(compiled.sql.contains("@min"), "{}", compiled.sql);
        assert!(compiled.sql.contains("TOP(@n)"), "{}", compiled.sql);
    }

    #[test_case("Orders.Count()", Cardinality::Single ; "count")]
    #[test_case("Orders.First()", Cardinality::Single ; "first")]
    #[test_case("Orders.FirstOrDefault(o => o.Total > 5)", Cardinality::SingleOrDefault ; "first or default")]
    #[test_case("Orders.SingleOrDefault()", Cardinality::SingleOrDefault ; "single or default")]
    #[test_case("Orders.Select(o => o.Total).Sum()", Cardinality::Single ; "sum")]
    #[test_case("Orders.Where(o => o.Total > 5)", Cardinality::Many ; "sequence")]
    fn test_cardinality(text: &str, expected: Cardinality) {
        assert_eq!(compile(text, &DialectPolicy::sqlserver()).cardinality, expected);
    }

    #[test]
    fn test_element_operators_limit_rows() {
        let first = compile("Orders.FirstOrDefault()", &DialectPolicy::postgres());
        assert_eq!(first.select.limit, Some(SqlExpr::literal(1)));
        let single = compile("Orders.Single()", &DialectPolicy::postgres());
        assert_eq!(single.select.limit, Some(SqlExpr::literal(2)));
    }

    #[test]
    fn test_shaper_materializes_anonymous_objects() {
        let compiled = compile(
            "Orders.Select(o => new { o.Id, CustomerName = o.Customer.Name })",
            &DialectPolicy::sqlserver(),
        );
        assert!(matches!(compiled.shaper, Shaper::Object { .. }));
        assert_eq!(compiled.shaper.arity(), 2);
        let value = compiled.shaper.materialize(&[json!(7), json!("Ann")]).unwrap();
        assert_eq!(value, json!({ "Id": 7, "CustomerName": "Ann" }));
        assert!(compiled.shaper.materialize(&[json!(7)]).is_err());
    }

    #[test]
    fn test_entity_shaper_reads_every_property() {
        let compiled = compile("Orders", &DialectPolicy::sqlserver());
        match &compiled.shaper {
            Shaper::Entity { entity_type, properties, .. } => {
                assert_eq!(entity_type, "Order");
                let names: Vec<&str> = properties.iter().map(|(name, _)| name.as_str()).collect();
                assert_eq!(names, vec!["Id", "CustomerId", "Total"]);
            }
            other => panic!("expected an entity shaper, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_member_is_reported_with_its_chain() {
        match compile_error("Orders.Select(o => o.Nmae)", &DialectPolicy::sqlserver()) {
            QueryCompilationError::UnresolvedMember { chain, .. } => assert_eq!(chain, "o.Nmae"),
            other => panic!("expected UnresolvedMember, got {:?}", other),
        }
    }

    #[test]
    fn test_grouping_without_projection_is_untranslatable() {
        let err = compile_error("Orders.GroupBy(o => o.CustomerId)", &DialectPolicy::sqlserver());
        assert!(matches!(err, QueryCompilationError::UntranslatableOperator { .. }), "{:?}", err);
        assert_eq!(err.error_type(), "UntranslatableOperator");
    }

    #[test]
    fn test_unknown_entity_set_fails() {
        let query = parse_query("Invoices.Take(1)").unwrap();
        let err = compile_uncached(&query, &shop_model(), &DialectPolicy::sqlserver()).unwrap_err();
        assert!(
            matches!(err, QueryCompilationError::UnresolvedMember { ref chain, .. } if chain == "Invoices"),
            "{:?}",
            err
        );
    }
}
