#[cfg(test)]
mod document_tests {
    use queryforge::errors::QueryCompilationError;
    use queryforge::sql_generator::DialectPolicy;
    use queryforge::sql_ir::{ProjectionForm, Shaper};
    use test_case::test_case;

    use crate::test_models::{compile, compile_error};

    #[test]
    fn test_untouched_owned_collection_is_projected_bare() {
        let compiled = compile("Customers.Select(c => c.Addresses)", &DialectPolicy::cosmos());
        assert_eq!(compiled.sql, "SELECT VALUE c[\"Addresses\"]\nFROM root c");
        assert_eq!(compiled.select.projection_form, ProjectionForm::Value);
    }

    #[test]
    fn test_filtered_owned_collection_is_array_wrapped() {
        let compiled = compile(
            "Customers.Select(c => c.Addresses.Where(a => a.City == \"Oslo\"))",
            &DialectPolicy::cosmos(),
        );
        assert!(compiled.sql.starts_with("SELECT VALUE ARRAY("), "{}", compiled.sql);
        assert!(compiled.sql.contains("FROM a IN c[\"Addresses\"]"), "{}", compiled.sql);
        assert!(compiled.sql.contains("WHERE (a[\"City\"] = \"Oslo\")"), "{}", compiled.sql);
        assert!(compiled.sql.ends_with("FROM root c"), "{}", compiled.sql);
        assert!(matches!(compiled.shaper, Shaper::Collection { .. }));
    }

    #[test]
    fn test_document_filter_and_projection() {
        let compiled = compile(
            "Customers.Where(c => c.Name == \"Ann\").Select(c => c.Name)",
            &DialectPolicy::cosmos(),
        );
        assert_eq!(
            compiled.sql,
            "SELECT VALUE c[\"Name\"]\nFROM root c\nWHERE (c[\"Name\"] = \"Ann\")"
        );
    }

    #[test]
    fn test_document_paging_uses_offset_limit() {
        let compiled = compile("Customers.Skip(10).Take(5)", &DialectPolicy::cosmos());
        assert!(compiled.sql.ends_with("OFFSET 10 LIMIT 5"), "{}", compiled.sql);
    }

    #[test_case("Orders.Where(o => o.Customer.Name == \"Ann\")" ; "reference navigation")]
    #[test_case("Customers.Where(c => c.Orders.Any())" ; "collection navigation")]
    #[test_case("Orders.Select(o => o.Id).Union(Orders.Select(o => o.CustomerId))" ; "set operation")]
    #[test_case("Customers.Skip(10)" ; "offset without limit")]
    fn test_document_dialect_rejects(text: &str) {
        match compile_error(text, &DialectPolicy::cosmos()) {
            QueryCompilationError::UnsupportedDialectFeature { dialect, .. } => assert_eq!(dialect, "cosmos"),
            other => panic!("expected UnsupportedDialectFeature for {}, got {:?}", text, other),
        }
    }

    #[test]
    fn test_relational_owned_collection_reads_json_column() {
        let compiled = compile("Customers.Select(c => c.Addresses)", &DialectPolicy::sqlserver());
        assert_eq!(compiled.sql, "SELECT [c].[Addresses]\nFROM [Customers] AS [c]");
        assert!(matches!(compiled.shaper, Shaper::Collection { .. }));
    }
}
