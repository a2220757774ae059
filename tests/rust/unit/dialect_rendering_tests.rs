//! Unit tests for dialect-specific SQL rendering
//!
//! The same query compiled against every built-in dialect, plus YAML
//! dialect files layered over a built-in base.

#[cfg(test)]
mod dialect_rendering_tests {
    use std::io::Write;

    use queryforge::compiler::compile_uncached;
    use queryforge::errors::QueryCompilationError;
    use queryforge::linq_parser::parse_query;
    use queryforge::model::{Model, ModelConfig};
    use queryforge::sql_generator::{load_dialect, DialectError, DialectPolicy};
    use test_case::test_case;

    const MODEL: &str = r#"
name: shop
entities:
  - name: Customer
    table: Customers
    key: [Id]
    properties:
      - { name: Id, type: int }
      - { name: Name, type: string, nullable: true }
  - name: Order
    table: Orders
    key: [Id]
    properties:
      - { name: Id, type: int }
      - { name: CustomerId, type: int }
    navigations:
      - { name: Customer, target: Customer, kind: required, foreign_key: [CustomerId] }
"#;

    fn model() -> Model {
        ModelConfig::from_yaml_str(MODEL).unwrap().build().unwrap()
    }

    fn render(query: &str, dialect: &DialectPolicy) -> Result<String, QueryCompilationError> {
        let query = parse_query(query).unwrap();
        compile_uncached(&query, &model(), dialect).map(|compiled| compiled.sql)
    }

    #[test_case("ansi", "SELECT \"o\".\"Id\"\nFROM \"Orders\" AS \"o\"\nWHERE \"o\".\"Id\" = 1" ; "ansi")]
    #[test_case("sqlserver", "SELECT [o].[Id]\nFROM [Orders] AS [o]\nWHERE [o].[Id] = 1" ; "sqlserver")]
    #[test_case("postgres", "SELECT \"o\".\"Id\"\nFROM \"Orders\" AS \"o\"\nWHERE \"o\".\"Id\" = 1" ; "postgres")]
    #[test_case("sqlite", "SELECT \"o\".\"Id\"\nFROM \"Orders\" AS \"o\"\nWHERE \"o\".\"Id\" = 1" ; "sqlite")]
    #[test_case("cosmos", "SELECT VALUE o[\"Id\"]\nFROM root o\nWHERE (o[\"Id\"] = 1)" ; "cosmos")]
    fn test_filtered_projection_per_dialect(dialect: &str, expected: &str) {
        let dialect = DialectPolicy::builtin(dialect).unwrap();
        let sql = render("Orders.Where(o => o.Id == 1).Select(o => o.Id)", &dialect).unwrap();
        assert_eq!(sql, expected);
    }

    #[test_case("sqlserver", "WHERE [c].[Name] = N'Ann'" ; "sqlserver prefixes unicode strings")]
    #[test_case("postgres", "WHERE \"c\".\"Name\" = 'Ann'" ; "postgres")]
    #[test_case("cosmos", "WHERE (c[\"Name\"] = \"Ann\")" ; "cosmos uses json strings")]
    fn test_string_literals_per_dialect(dialect: &str, suffix: &str) {
        let dialect = DialectPolicy::builtin(dialect).unwrap();
        let sql = render("Customers.Where(c => c.Name == \"Ann\").Select(c => c.Id)", &dialect).unwrap();
        assert!(sql.ends_with(suffix), "{}", sql);
    }

    #[test_case("ansi", "OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY" ; "ansi")]
    #[test_case("postgres", "LIMIT 10 OFFSET 20" ; "postgres")]
    #[test_case("sqlite", "LIMIT 10 OFFSET 20" ; "sqlite")]
    #[test_case("sqlserver", "OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY" ; "sqlserver")]
    fn test_pagination_per_dialect(dialect: &str, suffix: &str) {
        let dialect = DialectPolicy::builtin(dialect).unwrap();
        let sql = render("Orders.OrderBy(o => o.Id).Skip(20).Take(10).Select(o => o.Id)", &dialect).unwrap();
        assert!(sql.ends_with(suffix), "{}", sql);
    }

    #[test]
    fn test_parameters_use_dialect_prefix() {
        let sql = render("Orders.Where(o => o.Id == @id).Select(o => o.Id)", &DialectPolicy::sqlserver()).unwrap();
        assert!(sql.ends_with("WHERE [o].[Id] = @id"), "{}", sql);
    }

    #[test]
    fn test_yaml_dialect_file_overrides_base() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "base: postgres\nname: warehouse\nparameter_prefix: \":\"").unwrap();

        let dialect = load_dialect(file.path().to_str().unwrap()).unwrap();
        assert_eq!(dialect.name, "warehouse");
        let sql = render("Orders.Where(o => o.Id == @id).Select(o => o.Id)", &dialect).unwrap();
        assert!(sql.ends_with("WHERE \"o\".\"Id\" = :id"), "{}", sql);
    }

    #[test]
    fn test_unknown_dialects_are_rejected() {
        assert!(matches!(load_dialect("oracle"), Err(DialectError::UnknownBase { .. })));
        assert!(matches!(
            load_dialect("/nonexistent/dialect.yaml"),
            Err(DialectError::ReadError { .. })
        ));
    }

    #[test]
    fn test_relational_joins_are_unsupported_on_documents() {
        let err = render(
            "Orders.Where(o => o.Customer.Name == \"Ann\").Select(o => o.Id)",
            &DialectPolicy::cosmos(),
        )
        .unwrap_err();
        assert_eq!(err.error_type(), "UnsupportedDialectFeature");
    }
}
