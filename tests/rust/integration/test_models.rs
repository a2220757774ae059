//! Shared model fixtures for integration tests

use std::sync::Arc;

use queryforge::compiler::{compile_uncached, CompiledQuery};
use queryforge::errors::QueryCompilationError;
use queryforge::linq_parser::parse_query;
use queryforge::model::{Model, ModelConfig};
use queryforge::sql_generator::DialectPolicy;

pub const SHOP: &str = r#"
name: shop
entities:
  - name: Customer
    table: Customers
    key: [Id]
    properties:
      - { name: Id, type: int }
      - { name: Name, type: string, nullable: true }
      - { name: IsActive, type: bool }
    navigations:
      - { name: Orders, target: Order, kind: collection, foreign_key: [CustomerId] }
      - { name: Addresses, target: Address, kind: collection, owned: true }
  - name: Address
    owned: true
    properties:
      - { name: City, type: string }
  - name: Order
    table: Orders
    key: [Id]
    properties:
      - { name: Id, type: int }
      - { name: CustomerId, type: int }
      - { name: Total, type: decimal }
    navigations:
      - { name: Customer, target: Customer, kind: required, foreign_key: [CustomerId] }
"#;

pub fn shop_model() -> Arc<Model> {
    Arc::new(
        ModelConfig::from_yaml_str(SHOP)
            .expect("shop model parses")
            .build()
            .expect("shop model is valid"),
    )
}

/// Parses and compiles `text` against the shop model, bypassing any cache
pub fn compile(text: &str, dialect: &DialectPolicy) -> CompiledQuery {
    let query = parse_query(text).unwrap_or_else(|e| panic!("failed to parse {}: {}", text, e));
    compile_uncached(&query, &shop_model(), dialect)
        .unwrap_or_else(|e| panic!("failed to compile {}: {}", text, e))
}

/// Parses `text` and returns the compilation error it must produce
pub fn compile_error(text: &str, dialect: &DialectPolicy) -> QueryCompilationError {
    let query = parse_query(text).unwrap_or_else(|e| panic!("failed to parse {}: {}", text, e));
    match compile_uncached(&query, &shop_model(), dialect) {
        Ok(compiled) => panic!("expected {} to fail, got SQL:\n{}", text, compiled.sql),
        Err(e) => e,
    }
}
