//! Per-compilation binding state: lambda scopes and alias allocation.

use std::collections::HashMap;

use super::row_shape::RowShape;

/// Scope stack from lambda parameter to the row shape it ranges over.
///
/// Inner scopes shadow outer ones; parameters of enclosing lambdas stay
/// visible, which is how correlated subqueries reach their outer rows.
#[derive(Debug, Default)]
pub struct BindingContext {
    scopes: Vec<Vec<(String, RowShape)>>,
}

impl BindingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_scope(&mut self, bindings: Vec<(String, RowShape)>) {
        self.scopes.push(bindings);
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn lookup(&self, param: &str) -> Option<&RowShape> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|(name, _)| name == param)
            .map(|(_, shape)| shape)
    }
}

/// Allocates unique source aliases: first letter of the source name, then
/// numbered (`o`, `o0`, `o1`).
#[derive(Debug, Default)]
pub struct AliasGenerator {
    used: HashMap<String, usize>,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, hint: &str) -> String {
        let base = hint
            .chars()
            .find(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase().to_string())
            .unwrap_or_else(|| "t".to_string());
        let count = self.used.entry(base.clone()).or_insert(0);
        let alias = if *count == 0 {
            base
        } else {
            format!("{}{}", base, *count - 1)
        };
        *count += 1;
        alias
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_ir::SqlExpr;

    #[test]
    fn test_inner_scopes_shadow_outer() {
        let mut context = BindingContext::new();
        context.push_scope(vec![("x".to_string(), RowShape::Scalar(SqlExpr::literal(1)))]);
        context.push_scope(vec![("x".to_string(), RowShape::Scalar(SqlExpr::literal(2)))]);
        assert_eq!(context.lookup("x"), Some(&RowShape::Scalar(SqlExpr::literal(2))));
        context.pop_scope();
        assert_eq!(context.lookup("x"), Some(&RowShape::Scalar(SqlExpr::literal(1))));
        assert!(context.lookup("y").is_none());
    }

    #[test]
    fn test_alias_numbering() {
        let mut aliases = AliasGenerator::new();
        assert_eq!(aliases.next("Orders"), "o");
        assert_eq!(aliases.next("Customers"), "c");
        assert_eq!(aliases.next("OrderLines"), "o0");
        assert_eq!(aliases.next("orders"), "o1");
        assert_eq!(aliases.next("_"), "t");
    }
}
