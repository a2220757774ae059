use serde::{Deserialize, Serialize};

use crate::compiler::{CacheStatus, CompiledQuery};
use crate::query_ast::QueryExpr;
use crate::sql_ir::{SelectExpression, Shaper};
use crate::translator::Cardinality;

/// Request for SQL generation API
#[derive(Debug, Serialize, Deserialize)]
pub struct SqlGenerationRequest {
    /// Query in method-chain text form
    #[serde(default)]
    pub query: Option<String>,

    /// Query AST, as an alternative to `query`
    #[serde(default)]
    pub ast: Option<QueryExpr>,

    /// Model to compile against (defaults to the only loaded model)
    #[serde(default)]
    pub model: Option<String>,

    /// Built-in dialect name (defaults to the server dialect)
    #[serde(default)]
    pub dialect: Option<String>,

    /// Return the relational IR alongside the SQL
    #[serde(default)]
    pub include_ir: bool,

    /// Return the result shaper alongside the SQL
    #[serde(default)]
    pub include_shaper: bool,
}

impl SqlGenerationRequest {
    /// Text used to echo the query back in responses
    pub fn query_text(&self) -> String {
        match (&self.query, &self.ast) {
            (Some(text), _) => text.clone(),
            (None, Some(ast)) => ast.to_string(),
            (None, None) => String::new(),
        }
    }
}

/// Response from SQL generation API
#[derive(Debug, Serialize, Deserialize)]
pub struct SqlGenerationResponse {
    /// The query in canonical method-chain form
    pub query: String,
    pub model: String,
    pub dialect: String,
    pub sql: String,

    /// Parameter names in order of first use
    pub parameters: Vec<String>,
    pub cardinality: Cardinality,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shaper: Option<Shaper>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ir: Option<SelectExpression>,

    pub metadata: SqlGenerationMetadata,
}

impl SqlGenerationResponse {
    pub fn new(
        query: String,
        model: String,
        dialect: String,
        compiled: &CompiledQuery,
        metadata: SqlGenerationMetadata,
    ) -> Self {
        SqlGenerationResponse {
            query,
            model,
            dialect,
            sql: compiled.sql.clone(),
            parameters: compiled.parameters.clone(),
            cardinality: compiled.cardinality,
            shaper: None,
            ir: None,
            metadata,
        }
    }
}

/// Metadata for SQL generation response
#[derive(Debug, Serialize, Deserialize)]
pub struct SqlGenerationMetadata {
    pub cache_status: CacheStatus,

    /// Parse plus compile time in milliseconds
    pub compile_time_ms: f64,
}

/// Error response for SQL generation API
#[derive(Debug, Serialize, Deserialize)]
pub struct SqlGenerationError {
    /// Original query text
    pub query: String,

    pub error: String,

    /// Error type: "ParseError", "UnresolvedMember", "UnsupportedDialectError", ...
    pub error_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

/// Additional error details
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Byte offset in query string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,

    /// Line number (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,

    /// Column number (1-indexed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorDetails {
    /// Details pointing at `offset` in `query`
    pub fn at_offset(query: &str, offset: usize) -> Self {
        let offset = offset.min(query.len());
        let before = query.get(..offset).unwrap_or(query);
        let line = before.matches('\n').count() + 1;
        let column = before
            .rsplit('\n')
            .next()
            .map(|l| l.chars().count() + 1)
            .unwrap_or(1);
        ErrorDetails {
            position: Some(offset),
            line: Some(line),
            column: Some(column),
            hint: None,
        }
    }

    pub fn hint(hint: impl Into<String>) -> Self {
        ErrorDetails {
            hint: Some(hint.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub entity_sets: Vec<String>,
    pub entity_type_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_details_line_and_column() {
        let query = "Orders\n  .Where(o => )";
        let details = ErrorDetails::at_offset(query, 20);
        assert_eq!(details.position, Some(20));
        assert_eq!(details.line, Some(2));
        assert_eq!(details.column, Some(14));

        let details = ErrorDetails::at_offset("abc", 99);
        assert_eq!(details.position, Some(3));
        assert_eq!(details.column, Some(4));
    }

    #[test]
    fn test_request_accepts_text_only() {
        let request: SqlGenerationRequest =
            serde_json::from_str(r#"{"query": "Orders.Take(1)"}"#).unwrap();
        assert_eq!(request.query_text(), "Orders.Take(1)");
        assert!(request.ast.is_none());
        assert!(!request.include_ir);
    }
}
