//! Compiler facade: translate, print, cache.
//!
//! [`QueryCompiler`] owns a frozen model and a dialect policy and hands out
//! shared [`CompiledQuery`] values. Compilations are keyed by the structural
//! fingerprint of the query AST, so the same query shape is translated once.

pub mod query_cache;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::errors::QueryCompilationError;
use crate::linq_parser::{self, ParseError};
use crate::model::Model;
use crate::query_ast::QueryExpr;
use crate::sql_generator::{generate_sql, DialectPolicy};
use crate::sql_ir::{SelectExpression, Shaper};
use crate::translator::{self, Cardinality};

pub use query_cache::{CacheMetrics, CacheStatus, QueryCache, QueryCacheConfig, QueryCacheKey};

/// A translated and printed query, ready for execution and materialization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub select: SelectExpression,
    pub shaper: Shaper,
    pub sql: String,
    /// Query parameter names in order of first use
    pub parameters: Vec<String>,
    pub cardinality: Cardinality,
}

impl CompiledQuery {
    pub(crate) fn approximate_size(&self) -> usize {
        // The IR and shaper are proportional to the SQL text they print to
        self.sql.len() * 3 + self.parameters.iter().map(String::len).sum::<usize>()
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compilation(#[from] QueryCompilationError),

    #[error("Failed to fingerprint query: {0}")]
    Fingerprint(String),
}

impl CompileError {
    /// Short tag used in HTTP error bodies and CLI output
    pub fn error_type(&self) -> &'static str {
        match self {
            CompileError::Parse(_) => "ParseError",
            CompileError::Compilation(err) => err.error_type(),
            CompileError::Fingerprint(_) => "FingerprintError",
        }
    }
}

/// Translates and prints `query` without touching any cache
pub fn compile_uncached(
    query: &QueryExpr,
    model: &Model,
    dialect: &DialectPolicy,
) -> Result<CompiledQuery, QueryCompilationError> {
    let translated = translator::translate(query, model, dialect)?;
    let sql = generate_sql(&translated.select, dialect)?;
    Ok(CompiledQuery {
        select: translated.select,
        shaper: translated.shaper,
        sql,
        parameters: translated.parameters,
        cardinality: translated.cardinality,
    })
}

pub struct QueryCompiler {
    model: Arc<Model>,
    dialect: DialectPolicy,
    cache: Arc<QueryCache>,
}

impl QueryCompiler {
    /// A compiler with its own cache configured from the environment
    pub fn new(model: Arc<Model>, dialect: DialectPolicy) -> Self {
        Self::with_cache(model, dialect, Arc::new(QueryCache::from_env()))
    }

    /// A compiler sharing `cache` with other compilers; keys carry the model
    /// and dialect fingerprints so entries never cross over
    pub fn with_cache(model: Arc<Model>, dialect: DialectPolicy, cache: Arc<QueryCache>) -> Self {
        QueryCompiler { model, dialect, cache }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn dialect(&self) -> &DialectPolicy {
        &self.dialect
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn compile(&self, query: &QueryExpr) -> Result<Arc<CompiledQuery>, CompileError> {
        self.compile_with_status(query).map(|(compiled, _)| compiled)
    }

    pub fn compile_text(&self, text: &str) -> Result<Arc<CompiledQuery>, CompileError> {
        self.compile_text_with_status(text).map(|(compiled, _)| compiled)
    }

    pub fn compile_text_with_status(&self, text: &str) -> Result<(Arc<CompiledQuery>, CacheStatus), CompileError> {
        let query = linq_parser::parse_query(text)?;
        log::debug!("Parsed query: {}", query);
        self.compile_with_status(&query)
    }

    pub fn compile_with_status(&self, query: &QueryExpr) -> Result<(Arc<CompiledQuery>, CacheStatus), CompileError> {
        let key = QueryCacheKey::new(query, &self.model, &self.dialect)
            .map_err(|e| CompileError::Fingerprint(e.to_string()))?;

        let (compiled, status) = self.cache.get_or_compile(&key, || {
            log::debug!("Compiling {} for dialect '{}'", key.fingerprint, self.dialect.name);
            compile_uncached(query, &self.model, &self.dialect)
        })?;
        log::debug!("Query {} served with cache status {:?}", key.fingerprint, status);
        Ok((compiled, status))
    }
}
