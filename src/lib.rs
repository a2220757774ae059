//! QueryForge - compiles composable query expressions over an entity model
//! into relational SQL (or document SQL) plus a result shaper.
//!
//! The pipeline is:
//! - query text or a programmatic AST ([`linq_parser`], [`query_ast`])
//! - binding against a frozen entity model ([`model`])
//! - translation into a relational select IR ([`translator`], [`sql_ir`])
//! - printing for a concrete dialect ([`sql_generator`])
//! - caching of compiled queries by shape ([`compiler`])

pub mod compiler;
pub mod config;
pub mod errors;
pub mod linq_parser;
pub mod model;
pub mod query_ast;
pub mod server;
pub mod sql_generator;
pub mod sql_ir;
pub mod translator;
