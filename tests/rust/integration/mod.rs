//! Integration tests - Tests that drive the whole compile pipeline
//!
//! These tests go from query text (or HTTP requests) to SQL, shapers and cache
//! behaviour, using the public API only.

mod cache_tests;
mod document_tests;
mod http_api_tests;
mod test_models;
mod translation_tests;
