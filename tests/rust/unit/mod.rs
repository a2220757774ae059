//! Unit tests - fast, isolated tests of individual components
//!
//! These tests need no network or external services; model and dialect
//! definitions are inline YAML or temporary files.

mod config_tests;
mod dialect_rendering_tests;
mod model_validation_tests;
mod parser_robustness_tests;
