use thiserror::Error;

/// Errors raised while loading dialect policies. Rendering failures are
/// [`QueryCompilationError`](crate::errors::QueryCompilationError)s.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DialectError {
    #[error("Unknown dialect `{name}` (built-in dialects: ansi, sqlserver, postgres, sqlite, cosmos)")]
    UnknownBase { name: String },
    #[error("Failed to read dialect file: {error}")]
    ReadError { error: String },
    #[error("Failed to parse dialect definition: {error}")]
    ParseError { error: String },
}
