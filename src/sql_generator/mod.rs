pub mod dialect;
mod errors;
mod printer;

pub use dialect::{load_dialect, DataShape, DialectConfig, DialectPolicy, FunctionTemplate, BUILTIN_DIALECTS};
pub use errors::DialectError;
pub use printer::{generate_sql, SqlPrinter};
