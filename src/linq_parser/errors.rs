use thiserror::Error;

const NEAR_LIMIT: usize = 24;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("Empty query text")]
    Empty,

    #[error("Syntax error at offset {offset} near '{near}'")]
    Syntax { offset: usize, near: String },

    #[error("Unexpected tokens after query at offset {offset}: '{near}'")]
    TrailingInput { offset: usize, near: String },

    #[error("Cannot lower {expression}: {reason}")]
    Lowering { expression: String, reason: String },
}

impl ParseError {
    /// Builds a positional error from the unparsed remainder of `source`
    pub fn syntax(source: &str, remainder: &str) -> Self {
        ParseError::Syntax {
            offset: source.len().saturating_sub(remainder.len()),
            near: near(remainder),
        }
    }

    pub fn trailing(source: &str, remainder: &str) -> Self {
        ParseError::TrailingInput {
            offset: source.len().saturating_sub(remainder.len()),
            near: near(remainder.trim()),
        }
    }

    pub fn lowering(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        ParseError::Lowering {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

fn near(input: &str) -> String {
    let trimmed = input.trim_start();
    match trimmed.char_indices().nth(NEAR_LIMIT) {
        Some((end, _)) => format!("{}...", &trimmed[..end]),
        None => trimmed.to_string(),
    }
}
