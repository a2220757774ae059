//! # Query compilation errors
//!
//! The error taxonomy shared by the translator and the SQL generator. Every
//! failure is returned as a value; nothing in the compilation core panics
//! across its public boundary, so a caller exploring several candidate query
//! shapes can detect and recover from a failed shape cheaply.
//!
//! - **UnresolvedMember**: a member-access chain could not be bound. The caller
//!   decides whether client-side evaluation is acceptable.
//! - **UntranslatableOperator**: an operator or sub-expression has no IR
//!   equivalent. Always fatal for that compilation; no partial SQL is emitted.
//! - **CompositionViolation**: an internal IR invariant was broken (a defect in
//!   the translator, never a user error).
//! - **UnsupportedDialectFeature**: a rendering hook has neither a policy entry
//!   nor a documented default.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryCompilationError {
    #[error("Could not bind member access '{chain}': {reason}")]
    UnresolvedMember { chain: String, reason: String },

    #[error("Untranslatable {operator}: {details}")]
    UntranslatableOperator { operator: String, details: String },

    #[error("Composition invariant violated while applying {operation}: {details}")]
    CompositionViolation {
        operation: String,
        details: String,
    },

    #[error("Dialect '{dialect}' does not support {feature}")]
    UnsupportedDialectFeature { dialect: String, feature: String },
}

/// Helpers for building errors with context
impl QueryCompilationError {
    pub fn unresolved(chain: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryCompilationError::UnresolvedMember {
            chain: chain.into(),
            reason: reason.into(),
        }
    }

    pub fn untranslatable(operator: impl Into<String>, details: impl Into<String>) -> Self {
        QueryCompilationError::UntranslatableOperator {
            operator: operator.into(),
            details: details.into(),
        }
    }

    pub fn composition(operation: impl Into<String>, details: impl Into<String>) -> Self {
        QueryCompilationError::CompositionViolation {
            operation: operation.into(),
            details: details.into(),
        }
    }

    pub fn unsupported(dialect: impl Into<String>, feature: impl Into<String>) -> Self {
        QueryCompilationError::UnsupportedDialectFeature {
            dialect: dialect.into(),
            feature: feature.into(),
        }
    }

    /// Short tag used in HTTP error bodies and CLI output
    pub fn error_type(&self) -> &'static str {
        match self {
            QueryCompilationError::UnresolvedMember { .. } => "UnresolvedMember",
            QueryCompilationError::UntranslatableOperator { .. } => "UntranslatableOperator",
            QueryCompilationError::CompositionViolation { .. } => "CompositionViolation",
            QueryCompilationError::UnsupportedDialectFeature { .. } => "UnsupportedDialectFeature",
        }
    }
}

pub type CompilationResult<T> = Result<T, QueryCompilationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = QueryCompilationError::unresolved("o.Customer.Nmae", "no property 'Nmae' on 'Customer'");
        assert_eq!(
            err.to_string(),
            "Could not bind member access 'o.Customer.Nmae': no property 'Nmae' on 'Customer'"
        );
        assert_eq!(err.error_type(), "UnresolvedMember");

        let err = QueryCompilationError::unsupported("cosmos", "cross-document joins");
        assert_eq!(err.to_string(), "Dialect 'cosmos' does not support cross-document joins");
    }
}
