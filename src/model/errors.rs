//! # Model Error Types
//!
//! Errors raised while loading a model definition and freezing it into an
//! immutable [`Model`](super::Model).
//!
//! - **Structure Errors**: duplicate names, unknown properties, missing keys
//! - **Relationship Errors**: unknown navigation targets, ownership and key
//!   arity mismatches
//! - **Configuration Errors**: file I/O and YAML parsing

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("Duplicate entity type `{name}`")]
    DuplicateEntity { name: String },
    #[error("Entity set `{set}` is declared by both `{first}` and `{second}`")]
    DuplicateEntitySet {
        set: String,
        first: String,
        second: String,
    },
    #[error("Entity type `{entity}` declares member `{member}` more than once")]
    DuplicateMember { entity: String, member: String },
    #[error("Entity type `{entity}` has no primary key")]
    MissingKey { entity: String },
    #[error("Unknown property `{property}` on `{entity}` ({context})")]
    UnknownProperty {
        entity: String,
        property: String,
        context: String,
    },
    #[error("Navigation `{entity}.{navigation}` targets unknown entity type `{target}`")]
    UnknownNavigationTarget {
        entity: String,
        navigation: String,
        target: String,
    },
    #[error("Navigation `{entity}.{navigation}`: {message}")]
    OwnershipMismatch {
        entity: String,
        navigation: String,
        message: String,
    },
    #[error(
        "Navigation `{entity}.{navigation}` maps {found} foreign-key properties onto a {expected}-property principal key"
    )]
    KeyArityMismatch {
        entity: String,
        navigation: String,
        expected: usize,
        found: usize,
    },
    #[error("Invalid identifier `{identifier}` in {context}")]
    InvalidIdentifier { identifier: String, context: String },
    #[error("Unknown entity set `{set}`")]
    UnknownEntitySet { set: String },
    #[error("Failed to read model file: {error}")]
    ReadError { error: String },
    #[error("Failed to parse model definition: {error}")]
    ParseError { error: String },
    #[error("Failed to fingerprint model `{model}`: {error}")]
    FingerprintError { model: String, error: String },
}

impl ModelError {
    pub fn unknown_property_with_context(
        entity: impl Into<String>,
        property: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        ModelError::UnknownProperty {
            entity: entity.into(),
            property: property.into(),
            context: context.into(),
        }
    }

    pub fn ownership_with_context(
        entity: impl Into<String>,
        navigation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ModelError::OwnershipMismatch {
            entity: entity.into(),
            navigation: navigation.into(),
            message: message.into(),
        }
    }
}
