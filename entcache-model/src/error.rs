//! Error types for the entity model.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while describing types or mutating entities.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("type '{0}' declares no identity property")]
    MissingIdentity(String),

    #[error("type '{0}' declares more than one identity property")]
    MultipleIdentity(String),

    #[error("type '{0}' declares more than one discriminator property")]
    MultipleDiscriminator(String),

    #[error("type '{type_name}' declares property '{property}' twice")]
    DuplicateProperty { type_name: String, property: String },

    #[error("type '{type_name}' has no property '{property}'")]
    UnknownProperty { type_name: String, property: String },

    #[error("property '{type_name}.{property}' cannot be changed locally")]
    ReadOnly { type_name: String, property: String },

    #[error("property '{type_name}.{property}' is not {expected}")]
    KindMismatch {
        type_name: String,
        property: String,
        expected: &'static str,
    },

    #[error("type '{0}' is already registered")]
    DuplicateType(String),

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("discriminator {value} is already used in hierarchy '{root}'")]
    DuplicateDiscriminator { root: String, value: i32 },

    #[error("entity of type '{0}' already has an identity key")]
    KeyAlreadyAssigned(String),

    #[error("invalid key: {0}")]
    InvalidKey(#[from] entcache_types::Error),
}
