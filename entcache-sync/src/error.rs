//! Error types for the synchronisation codec.

use entcache_model::ModelError;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding, encoding or applying notifications.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Syntax error or unexpected JSON shape, including unterminated
    /// arrays and objects.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A payload property arrived before the identity key.
    #[error("property {property} of {type_name} precedes the identity key")]
    IdentityNotResolved { type_name: String, property: String },

    /// An object carried no identity key and no target instance was given.
    #[error("{type_name} object carries no identity key")]
    MissingIdentity { type_name: String },

    /// The identity value does not fit the type's key kind.
    #[error("invalid identity key for {type_name}: {value}")]
    InvalidKey { type_name: String, value: String },

    /// The type is not registered with the entity provider.
    #[error("unknown entity type: {0}")]
    UnknownType(String),

    /// The entity provider has no identity map for the type.
    #[error("no identity map for entity type: {0}")]
    NoIdentityMap(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Failure reported by an [`EntityFetcher`](crate::EntityFetcher).
    #[error("transport error: {0}")]
    Transport(String),

    /// A request header could not be parsed.
    #[error("invalid header {name}: {value}")]
    InvalidHeader { name: String, value: String },

    /// A re-fetch did not finish within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    #[error("config error: {0}")]
    Config(String),
}
