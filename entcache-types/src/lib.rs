//! Core type definitions for entcache.
//!
//! This crate defines the small, dependency-light types shared by the
//! entity model and the synchronisation codec:
//! - Entity identity keys ([`EntityKey`], [`KeyKind`])
//! - The per-instance [`LifecycleStatus`] state machine
//! - Push relay invalidation records ([`NotificationRecord`])

mod ids;
mod notification;
mod status;

pub use ids::{EntityKey, KeyKind};
pub use notification::{DiffKind, NotificationItem, NotificationRecord};
pub use status::LifecycleStatus;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}
