//! Synchronisation codec for entcache.
//!
//! Keeps exactly one in-memory instance per entity identity and merges
//! server payloads into it without losing unsent local edits.
//!
//! # Components
//!
//! - **Codec** ([`SyncCodec`]): the streaming JSON read path (identity
//!   resolution, subtype dispatch, local-wins merge) and the diff-based
//!   write path
//! - **Reconciler** ([`Reconciler`]): in-place collection merge that keeps
//!   member identity and container listeners intact
//! - **Policy** ([`JsonPolicy`], [`JsonKeys`]): traversal direction and
//!   depth for writes, read from `X-Json-*` headers
//! - **Paging** ([`PageRequest`], [`PageInfo`]): list windows and pages
//! - **Applicator** ([`NotificationApplicator`]): consumes push relay
//!   invalidation records and re-fetches what changed
//!
//! # Example
//!
//! ```
//! use entcache_model::{PropertyDescriptor, TypeDescriptor, TypeRegistry};
//! use entcache_sync::{JsonPolicy, SyncCodec};
//! use entcache_types::KeyKind;
//! use std::sync::Arc;
//!
//! let mut registry = TypeRegistry::new();
//! registry
//!     .register(
//!         TypeDescriptor::builder("Note")
//!             .property(PropertyDescriptor::identity("id", KeyKind::Int))
//!             .property(PropertyDescriptor::attribute("text"))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let codec = SyncCodec::new(Arc::new(registry));
//! let note = codec.decode("Note", r#"{"id":1,"text":"hello"}"#).unwrap().unwrap();
//! note.set("text", "hello, world").unwrap();
//!
//! let json = codec.encode(&note, &JsonPolicy::default()).unwrap();
//! assert_eq!(json, r#"{"id":1,"text":"hello, world"}"#);
//! ```

pub mod applicator;
mod codec;
mod config;
mod error;
pub mod paging;
pub mod policy;
pub mod protocol;
pub mod reconcile;
pub mod transport;

pub use applicator::{ApplyReport, NotificationApplicator};
pub use codec::{Conflict, DecodeReport, SyncCodec};
pub use config::{
    CodecConfig, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE,
};
pub use error::{CodecError, CodecResult};
pub use paging::{paginate, PageInfo, PageRequest};
pub use policy::{JsonKeys, JsonPolicy};
pub use reconcile::{reconcile, ReconcileStats, Reconciler};
pub use transport::EntityFetcher;
