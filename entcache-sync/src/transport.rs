//! Transport seam used by the notification applicator.
//!
//! The codec never talks to the network itself. Re-fetching an entity after
//! a push notification goes through an [`EntityFetcher`] supplied by the
//! host application (REST client, test double, ...).

use crate::CodecResult;
use async_trait::async_trait;
use entcache_types::EntityKey;

/// Fetches the current server payload of one entity.
#[async_trait]
pub trait EntityFetcher: Send + Sync {
    /// Returns the JSON body for the entity, or `None` if the server no
    /// longer has it.
    async fn fetch(&self, type_name: &str, key: &EntityKey) -> CodecResult<Option<String>>;
}

/// An in-memory fetcher for testing.
pub mod mock {
    use super::*;
    use crate::CodecError;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    type Slot = (String, EntityKey);

    /// Serves canned bodies and records every request.
    #[derive(Debug, Default)]
    pub struct MockFetcher {
        bodies: Mutex<HashMap<Slot, String>>,
        failing: Mutex<HashSet<Slot>>,
        requests: Mutex<Vec<Slot>>,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Sets the body served for an entity.
        pub fn insert(&self, type_name: &str, key: impl Into<EntityKey>, body: impl Into<String>) {
            self.bodies
                .lock()
                .insert((type_name.to_string(), key.into()), body.into());
        }

        /// Makes the server forget an entity.
        pub fn remove(&self, type_name: &str, key: impl Into<EntityKey>) {
            self.bodies.lock().remove(&(type_name.to_string(), key.into()));
        }

        /// Makes requests for an entity fail with a transport error.
        pub fn fail(&self, type_name: &str, key: impl Into<EntityKey>) {
            self.failing
                .lock()
                .insert((type_name.to_string(), key.into()));
        }

        /// Requests seen so far, in order.
        pub fn requests(&self) -> Vec<Slot> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl EntityFetcher for MockFetcher {
        async fn fetch(&self, type_name: &str, key: &EntityKey) -> CodecResult<Option<String>> {
            let slot = (type_name.to_string(), key.clone());
            self.requests.lock().push(slot.clone());
            if self.failing.lock().contains(&slot) {
                return Err(CodecError::Transport(format!("{type_name} {key} unavailable")));
            }
            Ok(self.bodies.lock().get(&slot).cloned())
        }
    }
}
