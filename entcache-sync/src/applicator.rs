//! Notification applicator: the consumer end of the push relay.
//!
//! The relay only sends invalidation hints. Deletions are applied directly
//! to the identity map; inserts and updates trigger a targeted re-fetch
//! whose body goes through the normal read path, so local edits survive
//! and collections are reconciled.

use crate::codec::SyncCodec;
use crate::transport::EntityFetcher;
use crate::{CodecError, CodecResult};
use entcache_types::{EntityKey, NotificationItem, NotificationRecord};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What applying notifications did, per identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Re-fetched and merged.
    pub refreshed: Vec<EntityKey>,
    /// Removed from the identity map.
    pub removed: Vec<EntityKey>,
    /// Ignored: own writes, unknown types, deletions of uncached entities.
    pub skipped: Vec<EntityKey>,
    /// The server had no body for a re-fetched entity.
    pub missing: Vec<EntityKey>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.refreshed.is_empty()
            && self.removed.is_empty()
            && self.skipped.is_empty()
            && self.missing.is_empty()
    }

    fn absorb(&mut self, other: ApplyReport) {
        self.refreshed.extend(other.refreshed);
        self.removed.extend(other.removed);
        self.skipped.extend(other.skipped);
        self.missing.extend(other.missing);
    }
}

/// Applies push relay records to the cache.
pub struct NotificationApplicator {
    codec: Arc<SyncCodec>,
    fetcher: Arc<dyn EntityFetcher>,
    local_user: Option<EntityKey>,
}

impl NotificationApplicator {
    pub fn new(codec: Arc<SyncCodec>, fetcher: Arc<dyn EntityFetcher>) -> Self {
        Self {
            codec,
            fetcher,
            local_user: None,
        }
    }

    /// Identifies the local user so notifications about their own writes
    /// can be skipped.
    #[must_use]
    pub fn with_local_user(mut self, user: impl Into<EntityKey>) -> Self {
        self.local_user = Some(user.into());
        self
    }

    /// Applies a JSON array of records as delivered by the relay.
    pub async fn apply_json(&self, json: &str) -> CodecResult<ApplyReport> {
        let records: Vec<NotificationRecord> = serde_json::from_str(json)?;
        self.apply_batch(&records).await
    }

    pub async fn apply_batch(&self, records: &[NotificationRecord]) -> CodecResult<ApplyReport> {
        let mut report = ApplyReport::default();
        for record in records {
            report.absorb(self.apply(record).await?);
        }
        Ok(report)
    }

    /// Applies one record. Stops at the first transport or decode error.
    pub async fn apply(&self, record: &NotificationRecord) -> CodecResult<ApplyReport> {
        let mut report = ApplyReport::default();
        let Ok(descriptor) = self.codec.descriptor(&record.type_name) else {
            warn!("Ignoring notification for unknown type {}", record.type_name);
            report
                .skipped
                .extend(record.items.iter().map(|item| item.id.clone()));
            return Ok(report);
        };

        for item in &record.items {
            // Relay keys arrive untagged; re-read them with the type's key kind.
            let key = EntityKey::from_json(descriptor.key_kind(), &item.id.to_json())
                .unwrap_or_else(|_| item.id.clone());
            if self.is_own(item) {
                debug!("Skipping own {:?} of {} {}", item.diff, record.type_name, key);
                report.skipped.push(key);
                continue;
            }
            if item.diff.requires_fetch() {
                self.refresh(&record.type_name, key, &mut report).await?;
            } else {
                self.remove(&record.type_name, key, &mut report);
            }
        }

        info!(
            "Applied {} notification(s) for {}: {} refreshed, {} removed",
            record.items.len(),
            record.type_name,
            report.refreshed.len(),
            report.removed.len()
        );
        Ok(report)
    }

    fn is_own(&self, item: &NotificationItem) -> bool {
        self.codec.config().skip_own_notifications
            && self.local_user.is_some()
            && item.user == self.local_user
    }

    fn remove(&self, type_name: &str, key: EntityKey, report: &mut ApplyReport) {
        let cached = self
            .codec
            .provider()
            .identity_map(type_name)
            .and_then(|map| map.try_get(&key).map(|entity| (map, entity)));
        match cached {
            Some((map, entity)) if map.remove(&entity) => {
                debug!("Removed {} {} after server deletion", type_name, key);
                report.removed.push(key);
            }
            _ => report.skipped.push(key),
        }
    }

    async fn refresh(
        &self,
        type_name: &str,
        key: EntityKey,
        report: &mut ApplyReport,
    ) -> CodecResult<()> {
        let fetch = self.fetcher.fetch(type_name, &key);
        let Ok(fetched) = tokio::time::timeout(self.codec.config().fetch_timeout(), fetch).await else {
            warn!("Re-fetch of {} {} timed out", type_name, key);
            return Err(CodecError::Timeout);
        };
        let Some(body) = fetched? else {
            debug!("{} {} is gone on the server", type_name, key);
            report.missing.push(key);
            return Ok(());
        };
        self.codec.decode(type_name, &body)?;
        report.refreshed.push(key);
        Ok(())
    }
}
