//! Push relay notification records.
//!
//! After a write the server broadcasts compact invalidation hints. A record
//! names one entity type and lists the identities that changed; it never
//! carries the entity payload itself, so consumers re-fetch what they need.
//!
//! Wire shape (PascalCase, as emitted by the relay):
//!
//! ```json
//! {"Type":"Order","Items":[{"Id":42,"Diff":"Update","User":7}]}
//! ```

use crate::EntityKey;
use serde::{Deserialize, Serialize};

/// The kind of change a notification item reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffKind {
    /// The entity was created.
    Insert,
    /// The entity was modified.
    Update,
    /// The entity was deleted.
    Delete,
}

impl DiffKind {
    /// True when the consumer should re-fetch the entity.
    #[must_use]
    pub const fn requires_fetch(self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }
}

/// A single invalidation hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationItem {
    /// Identity of the changed entity.
    pub id: EntityKey,
    /// What happened to it.
    pub diff: DiffKind,
    /// The user whose write caused the change, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<EntityKey>,
}

impl NotificationItem {
    /// Creates an item without an originating user.
    #[must_use]
    pub fn new(id: impl Into<EntityKey>, diff: DiffKind) -> Self {
        Self {
            id: id.into(),
            diff,
            user: None,
        }
    }

    /// Sets the originating user.
    #[must_use]
    pub fn by_user(mut self, user: impl Into<EntityKey>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// A batch of invalidation hints for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationRecord {
    /// Entity type name as registered in the type registry.
    #[serde(rename = "Type")]
    pub type_name: String,
    /// Changed identities, in server order.
    #[serde(default)]
    pub items: Vec<NotificationItem>,
}

impl NotificationRecord {
    /// Creates an empty record for a type.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            items: Vec::new(),
        }
    }

    /// Appends an item.
    #[must_use]
    pub fn with_item(mut self, item: NotificationItem) -> Self {
        self.items.push(item);
        self
    }

    /// Parses a batch of records as delivered by the relay.
    pub fn parse_batch(json: &str) -> crate::Result<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }
}
