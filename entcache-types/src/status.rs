//! Entity lifecycle status.
//!
//! The status decides how an incoming payload is merged into an instance and
//! whether the instance contributes to an outgoing payload:
//!
//! ```text
//!   New ──(server confirms)──▶ Actual ◀──(decode done, clean)── Load
//!                               │  ▲                              ▲
//!              (local edit)     │  └──(resume)── Suspend ─────────┤
//!                               ▼                  (decode starts)│
//!                              Edit               Actual ─────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a cached entity instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    /// Created locally, never persisted. Every property counts as dirty.
    New,
    /// Persisted remotely, with unsent local edits.
    Edit,
    /// Being overwritten by an incoming payload (one decode pass).
    Load,
    /// Consistent with the last known server state.
    #[default]
    Actual,
    /// Temporarily excluded from outgoing synchronisation.
    Suspend,
}

impl LifecycleStatus {
    /// True for statuses a decode pass may move into [`Self::Load`].
    #[must_use]
    pub const fn is_refreshable(self) -> bool {
        matches!(self, Self::Actual | Self::Suspend)
    }

    /// True when the instance carries local changes that belong in an
    /// outgoing payload.
    #[must_use]
    pub const fn has_local_changes(self) -> bool {
        matches!(self, Self::New | Self::Edit)
    }

    /// Status after a local mutation of a change-tracked property.
    #[must_use]
    pub const fn after_local_edit(self) -> Self {
        match self {
            Self::New => Self::New,
            _ => Self::Edit,
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Edit => "edit",
            Self::Load => "load",
            Self::Actual => "actual",
            Self::Suspend => "suspend",
        };
        f.write_str(name)
    }
}
