//! Resource-change notifications delivered to sharees.
//!
//! A notification describes exactly one of three mutually exclusive change
//! states for a resource: it was created, it was deleted, or it accumulated a
//! list of updates. Notifications are keyed by their encoding key; a
//! recipient holds at most one stored notification per key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults::RESOURCE_CHANGE_KEY_PREFIX;

/// One property-level update to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDelta {
    /// Principal that made the update.
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    /// Names of the changed properties (e.g. `SUMMARY`, `DTSTART`).
    #[serde(default)]
    pub properties: Vec<String>,
    /// Recurrence instance the update applies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_id: Option<String>,
}

impl UpdateDelta {
    pub fn new(changed_by: impl Into<String>, properties: &[&str]) -> Self {
        Self {
            changed_by: changed_by.into(),
            changed_at: Utc::now(),
            properties: properties.iter().map(|p| p.to_string()).collect(),
            recurrence_id: None,
        }
    }

    pub fn for_instance(mut self, recurrence_id: impl Into<String>) -> Self {
        self.recurrence_id = Some(recurrence_id.into());
        self
    }
}

/// Who caused a creation or deletion, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMarker {
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

impl ChangeMarker {
    pub fn new(changed_by: impl Into<String>) -> Self {
        Self {
            changed_by: changed_by.into(),
            changed_at: Utc::now(),
        }
    }
}

/// The change state of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResourceChange {
    Created(ChangeMarker),
    Deleted(ChangeMarker),
    Updated { updates: Vec<UpdateDelta> },
}

impl ResourceChange {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ResourceChange::Created(_) => ChangeKind::Created,
            ResourceChange::Deleted(_) => ChangeKind::Deleted,
            ResourceChange::Updated { .. } => ChangeKind::Updated,
        }
    }
}

/// Discriminant of [`ResourceChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Deleted,
    Updated,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Updated => "updated",
        }
    }
}

/// A resource-change notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChangeNotification {
    /// Href of the changed resource.
    pub href: String,
    pub change: ResourceChange,
}

impl ResourceChangeNotification {
    pub fn created(href: impl Into<String>, changed_by: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            change: ResourceChange::Created(ChangeMarker::new(changed_by)),
        }
    }

    pub fn deleted(href: impl Into<String>, changed_by: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            change: ResourceChange::Deleted(ChangeMarker::new(changed_by)),
        }
    }

    pub fn updated(href: impl Into<String>, updates: Vec<UpdateDelta>) -> Self {
        Self {
            href: href.into(),
            change: ResourceChange::Updated { updates },
        }
    }

    /// Key identifying the logical notification this payload belongs to.
    ///
    /// Creation, deletion and update payloads for the same href share a key.
    pub fn encoding_key(&self) -> String {
        format!("{}{}", RESOURCE_CHANGE_KEY_PREFIX, self.href)
    }

    pub fn kind(&self) -> ChangeKind {
        self.change.kind()
    }

    /// Update deltas, empty for creations and deletions.
    pub fn updates(&self) -> &[UpdateDelta] {
        match &self.change {
            ResourceChange::Updated { updates } => updates,
            _ => &[],
        }
    }
}

/// A notification as held in a recipient's store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNotification {
    /// Store-assigned name of the record.
    pub name: String,
    pub encoding_key: String,
    /// Optimistic-concurrency version, bumped on every write.
    pub version: i64,
    pub notification: ResourceChangeNotification,
}

impl StoredNotification {
    pub fn kind(&self) -> ChangeKind {
        self.notification.kind()
    }
}
