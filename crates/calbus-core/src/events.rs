//! System events published by calendar subsystems.
//!
//! A [`SysEvent`] is created once by its producer, published once through the
//! router, and never mutated afterwards. Change events additionally carry a
//! [`ChangeInfo`] describing who changed what, and whether the affected
//! container was shared at the time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notifications::{ResourceChangeNotification, UpdateDelta};
use crate::taxonomy::SysCode;

/// Routing attribute names attached to every channel message.
pub mod attrs {
    pub const SYSCODE: &str = "syscode";
    pub const INDEXABLE: &str = "indexable";
    pub const CHANGE_EVENT: &str = "changeEvent";
    pub const INBOX: &str = "inbox";
    pub const OUTBOX: &str = "outbox";
    pub const SCHEDULE_EVENT: &str = "scheduleEvent";
    pub const MILLIS: &str = "millis";
}

/// Scheduling mailbox an event is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleTarget {
    Inbox,
    Outbox,
}

/// Details of a state change to a calendar entity or collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeInfo {
    /// Principal that performed the change.
    pub principal: String,
    /// Principal owning the affected resource.
    pub owner: Option<String>,
    /// Href of the affected resource (destination href for moves).
    pub href: Option<String>,
    /// Whether the containing collection was shared at the time of the change.
    pub shared: bool,
    /// Source href for move events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_href: Option<String>,
    /// Whether the source collection was shared, for move events.
    #[serde(default)]
    pub old_shared: bool,
    /// Property deltas carried by update events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<UpdateDelta>,
    /// Notification already built by the producer, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<ResourceChangeNotification>,
}

impl ChangeInfo {
    pub fn new(
        principal: impl Into<String>,
        owner: impl Into<String>,
        href: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            owner: Some(owner.into()),
            href: Some(href.into()),
            shared: false,
            old_href: None,
            old_shared: false,
            updates: Vec::new(),
            notification: None,
        }
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Mark this change as a move from `old_href`.
    pub fn moved_from(mut self, old_href: impl Into<String>, old_shared: bool) -> Self {
        self.old_href = Some(old_href.into());
        self.old_shared = old_shared;
        self
    }

    pub fn with_updates(mut self, updates: Vec<UpdateDelta>) -> Self {
        self.updates = updates;
        self
    }

    pub fn with_notification(mut self, notification: ResourceChangeNotification) -> Self {
        self.notification = Some(notification);
        self
    }
}

/// An immutable system event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysEvent {
    pub id: Uuid,
    pub code: SysCode,
    pub occurred_at: DateTime<Utc>,
    /// Free-form producer attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Duration carried by timing events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<ChangeInfo>,
}

impl SysEvent {
    /// Create a plain (non-change) event.
    pub fn new(code: SysCode) -> Self {
        Self {
            id: Uuid::now_v7(),
            code,
            occurred_at: Utc::now(),
            attributes: BTreeMap::new(),
            millis: None,
            schedule: None,
            change: None,
        }
    }

    /// Create a change event.
    pub fn change(code: SysCode, change: ChangeInfo) -> Self {
        Self {
            change: Some(change),
            ..Self::new(code)
        }
    }

    /// Create a timing event carrying a duration.
    pub fn timed(code: SysCode, millis: u64) -> Self {
        Self::new(code).with_millis(millis)
    }

    pub fn with_millis(mut self, millis: u64) -> Self {
        self.millis = Some(millis);
        self
    }

    pub fn with_schedule(mut self, target: ScheduleTarget) -> Self {
        self.schedule = Some(target);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_change_event(&self) -> bool {
        self.change.is_some()
    }

    pub fn is_schedule_event(&self) -> bool {
        self.code == SysCode::ScheduleUpdate
    }

    /// Attributes a producer attaches to the channel message for routing.
    pub fn routing_attributes(&self) -> BTreeMap<String, String> {
        let mut out = self.attributes.clone();
        out.insert(attrs::SYSCODE.to_string(), self.code.as_str().to_string());
        out.insert(
            attrs::INDEXABLE.to_string(),
            self.code.is_indexable().to_string(),
        );
        out.insert(
            attrs::CHANGE_EVENT.to_string(),
            self.is_change_event().to_string(),
        );
        out.insert(
            attrs::SCHEDULE_EVENT.to_string(),
            self.is_schedule_event().to_string(),
        );
        match self.schedule {
            Some(ScheduleTarget::Inbox) => {
                out.insert(attrs::INBOX.to_string(), "true".to_string());
            }
            Some(ScheduleTarget::Outbox) => {
                out.insert(attrs::OUTBOX.to_string(), "true".to_string());
            }
            None => {}
        }
        if let Some(millis) = self.millis {
            out.insert(attrs::MILLIS.to_string(), millis.to_string());
        }
        out
    }
}

/// Path of the collection containing `href`.
///
/// Returns `None` for hrefs without a parent segment.
pub fn parent_path(href: &str) -> Option<&str> {
    let trimmed = href.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}
