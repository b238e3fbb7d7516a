//! Seams to the external collaborators of the notification pipeline.
//!
//! The data-access facade is split in two: [`CalendarDirectory`] opens a
//! transactional [`DirectorySession`], and every merge attempt runs inside
//! exactly one session that is either committed or rolled back. The channel
//! transport is consumed through [`ChannelTransport`] and
//! [`ChannelSubscription`]. Consumers of the changes channel dispatch to
//! [`ChangeHandler`] implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::{Channel, ChannelMessage, Delivery};
use crate::error::Result;
use crate::events::SysEvent;
use crate::notifications::{ResourceChangeNotification, StoredNotification};
use crate::process::ProcessResult;
use crate::sharing::canonical_account;
use crate::taxonomy::SysCode;

// =============================================================================
// DIRECTORY (DATA-ACCESS FACADE)
// =============================================================================

/// Response state of a sharing invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Declined,
}

/// One sharing invitation on a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    /// Raw sharee reference as stored (mailto URI, principal href, ...).
    pub sharee: String,
    pub status: InviteStatus,
}

impl Invite {
    pub fn accepted(sharee: impl Into<String>) -> Self {
        Self {
            sharee: sharee.into(),
            status: InviteStatus::Accepted,
        }
    }

    pub fn pending(sharee: impl Into<String>) -> Self {
        Self {
            sharee: sharee.into(),
            status: InviteStatus::Pending,
        }
    }
}

/// A collection as seen by the notification pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub path: String,
    pub owner: String,
    /// Value of the collection's "shared" property.
    pub shared: bool,
    pub invites: Vec<Invite>,
}

/// One transactional unit of work against the calendar store.
///
/// Notification store operations act on the store of the principal on top of
/// the context stack; calling them with an empty stack is an error.
#[async_trait]
pub trait DirectorySession: Send {
    /// Act as `principal` until the matching [`pop_principal`](Self::pop_principal).
    fn push_principal(&mut self, principal: &str) -> Result<()>;

    /// Restore the previous principal context.
    fn pop_principal(&mut self);

    /// Principal currently acted as, if any.
    fn current_principal(&self) -> Option<&str>;

    /// Turn a raw sharee reference into a canonical recipient identity.
    fn normalize_principal(&self, raw: &str) -> Option<String> {
        canonical_account(raw)
    }

    /// Look up a collection by path.
    async fn collection(&mut self, path: &str) -> Result<Option<CollectionInfo>>;

    /// Per-collection "notify on change" preference of `principal`, if set.
    async fn notify_preference(&mut self, principal: &str, path: &str) -> Result<Option<bool>>;

    /// System-wide "notify on change" default.
    async fn default_notify_preference(&mut self) -> Result<bool>;

    /// Find the current principal's notification with this encoding key.
    async fn find_notification(&mut self, encoding_key: &str)
        -> Result<Option<StoredNotification>>;

    /// Add a notification to the current principal's store.
    async fn add_notification(
        &mut self,
        notification: &ResourceChangeNotification,
    ) -> Result<StoredNotification>;

    /// Replace a stored notification. Fails with `StaleState` if its version moved.
    async fn update_notification(&mut self, stored: &StoredNotification) -> Result<()>;

    /// Remove a stored notification. Fails with `StaleState` if its version moved.
    async fn remove_notification(&mut self, stored: &StoredNotification) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Factory for directory sessions.
#[async_trait]
pub trait CalendarDirectory: Send + Sync {
    /// Begin a new transactional session.
    async fn begin(&self) -> Result<Box<dyn DirectorySession>>;
}

// =============================================================================
// CHANNEL TRANSPORT
// =============================================================================

/// Publish/subscribe primitives of the durable channel transport.
pub trait ChannelTransport: Send + Sync {
    /// Publish one message to one channel. Synchronous; never retried here.
    fn publish(&self, channel: Channel, message: &ChannelMessage) -> Result<()>;

    /// Open a subscription on a channel.
    fn subscribe(&self, channel: Channel) -> Result<Box<dyn ChannelSubscription>>;
}

/// A stream of deliveries from one channel.
#[async_trait]
pub trait ChannelSubscription: Send {
    /// Wait for the next delivery. `None` once the channel is closed.
    async fn recv(&mut self) -> Option<Delivery>;

    /// Acknowledge a delivery so the transport will not redeliver it.
    async fn ack(&mut self, delivery: &Delivery) -> Result<()>;
}

// =============================================================================
// CHANGE HANDLERS
// =============================================================================

/// Business logic invoked by the change consumer for one attempt.
///
/// Implementations report every outcome through [`ProcessResult`]; they never
/// signal retry through errors.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    /// Event codes this handler is registered for.
    fn codes(&self) -> Vec<SysCode>;

    /// Process one change event.
    async fn handle(&self, event: &SysEvent) -> ProcessResult;
}

#[async_trait]
impl<T: ChangeHandler + ?Sized> ChangeHandler for std::sync::Arc<T> {
    fn codes(&self) -> Vec<SysCode> {
        (**self).codes()
    }

    async fn handle(&self, event: &SysEvent) -> ProcessResult {
        (**self).handle(event).await
    }
}
