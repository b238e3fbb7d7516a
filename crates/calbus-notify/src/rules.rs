//! Merge rules for resource-change notifications.
//!
//! A recipient holds at most one notification per encoding key. [`merge`]
//! decides, from the stored record (if any) and the incoming payload, which
//! single store operation keeps that record coherent:
//!
//! | Stored   | Incoming | Result                                  |
//! |----------|----------|-----------------------------------------|
//! | none     | any      | insert incoming                         |
//! | any      | created  | overwrite with the creation             |
//! | created  | deleted  | remove the record                       |
//! | updated  | deleted  | overwrite with the deletion             |
//! | created  | updated  | discard incoming                        |
//! | deleted  | updated  | overwrite with the update list          |
//! | updated  | updated  | append deltas not already present       |
//! | deleted  | deleted  | discard incoming                        |
//!
//! The functions here do no I/O.

use calbus_core::{ChangeKind, ResourceChange, ResourceChangeNotification, StoredNotification};

/// Which merge rule applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeCase {
    /// No stored record; the payload is stored as is.
    NewRecord,
    /// A creation replaces whatever was stored.
    CreationOverwrites,
    /// Create followed by delete nets to nothing.
    CreateThenDelete,
    /// A deletion replaces pending updates.
    DeletionOverwritesUpdates,
    /// Updates to an item the recipient only knows as new are churn.
    UpdateAfterCreation,
    /// An update after a deletion replaces the deletion.
    UpdateAfterDeletion,
    /// Updates accumulate onto pending updates.
    UpdatesAccumulate,
    /// A repeated deletion changes nothing.
    DeleteAfterDelete,
}

impl MergeCase {
    /// Position in the merge case table, `None` for the repeated-deletion rule.
    pub fn number(self) -> Option<u8> {
        match self {
            MergeCase::NewRecord => Some(1),
            MergeCase::CreationOverwrites => Some(2),
            MergeCase::CreateThenDelete => Some(3),
            MergeCase::DeletionOverwritesUpdates => Some(4),
            MergeCase::UpdateAfterCreation => Some(5),
            MergeCase::UpdateAfterDeletion => Some(6),
            MergeCase::UpdatesAccumulate => Some(7),
            MergeCase::DeleteAfterDelete => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MergeCase::NewRecord => "new_record",
            MergeCase::CreationOverwrites => "creation_overwrites",
            MergeCase::CreateThenDelete => "create_then_delete",
            MergeCase::DeletionOverwritesUpdates => "deletion_overwrites_updates",
            MergeCase::UpdateAfterCreation => "update_after_creation",
            MergeCase::UpdateAfterDeletion => "update_after_deletion",
            MergeCase::UpdatesAccumulate => "updates_accumulate",
            MergeCase::DeleteAfterDelete => "delete_after_delete",
        }
    }
}

/// Store operation that applies a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAction {
    /// Add a new record holding this payload.
    Insert(ResourceChangeNotification),
    /// Write back the stored record with its new payload.
    Update(StoredNotification),
    /// Remove the stored record.
    Remove(StoredNotification),
    /// Leave the store untouched.
    Discard,
}

impl MergeAction {
    /// Whether applying this action changes the recipient's store.
    pub fn mutates(&self) -> bool {
        !matches!(self, MergeAction::Discard)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub case: MergeCase,
    pub action: MergeAction,
}

impl MergeOutcome {
    fn new(case: MergeCase, action: MergeAction) -> Self {
        Self { case, action }
    }
}

/// Fold `incoming` into the recipient's `stored` record for the same key.
pub fn merge(
    stored: Option<StoredNotification>,
    incoming: &ResourceChangeNotification,
) -> MergeOutcome {
    let Some(mut stored) = stored else {
        return MergeOutcome::new(MergeCase::NewRecord, MergeAction::Insert(incoming.clone()));
    };

    match (stored.kind(), incoming.kind()) {
        (_, ChangeKind::Created) => {
            stored.notification = incoming.clone();
            MergeOutcome::new(MergeCase::CreationOverwrites, MergeAction::Update(stored))
        }
        (ChangeKind::Created, ChangeKind::Deleted) => {
            MergeOutcome::new(MergeCase::CreateThenDelete, MergeAction::Remove(stored))
        }
        (ChangeKind::Updated, ChangeKind::Deleted) => {
            stored.notification = incoming.clone();
            MergeOutcome::new(
                MergeCase::DeletionOverwritesUpdates,
                MergeAction::Update(stored),
            )
        }
        (ChangeKind::Deleted, ChangeKind::Deleted) => {
            MergeOutcome::new(MergeCase::DeleteAfterDelete, MergeAction::Discard)
        }
        (ChangeKind::Created, ChangeKind::Updated) => {
            MergeOutcome::new(MergeCase::UpdateAfterCreation, MergeAction::Discard)
        }
        (ChangeKind::Deleted, ChangeKind::Updated) => {
            stored.notification = incoming.clone();
            MergeOutcome::new(MergeCase::UpdateAfterDeletion, MergeAction::Update(stored))
        }
        (ChangeKind::Updated, ChangeKind::Updated) => {
            let mut updates = stored.notification.updates().to_vec();
            let before = updates.len();
            for delta in incoming.updates() {
                // Redelivered deltas are already present.
                if !updates.contains(delta) {
                    updates.push(delta.clone());
                }
            }
            let action = if updates.len() == before {
                MergeAction::Discard
            } else {
                stored.notification.change = ResourceChange::Updated { updates };
                MergeAction::Update(stored)
            };
            MergeOutcome::new(MergeCase::UpdatesAccumulate, action)
        }
    }
}
