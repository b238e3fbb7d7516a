//! Notification merge engine.
//!
//! Turns one change event into per-recipient notification records. Every
//! attempt runs inside a single directory session that is committed on
//! success and rolled back on any error; a stale-version signal anywhere
//! aborts the whole attempt so the consumer can retry it from scratch.
//! Re-running an attempt against the current stored state converges on the
//! same result, so partially applied attempts are never replayed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use calbus_core::{
    logging, parent_path, CalendarDirectory, ChangeHandler, DirectorySession, ProcessResult,
    ResourceChangeNotification, Result, SysCode, SysEvent,
};

use crate::acting::ActingAs;
use crate::payload::{derive_notification, was_shared};
use crate::rules::{merge, MergeAction};
use crate::sharing_cache::SharingCache;

/// Change handler that folds change events into sharee notification stores.
pub struct NotificationMerger {
    directory: Arc<dyn CalendarDirectory>,
    cache: SharingCache,
}

impl NotificationMerger {
    pub fn new(directory: Arc<dyn CalendarDirectory>, cache: SharingCache) -> Self {
        Self { directory, cache }
    }

    pub fn cache(&self) -> &SharingCache {
        &self.cache
    }

    /// Process one change event.
    pub async fn process(&self, event: &SysEvent) -> ProcessResult {
        if !event.code.is_notifiable() {
            return ProcessResult::Ignored;
        }

        let Some(change) = event.change.as_ref() else {
            return ProcessResult::Ignored;
        };
        let (Some(owner), Some(href)) = (change.owner.as_deref(), change.href.as_deref()) else {
            return ProcessResult::Ignored;
        };

        if !was_shared(event) {
            return ProcessResult::Ignored;
        }

        if event.code.is_collection_ref() {
            // No collection-level fan-out. Sharing of the collection may
            // have changed, so drop what we know about it.
            self.cache.invalidate(href);
            if let Some(old_href) = change.old_href.as_deref() {
                self.cache.invalidate(old_href);
            }
            debug!(
                subsystem = logging::SUBSYSTEM_NOTIFY,
                component = logging::COMPONENT_MERGE,
                syscode = %event.code,
                href,
                "Collection-level notifications are not produced"
            );
            return ProcessResult::FailedNoRetry;
        }

        let Some(notification) = derive_notification(event) else {
            return ProcessResult::Processed;
        };

        let Some(collection) = parent_path(&notification.href) else {
            warn!(
                subsystem = logging::SUBSYSTEM_NOTIFY,
                component = logging::COMPONENT_MERGE,
                syscode = %event.code,
                href = %notification.href,
                "Change href has no containing collection"
            );
            return ProcessResult::FailedNoRetry;
        };

        match self
            .run(&change.principal, owner, collection, &notification)
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_stale() => {
                debug!(
                    subsystem = logging::SUBSYSTEM_NOTIFY,
                    component = logging::COMPONENT_MERGE,
                    syscode = %event.code,
                    href = %notification.href,
                    error = %e,
                    "Stale state while merging notifications"
                );
                ProcessResult::StaleState
            }
            Err(e) => {
                warn!(
                    subsystem = logging::SUBSYSTEM_NOTIFY,
                    component = logging::COMPONENT_MERGE,
                    syscode = %event.code,
                    href = %notification.href,
                    error = %e,
                    "Failed to merge notifications"
                );
                ProcessResult::Failed
            }
        }
    }

    /// One transactional attempt.
    async fn run(
        &self,
        actor: &str,
        owner: &str,
        collection: &str,
        notification: &ResourceChangeNotification,
    ) -> Result<ProcessResult> {
        let mut session = self.directory.begin().await?;

        let outcome = self
            .merge_into_recipients(session.as_mut(), actor, owner, collection, notification)
            .await;

        match outcome {
            Ok(result) => {
                session.commit().await?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(
                        subsystem = logging::SUBSYSTEM_NOTIFY,
                        component = logging::COMPONENT_MERGE,
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn merge_into_recipients(
        &self,
        session: &mut dyn DirectorySession,
        actor: &str,
        owner: &str,
        collection: &str,
        notification: &ResourceChangeNotification,
    ) -> Result<ProcessResult> {
        let sharing = {
            let mut as_owner = ActingAs::new(&mut *session, owner)?;
            self.cache.resolve(&mut *as_owner, collection).await?
        };

        if !sharing.has_recipients() {
            return Ok(ProcessResult::Processed);
        }

        let actor = session
            .normalize_principal(actor)
            .unwrap_or_else(|| actor.to_string());
        let key = notification.encoding_key();
        let mut mutated = 0usize;

        for recipient in &sharing.enabled_recipients {
            if *recipient == actor {
                continue;
            }

            let mut as_recipient = ActingAs::new(&mut *session, recipient)?;
            let stored = as_recipient.find_notification(&key).await?;
            let outcome = merge(stored, notification);

            trace!(
                subsystem = logging::SUBSYSTEM_NOTIFY,
                component = logging::COMPONENT_MERGE,
                recipient = %recipient,
                href = %notification.href,
                case = outcome.case.as_str(),
                "Merging notification"
            );

            if outcome.action.mutates() {
                mutated += 1;
            }
            match outcome.action {
                MergeAction::Insert(n) => {
                    as_recipient.add_notification(&n).await?;
                }
                MergeAction::Update(stored) => as_recipient.update_notification(&stored).await?,
                MergeAction::Remove(stored) => as_recipient.remove_notification(&stored).await?,
                MergeAction::Discard => {}
            }
        }

        debug!(
            subsystem = logging::SUBSYSTEM_NOTIFY,
            component = logging::COMPONENT_MERGE,
            href = %notification.href,
            recipients = sharing.enabled_recipients.len(),
            mutated,
            "Merged notification into recipient stores"
        );

        Ok(if mutated > 0 {
            ProcessResult::Processed
        } else {
            ProcessResult::Ignored
        })
    }
}

#[async_trait]
impl ChangeHandler for NotificationMerger {
    fn codes(&self) -> Vec<SysCode> {
        SysCode::ALL
            .into_iter()
            .filter(|code| code.is_notifiable())
            .collect()
    }

    async fn handle(&self, event: &SysEvent) -> ProcessResult {
        self.process(event).await
    }
}

impl std::fmt::Debug for NotificationMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationMerger")
            .field("cache_entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}
