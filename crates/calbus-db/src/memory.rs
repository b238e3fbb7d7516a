//! In-process calendar directory.
//!
//! Sessions read through to shared state and buffer their writes. Every write
//! records the version of the record it was based on; commit validates those
//! versions against the shared state and fails with `StaleState` without
//! applying anything if another session got there first.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::Uuid;

use calbus_core::defaults::NOTIFY_CHANGES_DEFAULT;
use calbus_core::{
    logging, CalendarDirectory, CollectionInfo, DirectorySession, Error, Invite,
    ResourceChangeNotification, Result, StoredNotification,
};

/// recipient -> encoding key -> record
type NotificationStores = HashMap<String, BTreeMap<String, StoredNotification>>;

#[derive(Debug)]
struct State {
    collections: HashMap<String, CollectionInfo>,
    preferences: HashMap<(String, String), bool>,
    default_notify: bool,
    notifications: NotificationStores,
}

impl Default for State {
    fn default() -> Self {
        Self {
            collections: HashMap::new(),
            preferences: HashMap::new(),
            default_notify: NOTIFY_CHANGES_DEFAULT,
            notifications: HashMap::new(),
        }
    }
}

impl State {
    fn notification(&self, recipient: &str, key: &str) -> Option<&StoredNotification> {
        self.notifications.get(recipient).and_then(|s| s.get(key))
    }
}

#[derive(Debug, Default)]
struct Counters {
    sessions: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    failing_commits: AtomicU32,
}

/// Calendar directory held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<State>>,
    counters: Arc<Counters>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.state)
    }

    /// Register or replace a collection.
    pub fn add_collection(&self, collection: CollectionInfo) {
        self.lock()
            .collections
            .insert(collection.path.clone(), collection);
    }

    /// Register a shared collection with accepted invites for `sharees`.
    pub fn share_collection(&self, path: &str, owner: &str, sharees: &[&str]) {
        self.add_collection(CollectionInfo {
            path: path.to_string(),
            owner: owner.to_string(),
            shared: true,
            invites: sharees.iter().map(|s| Invite::accepted(*s)).collect(),
        });
    }

    pub fn set_preference(&self, principal: &str, path: &str, notify_changes: bool) {
        self.lock()
            .preferences
            .insert((principal.to_string(), path.to_string()), notify_changes);
    }

    pub fn set_default_notify(&self, notify_changes: bool) {
        self.lock().default_notify = notify_changes;
    }

    /// Store a record directly, bypassing sessions.
    pub fn seed_notification(
        &self,
        recipient: &str,
        notification: ResourceChangeNotification,
    ) -> StoredNotification {
        let stored = new_record(notification);
        self.lock()
            .notifications
            .entry(recipient.to_string())
            .or_default()
            .insert(stored.encoding_key.clone(), stored.clone());
        stored
    }

    /// All records in a recipient's store, ordered by encoding key.
    pub fn notifications_for(&self, recipient: &str) -> Vec<StoredNotification> {
        self.lock()
            .notifications
            .get(recipient)
            .map(|store| store.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn notification(&self, recipient: &str, encoding_key: &str) -> Option<StoredNotification> {
        self.lock().notification(recipient, encoding_key).cloned()
    }

    /// Make the next `n` commits fail with `StaleState`.
    pub fn fail_next_commits(&self, n: u32) {
        self.counters.failing_commits.store(n, Ordering::SeqCst);
    }

    pub fn sessions_begun(&self) -> u64 {
        self.counters.sessions.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u64 {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarDirectory for MemoryDirectory {
    async fn begin(&self) -> Result<Box<dyn DirectorySession>> {
        self.counters.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
            counters: self.counters.clone(),
            principals: Vec::new(),
            pending: HashMap::new(),
        }))
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn new_record(notification: ResourceChangeNotification) -> StoredNotification {
    StoredNotification {
        name: format!("{}.json", Uuid::now_v7()),
        encoding_key: notification.encoding_key(),
        version: 1,
        notification,
    }
}

/// Buffered write to one (recipient, encoding key).
#[derive(Debug)]
struct PendingWrite {
    /// Version the write was based on; `None` when the record did not exist.
    base_version: Option<i64>,
    /// Record after the write; `None` when removed.
    record: Option<StoredNotification>,
}

struct MemorySession {
    state: Arc<Mutex<State>>,
    counters: Arc<Counters>,
    principals: Vec<String>,
    pending: HashMap<(String, String), PendingWrite>,
}

impl MemorySession {
    fn recipient(&self) -> Result<String> {
        self.principals
            .last()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("no principal context".into()))
    }

    /// Record as visible to this session, including its own buffered writes.
    fn visible(&self, recipient: &str, key: &str) -> Option<StoredNotification> {
        match self.pending.get(&(recipient.to_string(), key.to_string())) {
            Some(write) => write.record.clone(),
            None => lock_state(&self.state).notification(recipient, key).cloned(),
        }
    }

    fn write(&mut self, recipient: String, key: String, record: Option<StoredNotification>) {
        let base_version = match self.pending.get(&(recipient.clone(), key.clone())) {
            Some(existing) => existing.base_version,
            None => lock_state(&self.state)
                .notification(&recipient, &key)
                .map(|s| s.version),
        };
        self.pending.insert(
            (recipient, key),
            PendingWrite {
                base_version,
                record,
            },
        );
    }

    /// Check that `stored` is the version this session currently sees.
    fn expect_current(&self, recipient: &str, stored: &StoredNotification) -> Result<()> {
        match self.visible(recipient, &stored.encoding_key) {
            Some(current) if current.version == stored.version && current.name == stored.name => {
                Ok(())
            }
            _ => Err(Error::StaleState(format!(
                "notification {} for {} changed",
                stored.name, recipient
            ))),
        }
    }
}

#[async_trait]
impl DirectorySession for MemorySession {
    fn push_principal(&mut self, principal: &str) -> Result<()> {
        if principal.trim().is_empty() {
            return Err(Error::InvalidInput("empty principal".into()));
        }
        self.principals.push(principal.to_string());
        Ok(())
    }

    fn pop_principal(&mut self) {
        self.principals.pop();
    }

    fn current_principal(&self) -> Option<&str> {
        self.principals.last().map(String::as_str)
    }

    async fn collection(&mut self, path: &str) -> Result<Option<CollectionInfo>> {
        Ok(lock_state(&self.state).collections.get(path).cloned())
    }

    async fn notify_preference(&mut self, principal: &str, path: &str) -> Result<Option<bool>> {
        Ok(lock_state(&self.state)
            .preferences
            .get(&(principal.to_string(), path.to_string()))
            .copied())
    }

    async fn default_notify_preference(&mut self) -> Result<bool> {
        Ok(lock_state(&self.state).default_notify)
    }

    async fn find_notification(
        &mut self,
        encoding_key: &str,
    ) -> Result<Option<StoredNotification>> {
        let recipient = self.recipient()?;
        Ok(self.visible(&recipient, encoding_key))
    }

    async fn add_notification(
        &mut self,
        notification: &ResourceChangeNotification,
    ) -> Result<StoredNotification> {
        let recipient = self.recipient()?;
        let stored = new_record(notification.clone());
        if self.visible(&recipient, &stored.encoding_key).is_some() {
            return Err(Error::StaleState(format!(
                "notification {} already exists for {}",
                stored.encoding_key, recipient
            )));
        }
        self.write(recipient, stored.encoding_key.clone(), Some(stored.clone()));
        Ok(stored)
    }

    async fn update_notification(&mut self, stored: &StoredNotification) -> Result<()> {
        let recipient = self.recipient()?;
        self.expect_current(&recipient, stored)?;
        let mut next = stored.clone();
        next.version += 1;
        self.write(recipient, stored.encoding_key.clone(), Some(next));
        Ok(())
    }

    async fn remove_notification(&mut self, stored: &StoredNotification) -> Result<()> {
        let recipient = self.recipient()?;
        self.expect_current(&recipient, stored)?;
        self.write(recipient, stored.encoding_key.clone(), None);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemorySession {
            state,
            counters,
            pending,
            ..
        } = *self;

        let injected = counters
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(Error::StaleState("injected commit conflict".into()));
        }

        let mut shared = lock_state(&state);

        for ((recipient, key), write) in &pending {
            let current = shared.notification(recipient, key).map(|s| s.version);
            if current != write.base_version {
                debug!(
                    subsystem = logging::SUBSYSTEM_DB,
                    component = logging::COMPONENT_DIRECTORY,
                    recipient = %recipient,
                    encoding_key = %key,
                    "Commit conflict"
                );
                return Err(Error::StaleState(format!(
                    "notification {} for {} changed since read",
                    key, recipient
                )));
            }
        }

        let writes = pending.len();
        for ((recipient, key), write) in pending {
            let store = shared.notifications.entry(recipient).or_default();
            match write.record {
                Some(record) => {
                    store.insert(key, record);
                }
                None => {
                    store.remove(&key);
                }
            }
        }
        drop(shared);

        counters.commits.fetch_add(1, Ordering::SeqCst);
        trace!(
            subsystem = logging::SUBSYSTEM_DB,
            component = logging::COMPONENT_DIRECTORY,
            writes,
            "Session committed"
        );
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
