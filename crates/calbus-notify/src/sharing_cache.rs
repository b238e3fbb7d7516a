//! Bounded, time-expiring cache of collection sharing state.
//!
//! Maps a collection path to its resolved [`SharingInfo`]. Each path owns an
//! async slot lock: concurrent resolvers of one path wait for a single
//! population, while resolvers of different paths never contend beyond the
//! brief map lookup. Expiry is checked on access; there is no background
//! sweeper.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use tracing::{debug, trace};

use calbus_core::defaults::{
    SHARING_CACHE_CAPACITY, SHARING_CACHE_EVICT_BATCH, SHARING_CACHE_TTL_SECS,
};
use calbus_core::{logging, DirectorySession, InviteStatus, Result, SharingInfo};

// =============================================================================
// CLOCK
// =============================================================================

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// Configuration for the sharing-info cache.
#[derive(Debug, Clone)]
pub struct SharingCacheConfig {
    /// Maximum number of cached collection paths.
    pub capacity: usize,
    /// Time-to-live of a resolved entry, in seconds.
    pub ttl_secs: u64,
    /// Maximum number of expired entries dropped by one overflow sweep.
    pub evict_batch: usize,
}

impl Default for SharingCacheConfig {
    fn default() -> Self {
        Self {
            capacity: SHARING_CACHE_CAPACITY,
            ttl_secs: SHARING_CACHE_TTL_SECS,
            evict_batch: SHARING_CACHE_EVICT_BATCH,
        }
    }
}

impl SharingCacheConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CALBUS_SHARING_CACHE_CAPACITY` | `100` | Max cached collection paths |
    /// | `CALBUS_SHARING_CACHE_TTL_SECS` | `180` | Entry time-to-live |
    /// | `CALBUS_SHARING_CACHE_EVICT_BATCH` | `500` | Max expired entries dropped per sweep |
    pub fn from_env() -> Self {
        let capacity = std::env::var("CALBUS_SHARING_CACHE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(SHARING_CACHE_CAPACITY)
            .max(1);

        let ttl_secs = std::env::var("CALBUS_SHARING_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(SHARING_CACHE_TTL_SECS);

        let evict_batch = std::env::var("CALBUS_SHARING_CACHE_EVICT_BATCH")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(SHARING_CACHE_EVICT_BATCH)
            .max(1);

        Self {
            capacity,
            ttl_secs,
            evict_batch,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_evict_batch(mut self, evict_batch: usize) -> Self {
        self.evict_batch = evict_batch.max(1);
        self
    }
}

// =============================================================================
// CACHE
// =============================================================================

#[derive(Debug, Clone)]
struct CachedSharing {
    info: SharingInfo,
    resolved_at: DateTime<Utc>,
    /// Slot epoch the entry was resolved under.
    epoch: u64,
}

/// Upper bound on the effective TTL (about a century).
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

/// Per-path cache slot.
///
/// Resolvers hold a clone of the slot `Arc` for as long as they use it, so a
/// strong count above one means the slot is busy and must stay in the map.
#[derive(Default)]
struct Slot {
    entry: tokio::sync::Mutex<Option<CachedSharing>>,
    /// Bumped on invalidation; entries from an older epoch are stale.
    epoch: AtomicU64,
}

/// Cache of [`SharingInfo`] keyed by collection path.
pub struct SharingCache {
    config: SharingCacheConfig,
    clock: Arc<dyn Clock>,
    slots: Mutex<LruCache<String, Arc<Slot>>>,
    resolutions: AtomicU64,
}

impl SharingCache {
    pub fn new(config: SharingCacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SharingCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            // Capacity is enforced in `slot`, which never evicts busy slots.
            slots: Mutex::new(LruCache::unbounded()),
            resolutions: AtomicU64::new(0),
        }
    }

    /// Sharing state of `path`, resolving through `session` on miss or expiry.
    ///
    /// The session should be acting as the collection owner.
    pub async fn resolve(
        &self,
        session: &mut dyn DirectorySession,
        path: &str,
    ) -> Result<SharingInfo> {
        let path = cache_key(path);
        let slot = self.slot(path);
        let mut entry = slot.entry.lock().await;
        let epoch = slot.epoch.load(Ordering::Acquire);

        if let Some(cached) = entry.as_ref() {
            if cached.epoch == epoch && !self.is_expired(cached) {
                trace!(
                    subsystem = logging::SUBSYSTEM_NOTIFY,
                    component = logging::COMPONENT_SHARING_CACHE,
                    path,
                    "Sharing cache hit"
                );
                return Ok(cached.info.clone());
            }
        }

        let info = self.load(session, path).await?;
        *entry = Some(CachedSharing {
            info: info.clone(),
            resolved_at: self.clock.now(),
            epoch,
        });
        Ok(info)
    }

    /// Drop the cached entry for `path`, if any.
    ///
    /// A slot that is being resolved stays in place but is marked stale, so
    /// the value loaded by the in-flight resolver is not served afterwards.
    pub fn invalidate(&self, path: &str) {
        let path = cache_key(path);
        let mut slots = self.lock_slots();
        let Some(busy) = slots.peek(path).map(|slot| {
            slot.epoch.fetch_add(1, Ordering::AcqRel);
            is_busy(slot)
        }) else {
            return;
        };

        if !busy {
            slots.pop(path);
        }
        debug!(
            subsystem = logging::SUBSYSTEM_NOTIFY,
            component = logging::COMPONENT_SHARING_CACHE,
            path,
            busy,
            "Sharing cache entry invalidated"
        );
    }

    /// Drop every entry. Busy slots are marked stale instead.
    pub fn clear(&self) {
        let mut slots = self.lock_slots();
        let idle: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| {
                slot.epoch.fetch_add(1, Ordering::AcqRel);
                !is_busy(slot)
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in &idle {
            slots.pop(path);
        }
    }

    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of resolutions performed against the directory.
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &SharingCacheConfig {
        &self.config
    }

    fn capacity(&self) -> usize {
        self.config.capacity.max(1)
    }

    fn lock_slots(&self) -> MutexGuard<'_, LruCache<String, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, cached: &CachedSharing) -> bool {
        let ttl = Duration::seconds(self.config.ttl_secs.min(MAX_TTL_SECS) as i64);
        self.clock.now() - cached.resolved_at >= ttl
    }

    /// Whether an idle slot holds nothing worth keeping.
    fn is_reclaimable(&self, slot: &Slot) -> bool {
        match slot.entry.try_lock() {
            Ok(entry) => entry.as_ref().map_or(true, |cached| {
                cached.epoch != slot.epoch.load(Ordering::Acquire) || self.is_expired(cached)
            }),
            Err(_) => false,
        }
    }

    /// Slot for `path`, creating it if needed.
    ///
    /// When the map is full, expired entries are swept first and then the
    /// least recently used idle slots are evicted. If every slot is busy the
    /// map grows past capacity until resolvers finish.
    fn slot(&self, path: &str) -> Arc<Slot> {
        let mut slots = self.lock_slots();
        if let Some(slot) = slots.get(path) {
            return slot.clone();
        }

        let capacity = self.capacity();
        if slots.len() >= capacity {
            self.sweep_expired(&mut slots);
        }
        while slots.len() >= capacity {
            let Some(victim) = slots
                .iter()
                .rev()
                .find(|(_, slot)| !is_busy(slot))
                .map(|(path, _)| path.clone())
            else {
                trace!(
                    subsystem = logging::SUBSYSTEM_NOTIFY,
                    component = logging::COMPONENT_SHARING_CACHE,
                    entries = slots.len(),
                    capacity,
                    "All sharing cache slots busy, exceeding capacity"
                );
                break;
            };
            slots.pop(&victim);
        }

        let slot = Arc::new(Slot::default());
        slots.put(path.to_string(), slot.clone());
        slot
    }

    /// Drop expired idle entries, oldest first, up to the configured batch size.
    fn sweep_expired(&self, slots: &mut LruCache<String, Arc<Slot>>) {
        let expired: Vec<String> = slots
            .iter()
            .rev()
            .filter(|(_, slot)| !is_busy(slot) && self.is_reclaimable(slot))
            .take(self.config.evict_batch)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &expired {
            slots.pop(path);
        }

        if !expired.is_empty() {
            debug!(
                subsystem = logging::SUBSYSTEM_NOTIFY,
                component = logging::COMPONENT_SHARING_CACHE,
                evicted = expired.len(),
                "Swept expired sharing cache entries"
            );
        }
    }

    async fn load(&self, session: &mut dyn DirectorySession, path: &str) -> Result<SharingInfo> {
        self.resolutions.fetch_add(1, Ordering::Relaxed);

        let Some(collection) = session.collection(path).await? else {
            debug!(
                subsystem = logging::SUBSYSTEM_NOTIFY,
                component = logging::COMPONENT_SHARING_CACHE,
                path,
                "Collection not found, treating as unshared"
            );
            return Ok(SharingInfo::unshared());
        };

        if !collection.shared {
            return Ok(SharingInfo::unshared());
        }

        let default_enabled = session.default_notify_preference().await?;
        let mut recipients = BTreeSet::new();

        for invite in &collection.invites {
            if invite.status != InviteStatus::Accepted {
                continue;
            }
            let Some(sharee) = session.normalize_principal(&invite.sharee) else {
                debug!(
                    subsystem = logging::SUBSYSTEM_NOTIFY,
                    component = logging::COMPONENT_SHARING_CACHE,
                    path,
                    sharee = %invite.sharee,
                    "Skipping sharee with no canonical identity"
                );
                continue;
            };
            let enabled = session
                .notify_preference(&sharee, path)
                .await?
                .unwrap_or(default_enabled);
            if enabled {
                recipients.insert(sharee);
            }
        }

        let owner = session
            .normalize_principal(&collection.owner)
            .unwrap_or_else(|| collection.owner.clone());
        let owner_enabled = session
            .notify_preference(&owner, path)
            .await?
            .unwrap_or(default_enabled);
        if owner_enabled {
            recipients.insert(owner);
        }

        debug!(
            subsystem = logging::SUBSYSTEM_NOTIFY,
            component = logging::COMPONENT_SHARING_CACHE,
            path,
            recipients = recipients.len(),
            "Resolved sharing info"
        );

        Ok(SharingInfo {
            shared: true,
            enabled_recipients: recipients,
        })
    }
}

/// A slot is busy while any resolver holds a reference besides the map's.
fn is_busy(slot: &Arc<Slot>) -> bool {
    Arc::strong_count(slot) > 1
}

/// Collection paths are cached without a trailing slash.
fn cache_key(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => path,
        trimmed => trimmed,
    }
}
