//! Centralized default constants for calbus.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers; every `*Config::default()` is built from them.

// =============================================================================
// CHANGE CONSUMER
// =============================================================================

/// Default number of attempts the change consumer makes per message.
pub const CHANGES_RETRY_LIMIT: u32 = 5;

/// Bounded join window granted to the consumer task on shutdown.
pub const CONSUMER_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Capacity of the consumer lifecycle event broadcast channel.
pub const CONSUMER_EVENT_CAPACITY: usize = 64;

// =============================================================================
// SHARING-INFO CACHE
// =============================================================================

/// Maximum number of collection paths held by the sharing-info cache.
pub const SHARING_CACHE_CAPACITY: usize = 100;

/// Time-to-live of a resolved sharing-info entry, in seconds (3 minutes).
pub const SHARING_CACHE_TTL_SECS: u64 = 180;

/// Upper bound on entries dropped by one overflow sweep.
pub const SHARING_CACHE_EVICT_BATCH: usize = 500;

/// System-wide "notify on change" default, used when a sharee has no
/// per-collection preference and the directory stores no override.
pub const NOTIFY_CHANGES_DEFAULT: bool = true;

// =============================================================================
// CHANNEL TRANSPORT
// =============================================================================

/// Default per-channel broadcast capacity for the in-process transport.
pub const CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Prefix of the encoding key for resource-change notifications.
pub const RESOURCE_CHANGE_KEY_PREFIX: &str = "resource-change:";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_defaults_are_sane() {
        assert!(SHARING_CACHE_CAPACITY > 0);
        assert!(SHARING_CACHE_TTL_SECS > 0);
        assert!(SHARING_CACHE_EVICT_BATCH > 0);
    }

    #[test]
    fn test_retry_limit_allows_at_least_one_attempt() {
        assert!(CHANGES_RETRY_LIMIT >= 1);
    }
}
