//! # calbus-notify
//!
//! Turns change events into per-recipient notification records.
//!
//! This crate provides:
//! - The pure merge rules that fold an incoming change into a stored record
//! - A bounded, time-expiring cache of collection sharing state
//! - A scoped "act as principal" guard over a directory session
//! - [`NotificationMerger`], the change handler driving all of the above
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use calbus_notify::{NotificationMerger, SharingCache, SharingCacheConfig};
//! use calbus_db::MemoryDirectory;
//!
//! let directory = Arc::new(MemoryDirectory::new());
//! let cache = SharingCache::new(SharingCacheConfig::from_env());
//! let merger = NotificationMerger::new(directory, cache);
//!
//! let result = merger.process(&event).await;
//! ```

pub mod acting;
pub mod merge;
pub mod payload;
pub mod rules;
pub mod sharing_cache;

pub use calbus_core::*;

pub use acting::ActingAs;
pub use merge::NotificationMerger;
pub use payload::{derive_notification, was_shared};
pub use rules::{merge, MergeAction, MergeCase, MergeOutcome};
pub use sharing_cache::{Clock, ManualClock, SharingCache, SharingCacheConfig, SystemClock};
