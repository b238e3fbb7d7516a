//! # calbus-core
//!
//! Core types, traits, and abstractions for the calbus event pipeline.
//!
//! This crate holds the event taxonomy, the system event and notification
//! models, and the trait seams to the external calendar store and channel
//! transport that the other calbus crates build on.

pub mod channels;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod notifications;
pub mod process;
pub mod sharing;
pub mod taxonomy;
pub mod traits;

// Re-export commonly used types at crate root
pub use channels::{Channel, ChannelMessage, Delivery};
pub use error::{Error, Result};
pub use events::{parent_path, ChangeInfo, ScheduleTarget, SysEvent};
pub use notifications::{
    ChangeKind, ChangeMarker, ResourceChange, ResourceChangeNotification, StoredNotification,
    UpdateDelta,
};
pub use process::ProcessResult;
pub use sharing::{canonical_account, SharingInfo};
pub use taxonomy::{CodeInfo, Privilege, Severity, SysCode};
pub use traits::*;
