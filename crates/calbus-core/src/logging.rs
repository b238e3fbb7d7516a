//! Structured logging schema for calbus.
//!
//! Every log line carries `subsystem` and `component` fields whose values
//! come from the constants below, so log aggregation can filter the bus,
//! the notification engine and the consumer independently.
//!
//! ## Field Names
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `subsystem` | One of the `SUBSYSTEM_*` values |
//! | `component` | One of the `COMPONENT_*` values |
//! | `syscode` | Event code of a system event |
//! | `channel` | Logical channel name |
//! | `href` | Href affected by a change event |
//! | `recipient` | Notification recipient |
//! | `attempt` | One-based attempt number in the consumer retry loop |
//! | `result` | Process result of an attempt |
//! | `duration_ms` | Wall-clock duration in milliseconds |
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue (retry, failed channel publish) |
//! | INFO  | Lifecycle events (startup, shutdown) |
//! | DEBUG | Decision points (routing plan, merge case) |
//! | TRACE | Per-recipient iteration |

// ─── Subsystems ────────────────────────────────────────────────────────────

/// Event router and channel transport.
pub const SUBSYSTEM_BUS: &str = "bus";

/// Notification merge engine and sharing cache.
pub const SUBSYSTEM_NOTIFY: &str = "notify";

/// Change consumer.
pub const SUBSYSTEM_JOBS: &str = "jobs";

/// Directory implementations.
pub const SUBSYSTEM_DB: &str = "db";

// ─── Components ────────────────────────────────────────────────────────────

pub const COMPONENT_ROUTER: &str = "router";
pub const COMPONENT_TRANSPORT: &str = "transport";
pub const COMPONENT_MERGE: &str = "merge";
pub const COMPONENT_SHARING_CACHE: &str = "sharing_cache";
pub const COMPONENT_CONSUMER: &str = "consumer";
pub const COMPONENT_DIRECTORY: &str = "directory";
