//! # calbus-bus
//!
//! Fan-out of system events onto named channels.
//!
//! This crate provides:
//! - [`EventRouter`]: classifies one event and publishes it, synchronously
//!   on the caller's thread, to every channel it belongs on
//! - [`LocalTransport`]: an in-process [`ChannelTransport`] built on tokio
//!   broadcast channels, used by the server binary and by tests
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use calbus_bus::{EventRouter, LocalTransport, TransportConfig};
//! use calbus_core::{Channel, SysCode, SysEvent};
//!
//! let transport = Arc::new(LocalTransport::new(TransportConfig::default()));
//! let mut changes = transport.subscribe(Channel::Changes)?;
//!
//! let router = EventRouter::new(transport.clone());
//! router.publish(SysEvent::new(SysCode::ServiceStarted))?;
//! ```

pub mod router;
pub mod transport;

// Re-export core types
pub use calbus_core::*;

pub use router::EventRouter;
pub use transport::{LocalTransport, TransportConfig};
