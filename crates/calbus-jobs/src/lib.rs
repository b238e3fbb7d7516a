//! # calbus-jobs
//!
//! The change consumer for calbus.
//!
//! This crate provides:
//! - A single dedicated worker draining the `changes` channel one message at a time
//! - A bounded retry loop driven by [`ProcessResult`] values
//! - Operational counters and lifecycle notifications via broadcast channels
//! - A registry mapping event codes to change handlers
//!
//! ## Example
//!
//! ```ignore
//! use calbus_jobs::{ConsumerBuilder, ConsumerConfig};
//!
//! let consumer = ConsumerBuilder::new(transport)
//!     .with_config(ConsumerConfig::from_env())
//!     .with_handler(merger)
//!     .build();
//!
//! let mut handle = consumer.start()?;
//!
//! // Listen for events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! handle.stop().await?;
//! println!("{}", handle.stats());
//! ```

pub mod consumer;
pub mod handler;

// Re-export core types
pub use calbus_core::*;

pub use consumer::{
    ChangeConsumer, ChangeStats, ConsumerBuilder, ConsumerConfig, ConsumerEvent, ConsumerHandle,
};
pub use handler::HandlerRegistry;
