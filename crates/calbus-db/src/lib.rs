//! # calbus-db
//!
//! Calendar directory implementations for calbus.
//!
//! This crate provides:
//! - [`MemoryDirectory`]: in-process, transactional, with fault injection for tests
//! - [`PgDirectory`]: PostgreSQL-backed, with optimistic record versioning
//! - Connection pool management
//!
//! ## Example
//!
//! ```rust,ignore
//! use calbus_db::{PgDirectory, PoolConfig};
//!
//! let url = "postgres://localhost/calbus";
//! let directory = PgDirectory::connect(url, PoolConfig::from_env()).await?;
//! directory.migrate().await?;
//! ```

pub mod memory;
pub mod pool;
pub mod postgres;

// Re-export core types
pub use calbus_core::*;

pub use memory::MemoryDirectory;
pub use pool::{create_pool, PoolConfig};
pub use postgres::{map_db_error, PgDirectory, DEFAULT_TEST_DATABASE_URL};
