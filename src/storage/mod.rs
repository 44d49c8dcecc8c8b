//! Persistence for the hub
//!
//! This module provides a trait-based abstraction over the store that holds
//! the collector registry, metric points, execution records, health rows and
//! alert state.
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database, WAL mode, sqlx migrations
//! - **In-Memory**: no persistence, for tests or ephemeral runs
//!
//! [`MetricStore`] wraps a backend with a short-lived read cache for latest
//! values and range summaries.
//!
//! ## Usage
//!
//! ```no_run
//! use hearth::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./hearth.db").await?;
//!     println!("{}", backend.get_stats().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{BackendHealth, BackendStats, MetricQuery, StorageBackend};
pub use cache::{DEFAULT_CACHE_TTL, MetricStore, MetricSummary};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{CollectorRegistration, ExecutionRecord, ExecutionStatus, NotificationLogEntry};
