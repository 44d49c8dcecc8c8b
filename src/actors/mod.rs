//! Actor-based runtime of the hub
//!
//! Each actor runs as an independent async task and is driven through a
//! cloneable handle that sends commands over an mpsc channel. Replies come
//! back on `oneshot` channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌──────────────────┐
//!                    │  SchedulerActor  │ owns one worker per enabled collector
//!                    └────────┬─────────┘
//!                             │ spawns / refreshes
//!                ┌────────────┼────────────┐
//!        ┌───────▼───────┐    │    ┌───────▼───────┐
//!        │ CollectorActor│   ...   │ CollectorActor│
//!        └───────┬───────┘         └───────┬───────┘
//!                │ commit_run              │
//!                └────────────┬────────────┘
//!                    ┌────────▼─────────┐
//!                    │   MetricStore    │◄──── AlertActor (sweeps latest values)
//!                    └────────┬─────────┘           │ transitions
//!                             │                     ▼
//!                    ┌────────▼─────────┐     Dispatcher ──► channels
//!                    │   BroadcastHub   │◄──── alert_update
//!                    └──────────────────┘
//!                      metrics_update / execution_complete → stream clients
//!
//!        StorageActor: retention cleanup + stats, independent of the above
//! ```
//!
//! ## Actor Types
//!
//! - **SchedulerActor**: staggers start times and keeps workers in sync with the registry
//! - **CollectorActor**: runs one collector on its interval with timeout and overlap
//!   protection
//! - **AlertActor**: evaluates rules and drives the alert lifecycle; transitions go to
//!   the dispatcher
//! - **StorageActor**: applies the retention policy and reports backend statistics

pub mod alert;
pub mod collector;
pub mod messages;
pub mod scheduler;
pub mod storage;

pub use alert::{AlertDeps, AlertHandle};
pub use collector::{CollectorHandle, WorkerContext};
pub use messages::{CleanupReport, RefreshReport, ScheduledCollector, SweepReport};
pub use scheduler::{SchedulerDeps, SchedulerHandle};
pub use storage::StorageHandle;
