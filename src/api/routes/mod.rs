//! Route handlers, one module per resource

pub mod alerts;
pub mod collectors;
pub mod health;
pub mod metrics;
pub mod rules;
pub mod stats;
