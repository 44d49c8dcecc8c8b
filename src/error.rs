//! Error taxonomy for the collection and alerting pipeline
//!
//! Every error here is local to one unit of work (one collector run, one rule
//! evaluation, one notification attempt, one operator action). Storage
//! failures live in [`crate::storage::error`].

use std::fmt;
use std::time::Duration;

use crate::storage::StorageError;

/// A collector run did not produce usable data
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionError {
    /// The collector reported a failure
    Failed(String),

    /// The collector returned data the store cannot accept
    InvalidData(String),

    /// The run exceeded its deadline
    Timeout(Duration),

    /// The collector panicked
    Panicked(String),

    /// No implementation is registered for the collector kind, or the
    /// registration config was rejected
    Build(String),

    /// The run was cancelled by scheduler shutdown
    Cancelled,
}

impl CollectionError {
    pub fn failed(msg: impl Into<String>) -> Self {
        CollectionError::Failed(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CollectionError::Timeout(_))
    }
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::Failed(msg) => write!(f, "collection failed: {}", msg),
            CollectionError::InvalidData(msg) => write!(f, "invalid collector data: {}", msg),
            CollectionError::Timeout(after) => {
                write!(f, "collection timed out after {}ms", after.as_millis())
            }
            CollectionError::Panicked(msg) => write!(f, "collector panicked: {}", msg),
            CollectionError::Build(msg) => write!(f, "cannot build collector: {}", msg),
            CollectionError::Cancelled => write!(f, "collection cancelled"),
        }
    }
}

impl std::error::Error for CollectionError {}

impl From<anyhow::Error> for CollectionError {
    fn from(err: anyhow::Error) -> Self {
        CollectionError::Failed(format!("{:#}", err))
    }
}

/// A rule could not be evaluated for one resource during a sweep
#[derive(Debug, Clone, PartialEq)]
pub enum RuleEvaluationError {
    /// The resource has no stored value for a metric the condition needs
    MissingMetric { resource_id: String, metric: String },

    /// The stored value cannot be compared against the threshold
    TypeMismatch {
        metric: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The comparison is not defined for the threshold type (e.g. `gt true`)
    UnsupportedOperator { metric: String, op: String },

    /// A group condition has no children
    EmptyGroup,

    /// The rule requires history but none was provided
    MissingHistory { metric: String },
}

impl fmt::Display for RuleEvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleEvaluationError::MissingMetric {
                resource_id,
                metric,
            } => write!(f, "no value for metric '{}' on '{}'", metric, resource_id),
            RuleEvaluationError::TypeMismatch {
                metric,
                expected,
                found,
            } => write!(
                f,
                "metric '{}' is {} but threshold expects {}",
                metric, found, expected
            ),
            RuleEvaluationError::UnsupportedOperator { metric, op } => {
                write!(f, "operator '{}' not supported for metric '{}'", op, metric)
            }
            RuleEvaluationError::EmptyGroup => write!(f, "group condition has no children"),
            RuleEvaluationError::MissingHistory { metric } => {
                write!(f, "grace requires history for metric '{}'", metric)
            }
        }
    }
}

impl std::error::Error for RuleEvaluationError {}

/// One delivery attempt through one channel failed
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationError {
    /// The transport rejected or failed the send
    Delivery(String),

    /// The transport did not answer within the delivery timeout
    Timeout(Duration),

    /// The rule references a channel that is not configured
    UnknownChannel(String),
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationError::Delivery(msg) => write!(f, "delivery failed: {}", msg),
            NotificationError::Timeout(after) => {
                write!(f, "delivery timed out after {}ms", after.as_millis())
            }
            NotificationError::UnknownChannel(id) => write!(f, "unknown channel: {}", id),
        }
    }
}

impl std::error::Error for NotificationError {}

/// Registry lookups and updates
#[derive(Debug)]
pub enum RegistryError {
    NotFound(String),
    Storage(StorageError),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound(id) => write!(f, "collector not found: {}", id),
            RegistryError::Storage(err) => write!(f, "registry storage error: {}", err),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        RegistryError::Storage(err)
    }
}

/// Operator actions on alerts and rules
#[derive(Debug)]
pub enum AlertError {
    NotFound(i64),

    RuleNotFound(String),

    /// The requested transition is not allowed from the current status
    InvalidTransition { alert_id: i64, from: String, action: &'static str },

    InvalidRequest(String),

    Storage(StorageError),
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::NotFound(id) => write!(f, "alert not found: {}", id),
            AlertError::RuleNotFound(id) => write!(f, "alert rule not found: {}", id),
            AlertError::InvalidTransition {
                alert_id,
                from,
                action,
            } => write!(f, "cannot {} alert {} in status {}", action, alert_id, from),
            AlertError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            AlertError::Storage(err) => write!(f, "alert storage error: {}", err),
        }
    }
}

impl std::error::Error for AlertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AlertError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for AlertError {
    fn from(err: StorageError) -> Self {
        AlertError::Storage(err)
    }
}
