use thiserror::Error;

use crate::metrics::MetricType;

/// Errors raised synchronously to the caller.
///
/// Only programmer errors end up here. Platform gaps (unsupported entry
/// types, missing visibility support, host failures) are absorbed and show
/// up as the absence of a result instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UxmError {
    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    #[error("Invalid entry type: {0}")]
    InvalidEntryType(String),

    #[error("Invalid score input: {0}")]
    InvalidScoreInput(String),

    #[error("Speed score needs at least one metric value")]
    EmptyScoreInput,

    #[error("No rank known for metric: {0}")]
    UnknownRank(MetricType),

    #[error("Invalid trace: {0}")]
    InvalidTrace(String),
}

/// A failure reported by the host performance API (for example a measure
/// that references a mark which was never created).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("host call failed: {0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
