//! Error types shared by the runtime contract and the metric set

use thiserror::Error;

/// Failures of the container runtime collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime could not be reached; retried on the next tick or event
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// The workload vanished between listing and stats fetch
    #[error("workload not found: {0}")]
    WorkloadNotFound(String),
}

impl RuntimeError {
    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        Self::Unavailable(reason.to_string())
    }

    /// Whether this failure is expected churn rather than a runtime problem
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::WorkloadNotFound(_))
    }
}

/// Failures while building metric descriptors
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to create gauge `{name}`: {source}")]
    Gauge {
        name: String,
        #[source]
        source: prometheus::Error,
    },

    #[error("invalid label filter `{filter}`: {source}")]
    LabelFilter {
        filter: String,
        #[source]
        source: regex::Error,
    },
}
