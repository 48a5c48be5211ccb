//! Error types for cutover orchestration.
//!
//! Errors are categorized so the step executor can decide what to retry
//! and the scheduler can decide between rollback and terminal failure.

use thiserror::Error;

/// Categories of orchestration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad plan shape, rejected before any state exists
    Validation,
    /// Action attempted on a gated or terminal plan
    Approval,
    /// Transient adapter failure (retryable)
    Provider,
    /// Adapter refused the action outright
    Rejected,
    /// Adapter call did not answer in time (retryable)
    Timeout,
    /// Health gate window expired
    HealthCheck,
    /// Caller-initiated stop
    Cancelled,
    /// Everything else
    Other,
}

impl ErrorCategory {
    /// Whether this error category is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider | Self::Timeout)
    }

    /// Short label used in ledger details and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Approval => "approval",
            Self::Provider => "provider",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::HealthCheck => "health_check",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

/// Errors that can occur while compiling or running a cutover plan.
#[derive(Debug, Error)]
pub enum Error {
    /// The request is malformed; no plan was created
    #[error("invalid cutover request: {message}")]
    Validation {
        /// What is wrong with the request
        message: String,
    },

    /// The plan is gated or already finished
    #[error("approval required for plan {plan_id}: {reason}")]
    ApprovalRequired {
        /// Plan the signal was aimed at
        plan_id: String,
        /// Why the signal was refused
        reason: String,
    },

    /// Transient provider failure
    #[error("provider error on {resource_id}: {message}")]
    Provider {
        /// Resource the call targeted
        resource_id: String,
        /// Provider-reported message
        message: String,
    },

    /// Provider refused the action; retrying will not help
    #[error("provider rejected action on {resource_id}: {message}")]
    ProviderRejected {
        /// Resource the call targeted
        resource_id: String,
        /// Provider-reported message
        message: String,
    },

    /// Provider call timed out
    #[error("provider call timed out on {resource_id}")]
    Timeout {
        /// Resource the call targeted
        resource_id: String,
    },

    /// Health gate expired before every endpoint reported healthy
    #[error("health check timed out after {elapsed_ms}ms in phase {phase_index}: {unhealthy:?}")]
    HealthCheckTimeout {
        /// Phase being verified (0-indexed)
        phase_index: usize,
        /// Time spent polling
        elapsed_ms: u64,
        /// Steps still unhealthy at expiry
        unhealthy: Vec<String>,
    },

    /// The plan was cancelled by the caller
    #[error("plan {plan_id} cancelled")]
    Cancelled {
        /// Cancelled plan
        plan_id: String,
    },

    /// Unknown plan id
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    /// IO error (ledger journal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (parameters, journal)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a transient provider failure.
    pub fn provider(resource_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            resource_id: resource_id.into(),
            message: message.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation { .. } => ErrorCategory::Validation,
            Error::ApprovalRequired { .. } => ErrorCategory::Approval,
            Error::Provider { .. } => ErrorCategory::Provider,
            Error::ProviderRejected { .. } => ErrorCategory::Rejected,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::HealthCheckTimeout { .. } => ErrorCategory::HealthCheck,
            Error::Cancelled { .. } => ErrorCategory::Cancelled,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;
