//! Error types for checkout assignment

use crate::store::StoreError;

/// Result alias used throughout the assignment service.
pub type Result<T> = std::result::Result<T, SplitError>;

/// Failures surfaced by the assignment service.
///
/// Lock contention is deliberately absent: running out of lock attempts
/// routes the request through the fallback path instead of failing it.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    /// Missing store identifier or an unusable slot layout
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The plan selector is not one of the known plans
    #[error("invalid plan '{0}': expected 'annual' or 'monthly'")]
    InvalidPlan(String),
    /// The request body is not a checkout request object
    #[error("invalid request body: {0}")]
    InvalidRequest(String),
    /// Store failure with no lock held
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Failure while holding the lock; release was attempted before surfacing
    #[error("persistence error during assignment: {0}")]
    Persistence(String),
    /// Stored fields could not be read back as cycle state
    #[error("corrupt cycle state: {0}")]
    CorruptState(String),
}

impl SplitError {
    /// Short machine-readable category used in responses and the audit log.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::InvalidPlan(_) => "invalid_plan",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Store(_) => "store",
            Self::Persistence(_) => "persistence",
            Self::CorruptState(_) => "corrupt_state",
        }
    }

    /// Whether the caller sent a bad request, as opposed to a server-side fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidPlan(_) | Self::InvalidRequest(_))
    }
}
