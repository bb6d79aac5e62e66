//! Domain error model.

use thiserror::Error;

use crate::id::BatchId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive quantity, unknown medicine).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A batch referenced by an allocation no longer exists. Fatal to the
    /// call; logged for investigation rather than retried.
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    /// Retrying against a fresh snapshot is sensible.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Requested quantity exceeds the available non-expired stock. Retrying
    /// only helps after restock.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// An order status change was attempted that the lifecycle does not
    /// permit from the current state. Fatal to the call; the order is
    /// left unchanged.
    #[error("invalid transition: cannot {action} an order that is {from}")]
    InvalidTransition { from: String, action: String },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn batch_not_found(batch_id: BatchId) -> Self {
        Self::BatchNotFound(batch_id)
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn invalid_transition(from: impl Into<String>, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            action: action.into(),
        }
    }

    /// Whether an immediate retry against a fresh snapshot can succeed.
    ///
    /// Only concurrency conflicts qualify; everything else needs external
    /// action (restock, workflow correction) or is permanently invalid.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
