//! Error types for the allocation engine.
//!
//! This module defines the central `Error` enum. The variants form a small,
//! closed set so that callers (the transport layer in particular) can decide
//! between "retry shortly" and "page an operator" without inspecting messages.
//!
//! ## Error Cases
//! - `Transient`: a cache-tier or durable-store call failed or timed out.
//! - `LockContended`: a cross-process lock is held by someone else.
//! - `Busy`: the refill segment did not arrive within the wait budget.
//! - `ServiceStopped`: the allocator is shutting down.
//! - `DataIntegrity`: the cache tier returned a malformed or inconsistent
//!   counter. Never retried automatically.
//! - `InvalidRequest`: the request violates an engine limit.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the allocation engine.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A storage call failed or exceeded its deadline.
    #[error("Transient failure: {context}")]
    Transient { context: String },

    /// The named lock is currently held by another holder.
    #[error("Lock contended: {key}")]
    LockContended { key: String },

    /// No replacement segment became available in time.
    #[error("Server busy: refill for {service} not ready")]
    Busy { service: String },

    /// The allocator has stopped handing out segments.
    #[error("Service stopped")]
    ServiceStopped,

    /// The cache tier returned data that cannot be trusted.
    #[error("Data integrity violation: {context}")]
    DataIntegrity { context: String },

    /// The request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl Error {
    pub fn transient(context: impl Into<String>) -> Self {
        Self::Transient {
            context: context.into(),
        }
    }

    pub fn data_integrity(context: impl Into<String>) -> Self {
        Self::DataIntegrity {
            context: context.into(),
        }
    }

    /// Whether the caller may retry the same operation after a short delay.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::LockContended { .. } | Self::Busy { .. }
        )
    }

    /// Whether this error needs operator attention rather than a retry.
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::DataIntegrity { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::transient(format!("durable store: {err}"))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::transient(format!("blocking task: {err}"))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        // Type errors mean the stored hash could not be parsed back into
        // integers; anything else is connectivity or server trouble.
        match err.kind() {
            redis::ErrorKind::TypeError => Self::data_integrity(format!("cache tier: {err}")),
            _ => Self::transient(format!("cache tier: {err}")),
        }
    }
}
