//! Error types for the worker pool.
//!
//! This module defines the central `Error` enum, which captures the
//! recoverable and reportable error cases of a pool run. Failures of
//! individual jobs are *not* errors at this level: they travel inside each
//! [`JobResult`](crate::JobResult) as a [`Failure`](crate::Failure).
//!
//! ## Error Cases
//! - `InvalidConfig`: a [`PoolConfig`](crate::PoolConfig) failed validation.
//! - `AlreadyClosed`: the dispatch queue was closed twice via `try_close`.
//! - `Cancelled`: a cancellable operation observed its token.
//! - `ChannelError`: an internal communication failure between tasks.
//! - `CoordinatorLost`: the lifecycle coordinator vanished without reporting.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for pool construction and lifecycle operations.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The pool configuration was rejected.
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// The dispatch queue had already been closed.
    #[error("Dispatch queue already closed")]
    AlreadyClosed,

    /// The operation was abandoned because cancellation was requested.
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal channel send/receive failure (e.g., the receiver was dropped).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The coordinator task ended without reporting how the run completed.
    #[error("Lifecycle coordinator dropped before reporting completion")]
    CoordinatorLost,
}
