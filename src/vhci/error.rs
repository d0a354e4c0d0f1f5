//! The error type shared by all controller operations.

use thiserror::Error;

/// Errors returned by registry and controller operations.
///
/// All operations are synchronous and report their result inline; none
/// of these conditions is fatal. [`VhciError::Timeout`] is not a
/// failure at all: it is the normal signal that a bounded fetch found
/// no work before its deadline and the caller should retry.
///
/// Cancellation is deliberately absent here. A transfer that resolves
/// via cancellation is surfaced to the host side as a completion with a
/// cancellation outcome, not as an error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VhciError {
    /// A malformed descriptor or a size mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The controller id or transfer handle is unknown.
    #[error("unknown controller or transfer handle")]
    NotFound,

    /// The operation collides with one that is still in progress.
    #[error("busy: {0}")]
    Busy(&'static str),

    /// An allocation request that cannot be satisfied.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// The fetch deadline elapsed without work becoming available.
    #[error("no work available before the deadline")]
    Timeout,
}
