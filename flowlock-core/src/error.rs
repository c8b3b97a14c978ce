use core::time::Duration;

use thiserror::Error;

use crate::flow::FlowId;

/// Potential errors raised by lock operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The wait for the lock expired before it was granted
    #[error("timed out after {0:?} waiting for the lock")]
    Timeout(Duration),
    /// The cancellation signal fired before the lock was granted
    #[error("lock acquisition was cancelled")]
    Cancelled,
    /// A release token was misused by the caller
    #[error("invalid release: {0}")]
    InvalidRelease(#[from] InvalidRelease),
}

impl LockError {
    /// Determine if the error was caused by an expired wait
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Determine if the error was caused by a cancellation signal
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Determine if the error indicates a bug in the caller rather than
    /// a transient condition
    pub const fn is_programmer_error(&self) -> bool {
        matches!(self, Self::InvalidRelease(_))
    }
}

/// The ways in which releasing a token may be rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidRelease {
    /// The token has already returned its permit
    #[error("the token was already released")]
    AlreadyReleased,
    /// The token was released from a flow other than the one it was issued to
    #[error("the token belongs to {owner} but was released from {current}")]
    WrongFlow {
        /// The flow which acquired the token
        owner: FlowId,
        /// The flow which attempted the release
        current: FlowId,
    },
}
