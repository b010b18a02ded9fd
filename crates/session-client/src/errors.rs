//! Session client error types.

use common::error::ErrorKind;
use thiserror::Error;

/// Outcome of a failed renewal.
///
/// `Clone` because one rotation failure is delivered to every queued caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The refresh credential was rejected by the auth service.
    #[error("refresh credential rejected")]
    InvalidRefresh,

    /// The rotation did not settle within the configured timeout.
    #[error("credential rotation timed out")]
    Timeout,

    /// No session is stored; the user has to log in.
    #[error("no active session")]
    Unauthenticated,

    /// The refresh endpoint could not be reached or answered unexpectedly.
    #[error("refresh transport error: {0}")]
    Transport(String),

    /// The coordinator task is gone.
    #[error("refresh coordinator stopped")]
    CoordinatorClosed,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RefreshError {
    /// Shared taxonomy kind, if this error belongs to it.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RefreshError::InvalidRefresh => Some(ErrorKind::InvalidRefresh),
            RefreshError::Timeout => Some(ErrorKind::Timeout),
            RefreshError::Unauthenticated => Some(ErrorKind::Unauthenticated),
            RefreshError::Transport(_)
            | RefreshError::CoordinatorClosed
            | RefreshError::Configuration(_) => None,
        }
    }

    /// Whether the caller must discard its session and log in again.
    #[must_use]
    pub fn requires_login(&self) -> bool {
        self.kind().is_some_and(ErrorKind::forces_reauthentication)
    }
}

/// Error surfaced by [`crate::interceptor::RequestInterceptor::execute`].
#[derive(Debug, Error)]
pub enum InterceptError<E> {
    /// The wrapped call failed. After a renewal this is the second attempt's
    /// error, returned as-is.
    #[error("call failed: {0}")]
    Call(E),

    /// Renewal failed, so the call was not replayed.
    #[error("renewal failed: {0}")]
    Refresh(#[from] RefreshError),
}

impl<E> InterceptError<E> {
    /// The call error, if the failure came from the call itself.
    pub fn into_call_error(self) -> Option<E> {
        match self {
            InterceptError::Call(e) => Some(e),
            InterceptError::Refresh(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            RefreshError::InvalidRefresh.kind(),
            Some(ErrorKind::InvalidRefresh)
        );
        assert_eq!(RefreshError::Timeout.kind(), Some(ErrorKind::Timeout));
        assert_eq!(RefreshError::Transport("x".into()).kind(), None);
    }

    #[test]
    fn test_requires_login() {
        assert!(RefreshError::InvalidRefresh.requires_login());
        assert!(RefreshError::Unauthenticated.requires_login());
        assert!(!RefreshError::Timeout.requires_login());
        assert!(!RefreshError::CoordinatorClosed.requires_login());
    }
}
