//! Error taxonomy for the security pipeline.
//!
//! Failures from identity resolution are never swallowed: they reach the
//! auth-failure handler exactly once, which dispatches on the root cause.
//! `Clone` is required because a memoized authentication outcome is observed
//! by every consumer of the request.

use thiserror::Error;

/// Errors raised by identity resolution, authorization and method-level checks.
#[derive(Debug, Clone, Error)]
pub enum SecurityError {
    /// Bad or missing credentials. Triggers a challenge.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// The credential exchange mechanically failed. Terminal 401, no challenge.
    #[error("authentication completion failed: {reason}")]
    AuthenticationCompletionFailed { reason: String },

    /// The caller must be redirected to complete authentication.
    #[error("authentication redirect ({status}) to {location}")]
    AuthenticationRedirect { status: u16, location: String },

    /// Identity resolved but lacks a required role or permission.
    #[error("authorization denied: {reason}")]
    AuthorizationDenied { reason: String },

    /// A blocking identity operation was attempted where only non-blocking
    /// execution is permitted.
    #[error("blocking operation not allowed: {reason}")]
    BlockingNotAllowed { reason: String },

    /// Several authentication mechanisms failed; the first cause is canonical.
    #[error("multiple security failures ({})", .0.len())]
    Composite(Vec<SecurityError>),

    /// Internal fault, not a caller error.
    #[error("internal security error: {reason}")]
    Internal { reason: String },
}

impl SecurityError {
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed { reason: reason.into() }
    }

    pub fn completion_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationCompletionFailed { reason: reason.into() }
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self::AuthenticationRedirect {
            status,
            location: location.into(),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self::AuthorizationDenied { reason: reason.into() }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal { reason: reason.into() }
    }

    /// Unwrap nested composite failures down to the first concrete cause.
    #[must_use]
    pub fn root_cause(&self) -> &SecurityError {
        let mut cause = self;
        while let SecurityError::Composite(causes) = cause {
            match causes.first() {
                Some(first) => cause = first,
                None => break,
            }
        }
        cause
    }

    /// Whether this failure (after unwrapping) represents missing or bad
    /// credentials, i.e. a challenge should be sent.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self.root_cause(), SecurityError::AuthenticationFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_composites() {
        let inner = SecurityError::authentication_failed("bad credentials");
        let wrapped = SecurityError::Composite(vec![
            SecurityError::Composite(vec![inner, SecurityError::internal("secondary")]),
            SecurityError::internal("ignored"),
        ]);

        match wrapped.root_cause() {
            SecurityError::AuthenticationFailed { reason } => {
                assert_eq!(reason, "bad credentials");
            }
            other => panic!("unexpected root cause: {other}"),
        }
        assert!(wrapped.is_authentication_failure());
    }

    #[test]
    fn empty_composite_is_its_own_root() {
        let empty = SecurityError::Composite(Vec::new());
        assert!(matches!(empty.root_cause(), SecurityError::Composite(_)));
    }
}
