//! Abstract remote Resource API
//!
//! The reconciler never talks HTTP. It is handed an implementation of
//! [`ResourceApi`] and a [`CancelToken`] per call; the implementation is
//! responsible for classifying every failure into an
//! [`ErrorKind`](crate::error::ErrorKind) before returning it.

use crate::error::ApiError;
use crate::id::ExternalId;
use crate::state::ObservedState;
use crate::value::Fields;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Result of a successful Create.
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    pub external_id: ExternalId,
    /// Everything the Create response returned, secret-once fields included
    pub fields: Fields,
}

/// Address of an existing remote object.
///
/// Carries the decoded identifier components and the last observed state so
/// that implementations can resolve parent-scoped routes (an invitation lives
/// under its project) or authenticate with a captured secret.
#[derive(Debug, Clone, Copy)]
pub struct RemoteRef<'a> {
    pub resource_type: &'a str,
    pub external_id: &'a ExternalId,
    pub components: &'a [String],
    pub observed: &'a ObservedState,
}

impl<'a> RemoteRef<'a> {
    pub fn new(
        external_id: &'a ExternalId,
        components: &'a [String],
        observed: &'a ObservedState,
    ) -> Self {
        Self {
            resource_type: &observed.resource_type,
            external_id,
            components,
            observed,
        }
    }

    /// First identifier component; the remote id for single-component ids.
    pub fn primary(&self) -> &str {
        self.components
            .first()
            .map_or_else(|| self.external_id.as_str(), String::as_str)
    }
}

/// Lifecycle verbs implemented by a remote API client.
pub trait ResourceApi: Send + Sync {
    fn create(
        &self,
        resource_type: &str,
        fields: &Fields,
        cancel: &CancelToken,
    ) -> Result<Created, ApiError>;

    /// Fetch the current remote fields. `NotFound` must be reported as
    /// [`ErrorKind::NotFound`](crate::error::ErrorKind::NotFound).
    fn read(&self, target: &RemoteRef<'_>, cancel: &CancelToken) -> Result<Fields, ApiError>;

    /// Apply changed fields. Returns whatever the remote echoed back, which
    /// may be empty.
    fn update(
        &self,
        target: &RemoteRef<'_>,
        changed: &Fields,
        cancel: &CancelToken,
    ) -> Result<Fields, ApiError>;

    fn delete(&self, target: &RemoteRef<'_>, cancel: &CancelToken) -> Result<(), ApiError>;
}

/// Cancellation flag with an optional deadline.
///
/// Clones share the flag, so cancelling one handle cancels every call using
/// any of its clones.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.is_expired()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail with a `Transport` error when cancelled or expired.
    pub fn check(&self) -> Result<(), ApiError> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(ApiError::transport("operation cancelled"))
        } else if self.is_expired() {
            Err(ApiError::transport("deadline exceeded"))
        } else {
            Ok(())
        }
    }

    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        let err = token.check().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transport);
        assert_eq!(err.message, "operation cancelled");
    }

    #[test]
    fn test_expired_deadline() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());
        assert_eq!(token.check().unwrap_err().message, "deadline exceeded");
        assert_eq!(token.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_no_deadline() {
        let token = CancelToken::new();
        assert_eq!(token.remaining(), None);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_remote_ref_primary() {
        let observed = ObservedState::absent("project-feature");
        let id = ExternalId::new("12:queuev2");
        let components = vec!["12".to_string(), "queuev2".to_string()];
        let target = RemoteRef::new(&id, &components, &observed);
        assert_eq!(target.primary(), "12");
        assert_eq!(target.resource_type, "project-feature");
    }
}
