//! Error taxonomy and classification.
//!
//! Every failure the core can observe is reduced to an [`ErrorKind`]. Remote
//! calls report an [`ApiError`] that is already classified by the
//! [`ResourceApi`](crate::api::ResourceApi) implementation; the reconciler
//! wraps it into a [`ReconcileError`] that carries the resource context a user
//! needs to act on it.

use crate::capability::Verb;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classified kind of a reconciliation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Resource type is not registered in the capability table
    UnknownResourceType,
    /// Identifier or payload could not be decoded
    Malformed,
    /// Verb is not in the resource's capability set
    Unsupported,
    /// Remote object does not exist
    NotFound,
    /// Remote rejected the change (e.g. immutable field)
    Conflict,
    /// Credentials rejected
    Unauthorized,
    /// Network failure, timeout or cancellation
    Transport,
}

impl ErrorKind {
    /// Whether a caller may retry the same pass unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport)
    }

    /// Whether this kind aborts the reconciliation call.
    ///
    /// Unsupported operations are downgraded to drift items instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }

    /// Short user-facing name.
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnknownResourceType => "unknown resource type",
            Self::Malformed => "malformed identifier or payload",
            Self::Unsupported => "unsupported operation",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::Transport => "transport failure",
        }
    }

    /// Actionable advice for this kind.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::UnknownResourceType => "Check the resource type name against the supported types",
            Self::Malformed => "Check the identifier format for this resource type",
            Self::Unsupported => "The remote API cannot do this; remediate manually",
            Self::NotFound => "The remote object no longer exists",
            Self::Conflict => "The remote rejected the change; it may require replacement",
            Self::Unauthorized => "Check the management token and its permissions",
            Self::Transport => "Check connectivity and retry",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Map an HTTP status code onto the taxonomy.
///
/// Returns `None` for success codes.
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        200..=399 => None,
        404 | 410 => Some(ErrorKind::NotFound),
        401 | 403 => Some(ErrorKind::Unauthorized),
        409 | 422 => Some(ErrorKind::Conflict),
        408 | 429 | 500..=599 => Some(ErrorKind::Transport),
        _ => Some(ErrorKind::Malformed),
    }
}

/// A classified error reported by a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = classify_status(status).unwrap_or(ErrorKind::Malformed);
        let body = body.trim();
        if body.is_empty() {
            Self::new(kind, format!("HTTP {status}"))
        } else {
            Self::new(kind, format!("HTTP {status}: {body}"))
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

/// Error surfaced to the caller of the reconciler.
///
/// Always names the resource type, the external identifier (or
/// `not yet assigned` before creation) and the classified kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{kind} for {resource_type} {}: {message}",
    .external_id.as_deref().unwrap_or("(not yet assigned)")
)]
pub struct ReconcileError {
    pub kind: ErrorKind,
    pub resource_type: String,
    pub external_id: Option<String>,
    /// Verb that was being executed, when the failure came from a remote call
    pub verb: Option<Verb>,
    pub message: String,
}

impl ReconcileError {
    pub fn new(
        kind: ErrorKind,
        resource_type: impl Into<String>,
        external_id: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            resource_type: resource_type.into(),
            external_id: external_id.map(str::to_string),
            verb: None,
            message: message.into(),
        }
    }

    pub fn unknown_type(resource_type: &str) -> Self {
        Self::new(
            ErrorKind::UnknownResourceType,
            resource_type,
            None,
            format!("'{resource_type}' is not a registered resource type"),
        )
    }

    pub fn malformed_id(resource_type: &str, external_id: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Malformed,
            resource_type,
            Some(external_id),
            message,
        )
    }

    /// Attach resource context to a remote failure.
    pub fn from_api(
        err: ApiError,
        verb: Verb,
        resource_type: &str,
        external_id: Option<&str>,
    ) -> Self {
        Self {
            kind: err.kind,
            resource_type: resource_type.to_string(),
            external_id: external_id.map(str::to_string),
            verb: Some(verb),
            message: format!("{verb} failed: {}", err.message),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Result type for reconciler entry points.
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(204), None);
        assert_eq!(classify_status(404), Some(ErrorKind::NotFound));
        assert_eq!(classify_status(401), Some(ErrorKind::Unauthorized));
        assert_eq!(classify_status(403), Some(ErrorKind::Unauthorized));
        assert_eq!(classify_status(409), Some(ErrorKind::Conflict));
        assert_eq!(classify_status(422), Some(ErrorKind::Conflict));
        assert_eq!(classify_status(503), Some(ErrorKind::Transport));
        assert_eq!(classify_status(429), Some(ErrorKind::Transport));
        assert_eq!(classify_status(400), Some(ErrorKind::Malformed));
    }

    #[test]
    fn test_from_status_keeps_body() {
        let err = ApiError::from_status(404, " {\"error\":\"Invitation not found\"} ");
        assert!(err.is_not_found());
        assert_eq!(err.message, "HTTP 404: {\"error\":\"Invitation not found\"}");

        let err = ApiError::from_status(502, "");
        assert_eq!(err.kind, ErrorKind::Transport);
        assert_eq!(err.message, "HTTP 502");
    }

    #[test]
    fn test_kind_flags() {
        assert!(ErrorKind::Transport.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
        assert!(!ErrorKind::Unsupported.is_fatal());
        assert!(ErrorKind::NotFound.is_fatal());
    }

    #[test]
    fn test_display_without_id() {
        let err = ReconcileError::unknown_type("widget");
        assert_eq!(
            err.to_string(),
            "unknown resource type for widget (not yet assigned): 'widget' is not a registered resource type"
        );
    }

    #[test]
    fn test_display_with_id_and_verb() {
        let err = ReconcileError::from_api(
            ApiError::transport("connection reset"),
            Verb::Update,
            "maintainer",
            Some("42"),
        );
        assert_eq!(err.verb, Some(Verb::Update));
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "transport failure for maintainer 42: update failed: connection reset"
        );
    }
}
