//! Canonical error model shared by every provider.
//!
//! Remote calls fail with a [`RemoteError`] (status code, provider code,
//! message). The normalizer turns that into a [`StorageError`] carrying one
//! of the closed set of [`ErrorKind`]s, keeping the remote error as its source.

use std::fmt;
use thiserror::Error;

/// The closed, backend-independent set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    #[error("object not exist")]
    NotExist,
    #[error("permission denied")]
    PermissionDenied,
    #[error("segment already initiated")]
    DuplicateSegment,
    #[error("segment not initiated")]
    SegmentNotInitiated,
    #[error("part overlaps a recorded part")]
    OverlappingPart,
    #[error("segment parts do not cover the declared size")]
    IncompleteSegment,
    #[error("restriction dissatisfied")]
    RestrictionNotSatisfied,
    #[error("option unsupported")]
    UnsupportedOption,
    #[error("operation cancelled")]
    Cancelled,
    #[error("unexpected")]
    Unexpected,
}

/// Raw outcome of a failed remote call.
///
/// `kind` is set only by layers that already speak the canonical vocabulary
/// (for example an in-process backend); the normalizer passes it through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
    pub kind: Option<ErrorKind>,
}

impl RemoteError {
    /// Error with both a protocol status and a provider error code.
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: Some(code.into()),
            message: message.into(),
            kind: None,
        }
    }

    /// Error that only carries a protocol status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
            kind: None,
        }
    }

    /// Transport-level failure with neither status nor provider code.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            kind: None,
        }
    }

    /// Error already classified by a lower layer.
    pub fn canonical(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            kind: Some(kind),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.code.as_deref()) {
            (Some(status), Some(code)) => write!(f, "[{} {}] {}", status, code, self.message),
            (Some(status), None) => write!(f, "[{}] {}", status, self.message),
            (None, Some(code)) => write!(f, "[{}] {}", code, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The single error type returned by every public operation.
#[derive(Debug, Error)]
#[error("{op} `{path}`: {kind}{}", detail_suffix(.detail))]
pub struct StorageError {
    op: &'static str,
    path: String,
    kind: ErrorKind,
    detail: String,
    #[source]
    remote: Option<RemoteError>,
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {}", detail)
    }
}

impl StorageError {
    /// Local precondition failure with no remote cause.
    pub fn new(
        op: &'static str,
        path: impl Into<String>,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            op,
            path: path.into(),
            kind,
            detail: detail.into(),
            remote: None,
        }
    }

    /// Failure produced from a remote error.
    pub fn from_remote(
        op: &'static str,
        path: impl Into<String>,
        kind: ErrorKind,
        remote: RemoteError,
    ) -> Self {
        Self {
            op,
            path: path.into(),
            kind,
            detail: String::new(),
            remote: Some(remote),
        }
    }

    pub fn cancelled(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(op, path, ErrorKind::Cancelled, "")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// Original remote error, kept for diagnostics.
    pub fn remote(&self) -> Option<&RemoteError> {
        self.remote.as_ref()
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_includes_op_path_and_kind() {
        let err = StorageError::new("init_segment", "a/b", ErrorKind::DuplicateSegment, "");
        assert_eq!(err.to_string(), "init_segment `a/b`: segment already initiated");

        let err = StorageError::new(
            "write",
            "big",
            ErrorKind::RestrictionNotSatisfied,
            "size 10 exceeds maximum 5",
        );
        assert_eq!(
            err.to_string(),
            "write `big`: restriction dissatisfied: size 10 exceeds maximum 5"
        );
    }

    #[test]
    fn remote_cause_is_the_source() {
        let remote = RemoteError::new(500, "InternalError", "boom");
        let err = StorageError::from_remote("stat", "x", ErrorKind::Unexpected, remote.clone());
        assert_eq!(err.remote(), Some(&remote));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("[500 InternalError] boom"));
    }
}
