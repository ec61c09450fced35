//! Turns remote failures into canonical errors and guards every remote call
//! with the caller's cancellation signal and optional deadline.

use crate::{
    backends::ServiceType,
    errors::{ErrorKind, RemoteError, RemoteResult, Result, StorageError},
};
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-provider error normalizer.
#[derive(Clone, Copy, Debug)]
pub struct ErrorNormalizer {
    service: ServiceType,
}

impl ErrorNormalizer {
    pub fn new(service: ServiceType) -> Self {
        Self { service }
    }

    /// Canonical kind for a remote error.
    ///
    /// Priority: an already-canonical kind, then the provider's code table,
    /// then the protocol status, then `Unexpected`.
    pub fn classify(&self, err: &RemoteError) -> ErrorKind {
        if let Some(kind) = err.kind {
            return kind;
        }
        if let Some(kind) = err
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .and_then(|code| self.service.error_kind(code))
        {
            return kind;
        }
        match err.status {
            Some(404) => ErrorKind::NotExist,
            Some(403) => ErrorKind::PermissionDenied,
            _ => ErrorKind::Unexpected,
        }
    }

    pub fn normalize(&self, op: &'static str, path: &str, err: RemoteError) -> StorageError {
        let kind = self.classify(&err);
        debug!(op, path, %err, ?kind, "remote call failed");
        StorageError::from_remote(op, path, kind, err)
    }

    /// Await `fut` unless `cancel` fires or `timeout` elapses first.
    ///
    /// An interrupted call yields `Cancelled`; the future is dropped before
    /// it can report anything.
    pub async fn call<T, F>(
        &self,
        op: &'static str,
        path: &str,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = RemoteResult<T>>,
    {
        if cancel.is_cancelled() {
            return Err(StorageError::cancelled(op, path));
        }
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
                None => Some(fut.await),
            }
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = deadline => res,
        };
        match outcome {
            Some(Ok(v)) => Ok(v),
            Some(Err(err)) => Err(self.normalize(op, path, err)),
            None => {
                debug!(op, path, "remote call interrupted");
                Err(StorageError::cancelled(op, path))
            }
        }
    }
}
