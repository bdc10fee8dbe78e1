//! Adapter boundary to the RAG pipeline.
//!
//! The executor only talks to the backend through [`RagClient`]; the HTTP
//! implementation lives in [`http`], tests plug in scripted clients.

pub mod http;
pub mod retry;

pub use http::HttpRagClient;
pub use retry::{RetryDecision, RetryPolicy};

use crate::core::operation::{OperationKind, Params};
use crate::core::step::{FailureKind, StepFailure};
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("bad request (HTTP {status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Repeating a rejected request cannot succeed; everything else may.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::BadRequest { .. })
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            RemoteError::Timeout(_) => FailureKind::Timeout,
            RemoteError::Unreachable(_) => FailureKind::Unreachable,
            RemoteError::BadRequest { .. } => FailureKind::BadRequest,
            RemoteError::ServerError { .. } => FailureKind::ServerError,
            RemoteError::InvalidResponse(_) => FailureKind::InvalidResponse,
        }
    }
}

impl From<RemoteError> for StepFailure {
    fn from(err: RemoteError) -> Self {
        StepFailure::new(err.kind(), err.to_string())
    }
}

/// Calls into the RAG pipeline.
///
/// Implementations must be cheap to share across tasks; the executor holds
/// one behind an `Arc` and calls it from many steps at once.
pub trait RagClient: Send + Sync {
    /// Invoke one operation with already-validated parameters.
    fn call<'a>(
        &'a self,
        operation: OperationKind,
        params: &'a Params,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Value, RemoteError>>;

    /// Single-query retrieval: the top `top_k` context snippets for `query`.
    fn fetch_context<'a>(
        &'a self,
        query: &'a str,
        top_k: usize,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Vec<String>, RemoteError>>;

    /// Cheap connectivity probe run before any work is scheduled.
    fn health_check(&self, timeout: Duration) -> BoxFuture<'_, Result<(), RemoteError>> {
        Box::pin(async move {
            self.fetch_context("__healthcheck__", 1, timeout)
                .await
                .map(|_| ())
        })
    }
}
