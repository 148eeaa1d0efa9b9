//! Error types for the file store and the HTTP handlers.

use std::io;
use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Failure of a [`FileStore`](crate::FileStore) operation.
///
/// A missing resource is not an error: store lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid resource name {0:?}")]
    InvalidName(String),
    #[error("upload stream failed: {0}")]
    Upload(#[source] io::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }
}

/// Errors surfaced by the request handlers. Implements [`IntoResponse`].
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("malformed upload: {0}")]
    Multipart(#[from] multer::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Store(StoreError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            AppError::Store(StoreError::Upload(e)) if is_size_limit(e) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Store(StoreError::Upload(_)) => StatusCode::BAD_REQUEST,
            AppError::Store(StoreError::Io { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Multipart(
                multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. },
            ) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Multipart(_) => StatusCode::BAD_REQUEST,
        }
    }
}

// upload streams carry multer errors wrapped in io::Error
fn is_size_limit(e: &io::Error) -> bool {
    matches!(
        e.get_ref().and_then(|inner| inner.downcast_ref::<multer::Error>()),
        Some(multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. })
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self);
            return (status, "internal storage error").into_response();
        }
        (status, self.to_string()).into_response()
    }
}
