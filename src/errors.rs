use crate::{
    dav::{self, lock::LockError, xml::XmlError},
    services::object_store::StorageError,
};
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
///
/// Rendered as a plain-text reason; a few statuses carry the headers DAV
/// clients expect alongside them.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    /// 405; the response lists the supported methods.
    pub fn method_not_allowed(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, msg)
    }

    /// 409, used when a parent collection is missing.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }

    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::PRECONDITION_FAILED, msg)
    }

    pub fn locked(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::LOCKED, msg)
    }

    /// 428, for LOCK bodies missing required parts.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::PRECONDITION_REQUIRED, msg)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.message).into_response();
        let headers = response.headers_mut();
        match self.status {
            StatusCode::METHOD_NOT_ALLOWED => {
                headers.insert(header::ALLOW, dav::allow_header());
                headers.insert(dav::DAV, HeaderValue::from_static(dav::DAV_CLASS));
            }
            StatusCode::UNAUTHORIZED => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"webdav\""),
                );
            }
            _ => {}
        }
        response
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidObjectKey(_) | StorageError::InvalidCursor => {
                tracing::debug!("rejected request: {}", err);
                AppError::bad_request(err.to_string())
            }
            StorageError::RangeNotSatisfiable { .. } => {
                AppError::new(StatusCode::RANGE_NOT_SATISFIABLE, err.to_string())
            }
            StorageError::Metadata(_) | StorageError::Sqlx(_) | StorageError::Io(_) => {
                tracing::error!("storage failure: {}", err);
                AppError::internal("Internal Server Error")
            }
        }
    }
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::AlreadyLocked => AppError::locked("Locked"),
            LockError::Malformed(reason) => {
                tracing::debug!("rejected lock request: {}", reason);
                AppError::malformed(reason)
            }
            LockError::Store(err) => {
                tracing::error!("lock store failure: {}", err);
                AppError::internal("Internal Server Error")
            }
        }
    }
}

impl From<XmlError> for AppError {
    fn from(err: XmlError) -> Self {
        tracing::debug!("rejected request body: {}", err);
        AppError::bad_request(err.to_string())
    }
}
