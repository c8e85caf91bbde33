//! Swift-style HTTP errors.
//!
//! Every variant maps to one status code.  The enum implements
//! [`axum::response::IntoResponse`] so handlers can simply return
//! `Err(SwiftError::NotFound)`.  Bodies are short plain-text messages.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::storage::StorageError;

/// Generate a transaction id: `tx` followed by 32 hex digits.
pub fn generate_trans_id() -> String {
    let bytes: [u8; 16] = rand::random();
    format!("tx{}", hex::encode(bytes))
}

/// Errors a request handler can return.
#[derive(Debug, Error)]
pub enum SwiftError {
    /// Malformed request or a name/metadata constraint violation.
    #[error("{message}")]
    BadRequest { message: String },

    #[error("The resource could not be found.")]
    NotFound,

    #[error("The requested method is not allowed for this resource.")]
    MethodNotAllowed { allow: &'static str },

    #[error("{message}")]
    Conflict { message: String },

    #[error("Missing Content-Length or Transfer-Encoding header.")]
    LengthRequired,

    #[error("{message}")]
    PreconditionFailed { message: String },

    #[error("Your request is too large.")]
    RequestEntityTooLarge,

    #[error("The Range requested is not available.")]
    RangeNotSatisfiable { size: u64 },

    /// The body's md5 did not match the `ETag` the client sent.
    #[error("Unable to process the contained instructions")]
    UnprocessableEntity,

    /// Fewer bytes arrived than were declared.
    #[error("Client disconnected before sending the full body.")]
    ClientDisconnect,

    #[error("Not Modified")]
    NotModified { etag: String },

    #[error("The server is currently unavailable. Please try again at a later time.")]
    ServiceUnavailable,

    #[error("There was not enough space to save the resource.")]
    InsufficientStorage,

    /// Catch-all for unexpected internal errors.
    #[error("An error occurred while processing the request.")]
    InternalError(#[from] anyhow::Error),
}

impl SwiftError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        SwiftError::BadRequest {
            message: message.into(),
        }
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        SwiftError::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Short name for logs.
    pub fn code(&self) -> &'static str {
        match self {
            SwiftError::BadRequest { .. } => "BadRequest",
            SwiftError::NotFound => "NotFound",
            SwiftError::MethodNotAllowed { .. } => "MethodNotAllowed",
            SwiftError::Conflict { .. } => "Conflict",
            SwiftError::LengthRequired => "LengthRequired",
            SwiftError::PreconditionFailed { .. } => "PreconditionFailed",
            SwiftError::RequestEntityTooLarge => "RequestEntityTooLarge",
            SwiftError::RangeNotSatisfiable { .. } => "RangeNotSatisfiable",
            SwiftError::UnprocessableEntity => "UnprocessableEntity",
            SwiftError::ClientDisconnect => "ClientDisconnect",
            SwiftError::NotModified { .. } => "NotModified",
            SwiftError::ServiceUnavailable => "ServiceUnavailable",
            SwiftError::InsufficientStorage => "InsufficientStorage",
            SwiftError::InternalError(_) => "InternalError",
        }
    }

    /// Return the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SwiftError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            SwiftError::NotFound => StatusCode::NOT_FOUND,
            SwiftError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            SwiftError::Conflict { .. } => StatusCode::CONFLICT,
            SwiftError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            SwiftError::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            SwiftError::RequestEntityTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            SwiftError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            SwiftError::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
            SwiftError::ClientDisconnect => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
            SwiftError::NotModified { .. } => StatusCode::NOT_MODIFIED,
            SwiftError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            SwiftError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
            SwiftError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for SwiftError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound
            | StorageError::Expired { .. }
            | StorageError::ContainerNotFound { .. }
            | StorageError::VolumeNotInRing { .. } => SwiftError::NotFound,
            StorageError::AlreadyExistsAsDir { .. } => SwiftError::Conflict {
                message: "Object already exists as a directory".to_string(),
            },
            StorageError::AlreadyExistsAsFile { .. } => SwiftError::Conflict {
                message: "A parent of the object already exists as a file".to_string(),
            },
            StorageError::NotEmpty => SwiftError::Conflict {
                message: "There was a conflict when trying to complete your request."
                    .to_string(),
            },
            StorageError::NoSpace(_) | StorageError::NotMounted { .. } => {
                SwiftError::InsufficientStorage
            }
            StorageError::ContainerGone { .. }
            | StorageError::TempAlreadyRenamed { .. }
            | StorageError::DatadirGone { .. } => SwiftError::ServiceUnavailable,
            StorageError::EtagMismatch { .. } => SwiftError::UnprocessableEntity,
            StorageError::ClientDisconnect { .. } => SwiftError::ClientDisconnect,
            StorageError::Fs(e) => SwiftError::InternalError(anyhow::Error::new(e)),
            StorageError::Internal(e) => SwiftError::InternalError(e),
        }
    }
}

impl IntoResponse for SwiftError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let SwiftError::InternalError(e) = &self {
            error!("internal error: {e:#}");
        }

        match &self {
            // 304 responses must not have a body.
            SwiftError::NotModified { etag } => {
                let mut response = status.into_response();
                if let Ok(value) = HeaderValue::from_str(etag) {
                    response.headers_mut().insert(header::ETAG, value);
                }
                return response;
            }
            SwiftError::MethodNotAllowed { allow } => {
                let mut response = (status, self.to_string()).into_response();
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static(allow));
                return response;
            }
            SwiftError::RangeNotSatisfiable { size } => {
                let mut response = (status, self.to_string()).into_response();
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
                return response;
            }
            _ => {}
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
