use crate::services::{gateway::StorageError, tag_catalog::CatalogError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// One item a bulk operation could not process.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BulkItemFailure {
    pub bucket: String,
    pub key: String,
    pub reason: String,
}

/// Errors raised by the versioning layer.
#[derive(Debug, Error)]
pub enum VersioningError {
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("`{0}` has no versions yet; upload it as a new document first")]
    LogicalDocumentNotFound(String),
    #[error("no versions of `{0}` found")]
    NoVersionsFound(String),
    #[error("`{0}` is not a versioned key (expected `name_vN.ext`)")]
    MalformedKey(String),
    #[error("invalid file name `{name}`: {reason}")]
    InvalidFileName { name: String, reason: &'static str },
    #[error("{count} tags supplied, at most {max} allowed")]
    TooManyTags { count: usize, max: usize },
    #[error("tag operation on `{key}` failed: {reason}")]
    TagOperationFailed { key: String, reason: String },
    #[error(
        "{operation}: {} of {} items failed",
        .failures.len(),
        .succeeded + .failures.len()
    )]
    PartialBulkFailure {
        operation: &'static str,
        succeeded: usize,
        failures: Vec<BulkItemFailure>,
    },
    #[error("could not claim a new version of `{base_file_name}` after {attempts} attempts")]
    VersionConflict { base_file_name: String, attempts: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type VersioningResult<T> = Result<T, VersioningError>;

/// A lightweight wrapper for general errors that keeps the message local.
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

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
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
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::BucketNotFound(_) | StorageError::ObjectNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            StorageError::AlreadyExists { .. } => StatusCode::CONFLICT,
            StorageError::InvalidObjectKey
            | StorageError::InvalidBucketName { .. }
            | StorageError::TooManyTags { .. } => StatusCode::BAD_REQUEST,
            StorageError::Sqlx(_) | StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<VersioningError> for AppError {
    fn from(err: VersioningError) -> Self {
        let status = match &err {
            VersioningError::NotFound(_)
            | VersioningError::LogicalDocumentNotFound(_)
            | VersioningError::NoVersionsFound(_) => StatusCode::NOT_FOUND,
            VersioningError::MalformedKey(_)
            | VersioningError::InvalidFileName { .. }
            | VersioningError::TooManyTags { .. } => StatusCode::BAD_REQUEST,
            VersioningError::VersionConflict { .. } => StatusCode::CONFLICT,
            VersioningError::TagOperationFailed { .. }
            | VersioningError::PartialBulkFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            VersioningError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if let VersioningError::Storage(inner) = err {
            return AppError::from(inner);
        }
        AppError::new(status, err.to_string())
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let status = match &err {
            CatalogError::TagNotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::InvalidTagName { .. } | CatalogError::UnknownTag(_) => {
                StatusCode::BAD_REQUEST
            }
            CatalogError::TagAlreadyExists(_) => StatusCode::CONFLICT,
            CatalogError::Sqlx(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}
